//! Proxy risk label derivation: seeded k-means over standardized RFM
//!
//! No ground-truth default label exists in the ledger, so risk is
//! approximated by behavioral clustering: the cluster whose members are the
//! most stale (maximum mean recency) is designated high risk.

use linfa::prelude::*;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use log::info;
use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;

use crate::error::PipelineError;
use crate::features::{CustomerFeatureVector, LabeledCustomer};
use crate::preprocess::StandardScaler;

/// Per-customer clustering result. Recomputed each run.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterAssignment {
    pub customer_id: String,
    pub cluster: usize,
    pub is_high_risk: u8,
}

/// Mean raw RFM profile of one cluster, for auditing the high-risk choice.
#[derive(Debug, Clone)]
pub struct ClusterProfile {
    pub cluster: usize,
    pub size: usize,
    pub mean_recency: f64,
    pub mean_frequency: f64,
    pub mean_monetary: f64,
}

#[derive(Debug, Clone)]
pub struct LabelingOutcome {
    /// Aligned with the input customer slice.
    pub assignments: Vec<ClusterAssignment>,
    pub high_risk_cluster: usize,
    pub profiles: Vec<ClusterProfile>,
}

/// Cluster customers on standardized RFM and flag the high-risk cluster.
///
/// The RFM standardization is fitted on the full customer population; the
/// clustering seed is an explicit parameter so identical input and seed
/// always reproduce identical cluster ids and labels. Fails with
/// [`PipelineError::DegenerateClustering`] when fewer distinct customers
/// exist than requested clusters; the cluster count is never silently
/// reduced.
pub fn assign_high_risk_labels(
    customers: &[CustomerFeatureVector],
    n_clusters: usize,
    seed: u64,
    max_iters: u64,
    tolerance: f64,
) -> crate::Result<LabelingOutcome> {
    if customers.len() < n_clusters {
        return Err(PipelineError::DegenerateClustering {
            distinct: customers.len(),
            requested: n_clusters,
        }
        .into());
    }

    let n = customers.len();
    let mut raw = Array2::zeros((n, 3));
    for (i, c) in customers.iter().enumerate() {
        raw[[i, 0]] = c.recency_days;
        raw[[i, 1]] = c.frequency as f64;
        raw[[i, 2]] = c.monetary;
    }

    let scaled = StandardScaler::fit(&raw).transform(&raw);
    let dataset = Dataset::new(scaled, Array1::<usize>::zeros(n));

    let rng = Xoshiro256Plus::seed_from_u64(seed);
    let model = KMeans::params_with(n_clusters, rng, L2Dist)
        .max_n_iterations(max_iters)
        .tolerance(tolerance)
        .fit(&dataset)?;
    let labels = model.predict(&dataset);

    let profiles = profile_clusters(&raw, &labels, n_clusters);
    let high_risk_cluster = select_high_risk_cluster(&profiles);

    let assignments: Vec<ClusterAssignment> = customers
        .iter()
        .zip(labels.iter())
        .map(|(c, &cluster)| ClusterAssignment {
            customer_id: c.customer_id.clone(),
            cluster,
            is_high_risk: u8::from(cluster == high_risk_cluster),
        })
        .collect();

    let high_risk_share =
        assignments.iter().filter(|a| a.is_high_risk == 1).count() as f64 / n as f64;
    info!(
        "high-risk cluster = {} (mean recency {:.1}d, {:.1}% of customers)",
        high_risk_cluster,
        profiles[high_risk_cluster].mean_recency,
        high_risk_share * 100.0
    );

    Ok(LabelingOutcome {
        assignments,
        high_risk_cluster,
        profiles,
    })
}

fn profile_clusters(raw: &Array2<f64>, labels: &Array1<usize>, n_clusters: usize) -> Vec<ClusterProfile> {
    let mut sums = vec![[0.0f64; 3]; n_clusters];
    let mut sizes = vec![0usize; n_clusters];
    for (i, &cluster) in labels.iter().enumerate() {
        if cluster < n_clusters {
            sizes[cluster] += 1;
            for j in 0..3 {
                sums[cluster][j] += raw[[i, j]];
            }
        }
    }
    (0..n_clusters)
        .map(|cluster| {
            let size = sizes[cluster];
            let denom = size.max(1) as f64;
            ClusterProfile {
                cluster,
                size,
                mean_recency: sums[cluster][0] / denom,
                mean_frequency: sums[cluster][1] / denom,
                mean_monetary: sums[cluster][2] / denom,
            }
        })
        .collect()
}

/// High risk = maximum mean recency among non-empty clusters. Exact ties go
/// to the lowest cluster index; the tie-break is a documented arbitrary
/// choice, not risk-motivated, which is why the chosen profile is logged for
/// every run.
fn select_high_risk_cluster(profiles: &[ClusterProfile]) -> usize {
    let mut best = 0usize;
    let mut best_recency = f64::NEG_INFINITY;
    for profile in profiles {
        if profile.size > 0 && profile.mean_recency > best_recency {
            best_recency = profile.mean_recency;
            best = profile.cluster;
        }
    }
    best
}

/// Merge labels back onto the feature table for persistence.
pub fn merge_labels(
    customers: &[CustomerFeatureVector],
    outcome: &LabelingOutcome,
) -> Vec<LabeledCustomer> {
    customers
        .iter()
        .zip(outcome.assignments.iter())
        .map(|(c, a)| LabeledCustomer {
            customer_id: c.customer_id.clone(),
            recency_days: c.recency_days,
            frequency: c.frequency,
            monetary: c.monetary,
            cluster: a.cluster,
            is_high_risk: a.is_high_risk,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer(id: &str, recency: f64, frequency: u64, monetary: f64) -> CustomerFeatureVector {
        CustomerFeatureVector {
            customer_id: id.to_string(),
            recency_days: recency,
            frequency,
            monetary,
            avg_value: monetary / frequency as f64,
            product_category: "airtime".to_string(),
            channel_id: None,
            pricing_strategy: None,
        }
    }

    /// Three well-separated behavioral groups.
    fn varied_population() -> Vec<CustomerFeatureVector> {
        vec![
            // Dormant: very stale, rare, small.
            customer("D1", 310.0, 1, 12.0),
            customer("D2", 300.0, 2, 18.0),
            customer("D3", 320.0, 1, 9.0),
            // Mid-range.
            customer("M1", 30.0, 10, 520.0),
            customer("M2", 35.0, 12, 480.0),
            customer("M3", 28.0, 9, 560.0),
            // Active: recent, frequent, heavy spenders.
            customer("A1", 1.0, 52, 5200.0),
            customer("A2", 3.0, 48, 4900.0),
            customer("A3", 2.0, 50, 5100.0),
        ]
    }

    #[test]
    fn test_degenerate_population_fails() {
        let customers = vec![customer("C1", 10.0, 1, 5.0), customer("C2", 20.0, 2, 9.0)];
        let err = assign_high_risk_labels(&customers, 3, 42, 300, 1e-4).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::DegenerateClustering {
                distinct: 2,
                requested: 3
            })
        ));
    }

    #[test]
    fn test_every_customer_gets_one_cluster() {
        let customers = varied_population();
        let outcome = assign_high_risk_labels(&customers, 3, 42, 300, 1e-4).unwrap();
        assert_eq!(outcome.assignments.len(), customers.len());
        for a in &outcome.assignments {
            assert!(a.cluster < 3);
            assert!(a.is_high_risk == 0 || a.is_high_risk == 1);
        }
        let total: usize = outcome.profiles.iter().map(|p| p.size).sum();
        assert_eq!(total, customers.len());
    }

    #[test]
    fn test_labels_are_deterministic_for_fixed_seed() {
        let customers = varied_population();
        let first = assign_high_risk_labels(&customers, 3, 42, 300, 1e-4).unwrap();
        let second = assign_high_risk_labels(&customers, 3, 42, 300, 1e-4).unwrap();
        assert_eq!(first.assignments, second.assignments);
        assert_eq!(first.high_risk_cluster, second.high_risk_cluster);
    }

    #[test]
    fn test_dormant_cluster_is_flagged_high_risk() {
        let customers = varied_population();
        let outcome = assign_high_risk_labels(&customers, 3, 42, 300, 1e-4).unwrap();

        let by_id = |id: &str| {
            outcome
                .assignments
                .iter()
                .find(|a| a.customer_id == id)
                .unwrap()
        };
        let dormant = by_id("D1");
        let active = by_id("A1");

        // The behavioral extremes land in different clusters, and the stale
        // one carries the risk flag.
        assert_ne!(dormant.cluster, active.cluster);
        assert_eq!(dormant.is_high_risk, 1);
        assert_eq!(active.is_high_risk, 0);

        // Labeling is not degenerate: mean strictly between 0 and 1.
        let mean = outcome
            .assignments
            .iter()
            .map(|a| a.is_high_risk as f64)
            .sum::<f64>()
            / outcome.assignments.len() as f64;
        assert!(mean > 0.0 && mean < 1.0);
    }

    #[test]
    fn test_high_risk_tie_breaks_to_lowest_index() {
        let profiles = vec![
            ClusterProfile {
                cluster: 0,
                size: 3,
                mean_recency: 50.0,
                mean_frequency: 2.0,
                mean_monetary: 10.0,
            },
            ClusterProfile {
                cluster: 1,
                size: 3,
                mean_recency: 50.0,
                mean_frequency: 9.0,
                mean_monetary: 90.0,
            },
            ClusterProfile {
                cluster: 2,
                size: 3,
                mean_recency: 10.0,
                mean_frequency: 1.0,
                mean_monetary: 5.0,
            },
        ];
        assert_eq!(select_high_risk_cluster(&profiles), 0);
    }

    #[test]
    fn test_empty_cluster_cannot_be_high_risk() {
        let profiles = vec![
            ClusterProfile {
                cluster: 0,
                size: 0,
                mean_recency: 0.0,
                mean_frequency: 0.0,
                mean_monetary: 0.0,
            },
            ClusterProfile {
                cluster: 1,
                size: 5,
                mean_recency: 40.0,
                mean_frequency: 3.0,
                mean_monetary: 100.0,
            },
        ];
        assert_eq!(select_high_risk_cluster(&profiles), 1);
    }

    #[test]
    fn test_merge_labels_preserves_order_and_columns() {
        let customers = varied_population();
        let outcome = assign_high_risk_labels(&customers, 3, 7, 300, 1e-4).unwrap();
        let table = merge_labels(&customers, &outcome);
        assert_eq!(table.len(), customers.len());
        for (row, customer) in table.iter().zip(customers.iter()) {
            assert_eq!(row.customer_id, customer.customer_id);
            assert_eq!(row.monetary, customer.monetary);
        }
    }
}
