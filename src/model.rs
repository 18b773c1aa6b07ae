//! Candidate model definitions and fitted pipelines
//!
//! The set of supported algorithms is a closed enum rather than a
//! string-keyed registry, so an unsupported candidate is unrepresentable.
//! Every candidate fits through the shared [`FeaturePreprocessor`] and owns
//! its classifier; the explicit seed makes each fit reproducible.

use linfa::prelude::*;
use linfa_logistic::{FittedLogisticRegression, LogisticRegression};
use linfa_trees::DecisionTree;
use ndarray::{Array1, Array2, Axis};
use rand::distributions::{Distribution, WeightedIndex};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use serde::Serialize;

use crate::preprocess::{FeatureFrame, FeaturePreprocessor};

/// Hyperparameters for the class-balanced linear candidate.
#[derive(Debug, Clone, Serialize)]
pub struct LogisticParams {
    pub max_iterations: u64,
    /// Balance classes by deterministic minority oversampling before the fit.
    pub balanced: bool,
}

/// Hyperparameters for the bagged tree ensemble.
#[derive(Debug, Clone, Serialize)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: Option<usize>,
}

/// Hyperparameters for the boosted tree ensemble.
#[derive(Debug, Clone, Serialize)]
pub struct BoostParams {
    pub n_rounds: usize,
    pub max_depth: usize,
}

/// A configured candidate: algorithm identity plus fixed hyperparameters.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CandidateSpec {
    LogisticRegression(LogisticParams),
    RandomForest(ForestParams),
    GradientBoosting(BoostParams),
}

impl CandidateSpec {
    pub fn name(&self) -> &'static str {
        match self {
            CandidateSpec::LogisticRegression(_) => "logistic_regression",
            CandidateSpec::RandomForest(_) => "random_forest",
            CandidateSpec::GradientBoosting(_) => "gradient_boosting",
        }
    }

    /// The default candidate roster: one linear classifier with class
    /// balancing, one bagged tree ensemble, one boosted tree ensemble.
    pub fn default_candidates() -> Vec<CandidateSpec> {
        vec![
            CandidateSpec::LogisticRegression(LogisticParams {
                max_iterations: 1000,
                balanced: true,
            }),
            CandidateSpec::RandomForest(ForestParams {
                n_trees: 200,
                max_depth: None,
            }),
            CandidateSpec::GradientBoosting(BoostParams {
                n_rounds: 100,
                max_depth: 3,
            }),
        ]
    }

    /// Factory: fit this candidate's classifier on the transformed training
    /// matrix.
    pub fn fit(&self, x: &Array2<f64>, y: &Array1<usize>, seed: u64) -> crate::Result<FittedClassifier> {
        if x.nrows() == 0 || x.nrows() != y.len() {
            anyhow::bail!(
                "training matrix shape mismatch: {} rows, {} labels",
                x.nrows(),
                y.len()
            );
        }
        match self {
            CandidateSpec::LogisticRegression(params) => fit_logistic(x, y, params),
            CandidateSpec::RandomForest(params) => fit_bagged(x, y, params, seed),
            CandidateSpec::GradientBoosting(params) => fit_boosted(x, y, params, seed),
        }
    }
}

/// Bootstrap-aggregated decision trees; probability is the positive vote
/// fraction.
pub struct BaggedTrees {
    trees: Vec<DecisionTree<f64, usize>>,
}

/// AdaBoost-by-weighted-resampling over shallow decision trees; probability
/// is the normalized positive stage-weight mass rescaled to [0, 1].
pub struct BoostedTrees {
    stages: Vec<(DecisionTree<f64, usize>, f64)>,
}

pub enum FittedClassifier {
    Logistic(FittedLogisticRegression<f64, usize>),
    Forest(BaggedTrees),
    Boosted(BoostedTrees),
}

impl FittedClassifier {
    /// Hard labels, positive class = 1.
    pub fn predict(&self, x: &Array2<f64>) -> Array1<usize> {
        match self {
            FittedClassifier::Logistic(model) => model.predict(x),
            _ => self.predict_proba(x).mapv(|p| usize::from(p >= 0.5)),
        }
    }

    /// Positive-class probability per row.
    pub fn predict_proba(&self, x: &Array2<f64>) -> Array1<f64> {
        match self {
            FittedClassifier::Logistic(model) => model.predict_probabilities(x),
            FittedClassifier::Forest(forest) => {
                let mut votes = Array1::<f64>::zeros(x.nrows());
                for tree in &forest.trees {
                    let pred = tree.predict(x);
                    for (vote, &label) in votes.iter_mut().zip(pred.iter()) {
                        if label == 1 {
                            *vote += 1.0;
                        }
                    }
                }
                votes / forest.trees.len() as f64
            }
            FittedClassifier::Boosted(boosted) => {
                let alpha_total: f64 = boosted.stages.iter().map(|(_, alpha)| alpha).sum();
                let mut margin = Array1::<f64>::zeros(x.nrows());
                for (tree, alpha) in &boosted.stages {
                    let pred = tree.predict(x);
                    for (m, &label) in margin.iter_mut().zip(pred.iter()) {
                        *m += alpha * if label == 1 { 1.0 } else { -1.0 };
                    }
                }
                margin.mapv(|m| (m / alpha_total + 1.0) / 2.0)
            }
        }
    }
}

/// A fitted preprocessing + classifier pipeline, the unit handed to the
/// experiment tracker and consumed by downstream serving.
pub struct FittedPipeline {
    pub preprocessor: FeaturePreprocessor,
    pub classifier: FittedClassifier,
}

impl FittedPipeline {
    pub fn predict(&self, frame: &FeatureFrame) -> crate::Result<Array1<usize>> {
        let x = self.preprocessor.transform(frame)?;
        Ok(self.classifier.predict(&x))
    }

    pub fn predict_proba(&self, frame: &FeatureFrame) -> crate::Result<Array1<f64>> {
        let x = self.preprocessor.transform(frame)?;
        Ok(self.classifier.predict_proba(&x))
    }
}

fn fit_logistic(
    x: &Array2<f64>,
    y: &Array1<usize>,
    params: &LogisticParams,
) -> crate::Result<FittedClassifier> {
    let (x, y) = if params.balanced {
        balance_by_oversampling(x, y)
    } else {
        (x.clone(), y.clone())
    };
    let dataset = Dataset::new(x, y);
    let model = LogisticRegression::default()
        .max_iterations(params.max_iterations)
        .fit(&dataset)?;
    Ok(FittedClassifier::Logistic(model))
}

fn fit_bagged(
    x: &Array2<f64>,
    y: &Array1<usize>,
    params: &ForestParams,
    seed: u64,
) -> crate::Result<FittedClassifier> {
    if params.n_trees == 0 {
        anyhow::bail!("bagged ensemble requires at least one tree");
    }
    let n = x.nrows();
    let mut rng = Xoshiro256Plus::seed_from_u64(seed);
    let mut trees = Vec::with_capacity(params.n_trees);
    for _ in 0..params.n_trees {
        let indices: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
        let dataset = Dataset::new(x.select(Axis(0), &indices), y.select(Axis(0), &indices));
        let tree = DecisionTree::params()
            .max_depth(params.max_depth)
            .fit(&dataset)?;
        trees.push(tree);
    }
    Ok(FittedClassifier::Forest(BaggedTrees { trees }))
}

fn fit_boosted(
    x: &Array2<f64>,
    y: &Array1<usize>,
    params: &BoostParams,
    seed: u64,
) -> crate::Result<FittedClassifier> {
    let n = x.nrows();
    let mut rng = Xoshiro256Plus::seed_from_u64(seed);
    let mut weights = vec![1.0 / n as f64; n];
    let mut stages: Vec<(DecisionTree<f64, usize>, f64)> = Vec::new();

    for _ in 0..params.n_rounds {
        let dist = WeightedIndex::new(&weights)?;
        let indices: Vec<usize> = (0..n).map(|_| dist.sample(&mut rng)).collect();
        let dataset = Dataset::new(x.select(Axis(0), &indices), y.select(Axis(0), &indices));
        let tree = DecisionTree::params()
            .max_depth(Some(params.max_depth))
            .fit(&dataset)?;

        let pred = tree.predict(x);
        let err: f64 = weights
            .iter()
            .zip(pred.iter().zip(y.iter()))
            .filter(|(_, (p, t))| p != t)
            .map(|(w, _)| w)
            .sum();

        if err < 1e-12 {
            // Perfect stage: give it a large but finite say and stop early.
            stages.push((tree, 6.0));
            break;
        }
        if err >= 0.5 {
            // No better than chance on the weighted sample; discard the round.
            continue;
        }

        let alpha = 0.5 * ((1.0 - err) / err).ln();
        for (w, (p, t)) in weights.iter_mut().zip(pred.iter().zip(y.iter())) {
            let agreement = if p == t { 1.0 } else { -1.0 };
            *w *= (-alpha * agreement).exp();
        }
        let total: f64 = weights.iter().sum();
        for w in &mut weights {
            *w /= total;
        }
        stages.push((tree, alpha));
    }

    if stages.is_empty() {
        anyhow::bail!("boosting produced no stage better than chance");
    }
    Ok(FittedClassifier::Boosted(BoostedTrees { stages }))
}

/// Duplicate minority rows (cycling in order, no randomness) until both
/// classes have equal counts.
fn balance_by_oversampling(x: &Array2<f64>, y: &Array1<usize>) -> (Array2<f64>, Array1<usize>) {
    let positives: Vec<usize> = (0..y.len()).filter(|&i| y[i] == 1).collect();
    let negatives: Vec<usize> = (0..y.len()).filter(|&i| y[i] == 0).collect();
    if positives.is_empty() || negatives.is_empty() || positives.len() == negatives.len() {
        return (x.clone(), y.clone());
    }

    let minority = if positives.len() < negatives.len() {
        &positives
    } else {
        &negatives
    };
    let deficit = positives.len().abs_diff(negatives.len());

    let mut rows: Vec<usize> = (0..y.len()).collect();
    rows.extend((0..deficit).map(|i| minority[i % minority.len()]));

    let x_balanced = x.select(Axis(0), &rows);
    let y_balanced = Array1::from_iter(rows.iter().map(|&i| y[i]));
    (x_balanced, y_balanced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    /// Linearly separable two-feature data: negatives in the lower-left,
    /// positives in the upper-right.
    fn separable_data() -> (Array2<f64>, Array1<usize>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..10 {
            let jitter = i as f64 * 0.05;
            rows.extend_from_slice(&[-1.0 - jitter, -1.0 + jitter]);
            labels.push(0usize);
            rows.extend_from_slice(&[1.0 + jitter, 1.0 - jitter]);
            labels.push(1usize);
        }
        (
            Array2::from_shape_vec((20, 2), rows).unwrap(),
            Array1::from_vec(labels),
        )
    }

    #[test]
    fn test_each_candidate_separates_training_data() {
        let (x, y) = separable_data();
        for spec in CandidateSpec::default_candidates() {
            let classifier = spec.fit(&x, &y, 42).unwrap();
            let pred = classifier.predict(&x);
            assert_eq!(pred, y, "candidate {} misclassified", spec.name());

            let proba = classifier.predict_proba(&x);
            for (&p, &label) in proba.iter().zip(y.iter()) {
                assert!((0.0..=1.0).contains(&p));
                if label == 1 {
                    assert!(p >= 0.5);
                } else {
                    assert!(p <= 0.5);
                }
            }
        }
    }

    #[test]
    fn test_ensembles_are_deterministic_for_fixed_seed() {
        let (x, y) = separable_data();
        for spec in [
            CandidateSpec::RandomForest(ForestParams {
                n_trees: 25,
                max_depth: Some(4),
            }),
            CandidateSpec::GradientBoosting(BoostParams {
                n_rounds: 10,
                max_depth: 2,
            }),
        ] {
            let a = spec.fit(&x, &y, 7).unwrap().predict_proba(&x);
            let b = spec.fit(&x, &y, 7).unwrap().predict_proba(&x);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_oversampling_balances_classes() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = array![1, 0, 0, 0];
        let (x_balanced, y_balanced) = balance_by_oversampling(&x, &y);
        let positives = y_balanced.iter().filter(|&&v| v == 1).count();
        let negatives = y_balanced.iter().filter(|&&v| v == 0).count();
        assert_eq!(positives, negatives);
        assert_eq!(x_balanced.nrows(), y_balanced.len());
        // Duplicated rows are copies of the minority sample.
        assert!(x_balanced
            .outer_iter()
            .zip(y_balanced.iter())
            .filter(|(_, &label)| label == 1)
            .all(|(row, _)| row[0] == 0.0));
    }

    #[test]
    fn test_logistic_single_class_fails_to_fit() {
        let x = array![[0.0, 1.0], [1.0, 0.0], [0.5, 0.5]];
        let y = array![1, 1, 1];
        let spec = CandidateSpec::LogisticRegression(LogisticParams {
            max_iterations: 100,
            balanced: true,
        });
        assert!(spec.fit(&x, &y, 1).is_err());
    }

    #[test]
    fn test_ensembles_tolerate_single_class() {
        let x = array![[0.0, 1.0], [1.0, 0.0], [0.5, 0.5]];
        let y = array![0, 0, 0];
        let forest = CandidateSpec::RandomForest(ForestParams {
            n_trees: 5,
            max_depth: Some(2),
        })
        .fit(&x, &y, 1)
        .unwrap();
        assert_eq!(forest.predict(&x), y);

        let boosted = CandidateSpec::GradientBoosting(BoostParams {
            n_rounds: 5,
            max_depth: 2,
        })
        .fit(&x, &y, 1)
        .unwrap();
        assert_eq!(boosted.predict(&x), y);
    }
}
