//! Customer-level feature aggregation (RFM plus dominant categorical attributes)

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use crate::data::TransactionRecord;

/// One derived feature vector per distinct customer. Never mutated after
/// aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerFeatureVector {
    pub customer_id: String,
    /// Days between the customer's latest transaction and the snapshot date.
    pub recency_days: f64,
    /// Number of transactions in the group.
    pub frequency: u64,
    /// Sum of transaction values in the group.
    pub monetary: f64,
    /// `monetary / frequency`.
    pub avg_value: f64,
    pub product_category: String,
    pub channel_id: Option<String>,
    pub pricing_strategy: Option<String>,
}

impl CustomerFeatureVector {
    /// Numeric feature lookup by column name, for schema-driven preprocessing.
    pub fn numeric_value(&self, column: &str) -> Option<f64> {
        match column {
            "recency_days" => Some(self.recency_days),
            "frequency" => Some(self.frequency as f64),
            "monetary" => Some(self.monetary),
            "avg_value" => Some(self.avg_value),
            _ => None,
        }
    }

    /// Categorical feature lookup by column name.
    pub fn categorical_value(&self, column: &str) -> Option<&str> {
        match column {
            "ProductCategory" => Some(self.product_category.as_str()),
            "ChannelId" => self.channel_id.as_deref(),
            "PricingStrategy" => self.pricing_strategy.as_deref(),
            _ => None,
        }
    }
}

/// Reference date for recency: one day after the latest parseable transaction
/// timestamp, so every customer's recency is strictly positive.
pub fn snapshot_date(rows: &[TransactionRecord]) -> Option<DateTime<Utc>> {
    rows.iter()
        .filter_map(|row| row.timestamp)
        .max()
        .map(|latest| latest + Duration::days(1))
}

/// Collapse transaction rows into one feature vector per distinct customer.
///
/// Rows without a parseable timestamp are excluded before grouping. Output is
/// ordered by customer id so downstream joins are reproducible regardless of
/// input row order.
pub fn aggregate_customers(rows: &[TransactionRecord]) -> crate::Result<Vec<CustomerFeatureVector>> {
    let dated: Vec<&TransactionRecord> = rows.iter().filter(|r| r.timestamp.is_some()).collect();
    if dated.is_empty() {
        anyhow::bail!("no transactions with parseable timestamps; cannot aggregate");
    }

    let snapshot = snapshot_date(rows)
        .ok_or_else(|| anyhow::anyhow!("no parseable timestamps; cannot derive snapshot date"))?;

    let mut groups: BTreeMap<&str, Vec<&TransactionRecord>> = BTreeMap::new();
    for row in dated {
        groups.entry(row.customer_id.as_str()).or_default().push(row);
    }

    let mut customers = Vec::with_capacity(groups.len());
    for (customer_id, group) in groups {
        let latest = match group.iter().filter_map(|r| r.timestamp).max() {
            Some(latest) => latest,
            None => continue,
        };
        let frequency = group.len() as u64;
        let monetary: f64 = group.iter().map(|r| r.value).sum();

        customers.push(CustomerFeatureVector {
            customer_id: customer_id.to_string(),
            recency_days: (snapshot - latest).num_days() as f64,
            frequency,
            monetary,
            avg_value: monetary / frequency as f64,
            product_category: dominant_value(group.iter().map(|r| r.product_category.as_str()))
                .unwrap_or_default(),
            channel_id: dominant_value(group.iter().filter_map(|r| r.channel_id.as_deref())),
            pricing_strategy: dominant_value(
                group.iter().filter_map(|r| r.pricing_strategy.as_deref()),
            ),
        });
    }

    info!(
        "aggregated {} transactions into {} customers (snapshot {})",
        rows.len(),
        customers.len(),
        snapshot
    );
    Ok(customers)
}

/// Most frequent value in the group. Ties resolve to the lexicographically
/// smallest value so the result does not depend on input row order.
fn dominant_value<'a>(values: impl Iterator<Item = &'a str>) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by(|(a_val, a_count), (b_val, b_count)| {
            a_count.cmp(b_count).then(b_val.cmp(a_val))
        })
        .map(|(value, _)| value.to_string())
}

/// Persisted row of the customer feature + label table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabeledCustomer {
    #[serde(rename = "CustomerId")]
    pub customer_id: String,
    pub recency_days: f64,
    pub frequency: u64,
    pub monetary: f64,
    pub cluster: usize,
    pub is_high_risk: u8,
}

/// Write the labeled feature table as CSV, creating parent directories.
pub fn write_labeled_table(path: &Path, rows: &[LabeledCustomer]) -> crate::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    info!("wrote {} labeled customers to {}", rows.len(), path.display());
    Ok(())
}

/// Read a labeled feature table back from CSV.
pub fn read_labeled_table(path: &Path) -> crate::Result<Vec<LabeledCustomer>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for result in reader.deserialize() {
        rows.push(result?);
    }
    Ok(rows)
}
