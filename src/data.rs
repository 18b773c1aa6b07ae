//! Transaction ingest: CSV loading, schema validation, timestamp parsing

use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use csv::StringRecord;
use log::{info, warn};

use crate::error::PipelineError;

/// Columns that must be present in the raw transaction file.
pub const REQUIRED_COLUMNS: [&str; 5] = [
    "TransactionId",
    "CustomerId",
    "TransactionStartTime",
    "Value",
    "ProductCategory",
];

/// One immutable row of the raw transaction ledger.
///
/// `timestamp` is `None` when the raw value could not be parsed; such rows
/// are excluded before aggregation rather than failing the whole load.
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    pub transaction_id: String,
    pub customer_id: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub value: f64,
    pub product_category: String,
    pub channel_id: Option<String>,
    pub pricing_strategy: Option<String>,
}

/// Resolved header positions for the transaction file.
struct ColumnIndex {
    transaction_id: usize,
    customer_id: usize,
    timestamp: usize,
    value: usize,
    product_category: usize,
    channel_id: Option<usize>,
    pricing_strategy: Option<usize>,
}

impl ColumnIndex {
    fn resolve(headers: &StringRecord) -> Result<Self, PipelineError> {
        let find = |name: &str| headers.iter().position(|h| h == name);

        let missing: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .filter(|name| find(name).is_none())
            .map(|name| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::Schema { missing });
        }

        Ok(Self {
            transaction_id: find("TransactionId").unwrap(),
            customer_id: find("CustomerId").unwrap(),
            timestamp: find("TransactionStartTime").unwrap(),
            value: find("Value").unwrap(),
            product_category: find("ProductCategory").unwrap(),
            channel_id: find("ChannelId"),
            pricing_strategy: find("PricingStrategy"),
        })
    }
}

/// Load and validate the raw transaction file.
///
/// Fails with [`PipelineError::MissingInput`] when the file does not exist
/// and [`PipelineError::Schema`] when required columns are absent. Rows with
/// unparsable timestamps are kept with `timestamp = None`.
pub fn load_transactions(path: &Path) -> crate::Result<Vec<TransactionRecord>> {
    if !path.exists() {
        return Err(PipelineError::MissingInput {
            path: path.to_path_buf(),
        }
        .into());
    }

    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let idx = ColumnIndex::resolve(&headers)?;

    let mut rows = Vec::new();
    let mut unparsable_timestamps = 0usize;

    for (line, result) in reader.records().enumerate() {
        let record = result?;
        let row =
            parse_row(&record, &idx).map_err(|e| anyhow::anyhow!("row {}: {}", line + 2, e))?;
        if row.timestamp.is_none() {
            unparsable_timestamps += 1;
        }
        rows.push(row);
    }

    if unparsable_timestamps > 0 {
        warn!(
            "{} of {} rows have unparsable timestamps and will be excluded from aggregation",
            unparsable_timestamps,
            rows.len()
        );
    }
    info!("loaded {} transactions from {}", rows.len(), path.display());

    Ok(rows)
}

fn parse_row(record: &StringRecord, idx: &ColumnIndex) -> crate::Result<TransactionRecord> {
    let field = |i: usize| record.get(i).unwrap_or("").trim();

    let value: f64 = field(idx.value)
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid Value: {:?}", field(idx.value)))?;

    let optional = |i: Option<usize>| {
        i.map(field)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    Ok(TransactionRecord {
        transaction_id: field(idx.transaction_id).to_string(),
        customer_id: field(idx.customer_id).to_string(),
        timestamp: parse_timestamp(field(idx.timestamp)),
        value,
        product_category: field(idx.product_category).to_string(),
        channel_id: optional(idx.channel_id),
        pricing_strategy: optional(idx.pricing_strategy),
    })
}

/// Parse a raw timestamp string, returning `None` when no known format matches.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    None
}
