//! riskforge: credit-risk proxy-label pipeline over a raw transaction ledger
//!
//! The pipeline aggregates transactions into per-customer RFM features,
//! derives a binary high-risk proxy label by seeded k-means clustering, and
//! trains several candidate classifiers against that label, handing each
//! fitted pipeline and its metrics to an experiment tracker.

pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod features;
pub mod harness;
pub mod labeling;
pub mod metrics;
pub mod model;
pub mod preprocess;
pub mod tracking;

// Re-export public items for easier access
pub use cli::Args;
pub use config::PipelineConfig;
pub use data::{load_transactions, TransactionRecord};
pub use error::PipelineError;
pub use features::{aggregate_customers, write_labeled_table, CustomerFeatureVector};
pub use harness::{run_training, stratified_split, CandidateOutcome};
pub use labeling::{assign_high_risk_labels, merge_labels, LabelingOutcome};
pub use metrics::EvaluationResult;
pub use model::{CandidateSpec, FittedPipeline};
pub use preprocess::{FeatureFrame, FeaturePreprocessor, FeatureSchema};
pub use tracking::{ExperimentTracker, JsonRunTracker};

/// Common result type used throughout the application
pub type Result<T> = anyhow::Result<T>;
