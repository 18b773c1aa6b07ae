//! Failure taxonomy for the risk pipeline
//!
//! Data-integrity failures (`MissingInput`, `Schema`, `DegenerateClustering`)
//! are fatal and abort the run. `MetricComputation` and `CandidateTraining`
//! are recoverable: they are recorded against the candidate they belong to
//! and the run continues.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("missing input file: {path}")]
    MissingInput { path: PathBuf },

    #[error("schema error: required column(s) missing: {missing:?}")]
    Schema { missing: Vec<String> },

    #[error("degenerate clustering: {distinct} distinct customer(s) for {requested} requested clusters")]
    DegenerateClustering { distinct: usize, requested: usize },

    #[error("metric undefined: {0}")]
    MetricComputation(String),

    #[error("candidate '{name}' failed to train: {reason}")]
    CandidateTraining { name: String, reason: String },
}
