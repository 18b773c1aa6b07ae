//! Run configuration
//!
//! Every tunable (paths, cluster count, seed, split ratio, candidate roster,
//! feature schema) lives in one explicit object passed into each component,
//! so determinism and paths are properties of the call, not of module-level
//! state.

use std::path::PathBuf;

use crate::model::CandidateSpec;
use crate::preprocess::FeatureSchema;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Raw transaction ledger (CSV).
    pub input: PathBuf,
    /// Destination for the customer feature + label table (CSV).
    pub features_out: PathBuf,
    /// Directory receiving one run directory per training invocation.
    pub runs_dir: PathBuf,
    /// Fixed number of behavioral clusters.
    pub n_clusters: usize,
    /// Seed threaded through clustering, splitting, and candidate fits.
    pub seed: u64,
    /// Held-out fraction for the stratified split.
    pub test_ratio: f64,
    pub kmeans_max_iters: u64,
    pub kmeans_tolerance: f64,
    pub schema: FeatureSchema,
    pub candidates: Vec<CandidateSpec>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("data/raw/data.csv"),
            features_out: PathBuf::from("data/processed/customer_with_target.csv"),
            runs_dir: PathBuf::from("runs"),
            n_clusters: 3,
            seed: 42,
            test_ratio: 0.2,
            kmeans_max_iters: 300,
            kmeans_tolerance: 1e-4,
            schema: FeatureSchema::credit_risk(),
            candidates: CandidateSpec::default_candidates(),
        }
    }
}
