//! Command-line interface definitions and argument parsing

use std::path::PathBuf;

use clap::Parser;

use crate::config::PipelineConfig;

/// Credit-risk proxy-label pipeline: RFM features, k-means risk labels, and
/// a multi-model training harness
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the raw transaction CSV file
    #[arg(short, long, default_value = "data/raw/data.csv")]
    pub input: PathBuf,

    /// Output path for the customer feature + label table
    #[arg(short, long, default_value = "data/processed/customer_with_target.csv")]
    pub features_out: PathBuf,

    /// Directory for per-run experiment records
    #[arg(short, long, default_value = "runs")]
    pub runs_dir: PathBuf,

    /// Number of behavioral clusters for the proxy label
    #[arg(short = 'k', long, default_value = "3")]
    pub clusters: usize,

    /// Random seed for clustering, splitting, and candidate fits
    #[arg(short, long, default_value = "42")]
    pub seed: u64,

    /// Held-out fraction for the stratified train/test split
    #[arg(short, long, default_value = "0.2")]
    pub test_ratio: f64,

    /// Maximum iterations for K-Means convergence
    #[arg(long, default_value = "300")]
    pub max_iters: u64,

    /// Tolerance for K-Means convergence
    #[arg(long, default_value = "1e-4")]
    pub tolerance: f64,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn to_config(&self) -> crate::Result<PipelineConfig> {
        if self.test_ratio <= 0.0 || self.test_ratio >= 1.0 {
            anyhow::bail!("test ratio must lie strictly between 0 and 1");
        }
        if self.clusters == 0 {
            anyhow::bail!("cluster count must be at least 1");
        }
        Ok(PipelineConfig {
            input: self.input.clone(),
            features_out: self.features_out.clone(),
            runs_dir: self.runs_dir.clone(),
            n_clusters: self.clusters,
            seed: self.seed,
            test_ratio: self.test_ratio,
            kmeans_max_iters: self.max_iters,
            kmeans_tolerance: self.tolerance,
            ..PipelineConfig::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_with(test_ratio: f64, clusters: usize) -> Args {
        Args {
            input: PathBuf::from("data.csv"),
            features_out: PathBuf::from("out.csv"),
            runs_dir: PathBuf::from("runs"),
            clusters,
            seed: 42,
            test_ratio,
            max_iters: 300,
            tolerance: 1e-4,
            verbose: false,
        }
    }

    #[test]
    fn test_to_config() {
        let config = args_with(0.25, 4).to_config().unwrap();
        assert_eq!(config.n_clusters, 4);
        assert!((config.test_ratio - 0.25).abs() < 1e-12);
        assert_eq!(config.candidates.len(), 3);
    }

    #[test]
    fn test_invalid_test_ratio_rejected() {
        assert!(args_with(0.0, 3).to_config().is_err());
        assert!(args_with(1.0, 3).to_config().is_err());
    }

    #[test]
    fn test_zero_clusters_rejected() {
        assert!(args_with(0.2, 0).to_config().is_err());
    }
}
