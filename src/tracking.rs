//! Experiment tracking collaborator
//!
//! Each trained candidate is handed off as a record (hyperparameters,
//! metrics, feature names, a small raw input example for schema inference)
//! plus its fitted pipeline, registered under the candidate's name. Records
//! are keyed by run id and candidate name, so concurrent runs never
//! interfere.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;

use crate::metrics::EvaluationResult;
use crate::model::FittedPipeline;

/// Everything the registry needs to know about one trained candidate.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateRecord {
    pub run_id: String,
    pub candidate: String,
    pub hyperparameters: serde_json::Value,
    pub metrics: EvaluationResult,
    /// Metrics that were undefined on this test partition, with reasons.
    pub metric_errors: Vec<String>,
    pub feature_names: Vec<String>,
    /// First few raw (pre-transform) training rows.
    pub input_example: Vec<serde_json::Value>,
    pub logged_at: DateTime<Utc>,
}

pub trait ExperimentTracker {
    /// Register a trained candidate. A failure here must not stop the
    /// caller from logging subsequent candidates.
    fn log_candidate(
        &mut self,
        record: CandidateRecord,
        pipeline: FittedPipeline,
    ) -> crate::Result<()>;

    /// Retrieve a registered pipeline by candidate name.
    fn pipeline(&self, candidate: &str) -> Option<&FittedPipeline>;
}

/// File-backed tracker: one pretty-printed JSON record per candidate under
/// `<runs_dir>/<run_id>/`, with fitted pipelines registered in memory for
/// downstream consumers.
pub struct JsonRunTracker {
    run_id: String,
    run_dir: PathBuf,
    registry: HashMap<String, FittedPipeline>,
}

impl JsonRunTracker {
    pub fn create(runs_dir: &Path, run_id: &str) -> crate::Result<Self> {
        let run_dir = runs_dir.join(run_id);
        std::fs::create_dir_all(&run_dir)?;
        Ok(Self {
            run_id: run_id.to_string(),
            run_dir,
            registry: HashMap::new(),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }
}

impl ExperimentTracker for JsonRunTracker {
    fn log_candidate(
        &mut self,
        record: CandidateRecord,
        pipeline: FittedPipeline,
    ) -> crate::Result<()> {
        let path = self.run_dir.join(format!("{}.json", record.candidate));
        let json = serde_json::to_string_pretty(&record)?;
        std::fs::write(&path, json)?;
        info!("logged candidate '{}' to {}", record.candidate, path.display());
        self.registry.insert(record.candidate.clone(), pipeline);
        Ok(())
    }

    fn pipeline(&self, candidate: &str) -> Option<&FittedPipeline> {
        self.registry.get(candidate)
    }
}

/// In-memory tracker for tests.
#[derive(Default)]
pub struct MemoryTracker {
    pub records: Vec<CandidateRecord>,
    registry: HashMap<String, FittedPipeline>,
}

impl ExperimentTracker for MemoryTracker {
    fn log_candidate(
        &mut self,
        record: CandidateRecord,
        pipeline: FittedPipeline,
    ) -> crate::Result<()> {
        self.registry.insert(record.candidate.clone(), pipeline);
        self.records.push(record);
        Ok(())
    }

    fn pipeline(&self, candidate: &str) -> Option<&FittedPipeline> {
        self.registry.get(candidate)
    }
}

/// Fresh run identifier derived from wall clock and seed.
pub fn new_run_id(seed: u64) -> String {
    format!("{}-seed{}", Utc::now().format("%Y%m%dT%H%M%S"), seed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CandidateSpec, FittedPipeline};
    use crate::preprocess::{FeatureFrame, FeaturePreprocessor, FeatureSchema, NumericColumn};
    use ndarray::array;

    fn dummy_pipeline() -> FittedPipeline {
        let schema = FeatureSchema {
            numeric: vec![NumericColumn::plain("recency_days")],
            categorical: vec![],
        };
        let frame = FeatureFrame {
            n_rows: 4,
            numeric: array![[0.0], [1.0], [10.0], [11.0]],
            categorical: vec![],
        };
        let preprocessor = FeaturePreprocessor::fit(&schema, &frame).unwrap();
        let x = preprocessor.transform(&frame).unwrap();
        let y = array![0, 0, 1, 1];
        let classifier = CandidateSpec::default_candidates()[1].fit(&x, &y, 1).unwrap();
        FittedPipeline {
            preprocessor,
            classifier,
        }
    }

    fn dummy_record(candidate: &str) -> CandidateRecord {
        CandidateRecord {
            run_id: "test-run".to_string(),
            candidate: candidate.to_string(),
            hyperparameters: serde_json::json!({"kind": candidate}),
            metrics: crate::metrics::EvaluationResult {
                accuracy: 1.0,
                precision: 1.0,
                recall: 1.0,
                f1: 1.0,
                roc_auc: Some(1.0),
            },
            metric_errors: vec![],
            feature_names: vec!["recency_days".to_string()],
            input_example: vec![serde_json::json!({"recency_days": 0.0})],
            logged_at: Utc::now(),
        }
    }

    #[test]
    fn test_json_tracker_writes_record_and_registers_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = JsonRunTracker::create(dir.path(), "run-1").unwrap();
        tracker
            .log_candidate(dummy_record("random_forest"), dummy_pipeline())
            .unwrap();

        let record_path = dir.path().join("run-1").join("random_forest.json");
        assert!(record_path.exists());
        let raw = std::fs::read_to_string(record_path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["candidate"], "random_forest");
        assert_eq!(value["metrics"]["accuracy"], 1.0);

        assert!(tracker.pipeline("random_forest").is_some());
        assert!(tracker.pipeline("missing").is_none());
    }

    #[test]
    fn test_distinct_runs_do_not_interfere() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = JsonRunTracker::create(dir.path(), "run-a").unwrap();
        let mut second = JsonRunTracker::create(dir.path(), "run-b").unwrap();
        first
            .log_candidate(dummy_record("logistic_regression"), dummy_pipeline())
            .unwrap();
        second
            .log_candidate(dummy_record("logistic_regression"), dummy_pipeline())
            .unwrap();
        assert!(dir.path().join("run-a/logistic_regression.json").exists());
        assert!(dir.path().join("run-b/logistic_regression.json").exists());
    }
}
