//! Multi-model training and evaluation harness
//!
//! One invocation: stratified split, then per candidate fit → evaluate →
//! log. Candidates are isolated units of work; a failing candidate (or a
//! failing tracker write) is recorded and the batch continues.

use std::collections::BTreeMap;

use log::{info, warn};
use ndarray::Array1;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use serde_json::json;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::features::CustomerFeatureVector;
use crate::labeling::LabelingOutcome;
use crate::metrics::{self, EvaluationResult};
use crate::model::{CandidateSpec, FittedPipeline};
use crate::preprocess::{FeatureFrame, FeaturePreprocessor, FeatureSchema};
use crate::tracking::{CandidateRecord, ExperimentTracker};

/// Per-candidate result: either trained with its metric set, or failed with
/// the reason. Failure here is never terminal for the run.
#[derive(Debug)]
pub enum CandidateOutcome {
    Trained {
        name: String,
        metrics: EvaluationResult,
        metric_errors: Vec<String>,
    },
    Failed {
        name: String,
        reason: String,
    },
}

impl CandidateOutcome {
    pub fn name(&self) -> &str {
        match self {
            CandidateOutcome::Trained { name, .. } | CandidateOutcome::Failed { name, .. } => name,
        }
    }

    pub fn is_trained(&self) -> bool {
        matches!(self, CandidateOutcome::Trained { .. })
    }
}

/// Seeded stratified split preserving the label ratio in both partitions.
///
/// Returns sorted (train, test) index lists; every index lands in exactly
/// one partition. A class with a single member stays in training.
pub fn stratified_split(
    y: &[usize],
    test_ratio: f64,
    seed: u64,
) -> crate::Result<(Vec<usize>, Vec<usize>)> {
    if !(test_ratio > 0.0 && test_ratio < 1.0) {
        anyhow::bail!("test ratio must lie strictly between 0 and 1");
    }
    if y.is_empty() {
        anyhow::bail!("cannot split an empty label vector");
    }

    let mut rng = Xoshiro256Plus::seed_from_u64(seed);
    let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, &label) in y.iter().enumerate() {
        by_class.entry(label).or_default().push(i);
    }

    let mut train = Vec::new();
    let mut test = Vec::new();
    for (_, mut indices) in by_class {
        indices.shuffle(&mut rng);
        let n = indices.len();
        let n_test = if n < 2 {
            0
        } else {
            ((n as f64 * test_ratio).round() as usize).clamp(1, n - 1)
        };
        test.extend_from_slice(&indices[..n_test]);
        train.extend_from_slice(&indices[n_test..]);
    }

    if train.is_empty() || test.is_empty() {
        anyhow::bail!(
            "split produced an empty partition ({} train / {} test); too few customers",
            train.len(),
            test.len()
        );
    }

    train.sort_unstable();
    test.sort_unstable();
    Ok((train, test))
}

/// Train and evaluate every configured candidate against the proxy label,
/// handing each fitted pipeline and its metrics to `tracker`.
pub fn run_training(
    customers: &[CustomerFeatureVector],
    labels: &LabelingOutcome,
    config: &PipelineConfig,
    run_id: &str,
    tracker: &mut dyn ExperimentTracker,
) -> crate::Result<Vec<CandidateOutcome>> {
    let y: Vec<usize> = labels
        .assignments
        .iter()
        .map(|a| a.is_high_risk as usize)
        .collect();
    if y.len() != customers.len() {
        anyhow::bail!(
            "label count ({}) does not match customer count ({})",
            y.len(),
            customers.len()
        );
    }

    let frame = FeatureFrame::from_customers(customers, &config.schema)?;
    info!("run {}: state Loaded ({} customers)", run_id, customers.len());

    let (train_idx, test_idx) = stratified_split(&y, config.test_ratio, config.seed)?;
    let train_frame = frame.select_rows(&train_idx);
    let test_frame = frame.select_rows(&test_idx);
    let y_train = Array1::from_iter(train_idx.iter().map(|&i| y[i]));
    let y_test = Array1::from_iter(test_idx.iter().map(|&i| y[i]));
    info!(
        "run {}: state Split ({} train / {} test)",
        run_id,
        train_idx.len(),
        test_idx.len()
    );

    let input_example: Vec<serde_json::Value> = train_idx
        .iter()
        .take(5)
        .map(|&i| example_row(&customers[i], &config.schema))
        .collect();

    let mut outcomes = Vec::with_capacity(config.candidates.len());
    for spec in &config.candidates {
        let name = spec.name();
        match fit_and_evaluate(spec, config, &train_frame, &test_frame, &y_train, &y_test) {
            Ok((pipeline, result, metric_errors)) => {
                let record = CandidateRecord {
                    run_id: run_id.to_string(),
                    candidate: name.to_string(),
                    hyperparameters: serde_json::to_value(spec)?,
                    metrics: result.clone(),
                    metric_errors: metric_errors.clone(),
                    feature_names: pipeline.preprocessor.feature_names(),
                    input_example: input_example.clone(),
                    logged_at: chrono::Utc::now(),
                };
                if let Err(e) = tracker.log_candidate(record, pipeline) {
                    warn!("run {}: tracker failed for '{}': {}", run_id, name, e);
                } else {
                    info!("run {}: candidate '{}' state Logged", run_id, name);
                }
                outcomes.push(CandidateOutcome::Trained {
                    name: name.to_string(),
                    metrics: result,
                    metric_errors,
                });
            }
            Err(e) => {
                let failure = PipelineError::CandidateTraining {
                    name: name.to_string(),
                    reason: e.to_string(),
                };
                warn!("run {}: {}", run_id, failure);
                outcomes.push(CandidateOutcome::Failed {
                    name: name.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    info!("run {}: state Completed", run_id);
    Ok(outcomes)
}

/// Fit one candidate's full pipeline and score it on the held-out partition.
///
/// The preprocessor is fitted on the training partition only; the test
/// partition is transformed with the same fitted statistics.
fn fit_and_evaluate(
    spec: &CandidateSpec,
    config: &PipelineConfig,
    train_frame: &FeatureFrame,
    test_frame: &FeatureFrame,
    y_train: &Array1<usize>,
    y_test: &Array1<usize>,
) -> crate::Result<(FittedPipeline, EvaluationResult, Vec<String>)> {
    let preprocessor = FeaturePreprocessor::fit(&config.schema, train_frame)?;
    let x_train = preprocessor.transform(train_frame)?;
    let x_test = preprocessor.transform(test_frame)?;

    let classifier = spec.fit(&x_train, y_train, config.seed)?;
    let y_pred = classifier.predict(&x_test);
    let y_prob = classifier.predict_proba(&x_test);
    let (result, metric_errors) = metrics::evaluate(y_test, &y_pred, &y_prob);

    Ok((
        FittedPipeline {
            preprocessor,
            classifier,
        },
        result,
        metric_errors,
    ))
}

fn example_row(customer: &CustomerFeatureVector, schema: &FeatureSchema) -> serde_json::Value {
    let mut row = serde_json::Map::new();
    for column in &schema.numeric {
        row.insert(column.name.clone(), json!(customer.numeric_value(&column.name)));
    }
    for name in &schema.categorical {
        row.insert(name.clone(), json!(customer.categorical_value(name)));
    }
    serde_json::Value::Object(row)
}
