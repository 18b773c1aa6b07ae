//! Binary classification metrics over the held-out partition
//!
//! Positive class is label 1 throughout. ROC-AUC is undefined when the test
//! partition holds a single class; that surfaces as a recoverable
//! [`PipelineError::MetricComputation`] for the candidate instead of
//! aborting the run.

use ndarray::Array1;
use serde::Serialize;

use crate::error::PipelineError;

/// Fixed metric set computed per candidate. `roc_auc` is `None` when the
/// metric was undefined; the reason is reported alongside in the candidate
/// outcome.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EvaluationResult {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub roc_auc: Option<f64>,
}

struct Counts {
    tp: f64,
    fp: f64,
    fn_: f64,
    correct: f64,
    total: f64,
}

fn count(y_true: &Array1<usize>, y_pred: &Array1<usize>) -> Counts {
    let mut c = Counts {
        tp: 0.0,
        fp: 0.0,
        fn_: 0.0,
        correct: 0.0,
        total: y_true.len() as f64,
    };
    for (&truth, &pred) in y_true.iter().zip(y_pred.iter()) {
        if truth == pred {
            c.correct += 1.0;
        }
        match (truth, pred) {
            (1, 1) => c.tp += 1.0,
            (0, 1) => c.fp += 1.0,
            (1, 0) => c.fn_ += 1.0,
            _ => {}
        }
    }
    c
}

pub fn accuracy(y_true: &Array1<usize>, y_pred: &Array1<usize>) -> f64 {
    let c = count(y_true, y_pred);
    if c.total == 0.0 {
        0.0
    } else {
        c.correct / c.total
    }
}

/// tp / (tp + fp); zero when nothing was predicted positive.
pub fn precision(y_true: &Array1<usize>, y_pred: &Array1<usize>) -> f64 {
    let c = count(y_true, y_pred);
    if c.tp + c.fp == 0.0 {
        0.0
    } else {
        c.tp / (c.tp + c.fp)
    }
}

/// tp / (tp + fn); zero when no positives exist.
pub fn recall(y_true: &Array1<usize>, y_pred: &Array1<usize>) -> f64 {
    let c = count(y_true, y_pred);
    if c.tp + c.fn_ == 0.0 {
        0.0
    } else {
        c.tp / (c.tp + c.fn_)
    }
}

pub fn f1(y_true: &Array1<usize>, y_pred: &Array1<usize>) -> f64 {
    let p = precision(y_true, y_pred);
    let r = recall(y_true, y_pred);
    if p + r == 0.0 {
        0.0
    } else {
        2.0 * p * r / (p + r)
    }
}

/// Area under the ROC curve from positive-class scores, computed as the
/// Mann-Whitney rank statistic with average ranks for tied scores
/// (equivalent to the trapezoidal ROC integral).
pub fn roc_auc(y_true: &Array1<usize>, scores: &Array1<f64>) -> Result<f64, PipelineError> {
    let n_pos = y_true.iter().filter(|&&y| y == 1).count();
    let n_neg = y_true.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return Err(PipelineError::MetricComputation(format!(
            "roc_auc undefined: test partition contains a single class ({} positive, {} negative)",
            n_pos, n_neg
        )));
    }

    // Average ranks over tied score runs.
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        scores[a]
            .partial_cmp(&scores[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut ranks = vec![0.0f64; scores.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg_rank;
        }
        i = j + 1;
    }

    let positive_rank_sum: f64 = y_true
        .iter()
        .zip(ranks.iter())
        .filter(|(&y, _)| y == 1)
        .map(|(_, &rank)| rank)
        .sum();
    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    Ok((positive_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
}

/// Compute the full metric set; undefined metrics are reported, not fatal.
pub fn evaluate(
    y_true: &Array1<usize>,
    y_pred: &Array1<usize>,
    y_prob: &Array1<f64>,
) -> (EvaluationResult, Vec<String>) {
    let mut metric_errors = Vec::new();
    let roc = match roc_auc(y_true, y_prob) {
        Ok(auc) => Some(auc),
        Err(e) => {
            metric_errors.push(e.to_string());
            None
        }
    };
    (
        EvaluationResult {
            accuracy: accuracy(y_true, y_pred),
            precision: precision(y_true, y_pred),
            recall: recall(y_true, y_pred),
            f1: f1(y_true, y_pred),
            roc_auc: roc,
        },
        metric_errors,
    )
}
