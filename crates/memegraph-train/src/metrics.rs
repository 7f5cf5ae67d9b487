//! Epoch metrics: running classification counters and ranking metrics.
//!
//! # Ranking Metrics
//!
//! | Metric | Range | Description |
//! |--------|-------|-------------|
//! | ROC-AUC | [0, 1] | P(score of random positive > score of random negative), ties count 1/2 |
//! | AP | [0, 1] | Σ (R_n - R_{n-1}) P_n over distinct score thresholds |
//!
//! Both are undefined when the labels contain a single class or any score is
//! NaN or infinite (a diverged decoder). The functions return `None` in those
//! cases and [`LinkPredictionMetrics`] skips such batches (logged and counted)
//! instead of guessing a value.

use std::fmt;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use tracing::warn;

/// Running sums for a classification epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningMetrics {
    /// Sum of per-batch mean losses.
    pub total_loss: f64,
    /// Examples whose arg-max prediction equals the label.
    pub correct: usize,
    /// Examples seen.
    pub total: usize,
}

impl RunningMetrics {
    /// Add one batch: its mean loss, predicted classes and true labels.
    pub fn record(&mut self, batch_loss: f64, predictions: &[u32], labels: &[u32]) {
        self.total_loss += batch_loss;
        self.correct += predictions
            .iter()
            .zip(labels)
            .filter(|(p, l)| p == l)
            .count();
        self.total += labels.len();
    }

    /// Add one batch without predictions (loss-only training).
    pub fn record_loss(&mut self, batch_loss: f64, batch_size: usize) {
        self.total_loss += batch_loss;
        self.total += batch_size;
    }

    /// `100 * correct / total`, 0 before any example.
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            100.0 * self.correct as f64 / self.total as f64
        }
    }

    /// `total_loss / total`, 0 before any example.
    pub fn mean_loss(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.total_loss / self.total as f64
        }
    }
}

/// True when both classes are present and every score is finite.
fn is_rankable(labels: &[u8], scores: &[f32]) -> bool {
    let n_pos = labels.iter().filter(|&&y| y == 1).count();
    n_pos > 0 && n_pos < labels.len() && scores.iter().all(|s| s.is_finite())
}

/// Area under the ROC curve for binary labels (`1` = positive).
///
/// Computed as the normalised Mann-Whitney U statistic with average ranks
/// for tied scores, which equals the trapezoidal ROC area.
pub fn roc_auc_score(labels: &[u8], scores: &[f32]) -> Option<f64> {
    debug_assert_eq!(labels.len(), scores.len());
    if !is_rankable(labels, scores) {
        return None;
    }
    let n_pos = labels.iter().filter(|&&y| y == 1).count();
    let n_neg = labels.len() - n_pos;

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    // Sum of 1-based average ranks of the positives.
    let mut rank_sum = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if labels[idx] == 1 {
                rank_sum += avg_rank;
            }
        }
        i = j + 1;
    }

    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    Some((rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
}

/// Average precision: precision at each distinct threshold, weighted by the
/// recall gained there.
pub fn average_precision_score(labels: &[u8], scores: &[f32]) -> Option<f64> {
    debug_assert_eq!(labels.len(), scores.len());
    if !is_rankable(labels, scores) {
        return None;
    }
    let n_pos = labels.iter().filter(|&&y| y == 1).count();

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut ap = 0.0;
    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut prev_recall = 0.0;
    let mut i = 0;
    while i < order.len() {
        // Consume the whole tie group before emitting a point.
        let threshold = scores[order[i]];
        while i < order.len() && scores[order[i]] == threshold {
            if labels[order[i]] == 1 {
                tp += 1;
            } else {
                fp += 1;
            }
            i += 1;
        }
        let recall = tp as f64 / n_pos as f64;
        let precision = tp as f64 / (tp + fp) as f64;
        ap += (recall - prev_recall) * precision;
        prev_recall = recall;
    }
    Some(ap)
}

/// Per-batch link-prediction scores for one epoch.
#[derive(Debug, Clone, Default)]
pub struct LinkPredictionMetrics {
    pub auc: Vec<f64>,
    pub avg_precision: Vec<f64>,
    /// Batches whose labels held a single class or whose scores were not
    /// all finite.
    pub skipped: usize,
    /// Of `skipped`, the batches rejected for NaN or infinite scores.
    pub non_finite: usize,
}

impl LinkPredictionMetrics {
    /// Score one batch. Degenerate batches are counted in `skipped`.
    pub fn record(&mut self, labels: &[u8], scores: &[f32]) {
        match (roc_auc_score(labels, scores), average_precision_score(labels, scores)) {
            (Some(auc), Some(ap)) => {
                self.auc.push(auc);
                self.avg_precision.push(ap);
            }
            _ if scores.iter().any(|s| !s.is_finite()) => {
                self.skipped += 1;
                self.non_finite += 1;
                warn!(
                    edges = labels.len(),
                    "non-finite link prediction scores, skipping ranking metrics"
                );
            }
            _ => {
                self.skipped += 1;
                warn!(
                    edges = labels.len(),
                    "single-class link prediction batch, skipping ranking metrics"
                );
            }
        }
    }

    /// Means over scored batches; NaN when none were scored.
    pub fn finish(&self) -> EvalMetrics {
        EvalMetrics::new()
            .with("auc", mean(&self.auc))
            .with("avg_precision", mean(&self.avg_precision))
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        f64::NAN
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Named evaluation results, kept in report order.
///
/// Order matters: the checkpoint directory name joins the values in this
/// order (`auc` before `avg_precision`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalMetrics {
    entries: Vec<(&'static str, f64)>,
}

impl EvalMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append (or overwrite) a metric.
    pub fn with(mut self, name: &'static str, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &'static str, value: f64) {
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries.iter().find(|(k, _)| *k == name).map(|&(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        self.entries.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Values joined with `_`, e.g. `0.91_0.88`.
    pub fn tag(&self) -> String {
        self.entries
            .iter()
            .map(|(_, v)| v.to_string())
            .collect::<Vec<_>>()
            .join("_")
    }
}

impl fmt::Display for EvalMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{name} : {value}")?;
        }
        Ok(())
    }
}

impl Serialize for EvalMetrics {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}
