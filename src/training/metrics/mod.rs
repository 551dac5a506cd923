//! Metrics tracking for XAE training
//!
//! Per-epoch running averages of every reported loss term, the epoch history
//! (the source of loss curves), and file export of that history together with
//! optional parameter statistics.

pub mod exporters;
pub mod tracker;

pub use exporters::{parameter_stats, ExportFormat, FileExporter, MetricsExporter, MetricsReport};
pub use tracker::MetricsTracker;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::training::loss::LossTerm;

/// Averages of one finished epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochSummary {
    /// 1-based epoch number
    pub epoch: usize,

    /// Training averages keyed by term (`main`, `penalty`, ...)
    pub train: BTreeMap<String, f64>,

    /// Validation averages, absent when validation is off
    pub test: Option<BTreeMap<String, f64>>,

    /// Main learning rate used during the epoch
    pub learning_rate: f64,

    /// Wall time of the epoch in seconds
    pub elapsed_secs: f64,

    /// End of the epoch
    pub timestamp: DateTime<Utc>,
}

impl EpochSummary {
    /// Training average of a term
    pub fn train_value(&self, term: LossTerm) -> Option<f64> {
        self.train.get(term.key()).copied()
    }

    /// Validation average of a term
    pub fn test_value(&self, term: LossTerm) -> Option<f64> {
        self.test.as_ref()?.get(term.key()).copied()
    }
}

/// Summary statistics of one parameter tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterStats {
    /// Variable name, e.g. `enc.fc0.weight`
    pub name: String,
    /// Epoch the statistics were taken after
    pub epoch: usize,
    /// Element count
    pub numel: usize,
    /// Mean
    pub mean: f64,
    /// Population standard deviation
    pub std: f64,
    /// Minimum
    pub min: f64,
    /// Maximum
    pub max: f64,
}

/// Loss curves across epochs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsHistory {
    /// One entry per finished epoch
    pub epochs: Vec<EpochSummary>,

    /// Parameter statistics, filled when histograms are enabled
    pub parameters: Vec<ParameterStats>,
}

impl MetricsHistory {
    /// Training curve of a term (0 for epochs that did not report it)
    pub fn train_series(&self, term: LossTerm) -> Vec<f64> {
        self.epochs
            .iter()
            .map(|e| e.train_value(term).unwrap_or(0.0))
            .collect()
    }

    /// Validation curve of a term
    pub fn test_series(&self, term: LossTerm) -> Vec<f64> {
        self.epochs
            .iter()
            .filter_map(|e| e.test.as_ref().map(|_| e.test_value(term).unwrap_or(0.0)))
            .collect()
    }

    /// Last finished epoch
    pub fn last(&self) -> Option<&EpochSummary> {
        self.epochs.last()
    }

    /// Number of finished epochs
    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    /// No epoch finished yet
    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(epoch: usize, main: f64, test: Option<f64>) -> EpochSummary {
        EpochSummary {
            epoch,
            train: BTreeMap::from([("main".to_string(), main)]),
            test: test.map(|t| BTreeMap::from([("main".to_string(), t)])),
            learning_rate: 1e-3,
            elapsed_secs: 0.1,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_series_follow_epochs() {
        let history = MetricsHistory {
            epochs: vec![summary(1, 2.0, Some(3.0)), summary(2, 1.0, None)],
            parameters: Vec::new(),
        };
        assert_eq!(history.train_series(LossTerm::Main), vec![2.0, 1.0]);
        assert_eq!(history.train_series(LossTerm::Penalty), vec![0.0, 0.0]);
        assert_eq!(history.test_series(LossTerm::Main), vec![3.0]);
        assert_eq!(history.last().map(|e| e.epoch), Some(2));
    }
}
