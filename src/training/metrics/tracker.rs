//! Running loss averages and epoch summaries

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use chrono::Utc;

use super::{EpochSummary, MetricsHistory, ParameterStats};
use crate::training::loss::{LossTerm, LossTerms};
use crate::utils::IncrementalAverage;

/// Collects batch losses into per-epoch averages
///
/// Values are weighted by batch size, so an epoch average equals the
/// per-sample mean regardless of a short final batch.
#[derive(Debug, Clone)]
pub struct MetricsTracker {
    num_epochs: usize,
    train: BTreeMap<LossTerm, IncrementalAverage>,
    test: BTreeMap<LossTerm, IncrementalAverage>,
    history: MetricsHistory,
}

impl MetricsTracker {
    /// Tracker for a run of `num_epochs`
    pub fn new(num_epochs: usize) -> Self {
        Self {
            num_epochs,
            train: BTreeMap::new(),
            test: BTreeMap::new(),
            history: MetricsHistory::default(),
        }
    }

    /// Reset the running averages
    pub fn start_epoch(&mut self) {
        self.train.clear();
        self.test.clear();
    }

    /// Add the terms of one training batch of `n` rows
    pub fn record_train(&mut self, terms: &LossTerms, n: usize) {
        Self::record(&mut self.train, terms, n);
    }

    /// Add the terms of one validation batch of `n` rows
    pub fn record_test(&mut self, terms: &LossTerms, n: usize) {
        Self::record(&mut self.test, terms, n);
    }

    fn record(target: &mut BTreeMap<LossTerm, IncrementalAverage>, terms: &LossTerms, n: usize) {
        for (term, value) in &terms.terms {
            target.entry(*term).or_default().append(*value, n);
        }
    }

    /// Current training average of a term
    pub fn train_average(&self, term: LossTerm) -> f64 {
        self.train.get(&term).map(|a| a.avg()).unwrap_or(0.0)
    }

    /// Current validation averages
    pub fn test_averages(&self) -> HashMap<LossTerm, f64> {
        self.test.iter().map(|(t, a)| (*t, a.avg())).collect()
    }

    /// Close the epoch and append it to the history
    ///
    /// `validated` selects whether validation averages are part of the summary.
    pub fn finish_epoch(
        &mut self,
        epoch: usize,
        validated: bool,
        learning_rate: f64,
        elapsed_secs: f64,
    ) -> EpochSummary {
        let averages = |source: &BTreeMap<LossTerm, IncrementalAverage>| {
            source
                .iter()
                .map(|(t, a)| (t.key().to_string(), a.avg()))
                .collect::<BTreeMap<_, _>>()
        };

        let summary = EpochSummary {
            epoch,
            train: averages(&self.train),
            test: validated.then(|| averages(&self.test)),
            learning_rate,
            elapsed_secs,
            timestamp: Utc::now(),
        };
        self.history.epochs.push(summary.clone());
        summary
    }

    /// Append parameter statistics to the history
    pub fn record_parameters(&mut self, stats: Vec<ParameterStats>) {
        self.history.parameters.extend(stats);
    }

    /// Epoch line, e.g. `[03/10]  loss: 1.234568e-2  D: 4.000000e-3  test loss: ...`
    pub fn format_epoch(&self, summary: &EpochSummary) -> String {
        let width = self.num_epochs.to_string().len();
        let mut line = format!("[{:0width$}/{}]", summary.epoch, self.num_epochs, width = width);

        for term in LossTerm::ALL {
            if let Some(value) = summary.train_value(term) {
                let _ = write!(line, "  {}: {:.6e}", term.label(), value);
            }
        }

        if summary.test.is_some() {
            let mut first = true;
            for term in LossTerm::ALL {
                if let Some(value) = summary.test_value(term) {
                    let label = if first {
                        format!("test {}", term.label())
                    } else {
                        term.label().to_string()
                    };
                    let _ = write!(line, "  {}: {:.6e}", label, value);
                    first = false;
                }
            }
        }
        line
    }

    /// Finished epochs
    pub fn history(&self) -> &MetricsHistory {
        &self.history
    }

    /// Replace the history, used when resuming
    pub fn restore_history(&mut self, history: MetricsHistory) {
        self.history = history;
    }
}
