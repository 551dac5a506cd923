//! Metrics exporters
//!
//! The loss history is written as one JSON or YAML report that is rewritten
//! after every epoch, so a crashed run still leaves its curves behind.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use candle_core::DType;
use candle_nn::VarMap;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use super::{MetricsHistory, ParameterStats};
use crate::utils::io::write_file_atomic;

/// Trait for metrics exporters
pub trait MetricsExporter {
    /// Exporter name
    fn name(&self) -> &str;

    /// Export the full history
    fn export(&mut self, report: &MetricsReport<'_>) -> Result<()>;

    /// Get export format
    fn format(&self) -> &str {
        "json"
    }
}

/// What an exporter writes
#[derive(Debug, Serialize)]
pub struct MetricsReport<'a> {
    /// Model variant
    pub model: &'a str,
    /// Epochs finished so far
    pub epochs_completed: usize,
    /// Epochs planned
    pub num_epochs: usize,
    /// Best validation objective, when model selection is on
    pub best_objective: Option<f64>,
    /// Curves and parameter statistics
    pub history: &'a MetricsHistory,
    /// Export time
    pub exported_at: DateTime<Utc>,
}

/// Serialization format of a [`FileExporter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Pretty printed JSON
    Json,
    /// YAML
    Yaml,
}

impl ExportFormat {
    /// Pick the format from a file extension, JSON unless `.yaml`/`.yml`
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => ExportFormat::Yaml,
            _ => ExportFormat::Json,
        }
    }
}

/// Writes the report to a single file
pub struct FileExporter {
    name: String,
    path: PathBuf,
    format: ExportFormat,
}

impl FileExporter {
    /// Exporter writing to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let format = ExportFormat::from_path(&path);
        Self {
            name: "file_exporter".to_string(),
            path,
            format,
        }
    }

    /// Destination file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetricsExporter for FileExporter {
    fn name(&self) -> &str {
        &self.name
    }

    fn export(&mut self, report: &MetricsReport<'_>) -> Result<()> {
        let content = match self.format {
            ExportFormat::Json => serde_json::to_string_pretty(report)?,
            ExportFormat::Yaml => serde_yaml::to_string(report)?,
        };
        write_file_atomic(&self.path, content.as_bytes())
            .with_context(|| format!("Failed to write metrics to {}", self.path.display()))?;
        debug!("Exported {} epochs to {}", report.epochs_completed, self.path.display());
        Ok(())
    }

    fn format(&self) -> &str {
        match self.format {
            ExportFormat::Json => "json",
            ExportFormat::Yaml => "yaml",
        }
    }
}

/// Mean, std, min and max of every variable, sorted by name
pub fn parameter_stats(vars: &VarMap, epoch: usize) -> Result<Vec<ParameterStats>> {
    let mut named = {
        let data = vars
            .data()
            .lock()
            .map_err(|_| anyhow::anyhow!("Variable map lock poisoned"))?;
        let named = data
            .iter()
            .map(|(name, var)| -> Result<(String, Vec<f64>)> {
                let values = var
                    .as_tensor()
                    .flatten_all()?
                    .to_dtype(DType::F64)?
                    .to_vec1::<f64>()?;
                Ok((name.clone(), values))
            })
            .collect::<Result<Vec<_>>>()?;
        named
    };
    named.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(named
        .into_par_iter()
        .map(|(name, values)| summarize(name, epoch, &values))
        .collect())
}

fn summarize(name: String, epoch: usize, values: &[f64]) -> ParameterStats {
    let numel = values.len();
    if numel == 0 {
        return ParameterStats {
            name,
            epoch,
            numel,
            mean: 0.0,
            std: 0.0,
            min: 0.0,
            max: 0.0,
        };
    }
    let mean = values.iter().sum::<f64>() / numel as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / numel as f64;
    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));

    ParameterStats {
        name,
        epoch,
        numel,
        mean,
        std: var.sqrt(),
        min,
        max,
    }
}
