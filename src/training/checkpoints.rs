//! Model files and resume checkpoints
//!
//! A model file (`save_path`) holds the encoder/decoder variables and, for
//! adversarial models, the discriminator variables as one safetensors file.
//! Variable names carry their network prefix (`enc.`, `dec.`, `disc.`, ...) so
//! both groups share the file without collisions.
//!
//! A resume checkpoint (`save_state`) is a directory:
//!
//! ```text
//! model.safetensors                 main variables
//! adversary.safetensors             discriminator variables
//! optimizer.safetensors             Adam moments of the main optimizer
//! adversary_optimizer.safetensors   Adam moments of the discriminator optimizer
//! trainer_state.bin                 bincode TrainingCheckpoint
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::training::config::CheckpointingConfig;
use crate::training::metrics::MetricsHistory;
use crate::training::optimizers::OptimizerStateDict;
use crate::utils::io::{ensure_dir_exists, ensure_parent_dir, write_file_atomic};

const MODEL_FILE: &str = "model.safetensors";
const ADVERSARY_FILE: &str = "adversary.safetensors";
const OPTIMIZER_FILE: &str = "optimizer.safetensors";
const ADVERSARY_OPTIMIZER_FILE: &str = "adversary_optimizer.safetensors";
const STATE_FILE: &str = "trainer_state.bin";

/// Loop state needed to continue a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingCheckpoint {
    /// First epoch to run after resuming
    pub next_epoch: usize,

    /// Iterations run so far
    pub global_step: usize,

    /// Main optimizer scalars (moments are stored separately)
    pub optimizer: OptimizerStateDict,

    /// Discriminator optimizer scalars
    pub adversary_optimizer: Option<OptimizerStateDict>,

    /// Encoded main scheduler state
    pub scheduler: Vec<u8>,

    /// Encoded discriminator scheduler state
    pub adversary_scheduler: Option<Vec<u8>>,

    /// Best validation objective so far
    pub best_objective: Option<f64>,

    /// Epoch (1-based) of the best objective
    pub best_epoch: Option<usize>,

    /// Loss curves so far
    pub history: MetricsHistory,

    /// When the checkpoint was written
    pub timestamp: DateTime<Utc>,
}

/// Reads and writes model files and resume checkpoints
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    config: CheckpointingConfig,
    device: Device,
}

impl CheckpointManager {
    /// Create a manager for the configured locations
    pub fn new(config: CheckpointingConfig, device: Device) -> Self {
        Self { config, device }
    }

    /// Configured model file
    pub fn model_path(&self) -> Option<&Path> {
        self.config.save_path.as_deref()
    }

    /// Configured resume directory
    pub fn state_dir(&self) -> Option<&Path> {
        self.config.save_state.as_deref()
    }

    /// Write the model file, returning its path (`None` when not configured)
    pub fn save_model(&self, main: &VarMap, adversary: Option<&VarMap>) -> Result<Option<PathBuf>> {
        let Some(path) = self.model_path() else {
            return Ok(None);
        };
        let mut tensors = collect_vars(main)?;
        if let Some(adversary) = adversary {
            tensors.extend(collect_vars(adversary)?);
        }
        write_tensors(path, &tensors)?;
        debug!("Saved {} tensors to {}", tensors.len(), path.display());
        Ok(Some(path.to_path_buf()))
    }

    /// Load the model file into the given variables
    pub fn load_model(&self, path: &Path, main: &VarMap, adversary: Option<&VarMap>) -> Result<()> {
        let tensors = candle_core::safetensors::load(path, &self.device)
            .with_context(|| format!("Failed to read model file {}", path.display()))?;
        assign_vars(main, &tensors)?;
        if let Some(adversary) = adversary {
            assign_vars(adversary, &tensors)?;
        }
        info!("Loaded model from {}", path.display());
        Ok(())
    }

    /// Write a resume checkpoint, returning its directory
    pub fn save_state(
        &self,
        checkpoint: &TrainingCheckpoint,
        main: &VarMap,
        adversary: Option<&VarMap>,
    ) -> Result<Option<PathBuf>> {
        let Some(dir) = self.state_dir() else {
            return Ok(None);
        };
        ensure_dir_exists(dir)?;

        write_tensors(&dir.join(MODEL_FILE), &collect_vars(main)?)?;
        if let Some(adversary) = adversary {
            write_tensors(&dir.join(ADVERSARY_FILE), &collect_vars(adversary)?)?;
        }
        write_moments(&dir.join(OPTIMIZER_FILE), &checkpoint.optimizer)?;
        if let Some(optimizer) = &checkpoint.adversary_optimizer {
            write_moments(&dir.join(ADVERSARY_OPTIMIZER_FILE), optimizer)?;
        }

        let encoded = bincode::serialize(checkpoint).context("Failed to encode trainer state")?;
        write_file_atomic(dir.join(STATE_FILE), &encoded)?;

        debug!("Saved resume state for epoch {} to {}", checkpoint.next_epoch, dir.display());
        Ok(Some(dir.to_path_buf()))
    }

    /// Restore variables from the resume directory and return the loop state
    pub fn load_state(&self, main: &VarMap, adversary: Option<&VarMap>) -> Result<TrainingCheckpoint> {
        let dir = self
            .state_dir()
            .ok_or_else(|| anyhow::anyhow!("Resume requested but save_state is not configured"))?;

        let encoded = std::fs::read(dir.join(STATE_FILE))
            .with_context(|| format!("No resume state in {}", dir.display()))?;
        let mut checkpoint: TrainingCheckpoint =
            bincode::deserialize(&encoded).context("Failed to decode trainer state")?;

        assign_vars(main, &self.read_tensors(&dir.join(MODEL_FILE))?)?;
        if let Some(adversary) = adversary {
            assign_vars(adversary, &self.read_tensors(&dir.join(ADVERSARY_FILE))?)?;
        }

        checkpoint.optimizer.tensors = self.read_optional(&dir.join(OPTIMIZER_FILE))?;
        if let Some(optimizer) = checkpoint.adversary_optimizer.as_mut() {
            optimizer.tensors = self.read_optional(&dir.join(ADVERSARY_OPTIMIZER_FILE))?;
        }

        info!(
            "Loaded resume state from {} (next epoch {}, saved {})",
            dir.display(),
            checkpoint.next_epoch + 1,
            checkpoint.timestamp.format("%Y-%m-%d %H:%M:%S")
        );
        Ok(checkpoint)
    }

    fn read_tensors(&self, path: &Path) -> Result<HashMap<String, Tensor>> {
        candle_core::safetensors::load(path, &self.device)
            .with_context(|| format!("Failed to read {}", path.display()))
    }

    /// Moments are absent until the optimizer has taken a step
    fn read_optional(&self, path: &Path) -> Result<HashMap<String, Tensor>> {
        if path.exists() {
            self.read_tensors(path)
        } else {
            Ok(HashMap::new())
        }
    }
}

fn collect_vars(vars: &VarMap) -> Result<HashMap<String, Tensor>> {
    let data = vars
        .data()
        .lock()
        .map_err(|_| anyhow::anyhow!("Variable map lock poisoned"))?;
    let tensors = data
        .iter()
        .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
        .collect();
    Ok(tensors)
}

fn assign_vars(vars: &VarMap, tensors: &HashMap<String, Tensor>) -> Result<()> {
    let data = vars
        .data()
        .lock()
        .map_err(|_| anyhow::anyhow!("Variable map lock poisoned"))?;
    for (name, var) in data.iter() {
        let tensor = tensors
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("Checkpoint is missing variable '{}'", name))?;
        if tensor.dims() != var.dims() {
            return Err(anyhow::anyhow!(
                "Shape mismatch for '{}': checkpoint {:?}, model {:?}",
                name,
                tensor.dims(),
                var.dims()
            ));
        }
        var.set(tensor)?;
    }
    Ok(())
}

fn write_tensors(path: &Path, tensors: &HashMap<String, Tensor>) -> Result<()> {
    ensure_parent_dir(path)?;
    candle_core::safetensors::save(tensors, path)
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn write_moments(path: &Path, state: &OptimizerStateDict) -> Result<()> {
    if state.tensors.is_empty() {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        return Ok(());
    }
    write_tensors(path, &state.tensors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use candle_nn::Init;

    fn vars(prefix: &str, value: f64) -> VarMap {
        let vars = VarMap::new();
        vars.get((2, 3), &format!("{}.w", prefix), Init::Const(value), DType::F32, &Device::Cpu)
            .unwrap();
        vars
    }

    fn value(vars: &VarMap, name: &str) -> f32 {
        let data = vars.data().lock().unwrap();
        data[name].as_tensor().flatten_all().unwrap().to_vec1::<f32>().unwrap()[0]
    }

    #[test]
    fn test_model_round_trip_with_adversary() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(
            CheckpointingConfig {
                save_path: Some(dir.path().join("out/model.safetensors")),
                save_state: None,
            },
            Device::Cpu,
        );

        let main = vars("enc", 1.5);
        let disc = vars("disc", -2.0);
        let path = manager.save_model(&main, Some(&disc)).unwrap().unwrap();

        let main2 = vars("enc", 0.0);
        let disc2 = vars("disc", 0.0);
        manager.load_model(&path, &main2, Some(&disc2)).unwrap();
        assert_eq!(value(&main2, "enc.w"), 1.5);
        assert_eq!(value(&disc2, "disc.w"), -2.0);
    }

    #[test]
    fn test_missing_variable_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        let manager = CheckpointManager::new(
            CheckpointingConfig {
                save_path: Some(path.clone()),
                save_state: None,
            },
            Device::Cpu,
        );
        manager.save_model(&vars("enc", 1.0), None).unwrap();
        assert!(manager.load_model(&path, &vars("dec", 0.0), None).is_err());
    }

    #[test]
    fn test_unconfigured_paths_are_skipped() {
        let manager = CheckpointManager::new(CheckpointingConfig::default(), Device::Cpu);
        assert!(manager.save_model(&vars("enc", 1.0), None).unwrap().is_none());
        assert!(manager.load_state(&vars("enc", 1.0), None).is_err());
    }
}
