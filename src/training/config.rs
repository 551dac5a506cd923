//! Training configuration system for XAE models
//!
//! `TrainingConfig` is the resolved form of an experiment file's loop settings:
//! optimizers, learning rate schedule, epoch control, checkpoint and metrics
//! locations. Build it with [`crate::config::Config::training_config`] or
//! construct it directly in tests.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main training configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Optimizer for encoder and decoder parameters
    pub optimizer: OptimizerConfig,

    /// Optimizer for discriminator parameters
    pub adversary_optimizer: OptimizerConfig,

    /// Learning rate schedule shared by both optimizers
    pub scheduler: SchedulerConfig,

    /// Training parameters
    pub training: TrainingParams,

    /// Checkpointing configuration
    pub checkpointing: CheckpointingConfig,

    /// Logging and monitoring configuration
    pub logging: LoggingConfig,
}

/// Adam optimizer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Learning rate
    pub learning_rate: f64,

    /// First moment decay
    pub beta1: f64,

    /// Second moment decay
    pub beta2: f64,

    /// Denominator epsilon
    pub epsilon: f64,

    /// Decoupled weight decay (0 gives plain Adam)
    pub weight_decay: f64,
}

/// Learning rate scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether schedulers are stepped at all
    pub enabled: bool,

    /// Schedule shape
    pub scheduler_type: SchedulerType,
}

/// Epoch-level learning rate schedules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerType {
    /// Keep the base rate
    Constant,
    /// Multiply by `gamma` every `step_size` epochs
    Step {
        /// Epochs between decays
        step_size: usize,
        /// Decay factor
        gamma: f64,
    },
    /// Multiply by `gamma` at each milestone epoch
    MultiStep {
        /// Epochs at which to decay
        milestones: Vec<usize>,
        /// Decay factor
        gamma: f64,
    },
    /// Multiply by `gamma` every epoch
    Exponential {
        /// Decay factor
        gamma: f64,
    },
    /// Cosine annealing to `min_lr` over `total_epochs`
    Cosine {
        /// Annealing length
        total_epochs: usize,
        /// Floor
        min_lr: f64,
    },
    /// Linear decay to `min_lr` over `total_epochs`
    Linear {
        /// Decay length
        total_epochs: usize,
        /// Floor
        min_lr: f64,
    },
}

/// Epoch control
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingParams {
    /// Number of epochs
    pub num_epochs: usize,

    /// Seed for shuffling and prior sampling
    pub seed: u64,

    /// Run the validation pass each epoch
    pub validate: bool,

    /// Save only when the validation objective improves
    pub save_best: bool,

    /// Emit a step event every this many iterations
    pub log_steps: usize,
}

/// Checkpointing configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointingConfig {
    /// Trained model file
    pub save_path: Option<PathBuf>,

    /// Resume-state directory
    pub save_state: Option<PathBuf>,
}

/// Logging and monitoring configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Metrics export file (`.json`, `.yaml` or `.yml`)
    pub metrics_path: Option<PathBuf>,

    /// Export parameter statistics alongside the loss history
    pub histogram: bool,
}

impl TrainingConfig {
    /// Create a new training configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a JSON or YAML file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .context("Failed to read configuration file")?;

        let config = if path.as_ref().extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content).context("Failed to parse JSON configuration")?
        } else {
            serde_yaml::from_str(&content).context("Failed to parse YAML configuration")?
        };

        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = if path.as_ref().extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::to_string_pretty(self)
                .context("Failed to serialize configuration to JSON")?
        } else {
            serde_yaml::to_string(self).context("Failed to serialize configuration to YAML")?
        };

        std::fs::write(path.as_ref(), content).context("Failed to write configuration file")?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.training.num_epochs == 0 {
            return Err(anyhow::anyhow!("Number of epochs must be greater than 0"));
        }

        for (name, opt) in [
            ("optimizer", &self.optimizer),
            ("adversary optimizer", &self.adversary_optimizer),
        ] {
            if opt.learning_rate <= 0.0 {
                return Err(anyhow::anyhow!("{} learning rate must be positive", name));
            }
            if !(0.0..1.0).contains(&opt.beta1) || !(0.0..1.0).contains(&opt.beta2) {
                return Err(anyhow::anyhow!("{} betas must be in [0, 1)", name));
            }
            if opt.weight_decay < 0.0 {
                return Err(anyhow::anyhow!("{} weight decay must be non-negative", name));
            }
        }

        match &self.scheduler.scheduler_type {
            SchedulerType::Step { step_size, .. } if *step_size == 0 => {
                return Err(anyhow::anyhow!("Step scheduler needs step_size > 0"));
            }
            SchedulerType::Cosine { total_epochs, .. } | SchedulerType::Linear { total_epochs, .. }
                if *total_epochs == 0 =>
            {
                return Err(anyhow::anyhow!("Annealing schedules need total_epochs > 0"));
            }
            _ => {}
        }

        Ok(())
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            optimizer: OptimizerConfig::default(),
            adversary_optimizer: OptimizerConfig::default(),
            scheduler: SchedulerConfig::default(),
            training: TrainingParams::default(),
            checkpointing: CheckpointingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            weight_decay: 0.0,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            scheduler_type: SchedulerType::Constant,
        }
    }
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            num_epochs: 10,
            seed: 0,
            validate: true,
            save_best: false,
            log_steps: 50,
        }
    }
}
