//! Training infrastructure for XAE models
//!
//! Data loading, the shared train/validate loop, optimization, checkpointing
//! and metrics tracking.
//!
//! # Main Components
//!
//! - **Configuration**: resolved loop settings ([`TrainingConfig`])
//! - **Trainer**: one loop for every model variant, adversarial ones included
//! - **Data**: CSV datasets, class filtering and shuffling loaders
//! - **Checkpoints**: model files and resumable training state
//! - **Metrics**: per-epoch loss averages and file export
//! - **Optimizers**: Adam with checkpointable moments and epoch schedules
//! - **Loss**: reconstruction, kernel and adversarial loss terms
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use xae::config::Config;
//! use xae::models::build_model;
//! use xae::training::{load_experiment_data, Trainer};
//! use candle_core::Device;
//!
//! let config = Config::from_file("wae.cfg")?;
//! let device = Device::Cpu;
//! let model = build_model(&config, &device)?;
//! let mut data = load_experiment_data(&config, &device)?;
//!
//! let mut trainer = Trainer::new(config.training_config()?, model, device)?;
//! let result = trainer.train(&mut data, false)?;
//! ```

pub mod checkpoints;
pub mod config;
pub mod data;
pub mod loss;
pub mod metrics;
pub mod optimizers;
pub mod trainer;

#[cfg(test)]
pub mod tests;

// Configuration re-exports
pub use config::{
    CheckpointingConfig, LoggingConfig, OptimizerConfig, SchedulerConfig, SchedulerType,
    TrainingConfig, TrainingParams,
};

// Trainer re-exports
pub use trainer::{Trainer, TrainingEvent, TrainingResult, TrainingState, TrainingStatus};

// Data re-exports
pub use data::{
    load_experiment_data, Batch, ClassFilter, DataLoader, DataLoaderConfig, Dataset,
    DatasetMetadata, ExperimentData, MnistCsv, TensorDataset, ToyCsv, TrainData,
};

// Checkpoint re-exports
pub use checkpoints::{CheckpointManager, TrainingCheckpoint};

// Metrics re-exports
pub use metrics::{
    EpochSummary, FileExporter, MetricsExporter, MetricsHistory, MetricsTracker, ParameterStats,
};

// Optimizer re-exports
pub use optimizers::{
    create_optimizer, create_scheduler, AdamOptimizer, Optimizer, OptimizerState,
    OptimizerStateDict, Scheduler, SchedulerState,
};

// Loss re-exports
pub use loss::{LossTerm, LossTerms, ReductionMethod};

/// Training result type alias
pub type Result<T> = anyhow::Result<T>;

/// Training error type alias
pub type Error = anyhow::Error;
