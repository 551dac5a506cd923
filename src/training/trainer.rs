//! Shared train/validate loop for every XAE model
//!
//! The loop owns optimizers, schedules, checkpoints and metric bookkeeping;
//! models only describe their losses through [`XaeModel`]. Adversarial models
//! get a second optimizer over their discriminator variables, stepped before
//! the main optimizer on every batch while λ > 0.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use candle_core::Device;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::models::{DataRegime, TrainBatch, XaeModel};
use crate::training::checkpoints::{CheckpointManager, TrainingCheckpoint};
use crate::training::config::TrainingConfig;
use crate::training::data::{DataLoader, ExperimentData, TrainData};
use crate::training::loss::LossTerms;
use crate::training::metrics::{
    parameter_stats, EpochSummary, FileExporter, MetricsExporter, MetricsHistory, MetricsReport,
    MetricsTracker,
};
use crate::training::optimizers::{create_optimizer, create_scheduler, OptimizerState, SchedulerState};

/// Drives one model through its epochs
pub struct Trainer {
    /// Training configuration
    config: TrainingConfig,

    /// Model being trained
    model: Box<dyn XaeModel>,

    /// Optimizer over encoder and decoder variables
    optimizer: OptimizerState,

    /// Learning rate schedule of `optimizer`
    scheduler: SchedulerState,

    /// Optimizer over discriminator variables
    adversary_optimizer: Option<OptimizerState>,

    /// Learning rate schedule of `adversary_optimizer`
    adversary_scheduler: Option<SchedulerState>,

    /// Model file and resume state writer
    checkpoint_manager: CheckpointManager,

    /// Running averages and history
    metrics: MetricsTracker,

    /// Metrics file writer
    exporter: Option<FileExporter>,

    /// Training state
    state: TrainingState,

    /// Device for training
    device: Device,

    /// Prior sampling RNG
    rng: StdRng,

    /// Event channel for monitoring
    event_tx: Option<mpsc::UnboundedSender<TrainingEvent>>,
}

/// Training state tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingState {
    /// Next epoch to run (0-based)
    pub epoch: usize,

    /// Iterations across all epochs
    pub global_step: usize,

    /// Best validation objective
    pub best_objective: Option<f64>,

    /// Epoch (1-based) of the best objective
    pub best_epoch: Option<usize>,

    /// Training start time
    pub start_time: DateTime<Utc>,

    /// Training status
    pub status: TrainingStatus,

    /// Current main learning rate
    pub current_lr: f64,
}

/// Training status enumeration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TrainingStatus {
    /// `train` not called yet
    NotStarted,
    /// Epochs in progress
    Running,
    /// Every epoch finished
    Completed,
    /// Stopped on an error
    Failed {
        /// Error chain
        error: String,
    },
}

/// Training events for monitoring
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub enum TrainingEvent {
    /// 0-based epoch about to run
    EpochStarted { epoch: usize },
    /// Every `log_steps` iterations and at the end of an epoch
    StepCompleted { epoch: usize, step: usize, loss: f64, lr: f64 },
    EpochCompleted { summary: EpochSummary },
    /// `objective` is set when saving on validation improvement
    ModelSaved { path: PathBuf, objective: Option<f64> },
    CheckpointSaved { path: PathBuf },
    TrainingCompleted { epochs: usize, elapsed: Duration },
    Error { error: String },
}

/// Training result information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingResult {
    /// Loss curves
    pub history: MetricsHistory,

    /// Training state at completion
    pub final_state: TrainingState,

    /// Model file, when one was written
    pub model_path: Option<PathBuf>,

    /// Training duration
    pub training_duration: Duration,

    /// Whether training completed successfully
    pub success: bool,

    /// Error message if training failed
    pub error_message: Option<String>,
}

impl Trainer {
    /// Create a trainer; builds one optimizer per parameter group
    pub fn new(config: TrainingConfig, model: Box<dyn XaeModel>, device: Device) -> Result<Self> {
        config
            .validate()
            .context("Training configuration validation failed")?;

        let optimizer = create_optimizer(&config.optimizer, model.main_vars())?;
        let scheduler = create_scheduler(&config.scheduler, config.optimizer.learning_rate);

        let (adversary_optimizer, adversary_scheduler) = match model.adversary_vars() {
            Some(vars) => (
                Some(create_optimizer(&config.adversary_optimizer, vars)?),
                Some(create_scheduler(
                    &config.scheduler,
                    config.adversary_optimizer.learning_rate,
                )),
            ),
            None => (None, None),
        };

        let checkpoint_manager = CheckpointManager::new(config.checkpointing.clone(), device.clone());
        let metrics = MetricsTracker::new(config.training.num_epochs);
        let exporter = config.logging.metrics_path.clone().map(FileExporter::new);
        let rng = StdRng::seed_from_u64(config.training.seed);

        let mut state = TrainingState::new();
        state.current_lr = config.optimizer.learning_rate;

        Ok(Self {
            config,
            model,
            optimizer,
            scheduler,
            adversary_optimizer,
            adversary_scheduler,
            checkpoint_manager,
            metrics,
            exporter,
            state,
            device,
            rng,
            event_tx: None,
        })
    }

    /// Set up event monitoring
    pub fn with_event_monitoring(mut self, tx: mpsc::UnboundedSender<TrainingEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Run the remaining epochs, optionally continuing from the resume state
    pub fn train(&mut self, data: &mut ExperimentData, resume: bool) -> Result<TrainingResult> {
        info!("------------------------------------------------------------");
        info!("Training Start!");
        info!(
            "Model: {}, device: {:?}, parameters: {}",
            self.model.name(),
            self.device,
            self.optimizer.parameter_count()
        );

        self.state.status = TrainingStatus::Running;
        self.state.start_time = Utc::now();
        let training_start = Instant::now();

        let outcome = self.execute(data, resume);

        let result = match outcome {
            Ok(model_path) => {
                self.state.status = TrainingStatus::Completed;
                info!("Training Finished!");
                info!("Elapsed time: {:.2?}", training_start.elapsed());
                self.send_event(TrainingEvent::TrainingCompleted {
                    epochs: self.state.epoch,
                    elapsed: training_start.elapsed(),
                });
                TrainingResult {
                    history: self.metrics.history().clone(),
                    final_state: self.state.clone(),
                    model_path,
                    training_duration: training_start.elapsed(),
                    success: true,
                    error_message: None,
                }
            }
            Err(e) => {
                let error_msg = format!("Training failed: {:#}", e);
                error!("{}", error_msg);
                self.state.status = TrainingStatus::Failed {
                    error: error_msg.clone(),
                };
                self.send_event(TrainingEvent::Error {
                    error: error_msg.clone(),
                });
                TrainingResult {
                    history: self.metrics.history().clone(),
                    final_state: self.state.clone(),
                    model_path: None,
                    training_duration: training_start.elapsed(),
                    success: false,
                    error_message: Some(error_msg),
                }
            }
        };

        Ok(result)
    }

    fn execute(&mut self, data: &mut ExperimentData, resume: bool) -> Result<Option<PathBuf>> {
        self.check_data(data)?;
        if resume {
            self.load_checkpoint()?;
        }
        self.run_training_loop(data)
    }

    fn check_data(&self, data: &ExperimentData) -> Result<()> {
        match (self.model.data_regime(), &data.train) {
            (DataRegime::Single, TrainData::Single(_)) | (DataRegime::Paired, TrainData::Paired { .. }) => {
                Ok(())
            }
            (regime, _) => Err(anyhow::anyhow!(
                "{} expects {:?} training data",
                self.model.name(),
                regime
            )),
        }
    }

    /// Main training loop; returns the model file path
    fn run_training_loop(&mut self, data: &mut ExperimentData) -> Result<Option<PathBuf>> {
        let total_epochs = self.config.training.num_epochs;
        let validate = self.config.training.validate;
        let mut model_path = None;

        info!(
            "{} iterations per epoch, {} validation batches",
            data.train.iterations(),
            data.test.num_batches()
        );

        for epoch in self.state.epoch..total_epochs {
            self.send_event(TrainingEvent::EpochStarted { epoch });
            let epoch_start = Instant::now();
            self.metrics.start_epoch();

            self.train_epoch(&mut data.train, epoch)?;
            if validate {
                self.evaluate(&mut data.test)?;
            }

            let summary = self.metrics.finish_epoch(
                epoch + 1,
                validate,
                self.optimizer.learning_rate(),
                epoch_start.elapsed().as_secs_f64(),
            );
            info!("{}", self.metrics.format_epoch(&summary));

            if validate {
                if let Some(path) = self.save_model_for_epoch(epoch)? {
                    model_path = Some(path);
                }
            }

            self.step_schedulers();
            self.state.epoch = epoch + 1;

            if self.config.logging.histogram {
                self.record_parameters(epoch + 1)?;
            }
            self.save_checkpoint()?;
            self.export_metrics()?;
            self.send_event(TrainingEvent::EpochCompleted { summary });
        }

        if !validate {
            if let Some(path) = self.checkpoint_manager.save_model(
                self.model.main_vars(),
                self.model.adversary_vars(),
            )? {
                info!("model saved at: {}", path.display());
                self.send_event(TrainingEvent::ModelSaved {
                    path: path.clone(),
                    objective: None,
                });
                model_path = Some(path);
            }
        }

        if self.state.best_objective.is_some() {
            model_path = self.checkpoint_manager.model_path().map(PathBuf::from);
        }
        Ok(model_path)
    }

    /// Train for one epoch
    fn train_epoch(&mut self, train: &mut TrainData, epoch: usize) -> Result<()> {
        match train {
            TrainData::Single(loader) => {
                let batches = loader.epoch_indices();
                let total = batches.len();
                for (i, indices) in batches.iter().enumerate() {
                    let batch = loader.collate(indices)?;
                    self.train_step(TrainBatch::Single(&batch), epoch, i, total)?;
                }
            }
            TrainData::Paired { labeled, unlabeled } => {
                let first = labeled.epoch_indices();
                let second = unlabeled.epoch_indices();
                let total = first.len().min(second.len());
                for (i, (ids1, ids2)) in first.iter().zip(second.iter()).enumerate() {
                    let batch1 = labeled.collate(ids1)?;
                    let batch2 = unlabeled.collate(ids2)?;
                    let pair = TrainBatch::Paired {
                        labeled: &batch1,
                        unlabeled: &batch2,
                    };
                    self.train_step(pair, epoch, i, total)?;
                }
            }
        }
        Ok(())
    }

    /// Discriminator step (adversarial models) followed by the main step
    fn train_step(&mut self, batch: TrainBatch<'_>, epoch: usize, step: usize, total: usize) -> Result<()> {
        let n = batch.len();
        let prior = self.model.prior(n, &mut self.rng)?;

        if let Some(adversary) = self.adversary_optimizer.as_mut() {
            if let Some(loss) = self.model.adversary_loss(batch, prior.as_ref())? {
                adversary.backward_step(&loss)?;
            }
        }

        let terms: LossTerms = self.model.training_loss(batch, prior.as_ref())?;
        let loss = terms.objective_value()?;
        if !loss.is_finite() {
            warn!("Non-finite objective at epoch {} step {}: {}", epoch + 1, step + 1, loss);
        }
        self.optimizer.backward_step(&terms.objective)?;
        self.metrics.record_train(&terms, n);

        self.state.global_step += 1;
        let log_steps = self.config.training.log_steps.max(1);
        if (step + 1) % log_steps == 0 || step + 1 == total {
            let lr = self.optimizer.learning_rate();
            debug!("[{}/{}]  objective: {:.4}  lr: {:.2e}", step + 1, total, loss, lr);
            self.send_event(TrainingEvent::StepCompleted {
                epoch,
                step: step + 1,
                loss,
                lr,
            });
        }
        Ok(())
    }

    /// Validation pass over the test loader
    fn evaluate(&mut self, test: &mut DataLoader) -> Result<()> {
        for indices in test.epoch_indices() {
            let batch = test.collate(&indices)?;
            let prior = self.model.prior(batch.len, &mut self.rng)?;
            if prior.is_some() && batch.len < 2 {
                debug!("Skipping single-row validation batch");
                continue;
            }
            let terms = self.model.validation_loss(&batch, prior.as_ref())?;
            self.metrics.record_test(&terms, batch.len);
        }
        Ok(())
    }

    /// Save after validation: every epoch, or only on improvement with `save_best`
    fn save_model_for_epoch(&mut self, epoch: usize) -> Result<Option<PathBuf>> {
        if !self.config.training.save_best {
            let path = self
                .checkpoint_manager
                .save_model(self.model.main_vars(), self.model.adversary_vars())?;
            if let Some(path) = &path {
                self.send_event(TrainingEvent::ModelSaved {
                    path: path.clone(),
                    objective: None,
                });
            }
            return Ok(path);
        }

        let objective = self.model.selection_objective(&self.metrics.test_averages());
        // NaN never compares below the best, so it is never kept
        let improved = objective < self.state.best_objective.unwrap_or(f64::INFINITY);
        if !improved {
            return Ok(None);
        }

        self.state.best_objective = Some(objective);
        self.state.best_epoch = Some(epoch + 1);
        let path = self
            .checkpoint_manager
            .save_model(self.model.main_vars(), self.model.adversary_vars())?;
        if let Some(path) = &path {
            info!("model saved, obj: {:.6e}", objective);
            self.send_event(TrainingEvent::ModelSaved {
                path: path.clone(),
                objective: Some(objective),
            });
        }
        Ok(path)
    }

    /// Epoch-level schedule; the discriminator schedule only moves while it trains
    fn step_schedulers(&mut self) {
        self.scheduler.step(&mut self.optimizer);
        self.state.current_lr = self.optimizer.learning_rate();

        if self.model.penalty_weight() > 0.0 {
            if let (Some(scheduler), Some(optimizer)) = (
                self.adversary_scheduler.as_mut(),
                self.adversary_optimizer.as_mut(),
            ) {
                scheduler.step(optimizer);
            }
        }
    }

    fn record_parameters(&mut self, epoch: usize) -> Result<()> {
        let mut stats = parameter_stats(self.model.main_vars(), epoch)?;
        if let Some(vars) = self.model.adversary_vars() {
            stats.extend(parameter_stats(vars, epoch)?);
        }
        self.metrics.record_parameters(stats);
        Ok(())
    }

    /// Write the resume state when `save_state` is configured
    fn save_checkpoint(&mut self) -> Result<()> {
        if self.checkpoint_manager.state_dir().is_none() {
            return Ok(());
        }

        let checkpoint = TrainingCheckpoint {
            next_epoch: self.state.epoch,
            global_step: self.state.global_step,
            optimizer: self.optimizer.state_dict()?,
            adversary_optimizer: self
                .adversary_optimizer
                .as_ref()
                .map(|o| o.state_dict())
                .transpose()?,
            scheduler: self.scheduler.state_dict()?,
            adversary_scheduler: self
                .adversary_scheduler
                .as_ref()
                .map(|s| s.state_dict())
                .transpose()?,
            best_objective: self.state.best_objective,
            best_epoch: self.state.best_epoch,
            history: self.metrics.history().clone(),
            timestamp: Utc::now(),
        };

        if let Some(path) = self.checkpoint_manager.save_state(
            &checkpoint,
            self.model.main_vars(),
            self.model.adversary_vars(),
        )? {
            self.send_event(TrainingEvent::CheckpointSaved { path });
        }
        Ok(())
    }

    /// Restore model, optimizers, schedules and history from the resume state
    fn load_checkpoint(&mut self) -> Result<()> {
        let checkpoint = self
            .checkpoint_manager
            .load_state(self.model.main_vars(), self.model.adversary_vars())?;

        self.optimizer.load_state_dict(checkpoint.optimizer)?;
        self.scheduler.load_state_dict(&checkpoint.scheduler)?;

        match (
            self.adversary_optimizer.as_mut(),
            checkpoint.adversary_optimizer,
        ) {
            (Some(optimizer), Some(state)) => optimizer.load_state_dict(state)?,
            (None, None) => {}
            _ => {
                return Err(anyhow::anyhow!(
                    "Resume state does not match the model's discriminator setup"
                ))
            }
        }
        if let (Some(scheduler), Some(state)) = (
            self.adversary_scheduler.as_mut(),
            checkpoint.adversary_scheduler.as_ref(),
        ) {
            scheduler.load_state_dict(state)?;
        }

        self.state.epoch = checkpoint.next_epoch;
        self.state.global_step = checkpoint.global_step;
        self.state.best_objective = checkpoint.best_objective;
        self.state.best_epoch = checkpoint.best_epoch;
        self.state.current_lr = self.optimizer.learning_rate();
        self.metrics.restore_history(checkpoint.history);
        self.rng = StdRng::seed_from_u64(
            self.config
                .training
                .seed
                .wrapping_add(checkpoint.next_epoch as u64),
        );

        info!("Resuming at epoch {}", self.state.epoch + 1);
        Ok(())
    }

    fn export_metrics(&mut self) -> Result<()> {
        let Some(exporter) = self.exporter.as_mut() else {
            return Ok(());
        };
        let name = self.model.name();
        let report = MetricsReport {
            model: name.as_str(),
            epochs_completed: self.state.epoch,
            num_epochs: self.config.training.num_epochs,
            best_objective: self.state.best_objective,
            history: self.metrics.history(),
            exported_at: Utc::now(),
        };
        exporter.export(&report)
    }

    /// Send training event
    fn send_event(&self, event: TrainingEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }

    /// Get current training state
    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    /// Loss curves so far
    pub fn history(&self) -> &MetricsHistory {
        self.metrics.history()
    }

    /// Model being trained
    pub fn model(&self) -> &dyn XaeModel {
        self.model.as_ref()
    }

    /// Main optimizer
    pub fn optimizer(&self) -> &OptimizerState {
        &self.optimizer
    }

    /// Discriminator optimizer of adversarial models
    pub fn adversary_optimizer(&self) -> Option<&OptimizerState> {
        self.adversary_optimizer.as_ref()
    }
}

impl TrainingState {
    /// Create new training state
    pub fn new() -> Self {
        Self {
            epoch: 0,
            global_step: 0,
            best_objective: None,
            best_epoch: None,
            start_time: Utc::now(),
            status: TrainingStatus::NotStarted,
            current_lr: 0.0,
        }
    }

    /// Get training progress as percentage
    pub fn progress_percentage(&self, total_epochs: usize) -> f64 {
        if total_epochs == 0 {
            0.0
        } else {
            (self.epoch as f64 / total_epochs as f64) * 100.0
        }
    }
}

impl Default for TrainingState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_training_state_creation() {
        let state = TrainingState::new();
        assert_eq!(state.epoch, 0);
        assert_eq!(state.global_step, 0);
        assert!(state.best_objective.is_none());
        assert_eq!(state.status, TrainingStatus::NotStarted);
    }

    #[test]
    fn test_progress_calculation() {
        let mut state = TrainingState::new();
        state.epoch = 5;
        assert_eq!(state.progress_percentage(10), 50.0);
        assert_eq!(state.progress_percentage(0), 0.0);
    }
}
