//! Optimizers and learning rate schedulers for XAE training
//!
//! Each parameter group (encoder/decoder, discriminator) owns one optimizer.
//! Optimizer moments live in tensors keyed by variable name so they can be
//! written next to the model weights and restored on resume.

pub mod adam;
pub mod schedulers;

pub use adam::AdamOptimizer;
pub use schedulers::{
    ConstantScheduler, CosineScheduler, ExponentialScheduler, LinearScheduler,
    MultiStepScheduler, StepScheduler,
};

use std::collections::HashMap;

use anyhow::Result;
use candle_core::backprop::GradStore;
use candle_core::Tensor;
use candle_nn::VarMap;
use serde::{Deserialize, Serialize};

use crate::training::config::{OptimizerConfig, SchedulerConfig, SchedulerType};

/// Trait for optimizers
pub trait Optimizer {
    /// Optimizer name
    fn name(&self) -> &str;

    /// Apply one update from the gradients of a backward pass
    fn step(&mut self, gradients: &GradStore) -> Result<()>;

    /// Get current learning rate
    fn learning_rate(&self) -> f64;

    /// Set learning rate
    fn set_learning_rate(&mut self, lr: f64);

    /// Get optimizer state for checkpointing
    fn state_dict(&self) -> Result<OptimizerStateDict>;

    /// Load optimizer state from checkpoint
    fn load_state_dict(&mut self, state: OptimizerStateDict) -> Result<()>;

    /// Get parameter count
    fn parameter_count(&self) -> usize;

    /// Get current step count
    fn step_count(&self) -> usize;
}

/// Trait for epoch-level learning rate schedulers
pub trait Scheduler {
    /// Scheduler name
    fn name(&self) -> &str;

    /// Advance one epoch
    fn step(&mut self);

    /// Get current learning rate
    fn get_lr(&self) -> f64;

    /// Number of epochs stepped so far
    fn step_count(&self) -> usize;

    /// Restore the epoch counter and recompute the rate
    fn set_step_count(&mut self, steps: usize);

    /// Get scheduler state for checkpointing
    fn state_dict(&self) -> SchedulerStateDict {
        SchedulerStateDict {
            scheduler_type: self.name().to_string(),
            step_count: self.step_count(),
            current_lr: self.get_lr(),
        }
    }

    /// Load scheduler state from checkpoint
    fn load_state_dict(&mut self, state: SchedulerStateDict) -> Result<()> {
        if state.scheduler_type != self.name() {
            return Err(anyhow::anyhow!(
                "Scheduler mismatch: checkpoint has '{}', config has '{}'",
                state.scheduler_type,
                self.name()
            ));
        }
        self.set_step_count(state.step_count);
        Ok(())
    }

    /// Reset scheduler to initial state
    fn reset(&mut self) {
        self.set_step_count(0);
    }
}

/// Optimizer state dictionary for checkpointing
///
/// Scalars are serialized with bincode; `tensors` (moment estimates) are
/// written separately as safetensors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerStateDict {
    /// Optimizer type
    pub optimizer_type: String,

    /// Current step count
    pub step_count: usize,

    /// Current learning rate
    pub learning_rate: f64,

    /// Hyperparameters
    pub hyperparameters: HashMap<String, f64>,

    /// Moment tensors keyed by `<var>.m` / `<var>.v`
    #[serde(skip)]
    pub tensors: HashMap<String, Tensor>,
}

/// Scheduler state dictionary for checkpointing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStateDict {
    /// Scheduler type
    pub scheduler_type: String,

    /// Epochs stepped
    pub step_count: usize,

    /// Current learning rate
    pub current_lr: f64,
}

/// Wrapper for optimizer state management
pub struct OptimizerState {
    optimizer: Box<dyn Optimizer + Send + Sync>,
}

/// Wrapper for scheduler state management
pub struct SchedulerState {
    scheduler: Box<dyn Scheduler + Send + Sync>,
}

impl OptimizerState {
    /// Create new optimizer state
    pub fn new(optimizer: Box<dyn Optimizer + Send + Sync>) -> Self {
        Self { optimizer }
    }

    /// Perform optimization step
    pub fn step(&mut self, gradients: &GradStore) -> Result<()> {
        self.optimizer.step(gradients)
    }

    /// Backpropagate `loss` and apply the update
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        let gradients = loss.backward()?;
        self.optimizer.step(&gradients)
    }

    /// Get current learning rate
    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    /// Set learning rate
    pub fn set_learning_rate(&mut self, lr: f64) {
        self.optimizer.set_learning_rate(lr);
    }

    /// Get current step count
    pub fn step_count(&self) -> usize {
        self.optimizer.step_count()
    }

    /// Number of scalar parameters updated
    pub fn parameter_count(&self) -> usize {
        self.optimizer.parameter_count()
    }

    /// Get state dict for checkpointing
    pub fn state_dict(&self) -> Result<OptimizerStateDict> {
        self.optimizer.state_dict()
    }

    /// Load state dict from checkpoint
    pub fn load_state_dict(&mut self, state: OptimizerStateDict) -> Result<()> {
        self.optimizer.load_state_dict(state)
    }
}

impl SchedulerState {
    /// Create new scheduler state
    pub fn new(scheduler: Box<dyn Scheduler + Send + Sync>) -> Self {
        Self { scheduler }
    }

    /// Step the scheduler and push the new rate into the optimizer
    pub fn step(&mut self, optimizer: &mut OptimizerState) {
        self.scheduler.step();
        optimizer.set_learning_rate(self.scheduler.get_lr());
    }

    /// Get current learning rate
    pub fn get_lr(&self) -> f64 {
        self.scheduler.get_lr()
    }

    /// Get state dict for checkpointing
    pub fn state_dict(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&self.scheduler.state_dict())?)
    }

    /// Load state dict from checkpoint
    pub fn load_state_dict(&mut self, data: &[u8]) -> Result<()> {
        let state: SchedulerStateDict = bincode::deserialize(data)?;
        self.scheduler.load_state_dict(state)
    }

    /// Reset scheduler
    pub fn reset(&mut self) {
        self.scheduler.reset();
    }
}

/// Create optimizer from configuration
pub fn create_optimizer(config: &OptimizerConfig, var_map: &VarMap) -> Result<OptimizerState> {
    let optimizer = AdamOptimizer::new(
        var_map,
        config.learning_rate,
        config.beta1,
        config.beta2,
        config.epsilon,
        config.weight_decay,
    )?;
    Ok(OptimizerState::new(Box::new(optimizer)))
}

/// Create scheduler from configuration
pub fn create_scheduler(config: &SchedulerConfig, base_lr: f64) -> SchedulerState {
    let scheduler: Box<dyn Scheduler + Send + Sync> = if !config.enabled {
        Box::new(ConstantScheduler::new(base_lr))
    } else {
        match &config.scheduler_type {
            SchedulerType::Constant => Box::new(ConstantScheduler::new(base_lr)),
            SchedulerType::Step { step_size, gamma } => {
                Box::new(StepScheduler::new(base_lr, *step_size, *gamma))
            }
            SchedulerType::MultiStep { milestones, gamma } => {
                Box::new(MultiStepScheduler::new(base_lr, milestones.clone(), *gamma))
            }
            SchedulerType::Exponential { gamma } => {
                Box::new(ExponentialScheduler::new(base_lr, *gamma))
            }
            SchedulerType::Cosine {
                total_epochs,
                min_lr,
            } => Box::new(CosineScheduler::new(base_lr, *min_lr, *total_epochs)),
            SchedulerType::Linear {
                total_epochs,
                min_lr,
            } => Box::new(LinearScheduler::new(base_lr, *min_lr, *total_epochs)),
        }
    };

    SchedulerState::new(scheduler)
}
