//! Learning rate schedulers for training optimization
//!
//! Schedules are stepped once per epoch. The rate is a pure function of the
//! epoch counter, so restoring a checkpoint only needs the counter.

use super::Scheduler;

/// Constant learning rate
pub struct ConstantScheduler {
    /// Base learning rate
    base_lr: f64,

    /// Current epoch
    current_step: usize,
}

impl ConstantScheduler {
    /// Create a new constant scheduler
    pub fn new(base_lr: f64) -> Self {
        Self {
            base_lr,
            current_step: 0,
        }
    }
}

impl Scheduler for ConstantScheduler {
    fn name(&self) -> &str {
        "constant"
    }

    fn step(&mut self) {
        self.current_step += 1;
    }

    fn get_lr(&self) -> f64 {
        self.base_lr
    }

    fn step_count(&self) -> usize {
        self.current_step
    }

    fn set_step_count(&mut self, steps: usize) {
        self.current_step = steps;
    }
}

/// Step decay: `base_lr * gamma^(epoch / step_size)`
pub struct StepScheduler {
    /// Base learning rate
    base_lr: f64,

    /// Epochs between decays
    step_size: usize,

    /// Decay factor
    gamma: f64,

    /// Current epoch
    current_step: usize,

    /// Current learning rate
    current_lr: f64,
}

impl StepScheduler {
    /// Create a new step scheduler
    pub fn new(base_lr: f64, step_size: usize, gamma: f64) -> Self {
        Self {
            base_lr,
            step_size: step_size.max(1),
            gamma,
            current_step: 0,
            current_lr: base_lr,
        }
    }

    fn calculate_lr(&self) -> f64 {
        let decays = self.current_step / self.step_size;
        self.base_lr * self.gamma.powi(decays as i32)
    }
}

impl Scheduler for StepScheduler {
    fn name(&self) -> &str {
        "step"
    }

    fn step(&mut self) {
        self.current_step += 1;
        self.current_lr = self.calculate_lr();
    }

    fn get_lr(&self) -> f64 {
        self.current_lr
    }

    fn step_count(&self) -> usize {
        self.current_step
    }

    fn set_step_count(&mut self, steps: usize) {
        self.current_step = steps;
        self.current_lr = self.calculate_lr();
    }
}

/// Decay by `gamma` at each milestone epoch
pub struct MultiStepScheduler {
    /// Base learning rate
    base_lr: f64,

    /// Milestone epochs
    milestones: Vec<usize>,

    /// Decay factor
    gamma: f64,

    /// Current epoch
    current_step: usize,

    /// Current learning rate
    current_lr: f64,
}

impl MultiStepScheduler {
    /// Create a new multistep scheduler
    pub fn new(base_lr: f64, mut milestones: Vec<usize>, gamma: f64) -> Self {
        milestones.sort_unstable();
        Self {
            base_lr,
            milestones,
            gamma,
            current_step: 0,
            current_lr: base_lr,
        }
    }

    fn calculate_lr(&self) -> f64 {
        let passed = self
            .milestones
            .iter()
            .filter(|m| **m <= self.current_step)
            .count();
        self.base_lr * self.gamma.powi(passed as i32)
    }
}

impl Scheduler for MultiStepScheduler {
    fn name(&self) -> &str {
        "multistep"
    }

    fn step(&mut self) {
        self.current_step += 1;
        self.current_lr = self.calculate_lr();
    }

    fn get_lr(&self) -> f64 {
        self.current_lr
    }

    fn step_count(&self) -> usize {
        self.current_step
    }

    fn set_step_count(&mut self, steps: usize) {
        self.current_step = steps;
        self.current_lr = self.calculate_lr();
    }
}

/// Exponential decay: `base_lr * gamma^epoch`
pub struct ExponentialScheduler {
    /// Base learning rate
    base_lr: f64,

    /// Decay factor
    gamma: f64,

    /// Current epoch
    current_step: usize,

    /// Current learning rate
    current_lr: f64,
}

impl ExponentialScheduler {
    /// Create a new exponential scheduler
    pub fn new(base_lr: f64, gamma: f64) -> Self {
        Self {
            base_lr,
            gamma,
            current_step: 0,
            current_lr: base_lr,
        }
    }

    fn calculate_lr(&self) -> f64 {
        self.base_lr * self.gamma.powi(self.current_step as i32)
    }
}

impl Scheduler for ExponentialScheduler {
    fn name(&self) -> &str {
        "exponential"
    }

    fn step(&mut self) {
        self.current_step += 1;
        self.current_lr = self.calculate_lr();
    }

    fn get_lr(&self) -> f64 {
        self.current_lr
    }

    fn step_count(&self) -> usize {
        self.current_step
    }

    fn set_step_count(&mut self, steps: usize) {
        self.current_step = steps;
        self.current_lr = self.calculate_lr();
    }
}

/// Cosine annealing learning rate scheduler
pub struct CosineScheduler {
    /// Base learning rate
    base_lr: f64,

    /// Minimum learning rate
    min_lr: f64,

    /// Annealing length in epochs
    total_steps: usize,

    /// Current epoch
    current_step: usize,

    /// Current learning rate
    current_lr: f64,
}

impl CosineScheduler {
    /// Create a new cosine scheduler
    pub fn new(base_lr: f64, min_lr: f64, total_steps: usize) -> Self {
        Self {
            base_lr,
            min_lr,
            total_steps: total_steps.max(1),
            current_step: 0,
            current_lr: base_lr,
        }
    }

    fn calculate_lr(&self) -> f64 {
        let progress = (self.current_step as f64 / self.total_steps as f64).min(1.0);
        let cosine_factor = 0.5 * (1.0 + (std::f64::consts::PI * progress).cos());
        self.min_lr + (self.base_lr - self.min_lr) * cosine_factor
    }
}

impl Scheduler for CosineScheduler {
    fn name(&self) -> &str {
        "cosine"
    }

    fn step(&mut self) {
        self.current_step += 1;
        self.current_lr = self.calculate_lr();
    }

    fn get_lr(&self) -> f64 {
        self.current_lr
    }

    fn step_count(&self) -> usize {
        self.current_step
    }

    fn set_step_count(&mut self, steps: usize) {
        self.current_step = steps;
        self.current_lr = self.calculate_lr();
    }
}

/// Linear learning rate scheduler
pub struct LinearScheduler {
    /// Base learning rate
    base_lr: f64,

    /// Minimum learning rate
    min_lr: f64,

    /// Decay length in epochs
    total_steps: usize,

    /// Current epoch
    current_step: usize,

    /// Current learning rate
    current_lr: f64,
}

impl LinearScheduler {
    /// Create a new linear scheduler
    pub fn new(base_lr: f64, min_lr: f64, total_steps: usize) -> Self {
        Self {
            base_lr,
            min_lr,
            total_steps: total_steps.max(1),
            current_step: 0,
            current_lr: base_lr,
        }
    }

    fn calculate_lr(&self) -> f64 {
        let progress = (self.current_step as f64 / self.total_steps as f64).min(1.0);
        self.min_lr + (self.base_lr - self.min_lr) * (1.0 - progress)
    }
}

impl Scheduler for LinearScheduler {
    fn name(&self) -> &str {
        "linear"
    }

    fn step(&mut self) {
        self.current_step += 1;
        self.current_lr = self.calculate_lr();
    }

    fn get_lr(&self) -> f64 {
        self.current_lr
    }

    fn step_count(&self) -> usize {
        self.current_step
    }

    fn set_step_count(&mut self, steps: usize) {
        self.current_step = steps;
        self.current_lr = self.calculate_lr();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn run(scheduler: &mut dyn Scheduler, epochs: usize) -> Vec<f64> {
        (0..epochs)
            .map(|_| {
                scheduler.step();
                scheduler.get_lr()
            })
            .collect()
    }

    #[test]
    fn test_step_scheduler() {
        let mut s = StepScheduler::new(1.0, 2, 0.5);
        let lrs = run(&mut s, 5);
        assert_eq!(lrs, vec![1.0, 0.5, 0.5, 0.25, 0.25]);
    }

    #[test]
    fn test_multistep_scheduler() {
        let mut s = MultiStepScheduler::new(1.0, vec![3, 1], 0.1);
        let lrs = run(&mut s, 4);
        assert_relative_eq!(lrs[0], 0.1);
        assert_relative_eq!(lrs[1], 0.1);
        assert_relative_eq!(lrs[2], 0.01, epsilon = 1e-12);
        assert_relative_eq!(lrs[3], 0.01, epsilon = 1e-12);
    }

    #[test]
    fn test_exponential_scheduler() {
        let mut s = ExponentialScheduler::new(2.0, 0.5);
        assert_eq!(run(&mut s, 3), vec![1.0, 0.5, 0.25]);
    }

    #[test]
    fn test_cosine_reaches_floor() {
        let mut s = CosineScheduler::new(1.0, 0.1, 4);
        let lrs = run(&mut s, 6);
        assert_relative_eq!(lrs[1], 0.55, epsilon = 1e-12);
        assert_relative_eq!(lrs[3], 0.1, epsilon = 1e-12);
        assert_relative_eq!(lrs[5], 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_linear_scheduler() {
        let mut s = LinearScheduler::new(1.0, 0.0, 4);
        assert_eq!(run(&mut s, 4), vec![0.75, 0.5, 0.25, 0.0]);
    }

    #[test]
    fn test_restore_recomputes_rate() {
        let mut s = ExponentialScheduler::new(1.0, 0.5);
        s.set_step_count(3);
        assert_relative_eq!(s.get_lr(), 0.125);
        s.reset();
        assert_eq!(s.get_lr(), 1.0);
        assert_eq!(s.step_count(), 0);
    }
}
