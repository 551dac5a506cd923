//! Adam optimizer with decoupled weight decay
//!
//! With `weight_decay = 0` this is plain Adam, the optimizer every XAE model
//! trains with. Moments are created lazily the first time a variable receives
//! a gradient.

use std::collections::HashMap;

use anyhow::Result;
use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};
use candle_nn::VarMap;

use super::{Optimizer, OptimizerStateDict};

/// Adam optimizer over the variables of one `VarMap`
pub struct AdamOptimizer {
    /// Parameters, sorted by name
    vars: Vec<(String, Var)>,

    /// Learning rate
    learning_rate: f64,

    /// Beta1 parameter (momentum)
    beta1: f64,

    /// Beta2 parameter (RMSprop)
    beta2: f64,

    /// Epsilon for numerical stability
    epsilon: f64,

    /// Weight decay coefficient
    weight_decay: f64,

    /// Current step count
    step_count: usize,

    /// First moment estimates
    momentum: HashMap<String, Tensor>,

    /// Second moment estimates
    variance: HashMap<String, Tensor>,
}

impl AdamOptimizer {
    /// Create a new Adam optimizer over every variable currently in `var_map`
    pub fn new(
        var_map: &VarMap,
        learning_rate: f64,
        beta1: f64,
        beta2: f64,
        epsilon: f64,
        weight_decay: f64,
    ) -> Result<Self> {
        let mut vars: Vec<(String, Var)> = {
            let data = var_map
                .data()
                .lock()
                .map_err(|_| anyhow::anyhow!("Variable map lock poisoned"))?;
            data.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        vars.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(Self {
            vars,
            learning_rate,
            beta1,
            beta2,
            epsilon,
            weight_decay,
            step_count: 0,
            momentum: HashMap::new(),
            variance: HashMap::new(),
        })
    }

    /// Apply the Adam update to one parameter
    fn update_parameter(&mut self, name: &str, var: &Var, grad: &Tensor) -> Result<()> {
        // m_t = β₁ m_{t-1} + (1 - β₁) g_t
        let new_momentum = match self.momentum.get(name) {
            Some(m) => ((m * self.beta1)? + (grad * (1.0 - self.beta1))?)?,
            None => (grad * (1.0 - self.beta1))?,
        };

        // v_t = β₂ v_{t-1} + (1 - β₂) g_t²
        let grad_squared = grad.sqr()?;
        let new_variance = match self.variance.get(name) {
            Some(v) => ((v * self.beta2)? + (grad_squared * (1.0 - self.beta2))?)?,
            None => (grad_squared * (1.0 - self.beta2))?,
        };

        let t = self.step_count as i32;
        let bias_correction1 = 1.0 - self.beta1.powi(t);
        let bias_correction2 = 1.0 - self.beta2.powi(t);

        let corrected_momentum = (&new_momentum / bias_correction1)?;
        let corrected_variance = (&new_variance / bias_correction2)?;
        let denominator = (corrected_variance.sqrt()? + self.epsilon)?;
        let update = corrected_momentum.div(&denominator)?;

        // θ_t = θ_{t-1} (1 - α λ) - α m̂_t / (√v̂_t + ε)
        let theta = var.as_tensor();
        let decayed = if self.weight_decay > 0.0 {
            (theta * (1.0 - self.learning_rate * self.weight_decay))?
        } else {
            theta.clone()
        };
        let next = (decayed - (update * self.learning_rate)?)?.detach();
        var.set(&next)?;

        self.momentum.insert(name.to_string(), new_momentum);
        self.variance.insert(name.to_string(), new_variance);
        Ok(())
    }
}

impl Optimizer for AdamOptimizer {
    fn name(&self) -> &str {
        "adam"
    }

    fn step(&mut self, gradients: &GradStore) -> Result<()> {
        self.step_count += 1;

        let vars = self.vars.clone();
        for (name, var) in &vars {
            if let Some(grad) = gradients.get(var.as_tensor()) {
                self.update_parameter(name, var, grad)?;
            }
        }

        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr;
    }

    fn state_dict(&self) -> Result<OptimizerStateDict> {
        let mut tensors = HashMap::new();
        for (name, tensor) in &self.momentum {
            tensors.insert(format!("{}.m", name), tensor.clone());
        }
        for (name, tensor) in &self.variance {
            tensors.insert(format!("{}.v", name), tensor.clone());
        }

        let mut hyperparameters = HashMap::new();
        hyperparameters.insert("beta1".to_string(), self.beta1);
        hyperparameters.insert("beta2".to_string(), self.beta2);
        hyperparameters.insert("epsilon".to_string(), self.epsilon);
        hyperparameters.insert("weight_decay".to_string(), self.weight_decay);

        Ok(OptimizerStateDict {
            optimizer_type: "adam".to_string(),
            step_count: self.step_count,
            learning_rate: self.learning_rate,
            hyperparameters,
            tensors,
        })
    }

    fn load_state_dict(&mut self, state_dict: OptimizerStateDict) -> Result<()> {
        if state_dict.optimizer_type != "adam" {
            return Err(anyhow::anyhow!(
                "Cannot load '{}' state into adam",
                state_dict.optimizer_type
            ));
        }
        self.step_count = state_dict.step_count;
        self.learning_rate = state_dict.learning_rate;

        self.momentum.clear();
        self.variance.clear();
        for (key, tensor) in state_dict.tensors {
            if let Some(name) = key.strip_suffix(".m") {
                self.momentum.insert(name.to_string(), tensor);
            } else if let Some(name) = key.strip_suffix(".v") {
                self.variance.insert(name.to_string(), tensor);
            } else {
                return Err(anyhow::anyhow!("Unexpected optimizer tensor '{}'", key));
            }
        }

        Ok(())
    }

    fn parameter_count(&self) -> usize {
        self.vars.iter().map(|(_, v)| v.elem_count()).sum()
    }

    fn step_count(&self) -> usize {
        self.step_count
    }
}
