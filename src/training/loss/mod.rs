//! Loss functions for XAE model training
//!
//! Pure tensor arithmetic shared by every model variant. Functions return
//! `candle_core::Result` so they compose inside model code and in the trainer.
//!
//! # Key Components
//!
//! - **Reconstruction**: MSE, BCE-with-logits, weighted cross-entropy
//! - **Kernels**: IMQ multi-scale MMD statistic and HSIC
//! - **Regularization**: KL divergence and latent GAN penalties
//! - **Loss terms**: named per-batch values reported to the metrics tracker
//!
//! ```rust,ignore
//! use xae::training::loss::{kernels, reconstruction};
//!
//! let recon = reconstruction::mse_loss(&x_hat, &x)?;
//! let mmd = kernels::mmd_penalty(&q, &p, z_dim)?;
//! let obj = (recon + (mmd * lamb)?)?;
//! ```

pub mod kernels;
pub mod reconstruction;
pub mod regularization;

pub use kernels::{bandwidth, hsic, imq_kernel_sum, mmd_penalty, IMQ_SCALES};
pub use reconstruction::{bce_with_logits, class_weights, cross_entropy, mse_loss};
pub use regularization::{gan_discriminator_loss, gan_generator_penalty, kl_penalty};

use std::fmt;

use candle_core::Tensor;
use serde::{Deserialize, Serialize};

use crate::utils::tensor::scalar;

/// Loss reduction method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReductionMethod {
    /// Mean over all elements
    #[default]
    Mean,
    /// Sum over all elements
    Sum,
    /// Keep element-wise values
    None,
}

impl ReductionMethod {
    /// Apply this reduction to an element-wise loss
    pub fn apply(self, loss: Tensor) -> candle_core::Result<Tensor> {
        match self {
            ReductionMethod::Mean => loss.mean_all(),
            ReductionMethod::Sum => loss.sum_all(),
            ReductionMethod::None => Ok(loss),
        }
    }
}

/// Named slot a loss value is reported under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LossTerm {
    /// Reconstruction (or classification for the classifier)
    Main,
    /// Classification loss of semi-supervised models
    Main2,
    /// Latent penalty (MMD, KL, GAN)
    Penalty,
    /// Label-part MMD
    Penalty2,
    /// HSIC
    Penalty3,
}

impl LossTerm {
    /// All terms in display order
    pub const ALL: [LossTerm; 5] = [
        LossTerm::Main,
        LossTerm::Main2,
        LossTerm::Penalty,
        LossTerm::Penalty2,
        LossTerm::Penalty3,
    ];

    /// Label used in epoch log lines
    pub fn label(self) -> &'static str {
        match self {
            LossTerm::Main => "loss",
            LossTerm::Main2 => "loss2",
            LossTerm::Penalty => "D",
            LossTerm::Penalty2 => "D2",
            LossTerm::Penalty3 => "D3",
        }
    }

    /// Key used in exported metrics
    pub fn key(self) -> &'static str {
        match self {
            LossTerm::Main => "main",
            LossTerm::Main2 => "main2",
            LossTerm::Penalty => "penalty",
            LossTerm::Penalty2 => "penalty2",
            LossTerm::Penalty3 => "penalty3",
        }
    }
}

impl fmt::Display for LossTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Loss of one step: the objective to differentiate plus its reported parts
#[derive(Debug, Clone)]
pub struct LossTerms {
    /// Objective the optimizer minimizes
    pub objective: Tensor,
    /// Unweighted components, in insertion order
    pub terms: Vec<(LossTerm, f64)>,
}

impl LossTerms {
    /// Start from the objective
    pub fn new(objective: Tensor) -> Self {
        Self {
            objective,
            terms: Vec::new(),
        }
    }

    /// Record a component from a scalar tensor
    pub fn with(mut self, term: LossTerm, value: &Tensor) -> candle_core::Result<Self> {
        self.terms.push((term, scalar(value)?));
        Ok(self)
    }

    /// Value of a recorded component
    pub fn get(&self, term: LossTerm) -> Option<f64> {
        self.terms
            .iter()
            .find(|(t, _)| *t == term)
            .map(|(_, value)| *value)
    }

    /// Scalar value of the objective
    pub fn objective_value(&self) -> candle_core::Result<f64> {
        scalar(&self.objective)
    }
}
