//! Autoencoder model family
//!
//! Every model describes only its loss terms through [`XaeModel`]; the
//! training loop in [`crate::training::trainer`] owns optimizers, schedules,
//! checkpoints and metric bookkeeping for all of them.
//!
//! | name | penalty | data |
//! |------|---------|------|
//! | `classifier` | none | labeled |
//! | `wae_mmd`, `cwae_mmd` | MMD | plain / conditioned |
//! | `wae_gan`, `cwae_gan` | latent GAN | plain / conditioned |
//! | `vae`, `cvae` | KL | plain / conditioned |
//! | `sswae_mmd`, `sswae_gan`, `sswae_hsic` | MMD / GAN / GAN + MMD + HSIC | labeled + unlabeled |

pub mod classifier;
pub mod sswae;
pub mod vae;
pub mod wae;

pub use classifier::Classifier;
pub use sswae::{SemiSupervisedPenalty, Sswae};
pub use vae::Vae;
pub use wae::{Wae, WaePenalty};

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::networks::NetworkConfig;
use crate::sampler::PriorSampler;
use crate::training::data::Batch;
use crate::training::loss::{LossTerm, LossTerms};

/// Model variants selectable from `model_name`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelName {
    /// Plain classifier baseline
    Classifier,
    /// WAE with MMD penalty
    WaeMmd,
    /// WAE with latent GAN penalty
    WaeGan,
    /// Conditional WAE with MMD penalty
    CwaeMmd,
    /// Conditional WAE with latent GAN penalty
    CwaeGan,
    /// Variational autoencoder
    Vae,
    /// Conditional variational autoencoder
    Cvae,
    /// Semi-supervised WAE with MMD penalty
    SswaeMmd,
    /// Semi-supervised WAE with latent GAN penalty
    SswaeGan,
    /// Semi-supervised WAE with GAN + MMD + HSIC penalties
    SswaeHsic,
}

impl ModelName {
    /// All variants
    pub const ALL: [ModelName; 10] = [
        ModelName::Classifier,
        ModelName::WaeMmd,
        ModelName::WaeGan,
        ModelName::CwaeMmd,
        ModelName::CwaeGan,
        ModelName::Vae,
        ModelName::Cvae,
        ModelName::SswaeMmd,
        ModelName::SswaeGan,
        ModelName::SswaeHsic,
    ];

    /// Config spelling
    pub fn as_str(self) -> &'static str {
        match self {
            ModelName::Classifier => "classifier",
            ModelName::WaeMmd => "wae_mmd",
            ModelName::WaeGan => "wae_gan",
            ModelName::CwaeMmd => "cwae_mmd",
            ModelName::CwaeGan => "cwae_gan",
            ModelName::Vae => "vae",
            ModelName::Cvae => "cvae",
            ModelName::SswaeMmd => "sswae_mmd",
            ModelName::SswaeGan => "sswae_gan",
            ModelName::SswaeHsic => "sswae_hsic",
        }
    }

    /// Encoder and decoder see the label
    pub fn is_conditional(self) -> bool {
        matches!(self, ModelName::CwaeMmd | ModelName::CwaeGan | ModelName::Cvae)
    }

    /// Trained from a labeled and an unlabeled loader
    pub fn is_semi_supervised(self) -> bool {
        matches!(
            self,
            ModelName::SswaeMmd | ModelName::SswaeGan | ModelName::SswaeHsic
        )
    }

    /// Has a discriminator and a second optimizer
    pub fn is_adversarial(self) -> bool {
        matches!(
            self,
            ModelName::WaeGan | ModelName::CwaeGan | ModelName::SswaeGan | ModelName::SswaeHsic
        )
    }

    /// Batches must carry labels
    pub fn uses_labels(self) -> bool {
        self == ModelName::Classifier || self.is_conditional() || self.is_semi_supervised()
    }

    /// Data are split by `labeled_class`
    pub fn needs_class_split(self) -> bool {
        self == ModelName::Classifier || self.is_semi_supervised()
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_lowercase();
        ModelName::ALL
            .into_iter()
            .find(|m| m.as_str() == name)
            .ok_or_else(|| Error::config(format!("unknown model_name '{}'", s)))
    }
}

/// How a model consumes training data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataRegime {
    /// One loader
    Single,
    /// Labeled and unlabeled loaders in lockstep
    Paired,
}

/// Training input of one iteration
#[derive(Debug, Clone, Copy)]
pub enum TrainBatch<'a> {
    /// One batch
    Single(&'a Batch),
    /// One labeled and one unlabeled batch
    Paired {
        /// Batch from the labeled loader
        labeled: &'a Batch,
        /// Batch from the unlabeled loader
        unlabeled: &'a Batch,
    },
}

impl TrainBatch<'_> {
    /// Rows across all parts
    pub fn len(&self) -> usize {
        match self {
            TrainBatch::Single(batch) => batch.len,
            TrainBatch::Paired { labeled, unlabeled } => labeled.len + unlabeled.len,
        }
    }

    /// No rows
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn single(&self, model: ModelName) -> Result<&Batch> {
        match self {
            TrainBatch::Single(batch) => Ok(batch),
            TrainBatch::Paired { .. } => Err(Error::model(format!(
                "{} trains from a single loader",
                model
            ))),
        }
    }

    fn paired(&self, model: ModelName) -> Result<(&Batch, &Batch)> {
        match self {
            TrainBatch::Paired { labeled, unlabeled } => Ok((labeled, unlabeled)),
            TrainBatch::Single(_) => Err(Error::model(format!(
                "{} trains from labeled and unlabeled loaders",
                model
            ))),
        }
    }
}

/// Hyperparameters shared by the model constructors
#[derive(Debug, Clone)]
pub struct ModelSettings {
    /// Variant
    pub name: ModelName,
    /// Style latent width
    pub z_dim: usize,
    /// Label width
    pub y_dim: usize,
    /// Label latent width
    pub yz_dim: usize,
    /// Latent penalty weight
    pub lamb: f64,
    /// Classification weight
    pub lamb2: f64,
    /// Label-part MMD weight
    pub lambda_mmd: f64,
    /// HSIC weight
    pub lambda_hsic: f64,
    /// Weight of the unknown class in the cross-entropy
    pub classification_weight: Option<f64>,
    /// Latent prior
    pub z_sampler: PriorSampler,
    /// Network shapes
    pub network: NetworkConfig,
}

impl ModelSettings {
    /// Collect settings from an experiment config
    pub fn from_config(config: &Config) -> Self {
        let info = &config.train_info;
        Self {
            name: info.model_name,
            z_dim: info.z_dim,
            y_dim: info.y_dim,
            yz_dim: info.yz_dim,
            lamb: info.lamb,
            lamb2: info.lamb2,
            lambda_mmd: info.lambda_mmd,
            lambda_hsic: info.lambda_hsic,
            classification_weight: info.classification_weight,
            z_sampler: info.z_sampler,
            network: config.network.clone(),
        }
    }
}

/// A trainable autoencoder-family model
pub trait XaeModel: Send {
    /// Variant
    fn name(&self) -> ModelName;

    /// Encoder and decoder parameters
    fn main_vars(&self) -> &VarMap;

    /// Discriminator parameters of adversarial models
    fn adversary_vars(&self) -> Option<&VarMap> {
        None
    }

    /// Latent penalty weight λ
    fn penalty_weight(&self) -> f64;

    /// How training data are fed
    fn data_regime(&self) -> DataRegime {
        DataRegime::Single
    }

    /// Prior sample for `n` rows, `None` when the model has no prior
    fn prior(&self, n: usize, rng: &mut StdRng) -> Result<Option<Tensor>>;

    /// Discriminator objective, already scaled by λ
    ///
    /// `None` when the model is not adversarial or λ = 0.
    fn adversary_loss(&self, _batch: TrainBatch<'_>, _prior: Option<&Tensor>) -> Result<Option<Tensor>> {
        Ok(None)
    }

    /// Objective and reported terms of one training step
    fn training_loss(&self, batch: TrainBatch<'_>, prior: Option<&Tensor>) -> Result<LossTerms>;

    /// Reported terms on a validation batch (no parameter updates)
    fn validation_loss(&self, batch: &Batch, prior: Option<&Tensor>) -> Result<LossTerms>;

    /// Model selection value from validation averages: `main + λ · penalty`
    fn selection_objective(&self, averages: &HashMap<LossTerm, f64>) -> f64 {
        let main = averages.get(&LossTerm::Main).copied().unwrap_or(0.0);
        let penalty = averages.get(&LossTerm::Penalty).copied().unwrap_or(0.0);
        main + self.penalty_weight() * penalty
    }

    /// Latent code of `x` (and label `y` for conditional models), eval mode
    fn encode(&self, x: &Tensor, y: Option<&Tensor>) -> Result<Tensor>;

    /// Data-space output for latent `z` (and label `y`), eval mode
    fn decode(&self, z: &Tensor, y: Option<&Tensor>) -> Result<Tensor>;
}

/// Build the model named by `model_name`
pub fn build_model(config: &Config, device: &Device) -> Result<Box<dyn XaeModel>> {
    build_from_settings(ModelSettings::from_config(config), device)
}

/// Build a model from resolved settings
pub fn build_from_settings(settings: ModelSettings, device: &Device) -> Result<Box<dyn XaeModel>> {
    info!("Building {} on {:?}", settings.name, device);

    let model: Box<dyn XaeModel> = match settings.name {
        ModelName::Classifier => Box::new(Classifier::new(settings, device)?),
        ModelName::WaeMmd | ModelName::CwaeMmd => {
            Box::new(Wae::new(settings, WaePenalty::Mmd, device)?)
        }
        ModelName::WaeGan | ModelName::CwaeGan => {
            Box::new(Wae::new(settings, WaePenalty::Gan, device)?)
        }
        ModelName::Vae | ModelName::Cvae => Box::new(Vae::new(settings, device)?),
        ModelName::SswaeMmd => Box::new(Sswae::new(settings, SemiSupervisedPenalty::Mmd, device)?),
        ModelName::SswaeGan => Box::new(Sswae::new(settings, SemiSupervisedPenalty::Gan, device)?),
        ModelName::SswaeHsic => {
            Box::new(Sswae::new(settings, SemiSupervisedPenalty::Hsic, device)?)
        }
    };
    Ok(model)
}

/// Labels of a batch, required by conditional and classifying models
pub(crate) fn require_labels(batch: &Batch, model: ModelName) -> Result<&Tensor> {
    batch
        .y
        .as_ref()
        .ok_or_else(|| Error::model(format!("{} needs labeled batches", model)))
}

/// Prior sample, required by penalized models
pub(crate) fn require_prior(prior: Option<&Tensor>, model: ModelName) -> Result<&Tensor> {
    prior.ok_or_else(|| Error::model(format!("{} needs a prior sample", model)))
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use rand::SeedableRng;

    pub fn settings(name: ModelName) -> ModelSettings {
        ModelSettings {
            name,
            z_dim: 2,
            y_dim: 3,
            yz_dim: 2,
            lamb: 1.0,
            lamb2: 1.0,
            lambda_mmd: 1.0,
            lambda_hsic: 1.0,
            classification_weight: None,
            z_sampler: PriorSampler::Gaussian,
            network: NetworkConfig {
                x_dim: 4,
                hidden_dims: "8".to_string(),
                disc_hidden: 8,
                disc_layers: 1,
                ..NetworkConfig::default()
            },
        }
    }

    /// Rows in [-1, 1] with one-hot labels cycling over 3 classes
    pub fn batch(n: usize, labeled: bool, device: &Device) -> Batch {
        let x = Tensor::rand(-1.0f32, 1.0, (n, 4), device).unwrap();
        let y = labeled.then(|| {
            let mut values = vec![0.0f32; n * 3];
            for row in 0..n {
                values[row * 3 + row % 3] = 1.0;
            }
            Tensor::from_vec(values, (n, 3), device).unwrap()
        });
        Batch::new(x, y).unwrap()
    }

    pub fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }
}
