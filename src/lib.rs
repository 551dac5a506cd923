//! XAE - autoencoder-family generative models in Rust
//!
//! Variational (VAE, CVAE), Wasserstein (WAE-MMD, WAE-GAN, CWAE) and
//! semi-supervised Wasserstein autoencoders (SSWAE with MMD, GAN or HSIC
//! penalties), plus a classifier baseline, all trained by one shared loop.
//!
//! ```rust,ignore
//! use xae::{build_model, Config};
//! use xae::training::{load_experiment_data, Trainer};
//!
//! let config = Config::from_file("sswae.cfg")?;
//! let device = candle_core::Device::Cpu;
//! let model = build_model(&config, &device)?;
//! let mut data = load_experiment_data(&config, &device)?;
//! let result = Trainer::new(config.training_config()?, model, device)?.train(&mut data, false)?;
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod networks;
pub mod sampler;
pub mod training;
pub mod utils;

// Re-exports
pub use config::{Config, DataClass, PathInfo, TrainInfo};
pub use error::{Error, Result};
pub use models::{build_model, ModelName, ModelSettings, XaeModel};
pub use networks::{Activation, Mlp, NetworkConfig};
pub use sampler::PriorSampler;
pub use training::{Trainer, TrainingConfig, TrainingEvent, TrainingResult};
