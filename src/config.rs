//! Configuration structures for XAE experiments
//!
//! Experiments are described by a single file with three sections:
//! `[train_info]` (model, loss weights, optimization), `[path_info]` (data and
//! output locations) and `[network]` (MLP shapes). INI is the default format;
//! `.json`, `.yaml`/`.yml` and `.toml` files are read by extension.

use std::path::{Path, PathBuf};

use config::FileFormat;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::ModelName;
use crate::networks::NetworkConfig;
use crate::sampler::PriorSampler;
use crate::training::config::{
    CheckpointingConfig, LoggingConfig, OptimizerConfig, SchedulerConfig, SchedulerType,
    TrainingConfig, TrainingParams,
};

/// Main configuration for an experiment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Model and optimization settings
    pub train_info: TrainInfo,
    /// Data and output locations
    #[serde(default)]
    pub path_info: PathInfo,
    /// Network shapes
    #[serde(default)]
    pub network: NetworkConfig,
}

/// `[train_info]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainInfo {
    /// Model variant to build
    pub model_name: ModelName,
    /// Latent dimension of the style/nuisance part
    pub z_dim: usize,
    /// Label (condition) dimension
    #[serde(default)]
    pub y_dim: usize,
    /// Latent dimension of the label part (semi-supervised models)
    #[serde(default)]
    pub yz_dim: usize,
    /// Prior over z
    #[serde(default = "default_z_sampler")]
    pub z_sampler: PriorSampler,
    /// Prior over y; accepted so existing experiment files parse, no model samples labels
    #[serde(default = "default_y_sampler")]
    pub y_sampler: PriorSampler,

    /// Learning rate of the encoder/decoder optimizer
    pub lr: f64,
    /// First Adam moment coefficient
    #[serde(default = "default_beta1")]
    pub beta1: f64,
    /// Learning rate of the discriminator optimizer (defaults to `lr`)
    #[serde(default)]
    pub lr_adv: Option<f64>,
    /// First Adam moment coefficient of the discriminator (defaults to `beta1`)
    #[serde(default)]
    pub beta1_adv: Option<f64>,
    /// Decoupled weight decay
    #[serde(default)]
    pub weight_decay: f64,

    /// Number of epochs
    pub num_epoch: usize,
    /// Batch size for single-loader models and the test loader
    #[serde(default)]
    pub batch_size: usize,
    /// Labeled batch size (semi-supervised models)
    #[serde(default)]
    pub batch_size1: Option<usize>,
    /// Unlabeled batch size (semi-supervised models)
    #[serde(default)]
    pub batch_size2: Option<usize>,

    /// Weight of the latent penalty
    #[serde(rename = "lambda", default)]
    pub lamb: f64,
    /// Weight of the classification loss (semi-supervised models)
    #[serde(rename = "lambda2", default)]
    pub lamb2: f64,
    /// Weight of the label-part MMD (HSIC models)
    #[serde(default)]
    pub lambda_mmd: f64,
    /// Weight of the HSIC independence penalty
    #[serde(default)]
    pub lambda_hsic: f64,
    /// Weight of the "unknown" class in the cross-entropy
    #[serde(default)]
    pub classification_weight: Option<f64>,

    /// Learning rate schedule name; empty keeps the rate constant
    #[serde(default)]
    pub lr_schedule: String,
    /// Epochs between decays for `step`
    #[serde(default = "default_step_size")]
    pub lr_step_size: usize,
    /// Multiplicative decay factor
    #[serde(default = "default_gamma")]
    pub lr_gamma: f64,
    /// Comma separated epochs for `multistep`
    #[serde(default)]
    pub lr_milestones: String,
    /// Floor for `cosine` and `linear`
    #[serde(default)]
    pub lr_min: f64,

    /// Run the validation pass every epoch
    #[serde(default = "default_true")]
    pub validate: bool,
    /// Only save the model when the validation objective improves
    #[serde(default)]
    pub save_best: bool,
    /// Export parameter statistics with the metrics
    #[serde(default)]
    pub histogram: bool,

    /// Classes that carry labels
    #[serde(default)]
    pub labeled_class: String,
    /// Classes that are seen without labels
    #[serde(default)]
    pub unlabeled_class: String,
    /// Classes only present in the test set
    #[serde(default)]
    pub test_class: String,
    /// Fraction of each class to keep
    #[serde(default = "default_portion")]
    pub portion: f64,

    /// Seed for shuffling and prior sampling
    #[serde(default)]
    pub seed: u64,
}

/// `[path_info]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathInfo {
    /// Dataset directory
    #[serde(default = "default_data_home")]
    pub data_home: PathBuf,
    /// Dataset format
    #[serde(default)]
    pub data_class: DataClass,
    /// Where to write the trained model; empty disables saving
    #[serde(default)]
    pub save_path: String,
    /// Resume-state directory; empty disables resume checkpoints
    #[serde(default)]
    pub save_state: String,
    /// Metrics export file; empty disables export
    #[serde(default)]
    pub metrics_path: String,
}

/// Supported dataset formats
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DataClass {
    /// `mnist_train.csv`/`mnist_test.csv` with a label column and 784 pixels
    #[default]
    Mnist,
    /// `train.csv`/`test.csv` numeric rows
    Toy,
}

impl Default for PathInfo {
    fn default() -> Self {
        Self {
            data_home: default_data_home(),
            data_class: DataClass::default(),
            save_path: String::new(),
            save_state: String::new(),
            metrics_path: String::new(),
        }
    }
}

fn default_z_sampler() -> PriorSampler {
    PriorSampler::Gaussian
}

fn default_y_sampler() -> PriorSampler {
    PriorSampler::Multinomial
}

fn default_beta1() -> f64 {
    0.9
}

fn default_step_size() -> usize {
    1
}

fn default_gamma() -> f64 {
    0.1
}

fn default_true() -> bool {
    true
}

fn default_portion() -> f64 {
    1.0
}

fn default_data_home() -> PathBuf {
    PathBuf::from(".")
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => FileFormat::Json,
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("toml") => FileFormat::Toml,
            _ => FileFormat::Ini,
        };
        let name = path
            .to_str()
            .ok_or_else(|| Error::config(format!("non UTF-8 config path: {:?}", path)))?;

        let settings = config::Config::builder()
            .add_source(config::File::new(name, format))
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let info = &self.train_info;

        if info.z_dim == 0 {
            return Err(Error::config("z_dim must be > 0"));
        }
        if info.num_epoch == 0 {
            return Err(Error::config("num_epoch must be > 0"));
        }
        if info.lr <= 0.0 {
            return Err(Error::config("lr must be > 0"));
        }
        if !(info.portion > 0.0 && info.portion <= 1.0) {
            return Err(Error::config("portion must be in (0, 1]"));
        }
        if info.lamb < 0.0 || info.lamb2 < 0.0 || info.lambda_mmd < 0.0 || info.lambda_hsic < 0.0 {
            return Err(Error::config("penalty weights must be non-negative"));
        }

        let model = info.model_name;
        if model.is_semi_supervised() {
            match (info.batch_size1, info.batch_size2) {
                (Some(a), Some(b)) if a > 0 && b > 0 => {}
                _ => {
                    return Err(Error::config(
                        "semi-supervised models need batch_size1 and batch_size2 > 0",
                    ))
                }
            }
            if info.yz_dim == 0 {
                return Err(Error::config("semi-supervised models need yz_dim > 0"));
            }
            if info.y_dim < 2 {
                return Err(Error::config(
                    "semi-supervised models need y_dim >= 2 (labeled classes + unknown)",
                ));
            }
            parse_class_list(&info.labeled_class)?;
            parse_class_list(&info.unlabeled_class)?;
            parse_class_list(&info.test_class)?;
        } else if info.batch_size == 0 {
            return Err(Error::config("batch_size must be > 0"));
        }

        if model.is_conditional() && info.y_dim == 0 {
            return Err(Error::config(format!("{} needs y_dim > 0", model)));
        }
        if model.needs_class_split() && parse_class_list(&info.labeled_class)?.is_empty() {
            return Err(Error::config(format!("{} needs labeled_class", model)));
        }

        self.scheduler_type()?;
        self.network.validate()?;
        Ok(())
    }

    /// Batch size used by the test loader
    ///
    /// Semi-supervised models without `batch_size` fall back to the larger
    /// of their two training batch sizes.
    pub fn test_batch_size(&self) -> usize {
        let info = &self.train_info;
        if info.model_name.is_semi_supervised() && info.batch_size == 0 {
            info.batch_size1
                .unwrap_or(0)
                .max(info.batch_size2.unwrap_or(0))
        } else {
            info.batch_size
        }
    }

    /// Resolve the learning rate schedule
    pub fn scheduler_type(&self) -> Result<SchedulerType> {
        let info = &self.train_info;
        let schedule = info.lr_schedule.trim().to_lowercase();
        let scheduler_type = match schedule.as_str() {
            "" | "constant" => SchedulerType::Constant,
            "step" | "manual" => SchedulerType::Step {
                step_size: info.lr_step_size.max(1),
                gamma: info.lr_gamma,
            },
            "multistep" => SchedulerType::MultiStep {
                milestones: parse_class_list(&info.lr_milestones)?,
                gamma: info.lr_gamma,
            },
            "exponential" => SchedulerType::Exponential { gamma: info.lr_gamma },
            "cosine" => SchedulerType::Cosine {
                total_epochs: info.num_epoch,
                min_lr: info.lr_min,
            },
            "linear" => SchedulerType::Linear {
                total_epochs: info.num_epoch,
                min_lr: info.lr_min,
            },
            other => {
                return Err(Error::config(format!("unknown lr_schedule '{}'", other)));
            }
        };
        Ok(scheduler_type)
    }

    /// Resolve the training loop configuration
    pub fn training_config(&self) -> Result<TrainingConfig> {
        let info = &self.train_info;
        let paths = &self.path_info;
        let scheduler_type = self.scheduler_type()?;

        Ok(TrainingConfig {
            optimizer: OptimizerConfig {
                learning_rate: info.lr,
                beta1: info.beta1,
                beta2: 0.999,
                epsilon: 1e-8,
                weight_decay: info.weight_decay,
            },
            adversary_optimizer: OptimizerConfig {
                learning_rate: info.lr_adv.unwrap_or(info.lr),
                beta1: info.beta1_adv.unwrap_or(info.beta1),
                beta2: 0.999,
                epsilon: 1e-8,
                weight_decay: 0.0,
            },
            scheduler: SchedulerConfig {
                enabled: !info.lr_schedule.trim().is_empty(),
                scheduler_type,
            },
            training: TrainingParams {
                num_epochs: info.num_epoch,
                seed: info.seed,
                validate: info.validate,
                save_best: info.save_best,
                log_steps: 50,
            },
            checkpointing: CheckpointingConfig {
                save_path: non_empty_path(&paths.save_path),
                save_state: non_empty_path(&paths.save_state),
            },
            logging: LoggingConfig {
                metrics_path: non_empty_path(&paths.metrics_path),
                histogram: info.histogram,
            },
        })
    }
}

fn non_empty_path(s: &str) -> Option<PathBuf> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(PathBuf::from(trimmed))
    }
}

/// Parse a comma separated list of class indices such as `"0, 1,2"`
pub fn parse_class_list(s: &str) -> Result<Vec<usize>> {
    s.split(',')
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<usize>()
                .map_err(|_| Error::config(format!("invalid class index '{}'", part)))
        })
        .collect()
}
