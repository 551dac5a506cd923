//! Data loading infrastructure for XAE training
//!
//! Datasets are small enough to live in memory as two tensors (features and
//! optional one-hot labels). Loaders batch them by `index_select` in a seeded
//! shuffle order.

use anyhow::{Context, Result};
use candle_core::{Device, Tensor};

pub mod batching;
pub mod datasets;
pub mod loaders;

// Re-exports
pub use batching::Batch;
pub use datasets::{ClassFilter, MnistCsv, TensorDataset, ToyCsv};
pub use loaders::{DataLoader, DataLoaderConfig};

use crate::config::{parse_class_list, Config, DataClass};

/// Common trait for all training datasets
pub trait Dataset: Send + Sync {
    /// Get the number of samples in the dataset
    fn len(&self) -> usize;

    /// Check if the dataset is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Feature matrix, `[len, feature_dim]`
    fn features(&self) -> &Tensor;

    /// One-hot labels, `[len, num_classes]`
    fn labels(&self) -> Option<&Tensor>;

    /// Get dataset metadata
    fn metadata(&self) -> &DatasetMetadata;
}

/// Dataset metadata
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetMetadata {
    /// Dataset name/identifier
    pub name: String,
    /// Number of samples
    pub num_samples: usize,
    /// Width of a feature row
    pub feature_dim: usize,
    /// Width of a label row
    pub num_classes: Option<usize>,
}

/// Error types for data loading
#[derive(thiserror::Error, Debug)]
pub enum DataError {
    #[error("Dataset not found: {path}")]
    DatasetNotFound { path: String },

    #[error("Malformed data at row {row}: {reason}")]
    MalformedData { row: usize, reason: String },

    #[error("Dataset '{name}' is empty")]
    EmptyDataset { name: String },

    #[error("Shape mismatch: {reason}")]
    ShapeMismatch { reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Tensor error: {0}")]
    TensorError(#[from] candle_core::Error),
}

/// Loaders for one experiment
pub struct ExperimentData {
    /// Training loaders
    pub train: TrainData,
    /// Validation loader
    pub test: DataLoader,
}

/// Training loaders, shaped by the model's data regime
pub enum TrainData {
    /// One loader
    Single(DataLoader),
    /// Labeled and unlabeled loaders iterated in lockstep
    Paired {
        /// Labeled classes only
        labeled: DataLoader,
        /// Labeled and unlabeled classes
        unlabeled: DataLoader,
    },
}

impl TrainData {
    /// Iterations per epoch
    pub fn iterations(&self) -> usize {
        match self {
            TrainData::Single(loader) => loader.num_batches(),
            TrainData::Paired { labeled, unlabeled } => {
                labeled.num_batches().min(unlabeled.num_batches())
            }
        }
    }
}

/// Build train/test loaders for an experiment config
pub fn load_experiment_data(config: &Config, device: &Device) -> Result<ExperimentData> {
    let info = &config.train_info;
    let model = info.model_name;
    let home = &config.path_info.data_home;
    let seed = info.seed;

    let labeled_class = parse_class_list(&info.labeled_class)?;
    let unlabeled_class = parse_class_list(&info.unlabeled_class)?;
    let test_class = parse_class_list(&info.test_class)?;

    let load = |train: bool, filter: Option<ClassFilter>, portion: f64| -> Result<TensorDataset> {
        match config.path_info.data_class {
            DataClass::Mnist => {
                let file = if train { "mnist_train.csv" } else { "mnist_test.csv" };
                MnistCsv::new(home.join(file))
                    .with_filter(filter)
                    .with_portion(portion)
                    .load(device)
                    .with_context(|| format!("Failed to load {}", file))
            }
            DataClass::Toy => {
                let file = if train { "train.csv" } else { "test.csv" };
                ToyCsv::new(home.join(file))
                    .with_labels(model.uses_labels())
                    .with_num_classes(Some(info.y_dim))
                    .with_filter(filter)
                    .with_portion(portion)
                    .load(device)
                    .with_context(|| format!("Failed to load {}", file))
            }
        }
    };

    let loader = |dataset: TensorDataset, batch_size: usize, train: bool, offset: u64| {
        DataLoader::new(
            dataset,
            DataLoaderConfig {
                batch_size,
                shuffle: true,
                drop_last: train,
                seed: seed.wrapping_add(offset),
            },
        )
    };

    let data = if model.is_semi_supervised() {
        let labeled = load(
            true,
            Some(ClassFilter::new(labeled_class.clone(), Vec::new()).with_unknown_code()),
            info.portion,
        )?;
        let unlabeled = load(
            true,
            Some(
                ClassFilter::new(labeled_class.clone(), unlabeled_class.clone())
                    .with_unknown_code(),
            ),
            1.0,
        )?;
        let mut unknown = unlabeled_class.clone();
        unknown.extend(test_class.iter().copied());
        let test = load(
            false,
            Some(ClassFilter::new(labeled_class, unknown).with_unknown_code()),
            1.0,
        )?;

        check_label_width(&labeled, info.y_dim)?;
        check_label_width(&unlabeled, info.y_dim)?;
        check_label_width(&test, info.y_dim)?;

        ExperimentData {
            train: TrainData::Paired {
                labeled: loader(labeled, info.batch_size1.unwrap_or(1), true, 0),
                unlabeled: loader(unlabeled, info.batch_size2.unwrap_or(1), true, 1),
            },
            test: loader(test, config.test_batch_size(), false, 2),
        }
    } else {
        let filter = if labeled_class.is_empty() {
            None
        } else {
            Some(ClassFilter::new(labeled_class, unlabeled_class))
        };
        let train = load(true, filter.clone(), info.portion)?;
        let test = load(false, filter, 1.0)?;

        if model.uses_labels() {
            check_label_width(&train, info.y_dim)?;
            check_label_width(&test, info.y_dim)?;
        }

        ExperimentData {
            train: TrainData::Single(loader(train, info.batch_size, true, 0)),
            test: loader(test, config.test_batch_size(), false, 2),
        }
    };

    Ok(data)
}

fn check_label_width(dataset: &TensorDataset, y_dim: usize) -> Result<()> {
    match dataset.metadata().num_classes {
        Some(width) if width == y_dim => Ok(()),
        Some(width) => Err(DataError::ShapeMismatch {
            reason: format!(
                "dataset '{}' has {} label columns but y_dim = {}",
                dataset.metadata().name,
                width,
                y_dim
            ),
        }
        .into()),
        None => Err(DataError::ShapeMismatch {
            reason: format!("dataset '{}' has no labels", dataset.metadata().name),
        }
        .into()),
    }
}
