//! Test fixtures for setting up common test scenarios

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Result;
use candle_core::{Device, Tensor};
use tempfile::TempDir;

use crate::models::tests_support::settings;
use crate::models::{build_from_settings, ModelName, ModelSettings, XaeModel};
use crate::training::config::{
    CheckpointingConfig, LoggingConfig, OptimizerConfig, SchedulerConfig, TrainingConfig,
    TrainingParams,
};
use crate::training::data::{DataLoader, DataLoaderConfig, ExperimentData, TensorDataset, TrainData};

/// Feature width of the synthetic data, matching `tests_support::settings`
pub const X_DIM: usize = 4;

/// Label width of the synthetic data (two known classes plus "unknown")
pub const Y_DIM: usize = 3;

/// Loop configuration for short CPU runs
pub fn training_config(num_epochs: usize) -> TrainingConfig {
    TrainingConfig {
        optimizer: OptimizerConfig {
            learning_rate: 1e-2,
            ..OptimizerConfig::default()
        },
        adversary_optimizer: OptimizerConfig {
            learning_rate: 1e-2,
            beta1: 0.5,
            ..OptimizerConfig::default()
        },
        scheduler: SchedulerConfig::default(),
        training: TrainingParams {
            num_epochs,
            seed: 3,
            validate: true,
            save_best: false,
            log_steps: 1,
        },
        checkpointing: CheckpointingConfig::default(),
        logging: LoggingConfig::default(),
    }
}

/// Small model of the given variant
pub fn model(name: ModelName) -> Result<Box<dyn XaeModel>> {
    Ok(build_from_settings(settings(name), &Device::Cpu)?)
}

/// Small model with custom settings
pub fn model_with(settings: ModelSettings) -> Result<Box<dyn XaeModel>> {
    Ok(build_from_settings(settings, &Device::Cpu)?)
}

/// Rows in [-1, 1] with one-hot labels cycling over the classes
pub fn dataset(name: &str, n: usize, seed_offset: usize) -> Result<TensorDataset> {
    let device = Device::Cpu;
    let features = Tensor::rand(-1.0f32, 1.0, (n, X_DIM), &device)?;
    let mut labels = vec![0.0f32; n * Y_DIM];
    for row in 0..n {
        labels[row * Y_DIM + (row + seed_offset) % Y_DIM] = 1.0;
    }
    let labels = Tensor::from_vec(labels, (n, Y_DIM), &device)?;
    TensorDataset::new(name, features, Some(labels))
}

fn loader(dataset: TensorDataset, batch_size: usize, drop_last: bool, seed: u64) -> DataLoader {
    DataLoader::new(
        dataset,
        DataLoaderConfig {
            batch_size,
            shuffle: true,
            drop_last,
            seed,
        },
    )
}

/// One training loader of `n_train` rows and a test loader of `n_test` rows
pub fn single_data(n_train: usize, n_test: usize, batch_size: usize) -> Result<ExperimentData> {
    Ok(ExperimentData {
        train: TrainData::Single(loader(dataset("train", n_train, 0)?, batch_size, true, 0)),
        test: loader(dataset("test", n_test, 1)?, batch_size, false, 2),
    })
}

/// Labeled and unlabeled training loaders plus a test loader
pub fn paired_data(n_labeled: usize, n_unlabeled: usize, n_test: usize) -> Result<ExperimentData> {
    Ok(ExperimentData {
        train: TrainData::Paired {
            labeled: loader(dataset("labeled", n_labeled, 0)?, 4, true, 0),
            unlabeled: loader(dataset("unlabeled", n_unlabeled, 1)?, 8, true, 1),
        },
        test: loader(dataset("test", n_test, 2)?, 8, false, 2),
    })
}

/// Training data shaped for the model's regime
pub fn data_for(name: ModelName) -> Result<ExperimentData> {
    if name.is_semi_supervised() {
        paired_data(16, 32, 12)
    } else {
        single_data(24, 10, 4)
    }
}

/// Temporary experiment directory with toy CSV data and an INI experiment file
pub struct ExperimentFixture {
    /// Keeps the directory alive
    pub temp_dir: TempDir,
    /// Experiment file
    pub config_path: PathBuf,
}

impl ExperimentFixture {
    /// Write `train.csv`, `test.csv` and `experiment.cfg` for `model_name`
    ///
    /// `extra` lines are appended to `[train_info]`.
    pub fn toy(model_name: ModelName, extra: &str) -> Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let home = temp_dir.path();
        let labeled = model_name.uses_labels();
        write_toy_csv(&home.join("train.csv"), 32, labeled)?;
        write_toy_csv(&home.join("test.csv"), 12, labeled)?;

        let config = format!(
            r#"
[train_info]
model_name = {model_name}
z_dim = 2
y_dim = 3
lr = 0.01
beta1 = 0.5
num_epoch = 2
batch_size = 8
lambda = 1.0
seed = 11
{extra}

[path_info]
data_home = {home}
data_class = toy
save_path = {save}
metrics_path = {metrics}

[network]
x_dim = {x_dim}
hidden_dims = 8
disc_hidden = 8
disc_layers = 1
"#,
            home = home.display(),
            save = home.join("out/model.safetensors").display(),
            metrics = home.join("out/metrics.json").display(),
            x_dim = X_DIM,
        );
        let config_path = home.join("experiment.cfg");
        std::fs::write(&config_path, config)?;

        Ok(Self {
            temp_dir,
            config_path,
        })
    }

    /// Experiment directory
    pub fn home(&self) -> &Path {
        self.temp_dir.path()
    }
}

/// `label, f0, ..., f3` rows with deterministic values
fn write_toy_csv(path: &Path, rows: usize, labeled: bool) -> Result<()> {
    let mut content = String::new();
    for row in 0..rows {
        if labeled {
            write!(content, "{},", row % Y_DIM)?;
        }
        let values: Vec<String> = (0..X_DIM)
            .map(|col| format!("{:.3}", ((row * 7 + col * 3) % 11) as f32 / 5.5 - 1.0))
            .collect();
        writeln!(content, "{}", values.join(","))?;
    }
    std::fs::write(path, content)?;
    Ok(())
}
