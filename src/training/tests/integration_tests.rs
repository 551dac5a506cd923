//! End-to-end integration tests: experiment file to trained model

use std::fmt::Write as _;
use std::path::Path;

use anyhow::Result;
use candle_core::Device;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::models::{build_model, ModelName};
use crate::training::data::{load_experiment_data, TrainData};
use crate::training::loss::LossTerm;
use crate::training::{Trainer, TrainingEvent};

use super::fixtures::ExperimentFixture;

fn run(config_path: &Path) -> Result<crate::training::TrainingResult> {
    let config = Config::from_file(config_path)?;
    let device = Device::Cpu;
    let model = build_model(&config, &device)?;
    let mut data = load_experiment_data(&config, &device)?;
    let mut trainer = Trainer::new(config.training_config()?, model, device)?;
    trainer.train(&mut data, false)
}

#[test]
fn test_wae_mmd_from_toy_experiment() -> Result<()> {
    let fixture = ExperimentFixture::toy(ModelName::WaeMmd, "")?;
    let result = run(&fixture.config_path)?;

    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.history.len(), 2);
    assert!(fixture.home().join("out/model.safetensors").exists());

    let metrics = std::fs::read_to_string(fixture.home().join("out/metrics.json"))?;
    let value: serde_json::Value = serde_json::from_str(&metrics)?;
    assert_eq!(value["model"], "wae_mmd");
    assert_eq!(value["epochs_completed"], 2);
    assert_eq!(value["history"]["epochs"].as_array().map(Vec::len), Some(2));
    assert!(value["history"]["epochs"][0]["train"]["penalty"].is_number());
    Ok(())
}

#[test]
fn test_conditional_gan_from_toy_experiment() -> Result<()> {
    let fixture = ExperimentFixture::toy(ModelName::CwaeGan, "lr_adv = 0.005\nsave_best = true")?;
    let config = Config::from_file(&fixture.config_path)?;
    let data = load_experiment_data(&config, &Device::Cpu)?;
    match &data.train {
        TrainData::Single(loader) => {
            assert_eq!(loader.metadata().num_classes, Some(3));
            assert_eq!(loader.metadata().feature_dim, 4);
        }
        TrainData::Paired { .. } => panic!("conditional WAE uses one loader"),
    }

    let result = run(&fixture.config_path)?;
    assert!(result.success, "{:?}", result.error_message);
    assert!(result.final_state.best_objective.is_some());
    Ok(())
}

#[test]
fn test_toy_test_split_missing_a_class_keeps_label_width() -> Result<()> {
    let fixture = ExperimentFixture::toy(ModelName::CwaeMmd, "")?;
    let rows: String = (0..12)
        .map(|row| format!("{}, 0.1, -0.2, 0.3, {:.2}\n", row % 2, row as f32 / 12.0))
        .collect();
    std::fs::write(fixture.home().join("test.csv"), rows)?;

    let config = Config::from_file(&fixture.config_path)?;
    let data = load_experiment_data(&config, &Device::Cpu)?;
    assert_eq!(data.test.metadata().num_classes, Some(3));

    let result = run(&fixture.config_path)?;
    assert!(result.success, "{:?}", result.error_message);
    assert!(result.history.epochs.iter().all(|e| e.test.is_some()));
    Ok(())
}

#[test]
fn test_toy_classifier_honors_labeled_class() -> Result<()> {
    let fixture = ExperimentFixture::toy(
        ModelName::Classifier,
        "labeled_class = 2, 0\nunlabeled_class = 1",
    )?;
    let config = Config::from_file(&fixture.config_path)?;
    let data = load_experiment_data(&config, &Device::Cpu)?;

    let TrainData::Single(train) = &data.train else {
        panic!("the classifier uses one loader");
    };
    assert_eq!(train.metadata().num_classes, Some(3));
    assert_eq!(train.dataset_size(), 32);
    assert_eq!(data.test.metadata().num_classes, Some(3));

    // classes 2 and 0 get codes 0 and 1, class 1 is unknown
    let labels = data
        .test
        .dataset()
        .labels()
        .expect("labels")
        .to_vec2::<f32>()?;
    let codes: Vec<usize> = labels
        .iter()
        .map(|row| row.iter().position(|&v| v == 1.0).expect("one-hot"))
        .collect();
    assert_eq!(&codes[..4], &[0, 0, 0, 0]);
    assert_eq!(codes.iter().filter(|&&c| c == 2).count(), 4);
    Ok(())
}

#[test]
fn test_toy_label_outside_y_dim_is_rejected() -> Result<()> {
    let fixture = ExperimentFixture::toy(ModelName::Cvae, "")?;
    std::fs::write(
        fixture.home().join("test.csv"),
        "0, 0.1, 0.2, 0.3, 0.4\n5, 0.1, 0.2, 0.3, 0.4\n",
    )?;

    let config = Config::from_file(&fixture.config_path)?;
    let err = load_experiment_data(&config, &Device::Cpu)
        .err()
        .expect("label 5 with y_dim = 3");
    assert!(format!("{:#}", err).contains("test.csv"));
    Ok(())
}

/// MNIST-style file: header, then `label, 784 pixels` with classes cycling 0..4
fn write_mnist(path: &Path, rows: usize) -> Result<()> {
    let mut content = String::from("label");
    for i in 0..784 {
        write!(content, ",p{}", i)?;
    }
    content.push('\n');
    for row in 0..rows {
        write!(content, "{}", row % 4)?;
        for i in 0..784 {
            write!(content, ",{}", (row * 31 + i * 7) % 256)?;
        }
        content.push('\n');
    }
    std::fs::write(path, content)?;
    Ok(())
}

fn sswae_experiment(dir: &Path, model_name: ModelName) -> Result<std::path::PathBuf> {
    write_mnist(&dir.join("mnist_train.csv"), 40)?;
    write_mnist(&dir.join("mnist_test.csv"), 16)?;

    let config = format!(
        r#"
[train_info]
model_name = {model_name}
z_dim = 2
y_dim = 3
yz_dim = 2
lr = 0.005
beta1 = 0.5
num_epoch = 1
batch_size1 = 4
batch_size2 = 8
lambda = 1.0
lambda2 = 1.0
lambda_mmd = 1.0
lambda_hsic = 1.0
classification_weight = 0.5
labeled_class = 0, 1
unlabeled_class = 2
test_class = 3
seed = 5

[path_info]
data_home = {home}
data_class = mnist

[network]
x_dim = 784
hidden_dims = 8
disc_hidden = 8
disc_layers = 1
"#,
        home = dir.display(),
    );
    let path = dir.join("sswae.cfg");
    std::fs::write(&path, config)?;
    Ok(path)
}

#[test]
fn test_semi_supervised_class_split() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = sswae_experiment(dir.path(), ModelName::SswaeMmd)?;
    let config = Config::from_file(&path)?;
    let data = load_experiment_data(&config, &Device::Cpu)?;

    let TrainData::Paired { labeled, unlabeled } = &data.train else {
        panic!("semi-supervised models use paired loaders");
    };
    // classes 0 and 1 of 40 rows, plus class 2 for the unlabeled loader
    assert_eq!(labeled.dataset_size(), 20);
    assert_eq!(unlabeled.dataset_size(), 30);
    assert_eq!(labeled.metadata().num_classes, Some(3));
    assert_eq!(unlabeled.metadata().num_classes, Some(3));
    assert_eq!(data.train.iterations(), 3);
    // the test split keeps every class, 2 and 3 coded as unknown
    assert_eq!(data.test.dataset_size(), 16);
    Ok(())
}

#[tokio::test]
async fn test_sswae_hsic_pipeline_with_events() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = sswae_experiment(dir.path(), ModelName::SswaeHsic)?;

    let config = Config::from_file(&path)?;
    let device = Device::Cpu;
    let model = build_model(&config, &device)?;
    let mut data = load_experiment_data(&config, &device)?;
    let training_config = config.training_config()?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let result = tokio::task::spawn_blocking(move || {
        let mut trainer = Trainer::new(training_config, model, device)?.with_event_monitoring(tx);
        trainer.train(&mut data, false)
    })
    .await??;

    assert!(result.success, "{:?}", result.error_message);
    let epoch = result.history.last().expect("one epoch");
    for term in [
        LossTerm::Main,
        LossTerm::Main2,
        LossTerm::Penalty,
        LossTerm::Penalty2,
        LossTerm::Penalty3,
    ] {
        assert!(epoch.train_value(term).is_some(), "missing {:?}", term);
    }
    assert!(epoch.test.is_some());

    let mut completed = false;
    while let Some(event) = rx.recv().await {
        if matches!(event, TrainingEvent::TrainingCompleted { .. }) {
            completed = true;
        }
    }
    assert!(completed);
    Ok(())
}

#[test]
fn test_missing_data_file_is_reported() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = sswae_experiment(dir.path(), ModelName::SswaeGan)?;
    std::fs::remove_file(dir.path().join("mnist_test.csv"))?;

    let config = Config::from_file(&path)?;
    let err = load_experiment_data(&config, &Device::Cpu)
        .err()
        .expect("missing test file");
    assert!(format!("{:#}", err).contains("mnist_test.csv"));
    Ok(())
}
