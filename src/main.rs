use anyhow::{Context, Result};
use candle_core::Device;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use xae::logging::init_logging;
use xae::training::{load_experiment_data, Trainer, TrainingEvent};
use xae::{build_model, Config, ModelName};

#[derive(Parser)]
#[command(name = "xae")]
#[command(about = "Autoencoder-family generative models: VAE, WAE and semi-supervised WAE", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Emit JSON log lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model described by an experiment file
    Train {
        /// Experiment file (INI, or JSON/YAML/TOML by extension)
        #[arg(short, long)]
        config: PathBuf,

        /// Continue from the resume state in `save_state`
        #[arg(long)]
        resume: bool,

        /// Compute device
        #[arg(long, value_enum, default_value_t = DeviceArg::Auto)]
        device: DeviceArg,
    },

    /// Validate an experiment file
    Config {
        /// Experiment file to validate
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Show system information
    Info,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DeviceArg {
    Auto,
    Cpu,
    Cuda,
    Metal,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet, cli.json_logs)?;

    match cli.command {
        Commands::Train {
            config,
            resume,
            device,
        } => {
            train(config, resume, device).await?;
        }

        Commands::Config { file } => {
            validate_config(file)?;
        }

        Commands::Info => {
            show_system_info();
        }
    }

    Ok(())
}

fn select_device(arg: DeviceArg) -> Result<Device> {
    let device = match arg {
        DeviceArg::Auto => Device::cuda_if_available(0)?,
        DeviceArg::Cpu => Device::Cpu,
        DeviceArg::Cuda => Device::new_cuda(0).context("CUDA device unavailable")?,
        DeviceArg::Metal => Device::new_metal(0).context("Metal device unavailable")?,
    };
    Ok(device)
}

async fn train(config_path: PathBuf, resume: bool, device: DeviceArg) -> Result<()> {
    let config = Config::from_file(&config_path)
        .with_context(|| format!("Failed to load configuration file {}", config_path.display()))?;
    let device = select_device(device)?;
    info!(
        "Experiment {} ({}) on {:?}",
        config_path.display(),
        config.train_info.model_name,
        device
    );

    let training_config = config.training_config()?;
    let model = build_model(&config, &device).context("Failed to build model")?;
    let mut data = load_experiment_data(&config, &device).context("Failed to load data")?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let listener = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                TrainingEvent::StepCompleted { epoch, step, loss, lr } => {
                    debug!("epoch {} step {}: objective {:.4e}, lr {:.2e}", epoch + 1, step, loss, lr);
                }
                TrainingEvent::ModelSaved { path, objective } => match objective {
                    Some(obj) => debug!("saved {} (objective {:.6e})", path.display(), obj),
                    None => debug!("saved {}", path.display()),
                },
                TrainingEvent::CheckpointSaved { path } => {
                    debug!("resume state written to {}", path.display());
                }
                TrainingEvent::Error { error } => warn!("{}", error),
                _ => {}
            }
        }
    });

    let result = tokio::task::spawn_blocking(move || {
        let mut trainer = Trainer::new(training_config, model, device)?.with_event_monitoring(tx);
        trainer.train(&mut data, resume)
    })
    .await
    .context("Training task panicked")??;

    listener.await?;

    if !result.success {
        anyhow::bail!(
            "{}",
            result
                .error_message
                .unwrap_or_else(|| "Training failed".to_string())
        );
    }

    info!(
        "Finished {} epochs in {:.2?}",
        result.final_state.epoch, result.training_duration
    );
    if let (Some(best), Some(epoch)) = (result.final_state.best_objective, result.final_state.best_epoch) {
        info!("Best validation objective {:.6e} at epoch {}", best, epoch);
    }
    if let Some(path) = result.model_path {
        info!("Model written to {}", path.display());
    }
    Ok(())
}

fn validate_config(config_path: PathBuf) -> Result<()> {
    info!("Validating configuration file: {}", config_path.display());

    let config = Config::from_file(&config_path).context("Failed to load configuration file")?;
    let training = config.training_config()?;
    let info = &config.train_info;

    info!("Configuration is valid");
    info!("  - Model: {}", info.model_name);
    info!(
        "  - Latent: z_dim {}, y_dim {}, yz_dim {}",
        info.z_dim, info.y_dim, info.yz_dim
    );
    info!(
        "  - Weights: lambda {}, lambda2 {}, lambda_mmd {}, lambda_hsic {}",
        info.lamb, info.lamb2, info.lambda_mmd, info.lambda_hsic
    );
    info!(
        "  - Network: x_dim {}, hidden [{}]",
        config.network.x_dim, config.network.hidden_dims
    );
    info!(
        "  - Epochs: {}, schedule {:?}",
        training.training.num_epochs, training.scheduler.scheduler_type
    );

    Ok(())
}

fn show_system_info() {
    println!("XAE - autoencoder-family generative models");
    println!();
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Models:");
    for name in ModelName::ALL {
        println!("  - {}", name);
    }
    println!();
    println!("Hardware support:");

    #[cfg(feature = "cuda")]
    println!("  - NVIDIA CUDA");
    #[cfg(feature = "metal")]
    println!("  - Apple Metal");
    #[cfg(feature = "accelerate")]
    println!("  - Apple Accelerate");
    println!("  - CPU");
}
