//! DeepFM CLI - train the model on a synthetic stream or score a held-out
//! stream against an exported servable bundle.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use deepfm::config::DeepFmConfig;
use deepfm::dataset::SyntheticStream;
use deepfm::predictor::Predictor;
use deepfm::trainer::Trainer;

#[derive(Parser, Debug)]
#[command(name = "deepfm", about = "DeepFM training, export, and batch inference")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train the model and export a servable bundle
    Train(TrainCommand),
    /// Score a held-out stream against an exported bundle
    Predict(PredictCommand),
}

/// Train the DeepFM model.
///
/// Streams synthetic batches through the training loop until exhaustion,
/// then writes the final checkpoint and the servable export.
#[derive(Args, Debug)]
struct TrainCommand {
    /// Number of continuous feature fields
    #[arg(long, default_value = "3")]
    cont_field_size: usize,

    /// Number of categorical feature fields
    #[arg(long, default_value = "2")]
    cate_field_size: usize,

    /// Categorical vocabulary size
    #[arg(long, default_value = "100")]
    cate_index_size: usize,

    /// Width of the dense vector features
    #[arg(long, default_value = "4")]
    vector_feats_size: usize,

    /// Embedding dimension
    #[arg(long, default_value = "8")]
    embedding_size: usize,

    /// Hidden-layer widths of the deep tower
    #[arg(long, value_delimiter = ',', default_value = "64,32")]
    hidden_units: Vec<usize>,

    /// Batch size
    #[arg(long, short = 'b', default_value = "128")]
    batch_size: usize,

    /// Base learning rate
    #[arg(long, default_value = "0.001")]
    learning_rate: f32,

    /// Steps per learning-rate decay interval
    #[arg(long, default_value = "1000")]
    decay_steps: u64,

    /// Multiplicative learning-rate decay per interval
    #[arg(long, default_value = "0.96")]
    decay_rate: f32,

    /// L2 coefficient on the fusion weight matrix
    #[arg(long, default_value = "0.0")]
    l2_reg: f32,

    /// Steps between validation-AUC reports
    #[arg(long, default_value = "100")]
    print_interval: u64,

    /// Directory for the final checkpoint (and restore source)
    #[arg(long, short = 'd', env = "DEEPFM_CHECKPOINT_DIR", default_value = "checkpoints")]
    checkpoint_dir: PathBuf,

    /// Directory for the servable export
    #[arg(long, env = "DEEPFM_EXPORT_DIR", default_value = "export")]
    export_dir: PathBuf,

    /// Restore the latest checkpoint before training; missing or corrupt
    /// checkpoints abort the run
    #[arg(long, default_value = "false")]
    restore: bool,

    /// Seed for parameter initialization
    #[arg(long, default_value = "2019")]
    seed: u64,

    /// Number of training batches to stream
    #[arg(long, default_value = "1000")]
    train_batches: usize,

    /// Number of validation batches to materialize
    #[arg(long, default_value = "20")]
    val_batches: usize,

    /// Seed for the synthetic data stream
    #[arg(long, default_value = "7")]
    data_seed: u64,
}

impl TrainCommand {
    fn run(self) -> Result<()> {
        let config = DeepFmConfig::new(
            self.cont_field_size,
            self.cate_field_size,
            self.cate_index_size,
            self.vector_feats_size,
        )
        .with_hidden_units(self.hidden_units)
        .with_embedding_size(self.embedding_size)
        .with_batch_size(self.batch_size)
        .with_learning_rate(self.learning_rate)
        .with_decay(self.decay_steps, self.decay_rate)
        .with_l2_reg(self.l2_reg)
        .with_print_interval(self.print_interval)
        .with_checkpoint_dir(self.checkpoint_dir)
        .with_export_dir(self.export_dir)
        .with_restore(self.restore)
        .with_seed(self.seed);

        let mut trainer = Trainer::new(&config).context("failed to build model")?;
        let mut train = SyntheticStream::new(&config, self.train_batches, self.data_seed);
        let mut val = SyntheticStream::new(&config, self.val_batches, self.data_seed + 1);

        let report = trainer
            .fit(&mut train, &mut val)
            .context("training failed")?;

        info!(
            step = report.global_step,
            loss = report.final_loss,
            auc = report.final_auc,
            checkpoint = %report.checkpoint_path.display(),
            "training complete"
        );
        match &report.export_path {
            Some(path) => info!(export = %path.display(), "servable model exported"),
            None => info!("servable export failed; checkpoint preserved"),
        }
        Ok(())
    }
}

/// Score a held-out stream against an exported bundle and report AUC.
#[derive(Args, Debug)]
struct PredictCommand {
    /// Directory of the servable bundle
    #[arg(long, env = "DEEPFM_EXPORT_DIR", default_value = "export")]
    export_dir: PathBuf,

    /// Batch size for the inference stream
    #[arg(long, short = 'b', default_value = "128")]
    batch_size: usize,

    /// Number of batches to score
    #[arg(long, default_value = "100")]
    batches: usize,

    /// Seed for the synthetic inference stream
    #[arg(long, default_value = "17")]
    data_seed: u64,
}

impl PredictCommand {
    fn run(self) -> Result<()> {
        let predictor = Predictor::load(&self.export_dir).context("failed to load export")?;
        let config = predictor
            .model()
            .spec()
            .to_config()
            .with_batch_size(self.batch_size);

        let mut stream = SyntheticStream::new(&config, self.batches, self.data_seed);
        let report = predictor.run(&mut stream).context("inference failed")?;

        match report.auc {
            Some(auc) => info!(examples = report.examples, auc, "val of auc"),
            None => info!(examples = report.examples, "auc undefined (single class)"),
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("deepfm=info".parse()?))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Train(cmd) => cmd.run()?,
        Commands::Predict(cmd) => cmd.run()?,
    }
    Ok(())
}
