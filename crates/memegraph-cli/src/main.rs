//! memegraph CLI - train multimodal meme GNNs from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Write synthetic train/dev/test splits for a smoke run
//! memegraph synth --output data/ --examples 64
//!
//! # Train the GCN classifier
//! memegraph train --train data/train.jsonl --dev data/dev.jsonl --epochs 5
//!
//! # Train the VGAE from a JSON config, overriding the optimizer
//! memegraph train --train data/train.jsonl --dev data/dev.jsonl \
//!     --config vgae.json --trainer vgae --optimizer adamw --lr 5e-4
//!
//! # Continue from a checkpoint directory
//! memegraph train --train data/train.jsonl --resume checkpoints/mmgnn/0.81_0.77
//! ```
//!
//! Epoch summaries go to stdout. Logs go to stderr, filtered by `RUST_LOG`
//! (default `info`, or `debug` with `--verbose`).

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::ProgressBar;
use memegraph_train::{
    DeviceInfo, DeviceRequest, GnnTrainer, MemeDataset, OptimizerKind, Trainer, TrainerConfig,
    TrainerKind, TrainingStrategy, VgaeTrainer,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "memegraph")]
#[command(about = "Multimodal meme GNN training", long_about = None)]
struct Cli {
    /// Debug-level logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a classifier or VGAE on JSON Lines splits
    Train(TrainArgs),

    /// Write synthetic train/dev/test splits
    Synth {
        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Training examples (dev and test get a quarter each)
        #[arg(short = 'n', long, default_value = "64")]
        examples: usize,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Image height and width
        #[arg(long, default_value = "32")]
        image_size: usize,

        /// Image channels
        #[arg(long, default_value = "3")]
        channels: usize,

        /// Token vocabulary size
        #[arg(long, default_value = "1000")]
        vocab_size: usize,
    },
}

#[derive(clap::Args)]
struct TrainArgs {
    /// Training split (JSON Lines)
    #[arg(long)]
    train: PathBuf,

    /// Validation split, evaluated and checkpointed after every epoch
    #[arg(long)]
    dev: Option<PathBuf>,

    /// Test split, evaluated once after training
    #[arg(long)]
    test: Option<PathBuf>,

    /// JSON config file; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Model family: gnn or vgae
    #[arg(long)]
    trainer: Option<TrainerKind>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    /// Learning rate
    #[arg(long)]
    lr: Option<f64>,

    /// Optimizer: sgd, adam or adamw
    #[arg(long)]
    optimizer: Option<OptimizerKind>,

    /// auto, cpu, cuda:N or metal
    #[arg(long)]
    device: Option<DeviceRequest>,

    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,

    /// Checkpoint subdirectory name
    #[arg(long)]
    model_name: Option<String>,

    #[arg(long)]
    seed: Option<u64>,

    /// Image height and width of the splits
    #[arg(long, default_value = "32")]
    image_size: usize,

    /// Token vocabulary size
    #[arg(long)]
    vocab_size: Option<usize>,

    /// Train projections and the graph model only
    #[arg(long)]
    freeze_encoders: bool,

    /// Checkpoint directory to restore before training
    #[arg(long)]
    resume: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Train(args) => cmd_train(args),
        Commands::Synth {
            output,
            examples,
            seed,
            image_size,
            channels,
            vocab_size,
        } => cmd_synth(&output, examples, seed, [channels, image_size, image_size], vocab_size),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_config(args: &TrainArgs) -> Result<TrainerConfig> {
    let mut config = match &args.config {
        Some(path) => TrainerConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => TrainerConfig::default(),
    };

    if let Some(trainer) = args.trainer {
        config = config.with_trainer(trainer);
    }
    if let Some(epochs) = args.epochs {
        config = config.with_epochs(epochs);
    }
    if let Some(batch_size) = args.batch_size {
        config = config.with_batch_size(batch_size);
    }
    if let Some(lr) = args.lr {
        config = config.with_learning_rate(lr);
    }
    if let Some(kind) = args.optimizer {
        config = config.with_optimizer(kind);
    }
    if let Some(device) = args.device {
        config = config.with_device(device);
    }
    if let Some(dir) = &args.checkpoint_dir {
        config = config.with_checkpoint_dir(dir);
    }
    if let Some(name) = &args.model_name {
        config = config.with_model_name(name);
    }
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }
    if let Some(vocab) = args.vocab_size {
        config.dims.vocab_size = vocab;
    }
    if args.freeze_encoders {
        config = config.with_freeze_encoders(true);
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn load_split(path: &Path, image_shape: [usize; 3]) -> Result<MemeDataset> {
    let start = Instant::now();
    let pb = ProgressBar::new_spinner();
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(format!("Loading {}...", path.display()));

    let ds = MemeDataset::from_jsonl(path, image_shape)
        .with_context(|| format!("Failed to load {}", path.display()))?;

    pb.finish_and_clear();
    info!(
        path = %path.display(),
        examples = ds.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "loaded split"
    );
    Ok(ds)
}

fn cmd_train(args: TrainArgs) -> Result<()> {
    let config = build_config(&args)?;
    let image_shape = [config.dims.image_channels, args.image_size, args.image_size];

    let train = load_split(&args.train, image_shape)?;
    if train.is_empty() {
        bail!("{} contains no examples", args.train.display());
    }
    let dev = args.dev.as_deref().map(|p| load_split(p, image_shape)).transpose()?;
    let test = args.test.as_deref().map(|p| load_split(p, image_shape)).transpose()?;

    let device = DeviceInfo::resolve(config.device).context("Failed to open device")?;
    let splits = Splits {
        train: &train,
        dev: dev.as_ref(),
        test: test.as_ref(),
        resume: args.resume.as_deref(),
    };

    match config.trainer {
        TrainerKind::Gnn => run(GnnTrainer::from_config(config, device)?, splits),
        TrainerKind::Vgae => run(VgaeTrainer::from_config(config, device)?, splits),
    }
}

struct Splits<'a> {
    train: &'a MemeDataset,
    dev: Option<&'a MemeDataset>,
    test: Option<&'a MemeDataset>,
    resume: Option<&'a Path>,
}

fn run<S: TrainingStrategy>(mut trainer: Trainer<S>, splits: Splits<'_>) -> Result<()> {
    if let Some(dir) = splits.resume {
        trainer
            .resume(dir)
            .with_context(|| format!("Failed to resume from {}", dir.display()))?;
    }

    let batch_size = trainer.config().batch_size;
    let seed = trainer.config().seed;
    let device = trainer.device().device.clone();

    let start = Instant::now();
    let mut train_loader = splits.train.loader(batch_size, Some(seed), &device);
    let mut dev_loader = splits.dev.map(|ds| ds.loader(batch_size, None, &device));
    let report = trainer.fit(
        &mut train_loader,
        dev_loader.as_mut().map(|l| l as &mut dyn memegraph_train::BatchSource),
    )?;

    let saved: Vec<_> = report.saved().map(|p| p.display().to_string()).collect();
    info!(
        epochs = report.train.len(),
        checkpoints = saved.len(),
        elapsed_s = start.elapsed().as_secs_f64(),
        "training finished"
    );
    for path in &saved {
        println!("Checkpoint: {path}");
    }

    if let Some(test) = splits.test {
        let last_epoch = report.train.len().saturating_sub(1);
        trainer.evaluate(last_epoch, "Test", &mut test.loader(batch_size, None, &device))?;
    }
    Ok(())
}

fn cmd_synth(output: &Path, examples: usize, seed: u64, image_shape: [usize; 3], vocab_size: usize) -> Result<()> {
    fs::create_dir_all(output).with_context(|| format!("Failed to create {}", output.display()))?;
    let held_out = (examples / 4).max(4);

    for (i, (name, n)) in [("train", examples), ("dev", held_out), ("test", held_out)]
        .into_iter()
        .enumerate()
    {
        let ds = MemeDataset::synthetic(n, image_shape, vocab_size, seed + i as u64)
            .context("Failed to generate synthetic data")?;
        let path = output.join(format!("{name}.jsonl"));
        ds.write_jsonl(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Wrote {n} examples to {}", path.display());
    }
    Ok(())
}
