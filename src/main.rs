//! Planet Sentinel CLI
//!
//! Drives the change-detection pipeline locally: chip source scenes into
//! tile triplets, train the SiameseChangeNet, and predict change on a scene pair.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::{Color, Colorize};
use tracing::info;

use planet_sentinel::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use planet_sentinel::dataset::{ChipExtractor, MaskStrategy};
use planet_sentinel::inference::{ModelHandle, SceneStatus};
use planet_sentinel::raster::{read_raster, write_mask};
use planet_sentinel::training::run_training;
use planet_sentinel::utils::format_duration;
use planet_sentinel::utils::logging::{init_logging, LogConfig, LogLevel};
use planet_sentinel::utils::{BinaryMetrics, PixelCounts};
use planet_sentinel::PipelineConfig;

/// Land-cover change detection on paired satellite rasters
#[derive(Parser, Debug)]
#[command(name = "planet_sentinel")]
#[command(version)]
#[command(about = "Land-cover change detection with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG overrides it
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Plain log output without ANSI colors
    #[arg(long, global = true, default_value = "false")]
    no_color: bool,

    /// Pipeline configuration file (JSON); defaults are used when absent
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum MaskArg {
    /// Read `<scene>_mask` files next to each pair
    Explicit,
    /// NDVI drop between before and after
    Ndvi,
    /// Grayscale difference between before and after (R, G, B bands)
    RgbDiff,
    /// Grayscale difference on Blue, Green, Red, NIR scenes
    RgbDiffBgrn,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Cut source scene pairs into before/after/mask tile triplets
    Chip {
        /// Directory holding `<scene>_before.*` / `<scene>_after.*` rasters
        #[arg(short, long)]
        input_dir: PathBuf,

        /// Output directory for tiles
        #[arg(short, long, default_value = "data/tiles")]
        output_dir: PathBuf,

        /// Label source (overrides the config file)
        #[arg(short, long, value_enum)]
        mask: Option<MaskArg>,

        /// Tile size in pixels
        #[arg(long)]
        tile_size: Option<usize>,

        /// Step between windows in pixels
        #[arg(long)]
        stride: Option<usize>,
    },

    /// Train the change-detection model on a tile directory
    Train {
        /// Directory of tile triplets
        #[arg(short, long, default_value = "data/tiles")]
        tile_dir: PathBuf,

        /// Number of training epochs
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Batch size for training
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Learning rate
        #[arg(short, long)]
        learning_rate: Option<f64>,

        /// Output directory for checkpoints
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,
    },

    /// Predict change between a before/after scene pair
    Predict {
        /// Before raster
        #[arg(long)]
        before: PathBuf,

        /// After raster
        #[arg(long)]
        after: PathBuf,

        /// Checkpoint sidecar (`best.json` or `last.json`)
        #[arg(short = 'm', long, default_value = "checkpoints/best.json")]
        checkpoint: PathBuf,

        /// Write the binarized change mask as a PNG
        #[arg(long)]
        mask_out: Option<PathBuf>,

        /// Write the probability map as a raw little-endian f32 blob
        #[arg(long)]
        map_out: Option<PathBuf>,

        /// Ground-truth change mask to score the prediction against
        #[arg(long)]
        reference: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = log_config(cli.verbose, cli.no_color, cli.log_level.as_deref());
    if let Err(e) = init_logging(&log_config) {
        eprintln!("{} {}", "warning:".yellow().bold(), e);
    }

    print_banner();

    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    match cli.command {
        Commands::Chip {
            input_dir,
            output_dir,
            mask,
            tile_size,
            stride,
        } => cmd_chip(config, &input_dir, &output_dir, mask, tile_size, stride)?,

        Commands::Train {
            tile_dir,
            epochs,
            batch_size,
            learning_rate,
            checkpoint_dir,
        } => {
            let mut config = config;
            if let Some(epochs) = epochs {
                config.trainer.epochs = epochs;
            }
            if let Some(batch_size) = batch_size {
                config.trainer.batch_size = batch_size;
            }
            if let Some(lr) = learning_rate {
                config.trainer.learning_rate = lr;
            }
            if let Some(dir) = checkpoint_dir {
                config.trainer.checkpoint_dir = dir;
            }
            cmd_train(&config, &tile_dir)?;
        }

        Commands::Predict {
            before,
            after,
            checkpoint,
            mask_out,
            map_out,
            reference,
        } => cmd_predict(
            &config,
            &before,
            &after,
            &checkpoint,
            mask_out.as_deref(),
            map_out.as_deref(),
            reference.as_deref(),
        )?,
    }

    Ok(())
}

fn log_config(verbose: bool, no_color: bool, level: Option<&str>) -> LogConfig {
    let mut config = if no_color {
        LogConfig::production()
    } else if verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    if verbose {
        config.level = LogLevel::Debug;
    }
    if let Some(level) = level {
        config.level = LogLevel::parse(level);
    }
    config
}

fn status_color(status: SceneStatus) -> Color {
    match status {
        SceneStatus::AnomalyDetected => Color::Red,
        SceneStatus::Normal => Color::Green,
    }
}

fn print_banner() {
    println!(
        "{}",
        r#"
 +--------------------------------------------------------------+
 |   Planet Sentinel                                            |
 |   Satellite change detection with Burn + Rust                |
 +--------------------------------------------------------------+
  "#
        .green()
    );
}

fn cmd_chip(
    mut config: PipelineConfig,
    input_dir: &Path,
    output_dir: &Path,
    mask: Option<MaskArg>,
    tile_size: Option<usize>,
    stride: Option<usize>,
) -> Result<()> {
    if let Some(mask) = mask {
        config.chips.mask_strategy = match mask {
            MaskArg::Explicit => MaskStrategy::ExplicitMask,
            MaskArg::Ndvi => MaskStrategy::ndvi(),
            MaskArg::RgbDiff => MaskStrategy::rgb_diff(),
            MaskArg::RgbDiffBgrn => MaskStrategy::rgb_diff_bgrn(),
        };
    }
    if let Some(tile_size) = tile_size {
        config.chips.tile_size = tile_size;
    }
    if let Some(stride) = stride {
        config.chips.stride = stride;
    }

    println!("{}", "Chip Configuration:".cyan().bold());
    println!("  Input:     {}", input_dir.display());
    println!("  Output:    {}", output_dir.display());
    println!("  Tile size: {}", config.chips.tile_size);
    println!("  Stride:    {}", config.chips.stride);
    println!("  Labels:    {}", config.chips.mask_strategy.name());
    println!();

    let start = std::time::Instant::now();
    let extractor = ChipExtractor::new(config.chips)?;
    let report = extractor.extract_directory(input_dir, output_dir)?;

    println!(
        "{} {} tiles written, {} empty windows skipped, {} source pairs skipped in {}",
        "Done:".green().bold(),
        report.samples.len(),
        report.empty_tiles,
        report.skipped.len(),
        format_duration(start.elapsed().as_secs_f64())
    );
    for (name, err) in &report.skipped {
        println!("  {} {}: {}", "skipped".yellow(), name, err);
    }
    Ok(())
}

fn cmd_train(config: &PipelineConfig, tile_dir: &Path) -> Result<()> {
    println!("{}", "Training Configuration:".cyan().bold());
    println!("  Tiles:       {}", tile_dir.display());
    println!("  Epochs:      {}", config.trainer.epochs);
    println!("  Batch size:  {}", config.trainer.batch_size);
    println!("  LR:          {}", config.trainer.learning_rate);
    println!("  Checkpoints: {}", config.trainer.checkpoint_dir.display());
    println!("  Backend:     {}", backend_name());
    println!();

    let device = default_device();
    let summary = run_training::<TrainingBackend>(config, tile_dir, device)?;

    println!(
        "{} {} train / {} val tiles, best val loss {:.4}",
        "Training complete:".green().bold(),
        summary.train_tiles,
        summary.val_tiles,
        summary.best_val_loss
    );
    Ok(())
}

fn cmd_predict(
    config: &PipelineConfig,
    before: &Path,
    after: &Path,
    checkpoint: &Path,
    mask_out: Option<&Path>,
    map_out: Option<&Path>,
    reference: Option<&Path>,
) -> Result<()> {
    info!("Running prediction with {}", checkpoint.display());
    println!("{}", "Inference Configuration:".cyan().bold());
    println!("  Before:  {}", before.display());
    println!("  After:   {}", after.display());
    println!("  Model:   {}", checkpoint.display());
    println!("  Backend: {}", backend_name());
    println!();

    let handle = ModelHandle::<DefaultBackend>::load(checkpoint, config, default_device())?;
    let before = read_raster(before)?;
    let after = read_raster(after)?;

    let map = handle.predict_map(&before, &after)?;
    let response = handle.scorer().score(&map);

    let status = response
        .status
        .to_string()
        .color(status_color(response.status))
        .bold();
    println!("  Anomaly score: {:.4}", response.anomaly_score);
    println!("  Status:        {}", status);

    let predicted = handle.scorer().binarize(&map);
    if let Some(path) = reference {
        let truth = read_raster(path)?;
        if truth.dims() != (map.height(), map.width()) {
            anyhow::bail!(
                "reference mask {} is {}x{}, prediction is {}x{}",
                path.display(),
                truth.height(),
                truth.width(),
                map.height(),
                map.width()
            );
        }
        let counts = PixelCounts::from_masks(&predicted, &truth.binarized_mask());
        let metrics = BinaryMetrics::from_counts(&counts);
        println!(
            "  Reference:     precision {:.3} | recall {:.3} | F1 {:.3} | IoU {:.3}",
            metrics.precision, metrics.recall, metrics.f1, metrics.iou
        );
    }

    if let Some(path) = mask_out {
        write_mask(&predicted, map.height(), map.width(), path)?;
        println!("  Mask written to {}", path.display());
    }
    if let Some(path) = map_out {
        map.write_le_f32(path)?;
        println!("  Map written to {} (shape {:?})", path.display(), map.shape());
    }
    Ok(())
}
