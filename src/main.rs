//! TextSight - extract text from images with a two-stage OCR pipeline

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use textsight::config::{self, PipelineConfig};
use textsight::storage;
use textsight::vision::{BatchRunner, ModelManager, OcrOutput, OcrPipeline, ResolvedModels};

/// TextSight - detect and recognize text in images
#[derive(Parser, Debug)]
#[command(name = "textsight")]
#[command(about = "Detect and recognize text in images with ONNX models")]
struct Args {
    /// Image files to process
    #[arg(required_unless_present = "check_models")]
    images: Vec<PathBuf>,

    /// Configuration file (default: <config dir>/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Detection model path
    #[arg(long)]
    det_model: Option<PathBuf>,

    /// Recognition model path
    #[arg(long)]
    rec_model: Option<PathBuf>,

    /// Character dictionary path
    #[arg(long)]
    dict: Option<PathBuf>,

    /// Directory holding det.onnx, rec.onnx and dict.txt
    #[arg(long)]
    models_dir: Option<PathBuf>,

    /// Download missing model artifacts
    #[arg(long)]
    fetch_models: bool,

    /// Report model artifact status and exit
    #[arg(long)]
    check_models: bool,

    /// Number of parallel pipelines
    #[arg(short, long, default_value = "1")]
    workers: usize,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => load_or_create_config(),
    };
    apply_overrides(&mut config, &args);

    let manager = ModelManager::from_paths(&config.models)?;
    if args.check_models {
        print_model_status(&manager);
        return Ok(());
    }

    let models = manager.resolve(&config.models, args.fetch_models)?;
    info!("Using models {:?}", models);

    let results = if args.workers > 1 && args.images.len() > 1 {
        run_batch(&config, &models, &args.images, args.workers)?
    } else {
        run_sequential(&config, &models, &args.images)?
    };

    let mut failures = 0;
    let mut report = Vec::new();
    for (path, result) in args.images.iter().zip(results) {
        match result {
            Ok(output) => report.push((path, output)),
            Err(e) => {
                warn!("{}: {:#}", path.display(), e);
                failures += 1;
            }
        }
    }

    print_report(&report, args.json)?;

    if failures > 0 {
        anyhow::bail!("{} of {} images failed", failures, args.images.len());
    }
    Ok(())
}

/// Load configuration from the default location or fall back to defaults
fn load_or_create_config() -> PipelineConfig {
    if let Ok(config_dir) = storage::get_config_dir() {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            match config::load_config(&config_path) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", config_path);
                    return config;
                }
                Err(e) => warn!("Ignoring {:?}: {:#}", config_path, e),
            }
        }
    }
    info!("Using default configuration");
    PipelineConfig::default()
}

fn apply_overrides(config: &mut PipelineConfig, args: &Args) {
    let models = &mut config.models;
    for (slot, value) in [
        (&mut models.detection, &args.det_model),
        (&mut models.recognition, &args.rec_model),
        (&mut models.dictionary, &args.dict),
        (&mut models.models_dir, &args.models_dir),
    ] {
        if value.is_some() {
            *slot = value.clone();
        }
    }
}

fn run_sequential(
    config: &PipelineConfig,
    models: &ResolvedModels,
    images: &[PathBuf],
) -> Result<Vec<Result<OcrOutput>>> {
    let mut pipeline = OcrPipeline::from_config(config, models)?;

    Ok(images
        .iter()
        .map(|path| -> Result<OcrOutput> {
            let data = read_image(path)?;
            Ok(pipeline.process_bytes(&data)?)
        })
        .collect())
}

fn run_batch(
    config: &PipelineConfig,
    models: &ResolvedModels,
    images: &[PathBuf],
    workers: usize,
) -> Result<Vec<Result<OcrOutput>>> {
    let mut runner = BatchRunner::build(workers.min(images.len()), || {
        OcrPipeline::from_config(config, models)
    })?;

    let loaded: Vec<Result<Vec<u8>>> = images.iter().map(|path| read_image(path)).collect();
    let readable: Vec<&[u8]> = loaded
        .iter()
        .filter_map(|data| data.as_ref().ok().map(Vec::as_slice))
        .collect();
    let mut processed = runner.run(&readable).into_iter();

    Ok(loaded
        .into_iter()
        .map(|data| -> Result<OcrOutput> {
            match data {
                Ok(_) => Ok(processed
                    .next()
                    .context("batch runner returned too few results")??),
                Err(e) => Err(e),
            }
        })
        .collect())
}

fn print_model_status(manager: &ModelManager) {
    println!("Models directory: {}", manager.models_dir().display());
    for (model_type, available, size) in manager.get_model_status() {
        let state = match (available, size) {
            (true, Some(bytes)) => format!("ready ({} bytes)", bytes),
            (false, Some(bytes)) => format!("invalid size ({} bytes)", bytes),
            _ => "missing".to_string(),
        };
        println!("  {:<22} {:<10} {}", model_type.display_name(), model_type.filename(), state);
    }
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))
}

fn print_report(report: &[(&PathBuf, OcrOutput)], json: bool) -> Result<()> {
    if json {
        let entries: Vec<serde_json::Value> = report
            .iter()
            .map(|(path, output)| {
                serde_json::json!({
                    "path": path.display().to_string(),
                    "result": output,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for (path, output) in report {
        if report.len() > 1 {
            println!("== {} ({} ms)", path.display(), output.processing_time_ms);
        }
        for region in &output.regions {
            println!("{}", region.text);
        }
    }
    Ok(())
}
