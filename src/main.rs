//! MemeFinder - extract searchable text and sentiment from meme folders

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use meme_finder::analysis::Emotion;
use meme_finder::app::{BatchEvent, BatchRunner};
use meme_finder::config::{self, AppConfig};
use meme_finder::processor::MemeProcessor;
use meme_finder::storage::{self, find_new_images, SqliteStore};
use meme_finder::vision::{
    DeviceSelector, ModelManager, OcrPipeline, OrtEngineFactory, RapidOcrConfig,
};

/// MemeFinder - batch OCR and sentiment tagging for memes
#[derive(Parser, Debug)]
#[command(name = "meme-finder", version)]
#[command(about = "Extract searchable text and sentiment from meme images")]
struct Args {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Never use the GPU
    #[arg(long, global = true)]
    force_cpu: bool,

    /// Use the GPU without probing for it
    #[arg(long, global = true, conflicts_with = "no_gpu")]
    gpu: bool,

    /// Disable the GPU
    #[arg(long, global = true)]
    no_gpu: bool,

    /// Never download models
    #[arg(long, global = true)]
    offline: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a folder and add its new images to the database
    Scan { folder: PathBuf },
    /// Analyze every unprocessed image in the database
    Process {
        /// Stop after this many images
        #[arg(long)]
        limit: Option<usize>,
        /// Images fetched per database page
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Run OCR on files and print the detections as JSON
    Ocr {
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Border ratio, 0 disables padding
        #[arg(long)]
        pad_ratio: Option<f64>,
    },
    /// Search processed images by text
    Search {
        #[arg(default_value = "")]
        keyword: String,
        /// positive, negative, neutral or unclassified
        #[arg(long)]
        emotion: Option<String>,
    },
    /// Show database counts
    Stats,
    /// Show or download OCR models
    Models {
        #[arg(long)]
        download: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.verbose { "debug" } else { "info" }));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(&args)?;

    match &args.command {
        Command::Scan { folder } => scan(&config, folder),
        Command::Process { limit, batch_size } => process(&config, *limit, *batch_size),
        Command::Ocr { images, pad_ratio } => ocr(&config, images, *pad_ratio),
        Command::Search { keyword, emotion } => search(&config, keyword, emotion.as_deref()),
        Command::Stats => stats(&config),
        Command::Models { download } => models(&config, *download),
    }
}

/// Load configuration, then fold in environment and flag overrides once
fn load_config(args: &Args) -> Result<AppConfig> {
    let path = match &args.config {
        Some(path) => path.clone(),
        None => config::default_config_path()?,
    };
    let mut config = config::load_or_create_config(&path)?.apply_process_env();

    if args.force_cpu {
        config.device.force_cpu = true;
    }
    if args.gpu {
        config.device.accelerator = Some(true);
    }
    if args.no_gpu {
        config.device.accelerator = Some(false);
    }
    if args.offline {
        config.models.offline = true;
    }

    Ok(config)
}

fn open_store(config: &AppConfig) -> Result<SqliteStore> {
    let path = match &config.batch.database {
        Some(path) => path.clone(),
        None => storage::default_database_path()?,
    };
    SqliteStore::open(&path).with_context(|| format!("Failed to open database {:?}", path))
}

fn model_manager(config: &AppConfig) -> Result<ModelManager> {
    let manager = match &config.models.dir {
        Some(dir) => ModelManager::with_dir(dir.clone())?,
        None => ModelManager::new()?,
    };
    Ok(manager
        .with_base_url(config.models.base_url.clone())
        .with_offline(config.models.offline))
}

fn build_processor(config: &AppConfig) -> Result<MemeProcessor> {
    let manager = model_manager(config)?;
    let models = match manager.resolve() {
        Ok(paths) => paths,
        Err(e) if config.models.offline => return Err(e),
        Err(e) => {
            warn!("{:#}", e);
            manager.ensure_all_models()?
        }
    };

    let engine_config = RapidOcrConfig::new(models).with_intra_threads(config.models.intra_threads);
    let factory = Arc::new(OrtEngineFactory::new(engine_config));
    let mut selector = DeviceSelector::new(config.device.clone(), factory);
    let selected = selector.select().context("Failed to construct the OCR engine")?;

    if let Some(cause) = selected.fallback {
        warn!("GPU unavailable ({:?}), running on CPU", cause);
    }
    info!("OCR engine ready on {}", selected.device);

    let adapter = selected.into_adapter().with_options(config.ocr.options.clone());
    let pipeline = OcrPipeline::new(adapter).with_pad_color(config.ocr.pad_color);
    Ok(MemeProcessor::new(pipeline).with_pad_ratio(config.ocr.pad_ratio))
}

fn scan(config: &AppConfig, folder: &Path) -> Result<()> {
    let folder = folder
        .canonicalize()
        .with_context(|| format!("Folder not found: {:?}", folder))?;
    let store = open_store(config)?;

    if store.add_source(&folder)? {
        info!("Registered new source {:?}", folder);
    }
    let source_id = store.source_id(&folder)?;

    let mut known = store.known_hashes(None)?;
    let found = find_new_images(&folder, &mut known);
    let mut added = 0;
    for image in &found {
        if store.add_image(&image.path, &image.hash, source_id)? {
            added += 1;
        }
    }

    if let Some(id) = source_id {
        store.update_scan_time(id)?;
    }
    println!("Added {} new images from {}", added, folder.display());
    Ok(())
}

fn process(config: &AppConfig, limit: Option<usize>, batch_size: Option<usize>) -> Result<()> {
    let store = Arc::new(open_store(config)?);
    let processor = Arc::new(build_processor(config)?);

    let runner = BatchRunner::new(processor, store)
        .with_batch_size(batch_size.unwrap_or(config.batch.batch_size))
        .with_max_images(limit);
    let events = runner.events();
    let handle = runner.spawn()?;

    let mut done = 0usize;
    for event in events.iter() {
        match event {
            BatchEvent::Started { device } => info!("Processing on {}", device),
            BatchEvent::ImageDone { path, emotion, .. } => {
                done += 1;
                info!("[{}] {} -> {}", done, path.display(), emotion);
            }
            BatchEvent::ImageFailed { path, reason, .. } => {
                done += 1;
                warn!("[{}] {} failed: {}", done, path.display(), reason);
            }
            BatchEvent::Finished(_) => break,
        }
    }

    let report = handle
        .join()
        .map_err(|_| anyhow::anyhow!("Batch thread panicked"))??;
    println!(
        "Processed {} images ({} without text, {} failed) in {:.1}s",
        report.processed,
        report.without_text,
        report.failed,
        report.elapsed.as_secs_f64()
    );
    Ok(())
}

fn ocr(config: &AppConfig, images: &[PathBuf], pad_ratio: Option<f64>) -> Result<()> {
    let processor = build_processor(config)?;
    let pad_ratio = pad_ratio.unwrap_or(config.ocr.pad_ratio);

    for image in images {
        let result = processor.pipeline().process(image, pad_ratio);
        let analysis = processor.analyze(&result);
        let output = json!({
            "image": result.image,
            "device": processor.device(),
            "items": result.items,
            "analysis": analysis,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    }
    Ok(())
}

fn search(config: &AppConfig, keyword: &str, emotion: Option<&str>) -> Result<()> {
    let emotion = emotion
        .map(|label| Emotion::parse(label).with_context(|| format!("Unknown emotion {:?}", label)))
        .transpose()?;
    let store = open_store(config)?;

    let hits = store.search(keyword, emotion)?;
    for hit in &hits {
        let label = hit.emotion.map(|e| e.as_str()).unwrap_or("-");
        println!("{}\t{}\t{}", hit.file_path.display(), label, hit.filtered_text);
    }
    info!("{} matches", hits.len());
    Ok(())
}

fn stats(config: &AppConfig) -> Result<()> {
    let stats = open_store(config)?.statistics()?;
    println!("Total:       {}", stats.total);
    println!("Processed:   {}", stats.processed);
    println!("Unprocessed: {}", stats.unprocessed);
    for (emotion, count) in &stats.emotions {
        println!("  {:<12} {}", emotion, count);
    }
    Ok(())
}

fn models(config: &AppConfig, download: bool) -> Result<()> {
    let manager = model_manager(config)?;
    if download {
        manager.ensure_all_models()?;
    }

    println!("Models in {}", manager.models_dir().display());
    for (model_type, available, size) in manager.get_model_status() {
        let status = match (available, size) {
            (true, Some(size)) => format!("ok ({:.1} MB)", size as f64 / 1_048_576.0),
            (false, Some(_)) => "invalid size".to_string(),
            _ if model_type.is_optional() => "missing (optional)".to_string(),
            _ => "missing".to_string(),
        };
        println!("  {:<24} {}", model_type.display_name(), status);
    }
    Ok(())
}
