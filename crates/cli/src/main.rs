use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;

use facedetect_core::detection::infrastructure::detector_factory::{
    create_detector, DetectorKind,
};
use facedetect_core::detection::infrastructure::model_resolver;
use facedetect_core::imaging::domain::image_loader::ImageLoader;
use facedetect_core::imaging::infrastructure::image_file_loader::ImageFileLoader;
use facedetect_core::request::process_request_use_case::ProcessRequestUseCase;
use facedetect_core::request::request_logger::LogRequestLogger;
use facedetect_core::server::event_loop::Server;
use facedetect_core::server::server_config::{FramingMode, ServerConfig};
use facedetect_core::shared::constants::{YOLO_MODEL_NAME, YOLO_MODEL_URL};

/// Face detection server: send an image path, get back the faces in it.
#[derive(Parser)]
#[command(name = "facedetect-server")]
struct Cli {
    /// JSON config file. Flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 picks a free port).
    #[arg(long)]
    port: Option<u16>,

    /// Request framing: line or read.
    #[arg(long)]
    framing: Option<FramingMode>,

    /// Bytes per socket read.
    #[arg(long)]
    read_buffer_size: Option<usize>,

    /// Longest accepted request line in line framing.
    #[arg(long)]
    max_request_bytes: Option<usize>,

    /// Worker threads (0 = process on the event-loop thread).
    #[arg(long)]
    workers: Option<usize>,

    /// Requests that may wait for a worker before new ones are rejected.
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Milliseconds before an unanswered request is answered with ERROR.
    #[arg(long)]
    request_timeout_ms: Option<u64>,

    /// Requests between summary log lines (0 = never).
    #[arg(long)]
    summary_every: Option<usize>,

    /// Detection model: yolo or blazeface.
    #[arg(long, default_value = "yolo")]
    model: DetectorKind,

    /// Face detection confidence threshold (0.0-1.0) [default: per model].
    #[arg(long)]
    confidence: Option<f64>,

    /// Use this ONNX model file instead of resolving one.
    #[arg(long)]
    model_path: Option<PathBuf>,

    /// Directory holding downloaded models [default: user cache dir].
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Detection results kept in memory by image content (0 = off).
    #[arg(long, default_value = "256")]
    cache_capacity: usize,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    validate(&cli)?;
    let config = build_config(&cli)?;

    let model_path = resolve_model(&cli)?;
    let confidence = cli
        .confidence
        .unwrap_or_else(|| cli.model.default_confidence());
    let detector = create_detector(cli.model, &model_path, confidence, cli.cache_capacity)?;
    let loader: Arc<dyn ImageLoader> = Arc::new(ImageFileLoader::new());

    let inline = config.workers == 0;
    let summary_every = config.summary_every;
    let mut server = Server::bind(config, |index| {
        let label = if inline {
            "inline".to_string()
        } else {
            format!("worker-{index}")
        };
        ProcessRequestUseCase::new(
            loader.clone(),
            Box::new(detector.clone()),
            Box::new(LogRequestLogger::new(label, summary_every)),
        )
    })?;
    server.run()?;
    Ok(())
}

/// Defaults, then the config file, then flags.
fn build_config(cli: &Cli) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => ServerConfig::from_json_file(path)?,
        None => ServerConfig::default(),
    };

    if let Some(host) = &cli.host {
        config.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(framing) = cli.framing {
        config.framing = framing;
    }
    if let Some(size) = cli.read_buffer_size {
        config.read_buffer_size = size;
    }
    if let Some(size) = cli.max_request_bytes {
        config.max_request_bytes = size;
    }
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    if let Some(capacity) = cli.queue_capacity {
        config.queue_capacity = capacity;
    }
    if let Some(timeout) = cli.request_timeout_ms {
        config.request_timeout_ms = timeout;
    }
    if let Some(every) = cli.summary_every {
        config.summary_every = every;
    }

    config.validate()?;
    Ok(config)
}

fn resolve_model(cli: &Cli) -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Some(path) = &cli.model_path {
        return Ok(path.clone());
    }
    match cli.model {
        DetectorKind::Yolo => {
            log::info!("Resolving model: {YOLO_MODEL_NAME}");
            let path = model_resolver::resolve(
                YOLO_MODEL_NAME,
                YOLO_MODEL_URL,
                cli.model_dir.as_deref(),
                Some(Box::new(download_progress)),
            )?;
            Ok(path)
        }
        DetectorKind::Blazeface => Err("--model-path is required for the blazeface model".into()),
    }
}

fn validate(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(confidence) = cli.confidence {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(
                format!("Confidence must be between 0.0 and 1.0, got {confidence}").into(),
            );
        }
    }
    if let Some(path) = &cli.model_path {
        if !path.exists() {
            return Err(format!("Model file not found: {}", path.display()).into());
        }
    }
    if let Some(path) = &cli.config {
        if !path.exists() {
            return Err(format!("Config file not found: {}", path.display()).into());
        }
    }
    Ok(())
}

fn download_progress(downloaded: u64, total: u64) {
    if total > 0 {
        let pct = (downloaded as f64 / total as f64 * 100.0) as u32;
        eprint!("\rDownloading face detection model... {pct}%");
        if downloaded >= total {
            eprintln!();
        }
    } else {
        eprint!("\rDownloading face detection model... {downloaded} bytes");
    }
}
