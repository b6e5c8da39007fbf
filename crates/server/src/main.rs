mod connection;
mod proxy;
mod server;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;

use facestream_core::detection::domain::face_detector::FaceDetector;
use facestream_core::detection::infrastructure::detector_service::DetectorService;
use facestream_core::detection::infrastructure::model_resolver;
use facestream_core::detection::infrastructure::onnx_yolo_detector::{
    OnnxYoloDetector, DEFAULT_CONFIDENCE,
};
use facestream_core::pipeline::frame_dispatcher::FrameDispatcher;
use facestream_core::shared::constants::{
    DEFAULT_FFMPEG_PROGRAM, DEFAULT_JPEG_QUALITY, DEFAULT_TARGET_FPS, YOLO_MODEL_NAME,
    YOLO_MODEL_URL,
};
use facestream_core::stream::ffmpeg_launcher::{DecoderCommand, FfmpegLauncher};
use facestream_core::stream::throttle::ThrottleConfig;
use facestream_core::video::infrastructure::jpeg_decoder::JpegDecoder;

use crate::proxy::ReverseProxy;
use crate::server::AppState;

/// Relays live video streams to WebSocket clients with face detections.
#[derive(Parser, Debug)]
#[command(name = "facestream", version)]
struct Cli {
    /// Address to listen on.
    #[arg(long, env = "FACESTREAM_BIND", default_value = "0.0.0.0:3000")]
    bind: SocketAddr,

    /// Path that accepts WebSocket upgrades.
    #[arg(long, env = "FACESTREAM_WS_PATH", default_value = "/ws")]
    ws_path: String,

    /// ffmpeg executable used to decode streams.
    #[arg(long, env = "FACESTREAM_FFMPEG", default_value = DEFAULT_FFMPEG_PROGRAM)]
    ffmpeg: String,

    /// Frames per second sampled from each stream.
    #[arg(long, env = "FACESTREAM_FPS", default_value_t = DEFAULT_TARGET_FPS)]
    fps: u32,

    /// MJPEG quality passed to ffmpeg (2 = best, 31 = worst).
    #[arg(long, env = "FACESTREAM_JPEG_QUALITY", default_value_t = DEFAULT_JPEG_QUALITY)]
    jpeg_quality: u32,

    /// Detections in flight per connection (default: available cores).
    #[arg(long, env = "FACESTREAM_MAX_IN_FLIGHT")]
    max_in_flight: Option<usize>,

    /// Allow several frames of one connection to be detected at once.
    #[arg(long, env = "FACESTREAM_CONCURRENT_FRAMES")]
    concurrent_frames: bool,

    /// Face detection confidence threshold (0.0-1.0).
    #[arg(long, env = "FACESTREAM_CONFIDENCE", default_value_t = DEFAULT_CONFIDENCE)]
    confidence: f64,

    /// Face model file; downloaded to the user cache when omitted.
    #[arg(long, env = "FACESTREAM_MODEL")]
    model: Option<PathBuf>,

    /// Origin that non-WebSocket requests are forwarded to.
    #[arg(long, env = "FACESTREAM_PROXY_TARGET")]
    proxy_target: Option<String>,

    /// Path prefix removed before forwarding, e.g. `/api`.
    #[arg(long, env = "FACESTREAM_PROXY_STRIP_PREFIX")]
    proxy_strip_prefix: Option<String>,

    /// Load the face model at startup instead of on the first frame.
    #[arg(long, env = "FACESTREAM_PRELOAD")]
    preload: bool,
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

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(serve(cli))
}

async fn serve(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let detector = Arc::new(build_detector_service(&cli));
    if cli.preload {
        detector.ensure_ready().await?;
    }

    let proxy = match &cli.proxy_target {
        Some(target) => Some(ReverseProxy::new(target, cli.proxy_strip_prefix.clone())?),
        None => None,
    };

    let state = Arc::new(AppState::new(
        cli.ws_path.clone(),
        Arc::new(FfmpegLauncher::new(DecoderCommand::ffmpeg(
            cli.ffmpeg.clone(),
            cli.fps,
            cli.jpeg_quality,
        ))),
        FrameDispatcher::new(Arc::new(JpegDecoder), detector),
        throttle_config(&cli),
        proxy,
    ));

    server::serve(cli.bind, state, shutdown_signal()).await?;
    Ok(())
}

fn build_detector_service(cli: &Cli) -> DetectorService {
    let model_override = cli.model.clone();
    let confidence = cli.confidence;
    DetectorService::new(move || {
        let model_path =
            model_resolver::resolve(YOLO_MODEL_NAME, YOLO_MODEL_URL, model_override.as_deref())?;
        let detector = OnnxYoloDetector::new(&model_path, confidence)?;
        Ok(Box::new(detector) as Box<dyn FaceDetector>)
    })
}

fn throttle_config(cli: &Cli) -> ThrottleConfig {
    let defaults = ThrottleConfig::from_available_parallelism();
    ThrottleConfig {
        max_in_flight: cli.max_in_flight.unwrap_or(defaults.max_in_flight),
        serialize: !cli.concurrent_frames,
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    log::info!("Shutting down");
}

fn validate(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    if cli.fps == 0 {
        return Err("Frame rate must be greater than 0".into());
    }
    if !(2..=31).contains(&cli.jpeg_quality) {
        return Err(format!(
            "JPEG quality must be between 2 and 31, got {}",
            cli.jpeg_quality
        )
        .into());
    }
    if !(0.0..=1.0).contains(&cli.confidence) {
        return Err(format!(
            "Confidence must be between 0.0 and 1.0, got {}",
            cli.confidence
        )
        .into());
    }
    if !cli.ws_path.starts_with('/') {
        return Err(format!("WebSocket path must start with '/', got {}", cli.ws_path).into());
    }
    if cli.max_in_flight == Some(0) {
        return Err("Max in-flight detections must be at least 1".into());
    }
    if cli.proxy_strip_prefix.is_some() && cli.proxy_target.is_none() {
        return Err("--proxy-strip-prefix requires --proxy-target".into());
    }
    if let Some(model) = &cli.model {
        if !model.exists() {
            return Err(format!("Model file not found: {}", model.display()).into());
        }
    }
    Ok(())
}
