use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tomato_stream::camera::WebcamSource;
use tomato_stream::classifier::OnnxRipenessModel;
use tomato_stream::config::StreamConfig;
use tomato_stream::stream::{StreamLoop, StreamRequest};

#[derive(Parser)]
#[command(name = "tomato-stream")]
#[command(about = "Capture webcam frames, mark ripe tomatoes and publish them to the inventory")]
struct Args {
    /// Operation parameters: `<id>,<operation>,<device_id>,<minutes>`
    operation: String,

    /// Model path, overrides MODEL_PATH
    #[arg(short, long = "model")]
    model_path: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tomato_stream={}", log_level)));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    if let Err(e) = run(args).await {
        // Full cause chain, plus a backtrace when RUST_BACKTRACE is set
        println!("{}", e);
        println!("{:?}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let request: StreamRequest = args.operation.parse()?;
    info!(
        "Stream requested for {} minutes (device {})",
        request.minutes, request.device_id
    );

    let mut config = StreamConfig::load().context("Configuration error")?;
    if let Some(path) = args.model_path {
        config.model_path = path;
    }

    let model = OnnxRipenessModel::load(&config.model_path)?;
    let camera = WebcamSource::new(config.camera_index);

    let mut stream = StreamLoop::new(&config, camera, model)?;
    let iterations = stream.run(request.duration()).await?;

    info!("Done after {} iterations", iterations);
    Ok(())
}
