use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, Level};

use fruit_detector::classifier::hub::{DEFAULT_MODEL_ID, DEFAULT_ONNX_FILE};
use fruit_detector::classifier::{ModelSource, OnnxClassifier};
use fruit_detector::config::ServerConfig;
use fruit_detector::logging::{init_logging, LoggingConfig};
use fruit_detector::server;

#[derive(Parser, Debug)]
#[command(name = "fruit-detector")]
#[command(about = "Classifies fruits and vegetables in uploaded images with a pretrained model")]
struct CliArgs {
    /// Host address to bind
    #[arg(long, env = "FRUIT_DETECTOR_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to bind
    #[arg(long, env = "FRUIT_DETECTOR_PORT", default_value_t = 8000)]
    port: u16,

    /// Model hub identifier of the checkpoint
    #[arg(long, env = "FRUIT_DETECTOR_MODEL_ID", default_value = DEFAULT_MODEL_ID)]
    model_id: String,

    /// Load the checkpoint from this directory instead of the hub
    #[arg(long, env = "FRUIT_DETECTOR_MODEL_DIR")]
    model_dir: Option<PathBuf>,

    /// Hub revision (branch, tag or commit)
    #[arg(long, env = "FRUIT_DETECTOR_REVISION")]
    revision: Option<String>,

    /// Path of the ONNX graph inside the checkpoint
    #[arg(long, env = "FRUIT_DETECTOR_ONNX_FILE", default_value = DEFAULT_ONNX_FILE)]
    onnx_file: String,

    /// Largest accepted upload in megabytes
    #[arg(long, env = "FRUIT_DETECTOR_MAX_UPLOAD_MB", default_value_t = 10)]
    max_upload_mb: usize,

    /// Number of HTTP worker threads
    #[arg(long, env = "FRUIT_DETECTOR_WORKERS")]
    workers: Option<usize>,

    /// Log level, overridden by RUST_LOG
    #[arg(long, env = "FRUIT_DETECTOR_LOG_LEVEL", default_value = "info")]
    log_level: Level,

    /// Emit logs as JSON
    #[arg(long, env = "FRUIT_DETECTOR_LOG_JSON", default_value_t = false)]
    log_json: bool,
}

impl CliArgs {
    fn into_config(self) -> ServerConfig {
        let model = match self.model_dir {
            Some(dir) => ModelSource::Local(dir),
            None => ModelSource::Hub {
                model_id: self.model_id,
                revision: self.revision,
            },
        };

        ServerConfig {
            host: self.host,
            port: self.port,
            workers: self.workers,
            max_upload_bytes: self.max_upload_mb.saturating_mul(1024 * 1024),
            model,
            onnx_file: self.onnx_file,
            logging: LoggingConfig {
                level: self.log_level,
                json_format: self.log_json,
            },
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = CliArgs::parse().into_config();
    init_logging(config.logging.clone());

    info!("Loading model from {}", config.model);
    let files = config
        .model
        .resolve(&config.onnx_file)
        .with_context(|| format!("failed to resolve model {}", config.model))?;
    let classifier = OnnxClassifier::load(&files).context("failed to load classifier")?;

    server::startup(config, Arc::new(classifier))
        .await
        .context("server exited with an error")
}
