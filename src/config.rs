use crate::classifier::ModelSource;
use crate::logging::LoggingConfig;

/// Everything the server needs to start.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// actix worker threads; `None` uses one per physical core.
    pub workers: Option<usize>,
    pub max_upload_bytes: usize,
    pub model: ModelSource,
    /// Path of the ONNX graph relative to the model root.
    pub onnx_file: String,
    pub logging: LoggingConfig,
}

impl ServerConfig {
    pub fn bind_address(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }
}
