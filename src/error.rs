use std::path::PathBuf;
use thiserror::Error;

/// Every failure the capture/publish loop can surface.
///
/// None of these are recovered inside the loop: the first error stops the
/// run and is reported by the binary's top-level handler.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("environment variable {0} not found")]
    ConfigurationMissing(String),

    #[error("invalid configuration value for {key}: {reason}")]
    ConfigurationInvalid { key: String, reason: String },

    #[error("failed to load model from {}: {reason}", path.display())]
    ModelLoadFailure { path: PathBuf, reason: String },

    #[error("model inference failed: {0}")]
    InferenceFailure(String),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("no file of type {content_type} and name {name} that can be updated")]
    NoMatchingRemoteBinary { content_type: String, name: String },

    #[error("camera read failed: {0}")]
    CameraReadFailure(String),

    #[error("request to {url} failed")]
    NetworkFailure {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected response from {url}")]
    InvalidResponse {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode annotated image")]
    ImageEncoding(#[from] image::ImageError),

    #[error("i/o error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid stream argument: {0}")]
    ArgumentParseFailure(String),
}

pub type Result<T> = std::result::Result<T, StreamError>;
