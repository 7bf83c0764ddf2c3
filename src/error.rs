//! Error types for storyreel.

use std::fmt;
use thiserror::Error;

/// Which batch a per-scene failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Speech,
    Image,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Speech => "speech",
            Stage::Image => "image",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    // Provider errors
    #[error("{provider} transient failure (HTTP {status}): {message}")]
    ProviderTransient {
        provider: &'static str,
        status: u16,
        message: String,
    },

    #[error("{provider} quota exhausted: {message}")]
    QuotaExhausted {
        provider: &'static str,
        message: String,
    },

    #[error("{provider} rejected the request (HTTP {status}): {message}")]
    ProviderRejected {
        provider: &'static str,
        status: u16,
        message: String,
    },

    #[error("{provider} response is missing field `{field}`")]
    MissingField {
        provider: &'static str,
        field: &'static str,
    },

    // Contract violations between components
    #[error(
        "alignment arrays disagree: {characters} characters, {start_times} start times, {end_times} end times"
    )]
    AlignmentMismatch {
        characters: usize,
        start_times: usize,
        end_times: usize,
    },

    #[error(
        "scene {scene} needs alignment up to character {end_index}, but only {available} were returned"
    )]
    AlignmentOutOfBounds {
        scene: usize,
        end_index: usize,
        available: usize,
    },

    #[error("got {chunks} speech chunks for {scenes} scenes")]
    ChunkCountMismatch { chunks: usize, scenes: usize },

    #[error("scene {scene} has empty narration text")]
    EmptyNarration { scene: usize },

    #[error("speech model `{model}` does not accept previous_text/next_text continuity hints")]
    UnsupportedModelForContinuity { model: String },

    #[error("manifest needs one duration per image: {images} images, {durations} durations")]
    ManifestMismatch { images: usize, durations: usize },

    #[error("scene {scene} has invalid duration {duration}")]
    InvalidDuration { scene: usize, duration: f64 },

    // External process errors
    #[error("{step} failed with exit code {code:?}: {stderr}")]
    ExternalProcess {
        step: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{step} did not finish within {seconds}s")]
    ExternalProcessTimeout { step: String, seconds: u64 },

    // Batch errors
    #[error("gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("{stage} failed for scene {scene}: {source}")]
    SceneFailed {
        stage: Stage,
        scene: usize,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("{stage} task panicked: {message}")]
    TaskPanicked { stage: Stage, message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    Config { key: String, message: String },

    #[error("Invalid script: {0}")]
    InvalidScript(String),

    #[error("Configuration error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("base64 decoding error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Whether a single request may be attempted again after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::ProviderTransient { .. } => true,
            PipelineError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    /// Walks through retry and per-scene wrappers to the error that started it.
    pub fn root_cause(&self) -> &PipelineError {
        match self {
            PipelineError::RetriesExhausted { source, .. }
            | PipelineError::SceneFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub fn is_quota_exhausted(&self) -> bool {
        matches!(self.root_cause(), PipelineError::QuotaExhausted { .. })
    }
}
