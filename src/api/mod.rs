//! Provider seams and the HTTP adapters behind them.
//!
//! Every provider response is mapped onto internal types by exactly one
//! adapter function per provider; a missing field is an error, never a guess.

pub mod elevenlabs;
pub mod openai;

use crate::alignment::CharacterAlignment;
use crate::config::{ScriptConfig, VoiceSettings};
use crate::error::{PipelineError, Result};
use crate::scene::ScriptPlan;
use async_trait::async_trait;
use reqwest::RequestBuilder;
use tracing::debug;

pub use elevenlabs::ElevenLabsClient;
pub use openai::OpenAiClient;

/// One speech-synthesis request.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechRequest {
    pub voice_id: String,
    pub model_id: String,
    pub output_format: String,
    pub voice_settings: Option<VoiceSettings>,
    pub text: String,
    pub previous_text: Option<String>,
    pub next_text: Option<String>,
}

/// Decoded audio bytes plus the provider's character timing for them.
#[derive(Debug, Clone)]
pub struct SynthesizedSpeech {
    pub audio: Vec<u8>,
    pub alignment: CharacterAlignment,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    pub size: String,
    pub quality: Option<String>,
}

#[async_trait]
pub trait SpeechProvider: Send + Sync {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<SynthesizedSpeech>;
}

#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Returns encoded image bytes (PNG, JPEG or WebP).
    async fn generate(&self, request: &ImageRequest) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait ScriptWriter: Send + Sync {
    async fn write_script(&self, config: &ScriptConfig) -> Result<ScriptPlan>;
}

/// Maps a non-success HTTP status and body onto the error taxonomy.
pub fn classify_failure(provider: &'static str, status: u16, body: &str) -> PipelineError {
    let message = truncate(body, 500);
    let lower = body.to_lowercase();
    let quota = status == 402
        || lower.contains("insufficient_quota")
        || lower.contains("quota_exceeded")
        || lower.contains("exceeded your current quota");

    if quota {
        PipelineError::QuotaExhausted { provider, message }
    } else if matches!(status, 408 | 409 | 429) || (500..600).contains(&status) {
        PipelineError::ProviderTransient {
            provider,
            status,
            message,
        }
    } else {
        PipelineError::ProviderRejected {
            provider,
            status,
            message,
        }
    }
}

/// Sends a request and returns the body of a successful response.
pub(crate) async fn send_for_text(
    provider: &'static str,
    request: RequestBuilder,
) -> Result<String> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        debug!("{} returned HTTP {}: {}", provider, status, truncate(&body, 200));
        return Err(classify_failure(provider, status.as_u16(), &body));
    }
    Ok(body)
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max_chars).collect();
        out.push('…');
        out
    }
}
