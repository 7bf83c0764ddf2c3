use super::{SpeechProvider, SpeechRequest, SynthesizedSpeech, send_for_text};
use crate::alignment::CharacterAlignment;
use crate::config::VoiceSettings;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const PROVIDER: &str = "elevenlabs";

#[derive(Debug, Clone)]
pub struct ElevenLabsClient {
    api_key: String,
    base_url: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct SpeechBody<'a> {
    text: &'a str,
    model_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice_settings: Option<&'a VoiceSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_text: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct TimestampsResponse {
    audio_base64: Option<String>,
    alignment: Option<AlignmentPayload>,
}

#[derive(Debug, Deserialize)]
struct AlignmentPayload {
    characters: Option<Vec<String>>,
    character_start_times_seconds: Option<Vec<f64>>,
    character_end_times_seconds: Option<Vec<f64>>,
}

impl ElevenLabsClient {
    pub fn new(api_key: String, base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn endpoint(&self, voice_id: &str) -> String {
        format!("{}/v1/text-to-speech/{}/with-timestamps", self.base_url, voice_id)
    }
}

#[async_trait]
impl SpeechProvider for ElevenLabsClient {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<SynthesizedSpeech> {
        let body = SpeechBody {
            text: &request.text,
            model_id: &request.model_id,
            voice_settings: request.voice_settings.as_ref(),
            previous_text: request.previous_text.as_deref(),
            next_text: request.next_text.as_deref(),
        };
        debug!(
            "Requesting speech for {} chars (model {})",
            request.text.chars().count(),
            request.model_id
        );

        let http = self
            .client
            .post(self.endpoint(&request.voice_id))
            .query(&[("output_format", request.output_format.as_str())])
            .header("xi-api-key", &self.api_key)
            .json(&body);
        let text = send_for_text(PROVIDER, http).await?;
        parse_speech_response(&text)
    }
}

/// Maps a `with-timestamps` response onto decoded audio and a validated alignment.
pub fn parse_speech_response(body: &str) -> Result<SynthesizedSpeech> {
    let response: TimestampsResponse = serde_json::from_str(body)?;
    let missing = |field| PipelineError::MissingField {
        provider: PROVIDER,
        field,
    };

    let audio_b64 = response.audio_base64.ok_or_else(|| missing("audio_base64"))?;
    let payload = response.alignment.ok_or_else(|| missing("alignment"))?;
    let characters = payload
        .characters
        .ok_or_else(|| missing("alignment.characters"))?;
    let starts = payload
        .character_start_times_seconds
        .ok_or_else(|| missing("alignment.character_start_times_seconds"))?;
    let ends = payload
        .character_end_times_seconds
        .ok_or_else(|| missing("alignment.character_end_times_seconds"))?;

    if characters.len() != starts.len() || characters.len() != ends.len() {
        return Err(PipelineError::AlignmentMismatch {
            characters: characters.len(),
            start_times: starts.len(),
            end_times: ends.len(),
        });
    }

    // Entries are normally single characters; a multi-char entry shares its timing.
    let mut chars = Vec::with_capacity(characters.len());
    let mut start_times = Vec::with_capacity(characters.len());
    let mut end_times = Vec::with_capacity(characters.len());
    for ((entry, start), end) in characters.iter().zip(&starts).zip(&ends) {
        for c in entry.chars() {
            chars.push(c);
            start_times.push(*start);
            end_times.push(*end);
        }
    }

    let alignment = CharacterAlignment::new(chars, start_times, end_times)?;
    let audio = STANDARD.decode(audio_b64.trim())?;
    Ok(SynthesizedSpeech { audio, alignment })
}
