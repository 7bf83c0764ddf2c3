use crate::alignment::SceneTiming;
use crate::error::{PipelineError, Result};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration, passed explicitly to every component.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub video: VideoConfig,
    pub script: ScriptConfig,
    pub voice: VoiceConfig,
    pub images: ImageConfig,
    pub retry: RetryPolicy,
    pub timeouts: TimeoutConfig,
    pub captions: CaptionConfig,
    pub ffmpeg: FfmpegConfig,
    pub providers: ProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VideoConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub fit: FrameFit,
    pub scene_timing: SceneTiming,
}

/// How a source image is forced to the output frame size.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FrameFit {
    #[default]
    Crop,
    Pad,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScriptConfig {
    pub model: String,
    pub num_scenes: usize,
    pub duration_seconds: u32,
    pub words_per_second: f64,
    pub temperature: f64,
    pub personality: Personality,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Personality {
    pub name: String,
    pub description: String,
    pub speaking_style: String,
}

/// One request per scene, or one request for the whole narration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SynthesisStrategy {
    #[default]
    Chunked,
    Combined,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VoiceConfig {
    pub voice_id: String,
    pub model_id: String,
    pub output_format: String,
    pub strategy: SynthesisStrategy,
    pub concurrency: usize,
    /// Models that reject `previous_text` / `next_text`.
    pub continuity_unsupported_models: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<VoiceSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoiceSettings {
    pub stability: f32,
    pub similarity_boost: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_speaker_boost: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImageConfig {
    pub model: String,
    pub size: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    pub concurrency: usize,
    /// Colour transparent pixels are flattened onto.
    pub background: [u8; 3],
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    pub request_secs: u64,
    pub compositor_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptionConfig {
    pub enabled: bool,
    pub max_line_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FfmpegConfig {
    pub program: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    pub elevenlabs_base_url: String,
    pub openai_base_url: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1920,
            fps: 24,
            fit: FrameFit::Crop,
            scene_timing: SceneTiming::Boundaries,
        }
    }
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            num_scenes: 12,
            duration_seconds: 120,
            words_per_second: 2.5,
            temperature: 0.8,
            personality: Personality::default(),
        }
    }
}

impl ScriptConfig {
    pub fn target_words(&self) -> u32 {
        (self.duration_seconds as f64 * self.words_per_second) as u32
    }
}

impl Default for Personality {
    fn default() -> Self {
        Self {
            name: "Curious Explorer".to_string(),
            description: "An upbeat, inquisitive narrator who explains concepts simply and vividly, \
                          with curiosity, positivity, and gentle humor."
                .to_string(),
            speaking_style: "warm, lively, friendly".to_string(),
        }
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            voice_id: "21m00Tcm4TlvDq8ikWAM".to_string(),
            model_id: "eleven_multilingual_v2".to_string(),
            output_format: "mp3_44100_128".to_string(),
            strategy: SynthesisStrategy::Chunked,
            concurrency: 4,
            continuity_unsupported_models: vec!["eleven_v3".to_string()],
            settings: None,
        }
    }
}

impl VoiceConfig {
    pub fn supports_continuity(&self) -> bool {
        !self
            .continuity_unsupported_models
            .iter()
            .any(|m| m == &self.model_id)
    }

    /// File extension matching `output_format`.
    pub fn audio_extension(&self) -> &'static str {
        if self.is_pcm() {
            "wav"
        } else if self.output_format.starts_with("opus") {
            "opus"
        } else {
            "mp3"
        }
    }

    pub fn is_pcm(&self) -> bool {
        self.output_format.starts_with("pcm_")
    }

    /// Sample rate encoded in a `pcm_<rate>` output format.
    pub fn pcm_sample_rate(&self) -> Option<u32> {
        self.output_format.strip_prefix("pcm_")?.parse().ok()
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            model: "gpt-image-1".to_string(),
            size: "1024x1536".to_string(),
            quality: Some("high".to_string()),
            concurrency: 3,
            background: [255, 255, 255],
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 180,
            compositor_secs: 900,
        }
    }
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn compositor(&self) -> Duration {
        Duration::from_secs(self.compositor_secs)
    }
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_line_chars: 42,
        }
    }
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            elevenlabs_base_url: "https://api.elevenlabs.io".to_string(),
            openai_base_url: "https://api.openai.com".to_string(),
        }
    }
}

impl Config {
    /// Loads and validates a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| PipelineError::Config {
            key: "config".to_string(),
            message: e.to_string(),
        })
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |key: &str, message: &str| {
            Err(PipelineError::Config {
                key: key.to_string(),
                message: message.to_string(),
            })
        };

        if self.video.width == 0 || self.video.width % 2 != 0 {
            return invalid("video.width", "must be a positive even number");
        }
        if self.video.height == 0 || self.video.height % 2 != 0 {
            return invalid("video.height", "must be a positive even number");
        }
        if self.video.fps == 0 {
            return invalid("video.fps", "must be positive");
        }
        if self.script.num_scenes == 0 {
            return invalid("script.num_scenes", "must be at least 1");
        }
        if self.voice.concurrency == 0 {
            return invalid("voice.concurrency", "must be at least 1");
        }
        if self.images.concurrency == 0 {
            return invalid("images.concurrency", "must be at least 1");
        }
        if self.voice.is_pcm() && self.voice.pcm_sample_rate().is_none() {
            return invalid("voice.output_format", "pcm formats must look like pcm_<rate>");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts", "must be at least 1");
        }
        if self.timeouts.request_secs == 0 || self.timeouts.compositor_secs == 0 {
            return invalid("timeouts", "must be positive");
        }
        Ok(())
    }
}
