//! storyreel - narrated vertical slideshow videos from generated scenes.
//!
//! Scenes (narration + image prompt) are voiced and illustrated concurrently,
//! scene durations are derived from the speech provider's character alignment,
//! and ffmpeg renders the frames and muxes them with the narration.

pub mod alignment;
pub mod api;
pub mod audio;
pub mod compositor;
pub mod config;
pub mod error;
pub mod ffmpeg;
pub mod images;
pub mod pipeline;
pub mod retry;
pub mod scene;
pub mod subtitle;
pub mod tts;
pub mod utils;

pub use alignment::{CharacterAlignment, DurationSource, SceneTiming, compute_scene_durations};
pub use config::Config;
pub use error::{PipelineError, Result};
pub use pipeline::{GeneratedVideo, Pipeline, ScriptSource};
pub use scene::{Scene, ScriptPlan};
