#![cfg(unix)]

use async_trait::async_trait;
use image::{ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use storyreel::api::{ImageProvider, ImageRequest, SpeechProvider, SpeechRequest, SynthesizedSpeech};
use storyreel::compositor::MANIFEST_FILE;
use storyreel::config::SynthesisStrategy;
use storyreel::error::Stage;
use storyreel::pipeline::{CAPTIONS_FILE, SCRIPT_FILE};
use storyreel::retry::RetryPolicy;
use storyreel::{
    CharacterAlignment, Config, Pipeline, PipelineError, Scene, ScriptPlan, ScriptSource,
};

/// Every character takes 0.1 s; audio is silence of the matching length.
struct TickingVoice {
    calls: AtomicUsize,
}

#[async_trait]
impl SpeechProvider for TickingVoice {
    async fn synthesize(&self, request: &SpeechRequest) -> storyreel::Result<SynthesizedSpeech> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let n = request.text.chars().count();
        let alignment = CharacterAlignment::new(
            request.text.chars().collect(),
            (0..n).map(|i| i as f64 * 0.1).collect(),
            (0..n).map(|i| (i + 1) as f64 * 0.1).collect(),
        )?;
        // 16 kHz, 16-bit mono
        let audio = vec![0u8; n * 1600 * 2];
        Ok(SynthesizedSpeech { audio, alignment })
    }
}

/// Half-transparent 4x4 PNG, or a quota denial when `quota_denied` is set.
struct TinyPainter {
    quota_denied: bool,
}

#[async_trait]
impl ImageProvider for TinyPainter {
    async fn generate(&self, _request: &ImageRequest) -> storyreel::Result<Vec<u8>> {
        if self.quota_denied {
            return Err(PipelineError::QuotaExhausted {
                provider: "painter",
                message: "billing hard limit reached".to_string(),
            });
        }
        let img = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 255, 128]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(bytes)
    }
}

fn plan() -> ScriptPlan {
    ScriptPlan {
        topic: "Tides".to_string(),
        scenes: vec![
            Scene::new("The moon pulls.", "moon over the sea"),
            Scene::new("Water follows.", "a rising tide"),
            Scene::new("Twice a day.", "a clock on a beach"),
        ],
    }
}

fn config() -> Config {
    let mut config = Config::default();
    config.voice.strategy = SynthesisStrategy::Combined;
    config.voice.output_format = "pcm_16000".to_string();
    config.retry = RetryPolicy::immediate(2);
    config.ffmpeg.program = PathBuf::from("false");
    config.timeouts.compositor_secs = 5;
    config
}

fn only_run_dir(output_dir: &Path) -> PathBuf {
    let dirs: Vec<PathBuf> = std::fs::read_dir(output_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(dirs.len(), 1);
    dirs.into_iter().next().unwrap()
}

#[tokio::test]
async fn test_run_reaches_compositor_with_all_artifacts() {
    let output = tempfile::tempdir().unwrap();
    let voice = Arc::new(TickingVoice {
        calls: AtomicUsize::new(0),
    });
    let painter = Arc::new(TinyPainter {
        quota_denied: false,
    });
    let pipeline = Pipeline::new(config(), voice.clone(), painter);

    let result = pipeline.run(ScriptSource::Saved(plan()), output.path()).await;
    assert!(matches!(
        result,
        Err(PipelineError::ExternalProcess { ref step, .. }) if step == "render slideshow"
    ));
    assert_eq!(voice.calls.load(Ordering::SeqCst), 1);

    let run_dir = only_run_dir(output.path());
    assert!(
        run_dir
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("video_")
    );

    let saved: ScriptPlan =
        serde_json::from_str(&std::fs::read_to_string(run_dir.join(SCRIPT_FILE)).unwrap()).unwrap();
    assert_eq!(saved, plan());

    for name in ["frame_000.png", "frame_001.png", "frame_002.png", "voice.wav"] {
        assert!(run_dir.join(name).exists(), "missing {}", name);
    }
    let frame = image::open(run_dir.join("frame_001.png")).unwrap();
    assert!(!frame.color().has_alpha());

    let captions = std::fs::read_to_string(run_dir.join(CAPTIONS_FILE)).unwrap();
    assert!(captions.starts_with("1\n00:00:00,000 --> "));
    assert!(captions.contains("Twice"));

    let manifest = std::fs::read_to_string(run_dir.join(MANIFEST_FILE)).unwrap();
    assert_eq!(manifest.lines().filter(|l| l.starts_with("duration ")).count(), 3);
    assert_eq!(manifest.lines().filter(|l| l.starts_with("file ")).count(), 4);
}

#[tokio::test]
async fn test_quota_denial_stops_before_composition() {
    let output = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(
        config(),
        Arc::new(TickingVoice {
            calls: AtomicUsize::new(0),
        }),
        Arc::new(TinyPainter { quota_denied: true }),
    );

    let error = pipeline
        .run(ScriptSource::Saved(plan()), output.path())
        .await
        .unwrap_err();
    assert!(error.is_quota_exhausted());
    assert!(matches!(
        error,
        PipelineError::SceneFailed {
            stage: Stage::Image,
            ..
        }
    ));

    let run_dir = only_run_dir(output.path());
    assert!(run_dir.join(SCRIPT_FILE).exists());
    assert!(!run_dir.join(MANIFEST_FILE).exists());
}

#[tokio::test]
async fn test_unsupported_chunked_model_creates_nothing() {
    let output = tempfile::tempdir().unwrap();
    let mut config = config();
    config.voice.strategy = SynthesisStrategy::Chunked;
    config.voice.model_id = "eleven_v3".to_string();
    let voice = Arc::new(TickingVoice {
        calls: AtomicUsize::new(0),
    });
    let painter = Arc::new(TinyPainter {
        quota_denied: false,
    });
    let pipeline = Pipeline::new(config, voice.clone(), painter);

    let result = pipeline.run(ScriptSource::Saved(plan()), output.path()).await;
    assert!(matches!(
        result,
        Err(PipelineError::UnsupportedModelForContinuity { .. })
    ));
    assert_eq!(voice.calls.load(Ordering::SeqCst), 0);
    assert_eq!(std::fs::read_dir(output.path()).unwrap().count(), 0);
}
