//! Narration synthesis: one request per scene (or one for everything), then a
//! single audio track whose scene timing is known.

use crate::alignment::{
    CharacterAlignment, ChunkTiming, DurationSource, SceneTiming, WholeTrackTiming,
};
use crate::api::{SpeechProvider, SpeechRequest, SynthesizedSpeech};
use crate::audio::{wav_duration_seconds, write_pcm_wav};
use crate::config::{SynthesisStrategy, VoiceConfig};
use crate::error::{PipelineError, Result, Stage};
use crate::ffmpeg::{Ffmpeg, concat_audio_args};
use crate::retry::RetryPolicy;
use crate::scene::{Scene, join_narration};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

const CONCAT_LIST: &str = "voice_concat.txt";

/// Synthesized audio for one scene, keyed by scene index.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub index: usize,
    pub audio: Vec<u8>,
    pub alignment: CharacterAlignment,
}

/// An alignment placed on the combined track's timeline.
#[derive(Debug, Clone)]
pub struct TimedAlignment {
    pub offset: f64,
    pub alignment: CharacterAlignment,
}

/// The finished narration track.
#[derive(Debug, Clone)]
pub struct SpeechTrack {
    pub audio_path: PathBuf,
    pub durations: Vec<f64>,
    pub alignments: Vec<TimedAlignment>,
}

pub struct SpeechChunkSynthesizer {
    provider: Arc<dyn SpeechProvider>,
    voice: VoiceConfig,
    timing: SceneTiming,
    retry: RetryPolicy,
    ffmpeg: Ffmpeg,
}

impl SpeechChunkSynthesizer {
    pub fn new(
        provider: Arc<dyn SpeechProvider>,
        voice: VoiceConfig,
        timing: SceneTiming,
        retry: RetryPolicy,
        ffmpeg: Ffmpeg,
    ) -> Self {
        Self {
            provider,
            voice,
            timing,
            retry,
            ffmpeg,
        }
    }

    fn base_request(&self, text: String) -> SpeechRequest {
        SpeechRequest {
            voice_id: self.voice.voice_id.clone(),
            model_id: self.voice.model_id.clone(),
            output_format: self.voice.output_format.clone(),
            voice_settings: self.voice.settings.clone(),
            text,
            previous_text: None,
            next_text: None,
        }
    }

    /// Request for scene `index`, with its neighbours' text as continuity hints.
    pub fn chunk_request(&self, scenes: &[Scene], index: usize) -> SpeechRequest {
        let mut request = self.base_request(scenes[index].narration_text.clone());
        request.previous_text = index
            .checked_sub(1)
            .map(|i| scenes[i].narration_text.clone());
        request.next_text = scenes.get(index + 1).map(|s| s.narration_text.clone());
        request
    }

    /// Fails before any request is sent if the model rejects continuity hints.
    pub fn check_continuity_support(&self) -> Result<()> {
        if self.voice.supports_continuity() {
            Ok(())
        } else {
            Err(PipelineError::UnsupportedModelForContinuity {
                model: self.voice.model_id.clone(),
            })
        }
    }

    /// Configuration checks that need no network.
    pub fn preflight(&self) -> Result<()> {
        match self.voice.strategy {
            SynthesisStrategy::Chunked => self.check_continuity_support(),
            SynthesisStrategy::Combined => Ok(()),
        }
    }

    /// Runs every chunk request with bounded concurrency and returns the chunks
    /// in scene order. The first exhausted chunk aborts the rest.
    pub async fn synthesize_chunks(&self, scenes: &[Scene]) -> Result<Vec<AudioChunk>> {
        self.check_continuity_support()?;

        let semaphore = Arc::new(Semaphore::new(self.voice.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for index in 0..scenes.len() {
            let request = self.chunk_request(scenes, index);
            let provider = self.provider.clone();
            let retry = self.retry;
            let semaphore = semaphore.clone();

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let label = format!("speech chunk {}", index);
                let result = retry.run(&label, || provider.synthesize(&request)).await;
                (index, result)
            });
        }

        let mut slots: Vec<Option<SynthesizedSpeech>> = vec![None; scenes.len()];
        while let Some(joined) = tasks.join_next().await {
            let (index, result) = joined.map_err(|e| PipelineError::TaskPanicked {
                stage: Stage::Speech,
                message: e.to_string(),
            })?;
            match result {
                Ok(speech) => {
                    debug!(
                        "Speech chunk {} done ({} bytes, {:.2}s)",
                        index,
                        speech.audio.len(),
                        speech.alignment.last_end()
                    );
                    slots[index] = Some(speech);
                }
                Err(e) => {
                    tasks.abort_all();
                    return Err(PipelineError::SceneFailed {
                        stage: Stage::Speech,
                        scene: index,
                        source: Box::new(e),
                    });
                }
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| -> Result<AudioChunk> {
                let speech = slot.ok_or(PipelineError::TaskPanicked {
                    stage: Stage::Speech,
                    message: format!("no result for scene {}", index),
                })?;
                Ok(AudioChunk {
                    index,
                    audio: speech.audio,
                    alignment: speech.alignment,
                })
            })
            .collect()
    }

    /// Produces the narration track and per-scene durations in `work_dir`.
    pub async fn synthesize(&self, scenes: &[Scene], work_dir: &Path) -> Result<SpeechTrack> {
        match self.voice.strategy {
            SynthesisStrategy::Chunked => self.synthesize_chunked(scenes, work_dir).await,
            SynthesisStrategy::Combined => self.synthesize_combined(scenes, work_dir).await,
        }
    }

    async fn synthesize_chunked(&self, scenes: &[Scene], work_dir: &Path) -> Result<SpeechTrack> {
        info!(
            "Synthesizing {} speech chunks (concurrency {})",
            scenes.len(),
            self.voice.concurrency
        );
        let chunks = self.synthesize_chunks(scenes).await?;

        let ext = self.voice.audio_extension();
        let mut names = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let name = format!("voice_{:03}.{}", chunk.index, ext);
            self.write_audio(&work_dir.join(&name), &chunk.audio).await?;
            names.push(name);
        }

        let alignments: Vec<CharacterAlignment> =
            chunks.into_iter().map(|c| c.alignment).collect();
        let durations = ChunkTiming {
            alignments: alignments.clone(),
        }
        .scene_durations(scenes)?;

        let mut offset = 0.0;
        let timed = alignments
            .into_iter()
            .zip(&durations)
            .map(|(alignment, duration)| {
                let placed = TimedAlignment { offset, alignment };
                offset += duration;
                placed
            })
            .collect();

        let audio_path = self.concat_chunks(&names, work_dir).await?;
        self.check_track_length(&audio_path, &durations).await;

        Ok(SpeechTrack {
            audio_path,
            durations,
            alignments: timed,
        })
    }

    async fn synthesize_combined(&self, scenes: &[Scene], work_dir: &Path) -> Result<SpeechTrack> {
        let request = self.base_request(join_narration(scenes));
        info!(
            "Synthesizing narration as one request ({} chars)",
            request.text.chars().count()
        );
        let speech = self
            .retry
            .run("speech", || self.provider.synthesize(&request))
            .await?;

        let audio_path = work_dir.join(format!("voice.{}", self.voice.audio_extension()));
        self.write_audio(&audio_path, &speech.audio).await?;

        let durations = WholeTrackTiming {
            alignment: speech.alignment.clone(),
            timing: self.timing,
        }
        .scene_durations(scenes)?;
        self.check_track_length(&audio_path, &durations).await;

        Ok(SpeechTrack {
            audio_path,
            durations,
            alignments: vec![TimedAlignment {
                offset: 0.0,
                alignment: speech.alignment,
            }],
        })
    }

    async fn write_audio(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        match self.voice.pcm_sample_rate() {
            Some(rate) if self.voice.is_pcm() => {
                let path = path.to_path_buf();
                let bytes = bytes.to_vec();
                tokio::task::spawn_blocking(move || write_pcm_wav(&path, &bytes, rate))
                    .await
                    .map_err(|e| PipelineError::TaskPanicked {
                        stage: Stage::Speech,
                        message: e.to_string(),
                    })?
            }
            _ => Ok(tokio::fs::write(path, bytes).await?),
        }
    }

    /// Joins chunk files in scene order with a stream copy.
    async fn concat_chunks(&self, names: &[String], work_dir: &Path) -> Result<PathBuf> {
        let list_path = work_dir.join(CONCAT_LIST);
        let list: String = names.iter().map(|name| format!("file '{}'\n", name)).collect();
        tokio::fs::write(&list_path, list).await?;
        info!("Created concat list file {}", list_path.display());

        let combined = format!("voice.{}", self.voice.audio_extension());
        let args = concat_audio_args(Path::new(CONCAT_LIST), Path::new(&combined));
        self.ffmpeg.run("concat audio", &args, Some(work_dir)).await?;

        let combined_path = work_dir.join(combined);
        info!("Combined audio written to {}", combined_path.display());
        Ok(combined_path)
    }

    /// Logs how far a WAV track's real length is from the scene durations.
    async fn check_track_length(&self, audio_path: &Path, durations: &[f64]) {
        if !self.voice.is_pcm() {
            return;
        }
        let expected: f64 = durations.iter().sum();
        let path = audio_path.to_path_buf();
        let measured = tokio::task::spawn_blocking(move || wav_duration_seconds(&path)).await;
        match measured {
            Ok(Ok(actual)) if (actual - expected).abs() > 0.25 => warn!(
                "Narration track is {:.3}s but scenes cover {:.3}s",
                actual, expected
            ),
            Ok(Ok(actual)) => debug!("Narration track is {:.3}s", actual),
            Ok(Err(e)) => warn!("Could not read WAV duration of {}: {}", audio_path.display(), e),
            Err(e) => warn!("WAV duration probe for {} panicked: {}", audio_path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Speaks every character in 0.1 s; later scenes answer first.
    struct FakeVoice {
        fail_on: Option<String>,
        seen: Mutex<Vec<SpeechRequest>>,
    }

    impl FakeVoice {
        fn new() -> Self {
            Self {
                fail_on: None,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing_on(text: &str) -> Self {
            Self {
                fail_on: Some(text.to_string()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SpeechProvider for FakeVoice {
        async fn synthesize(&self, request: &SpeechRequest) -> Result<SynthesizedSpeech> {
            self.seen.lock().unwrap().push(request.clone());
            if self.fail_on.as_deref() == Some(request.text.as_str()) {
                return Err(PipelineError::ProviderTransient {
                    provider: "fake",
                    status: 503,
                    message: "down".to_string(),
                });
            }
            let n = request.text.chars().count();
            tokio::time::sleep(Duration::from_millis(50 / n.max(1) as u64)).await;
            let alignment = CharacterAlignment::new(
                request.text.chars().collect(),
                (0..n).map(|i| i as f64 * 0.1).collect(),
                (0..n).map(|i| (i + 1) as f64 * 0.1).collect(),
            )?;
            Ok(SynthesizedSpeech {
                audio: request.text.as_bytes().to_vec(),
                alignment,
            })
        }
    }

    fn synthesizer(
        provider: Arc<dyn SpeechProvider>,
        voice: VoiceConfig,
    ) -> SpeechChunkSynthesizer {
        SpeechChunkSynthesizer::new(
            provider,
            voice,
            SceneTiming::Boundaries,
            RetryPolicy::immediate(2),
            Ffmpeg::new("ffmpeg", Duration::from_secs(5)),
        )
    }

    fn scenes() -> Vec<Scene> {
        vec![
            Scene::new("a", "p0"),
            Scene::new("bbbbbbbbbb", "p1"),
            Scene::new("cc", "p2"),
        ]
    }

    #[test]
    fn test_chunk_request_carries_neighbour_text() {
        let synth = synthesizer(Arc::new(FakeVoice::new()), VoiceConfig::default());
        let scenes = scenes();

        let first = synth.chunk_request(&scenes, 0);
        assert_eq!(first.previous_text, None);
        assert_eq!(first.next_text.as_deref(), Some("bbbbbbbbbb"));

        let middle = synth.chunk_request(&scenes, 1);
        assert_eq!(middle.previous_text.as_deref(), Some("a"));
        assert_eq!(middle.next_text.as_deref(), Some("cc"));

        let last = synth.chunk_request(&scenes, 2);
        assert_eq!(last.next_text, None);
    }

    #[tokio::test]
    async fn test_chunks_come_back_in_scene_order() {
        let voice = VoiceConfig {
            concurrency: 3,
            ..VoiceConfig::default()
        };
        let synth = synthesizer(Arc::new(FakeVoice::new()), voice);
        let chunks = synth.synthesize_chunks(&scenes()).await.unwrap();

        let indexes: Vec<usize> = chunks.iter().map(|c| c.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
        assert_eq!(chunks[1].audio, b"bbbbbbbbbb");
    }

    #[tokio::test]
    async fn test_unsupported_model_fails_before_any_request() {
        let provider = Arc::new(FakeVoice::new());
        let voice = VoiceConfig {
            model_id: "eleven_v3".to_string(),
            ..VoiceConfig::default()
        };
        let synth = synthesizer(provider.clone(), voice);

        let result = synth.synthesize_chunks(&scenes()).await;
        assert!(matches!(
            result,
            Err(PipelineError::UnsupportedModelForContinuity { .. })
        ));
        assert!(provider.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_one_exhausted_chunk_fails_the_batch() {
        let synth = synthesizer(
            Arc::new(FakeVoice::failing_on("cc")),
            VoiceConfig::default(),
        );
        let result = synth.synthesize_chunks(&scenes()).await;
        match result {
            Err(PipelineError::SceneFailed { stage, scene, source }) => {
                assert_eq!(stage, Stage::Speech);
                assert_eq!(scene, 2);
                assert!(matches!(
                    *source,
                    PipelineError::RetriesExhausted { attempts: 2, .. }
                ));
            }
            other => panic!("expected scene failure, got {:?}", other),
        }
    }

    /// Stand-in for ffmpeg that only creates its last argument.
    #[cfg(unix)]
    fn touch_ffmpeg(dir: &Path) -> Ffmpeg {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("fake-ffmpeg.sh");
        std::fs::write(&script, "#!/bin/sh\nfor last; do :; done\n: > \"$last\"\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        Ffmpeg::new(script, Duration::from_secs(5))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_chunked_track_concats_in_scene_order() {
        let tools = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let voice = VoiceConfig {
            concurrency: 3,
            ..VoiceConfig::default()
        };
        let synth = SpeechChunkSynthesizer::new(
            Arc::new(FakeVoice::new()),
            voice,
            SceneTiming::Boundaries,
            RetryPolicy::immediate(1),
            touch_ffmpeg(tools.path()),
        );

        let track = synth.synthesize(&scenes(), work.path()).await.unwrap();

        for name in ["voice_000.mp3", "voice_001.mp3", "voice_002.mp3"] {
            assert!(work.path().join(name).exists(), "missing {}", name);
        }
        let list = std::fs::read_to_string(work.path().join(CONCAT_LIST)).unwrap();
        assert_eq!(list, "file 'voice_000.mp3'\nfile 'voice_001.mp3'\nfile 'voice_002.mp3'\n");
        assert_eq!(track.audio_path, work.path().join("voice.mp3"));
        assert!(track.audio_path.exists());

        // Each chunk lasts until its own last character ends.
        let expected = [0.1, 1.0, 0.2];
        assert_eq!(track.durations.len(), 3);
        for (got, want) in track.durations.iter().zip(expected) {
            assert!((got - want).abs() < 1e-9, "{} != {}", got, want);
        }

        let offsets: Vec<f64> = track.alignments.iter().map(|a| a.offset).collect();
        for (got, want) in offsets.iter().zip([0.0, 0.1, 1.1]) {
            assert!((got - want).abs() < 1e-9, "{} != {}", got, want);
        }
        assert_eq!(track.alignments[1].alignment.characters, vec!['b'; 10]);
    }

    #[tokio::test]
    async fn test_combined_pcm_track_is_timed_from_one_alignment() {
        let dir = tempfile::tempdir().unwrap();
        let voice = VoiceConfig {
            strategy: SynthesisStrategy::Combined,
            output_format: "pcm_16000".to_string(),
            ..VoiceConfig::default()
        };
        let provider = Arc::new(FakeVoice::new());
        let synth = synthesizer(provider.clone(), voice);

        let track = synth.synthesize(&scenes(), dir.path()).await.unwrap();

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].text, "a bbbbbbbbbb cc");
        assert_eq!(seen[0].previous_text, None);

        assert_eq!(track.audio_path, dir.path().join("voice.wav"));
        assert!(track.audio_path.exists());
        assert_eq!(track.durations.len(), 3);
        // 15 characters at 0.1 s each
        assert!((track.durations.iter().sum::<f64>() - 1.5).abs() < 1e-9);
    }
}
