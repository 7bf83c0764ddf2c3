use crate::api::{ImageProvider, ScriptWriter, SpeechProvider};
use crate::compositor::MediaCompositor;
use crate::config::Config;
use crate::error::Result;
use crate::ffmpeg::Ffmpeg;
use crate::images::ImageBatchGenerator;
use crate::scene::ScriptPlan;
use crate::subtitle::{build_srt_entries, write_srt};
use crate::tts::SpeechChunkSynthesizer;
use crate::utils::run_id;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub const SCRIPT_FILE: &str = "script.json";
pub const CAPTIONS_FILE: &str = "captions.srt";

/// Result of one pipeline run.
#[derive(Debug, Clone)]
pub struct GeneratedVideo {
    pub video_path: PathBuf,
    pub run_dir: PathBuf,
    pub topic: String,
    pub durations: Vec<f64>,
}

/// Where the script for a run comes from.
pub enum ScriptSource {
    Writer(Arc<dyn ScriptWriter>),
    Saved(ScriptPlan),
}

pub struct Pipeline {
    config: Config,
    speech: SpeechChunkSynthesizer,
    images: ImageBatchGenerator,
    compositor: MediaCompositor,
}

impl Pipeline {
    pub fn new(
        config: Config,
        speech_provider: Arc<dyn SpeechProvider>,
        image_provider: Arc<dyn ImageProvider>,
    ) -> Self {
        let ffmpeg = Ffmpeg::new(&config.ffmpeg.program, config.timeouts.compositor());
        let speech = SpeechChunkSynthesizer::new(
            speech_provider,
            config.voice.clone(),
            config.video.scene_timing,
            config.retry,
            ffmpeg.clone(),
        );
        let images = ImageBatchGenerator::new(image_provider, config.images.clone(), config.retry);
        let compositor = MediaCompositor::new(ffmpeg, config.video.clone());
        Self {
            config,
            speech,
            images,
            compositor,
        }
    }

    async fn load_script(&self, source: ScriptSource) -> Result<ScriptPlan> {
        let plan = match source {
            ScriptSource::Saved(plan) => plan,
            ScriptSource::Writer(writer) => {
                info!("Requesting script ({} scenes)", self.config.script.num_scenes);
                self.config
                    .retry
                    .run("script", || writer.write_script(&self.config.script))
                    .await?
            }
        };
        plan.validate()?;
        Ok(plan)
    }

    /// Runs one full generation inside a fresh directory under `output_dir`.
    pub async fn run(&self, source: ScriptSource, output_dir: &Path) -> Result<GeneratedVideo> {
        self.speech.preflight()?;
        let id = run_id(chrono::Local::now());
        let run_dir = output_dir.join(&id);
        tokio::fs::create_dir_all(&run_dir).await?;
        info!("Created run directory '{}'", run_dir.display());

        let plan = self.load_script(source).await?;
        tokio::fs::write(run_dir.join(SCRIPT_FILE), serde_json::to_string_pretty(&plan)?).await?;
        info!("Script '{}' has {} scenes", plan.topic, plan.scenes.len());

        let prompts = plan.image_prompts();
        let (image_paths, track) = tokio::try_join!(
            self.images.generate(&prompts, &run_dir),
            self.speech.synthesize(&plan.scenes, &run_dir),
        )?;
        info!(
            "Narration covers {:.3}s across {} scenes",
            track.durations.iter().sum::<f64>(),
            track.durations.len()
        );

        if self.config.captions.enabled {
            let entries =
                build_srt_entries(&track.alignments, self.config.captions.max_line_chars);
            let captions = run_dir.join(CAPTIONS_FILE);
            write_srt(&captions, &entries, self.config.captions.max_line_chars)?;
            info!("Wrote {} captions to {}", entries.len(), captions.display());
        }

        let output = run_dir.join(format!("{}.mp4", id));
        let video_path = self
            .compositor
            .compose(&image_paths, &track.durations, &track.audio_path, &run_dir, &output)
            .await?;

        Ok(GeneratedVideo {
            video_path,
            run_dir,
            topic: plan.topic,
            durations: track.durations,
        })
    }
}
