use crate::api::{ImageProvider, ImageRequest};
use crate::config::ImageConfig;
use crate::error::{PipelineError, Result, Stage};
use crate::retry::RetryPolicy;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

/// Deterministic file name of frame `index`.
pub fn frame_file_name(index: usize) -> String {
    format!("frame_{:03}.png", index)
}

pub struct ImageBatchGenerator {
    provider: Arc<dyn ImageProvider>,
    config: ImageConfig,
    retry: RetryPolicy,
}

impl ImageBatchGenerator {
    pub fn new(provider: Arc<dyn ImageProvider>, config: ImageConfig, retry: RetryPolicy) -> Self {
        Self {
            provider,
            config,
            retry,
        }
    }

    /// Generates one flattened PNG per prompt into `work_dir`.
    ///
    /// The returned paths are ordered by prompt index. If any prompt exhausts
    /// its retries the remaining requests are aborted and the batch fails.
    pub async fn generate(&self, prompts: &[String], work_dir: &Path) -> Result<Vec<PathBuf>> {
        info!(
            "Generating {} images (concurrency {})",
            prompts.len(),
            self.config.concurrency
        );
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (index, prompt) in prompts.iter().enumerate() {
            let request = ImageRequest {
                model: self.config.model.clone(),
                prompt: prompt.clone(),
                size: self.config.size.clone(),
                quality: self.config.quality.clone(),
            };
            let provider = self.provider.clone();
            let retry = self.retry;
            let semaphore = semaphore.clone();
            let background = self.config.background;
            let path = work_dir.join(frame_file_name(index));

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let label = format!("image {}", index);
                let result = async {
                    let bytes = retry.run(&label, || provider.generate(&request)).await?;
                    save_flattened(bytes, path, background).await
                }
                .await;
                (index, result)
            });
        }

        let mut slots: Vec<Option<PathBuf>> = vec![None; prompts.len()];
        while let Some(joined) = tasks.join_next().await {
            let (index, result) = joined.map_err(|e| PipelineError::TaskPanicked {
                stage: Stage::Image,
                message: e.to_string(),
            })?;
            match result {
                Ok(path) => {
                    debug!("Image {} written to {}", index, path.display());
                    slots[index] = Some(path);
                }
                Err(e) => {
                    tasks.abort_all();
                    return Err(PipelineError::SceneFailed {
                        stage: Stage::Image,
                        scene: index,
                        source: Box::new(e),
                    });
                }
            }
        }

        let paths = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or(PipelineError::TaskPanicked {
                    stage: Stage::Image,
                    message: format!("no image for scene {}", index),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        info!("Generated {} images", paths.len());
        Ok(paths)
    }
}

async fn save_flattened(bytes: Vec<u8>, path: PathBuf, background: [u8; 3]) -> Result<PathBuf> {
    tokio::task::spawn_blocking(move || -> Result<PathBuf> {
        let decoded = image::load_from_memory(&bytes)?;
        flatten_alpha(&decoded, background).save_with_format(&path, ImageFormat::Png)?;
        Ok(path)
    })
    .await
    .map_err(|e| PipelineError::TaskPanicked {
        stage: Stage::Image,
        message: e.to_string(),
    })?
}

/// Composites the image over `background` and drops the alpha channel.
///
/// Encoders turn transparent pixels black, so frames must never carry alpha.
pub fn flatten_alpha(img: &DynamicImage, background: [u8; 3]) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, px) in rgba.enumerate_pixels() {
        let alpha = px[3] as u32;
        let blend =
            |c: u8, bg: u8| ((c as u32 * alpha + bg as u32 * (255 - alpha) + 127) / 255) as u8;
        out.put_pixel(
            x,
            y,
            Rgb([
                blend(px[0], background[0]),
                blend(px[1], background[1]),
                blend(px[2], background[2]),
            ]),
        );
    }
    out
}
