//! Image/duration manifest and the two ffmpeg passes that turn it into video.

use crate::config::VideoConfig;
use crate::error::{PipelineError, Result};
use crate::ffmpeg::{Ffmpeg, mux_args, slideshow_args};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

pub const MANIFEST_FILE: &str = "frames.txt";
pub const SILENT_VIDEO_FILE: &str = "video_silent.mp4";

/// Ordered `(image, seconds)` input for ffmpeg's concat demuxer.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameManifest {
    entries: Vec<(PathBuf, f64)>,
}

impl FrameManifest {
    /// Pairs images with durations; both must have the same non-zero length and
    /// every duration must be a positive finite number.
    pub fn new(images: &[PathBuf], durations: &[f64]) -> Result<Self> {
        if images.len() != durations.len() || images.is_empty() {
            return Err(PipelineError::ManifestMismatch {
                images: images.len(),
                durations: durations.len(),
            });
        }
        if let Some((scene, &duration)) = durations
            .iter()
            .enumerate()
            .find(|(_, d)| !d.is_finite() || **d <= 0.0)
        {
            return Err(PipelineError::InvalidDuration { scene, duration });
        }
        Ok(Self {
            entries: images.iter().cloned().zip(durations.iter().copied()).collect(),
        })
    }

    pub fn total_duration(&self) -> f64 {
        self.entries.iter().map(|(_, d)| d).sum()
    }

    /// Manifest text. The last image is listed once more without a duration,
    /// otherwise the demuxer ignores the final frame's duration.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (image, duration) in &self.entries {
            let _ = writeln!(out, "file {}", quote_path(image));
            let _ = writeln!(out, "duration {}", format_seconds(*duration));
        }
        if let Some((last, _)) = self.entries.last() {
            let _ = writeln!(out, "file {}", quote_path(last));
        }
        out
    }
}

/// Shortest decimal that round-trips, always with a fractional part.
fn format_seconds(seconds: f64) -> String {
    format!("{:?}", seconds)
}

/// Paths go in bare unless they contain characters the demuxer would split on.
fn quote_path(path: &Path) -> String {
    let text = path.to_string_lossy();
    let needs_quotes = text
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '\'' | '\\' | '#' | '"'));
    if needs_quotes {
        format!("'{}'", text.replace('\'', r"'\''"))
    } else {
        text.into_owned()
    }
}

pub struct MediaCompositor {
    ffmpeg: Ffmpeg,
    video: VideoConfig,
}

impl MediaCompositor {
    pub fn new(ffmpeg: Ffmpeg, video: VideoConfig) -> Self {
        Self { ffmpeg, video }
    }

    /// Renders the slideshow and muxes it with `audio`, writing `output`.
    pub async fn compose(
        &self,
        images: &[PathBuf],
        durations: &[f64],
        audio: &Path,
        work_dir: &Path,
        output: &Path,
    ) -> Result<PathBuf> {
        let mut absolute = Vec::with_capacity(images.len());
        for image in images {
            absolute.push(tokio::fs::canonicalize(image).await?);
        }
        let manifest = FrameManifest::new(&absolute, durations)?;

        let manifest_path = work_dir.join(MANIFEST_FILE);
        tokio::fs::write(&manifest_path, manifest.render()).await?;
        info!(
            "Wrote manifest {} ({} frames, {:.3}s)",
            manifest_path.display(),
            images.len(),
            manifest.total_duration()
        );

        let silent = work_dir.join(SILENT_VIDEO_FILE);
        let args = slideshow_args(
            &manifest_path,
            &silent,
            self.video.width,
            self.video.height,
            self.video.fps,
            self.video.fit,
        );
        self.ffmpeg.run("render slideshow", &args, None).await?;
        info!("Silent video written to {}", silent.display());

        self.ffmpeg
            .run("mux audio", &mux_args(&silent, audio, output), None)
            .await?;
        info!("Final video written to {}", output.display());
        Ok(output.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_manifest_repeats_last_image_without_duration() {
        let manifest = FrameManifest::new(&paths(&["A", "B", "C"]), &[1.5, 2.0, 0.75]).unwrap();
        assert_eq!(
            manifest.render(),
            "file A\nduration 1.5\nfile B\nduration 2.0\nfile C\nduration 0.75\nfile C\n"
        );
    }

    #[test]
    fn test_manifest_keeps_full_precision() {
        let manifest = FrameManifest::new(&paths(&["/image0.png"]), &[6.105999999999998]).unwrap();
        assert_eq!(
            manifest.render(),
            "file /image0.png\nduration 6.105999999999998\nfile /image0.png\n"
        );
    }

    #[test]
    fn test_manifest_quotes_awkward_paths() {
        let manifest = FrameManifest::new(&paths(&["/my run/it's.png"]), &[1.0]).unwrap();
        assert!(manifest.render().starts_with("file '/my run/it'\\''s.png'\n"));
    }

    #[test]
    fn test_manifest_rejects_length_mismatch() {
        let result = FrameManifest::new(&paths(&["A", "B"]), &[1.0]);
        assert!(matches!(
            result,
            Err(PipelineError::ManifestMismatch {
                images: 2,
                durations: 1
            })
        ));
    }

    #[test]
    fn test_manifest_rejects_non_positive_duration() {
        let result = FrameManifest::new(&paths(&["A", "B"]), &[1.0, 0.0]);
        assert!(matches!(
            result,
            Err(PipelineError::InvalidDuration { scene: 1, .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_compositor_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("frame_000.png");
        std::fs::write(&image, b"not really a png").unwrap();

        let compositor = MediaCompositor::new(
            Ffmpeg::new("false", Duration::from_secs(5)),
            VideoConfig::default(),
        );
        let output = dir.path().join("out.mp4");
        let result = compositor
            .compose(&[image], &[1.0], &dir.path().join("voice.mp3"), dir.path(), &output)
            .await;

        assert!(matches!(
            result,
            Err(PipelineError::ExternalProcess { ref step, .. }) if step == "render slideshow"
        ));
        assert!(dir.path().join(MANIFEST_FILE).exists());
        assert!(!output.exists());
    }
}
