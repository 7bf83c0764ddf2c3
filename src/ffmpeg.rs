//! Thin wrapper around the external ffmpeg process.

use crate::config::FrameFit;
use crate::error::{PipelineError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info};

const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone)]
pub struct Ffmpeg {
    program: PathBuf,
    timeout: Duration,
}

impl Ffmpeg {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// Runs one blocking ffmpeg invocation; any non-zero exit is fatal.
    pub async fn run(&self, step: &str, args: &[String], cwd: Option<&Path>) -> Result<()> {
        info!("Running ffmpeg step '{}'", step);
        debug!("{} {}", self.program.display(), args.join(" "));

        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(output) => output?,
            Err(_) => {
                error!("ffmpeg step '{}' timed out", step);
                return Err(PipelineError::ExternalProcessTimeout {
                    step: step.to_string(),
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            let stderr = stderr_tail(&String::from_utf8_lossy(&output.stderr));
            error!("ffmpeg step '{}' failed: {}", step, stderr);
            return Err(PipelineError::ExternalProcess {
                step: step.to_string(),
                code: output.status.code(),
                stderr,
            });
        }
        Ok(())
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Lossless concatenation of audio chunks listed in a concat file.
pub fn concat_audio_args(list_file: &Path, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = ["-y", "-f", "concat", "-safe", "0", "-i"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.push(path_arg(list_file));
    args.extend(["-c", "copy"].iter().map(|s| s.to_string()));
    args.push(path_arg(output));
    args
}

/// Video filter forcing every frame to exactly `width x height`.
pub fn frame_filter(width: u32, height: u32, fit: FrameFit) -> String {
    match fit {
        FrameFit::Crop => format!(
            "scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h},setsar=1,format=yuv420p",
            w = width,
            h = height
        ),
        FrameFit::Pad => format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,format=yuv420p",
            w = width,
            h = height
        ),
    }
}

/// Silent constant-framerate video from an image/duration manifest.
pub fn slideshow_args(
    manifest: &Path,
    output: &Path,
    width: u32,
    height: u32,
    fps: u32,
    fit: FrameFit,
) -> Vec<String> {
    let mut args: Vec<String> = ["-y", "-f", "concat", "-safe", "0", "-i"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.push(path_arg(manifest));
    args.push("-vf".to_string());
    args.push(frame_filter(width, height, fit));
    args.push("-r".to_string());
    args.push(fps.to_string());
    args.extend(
        ["-pix_fmt", "yuv420p", "-c:v", "libx264", "-an"]
            .iter()
            .map(|s| s.to_string()),
    );
    args.push(path_arg(output));
    args
}

/// Muxes silent video and narration, cut to the shorter stream.
pub fn mux_args(video: &Path, audio: &Path, output: &Path) -> Vec<String> {
    let mut args = vec!["-y".to_string(), "-i".to_string(), path_arg(video)];
    args.push("-i".to_string());
    args.push(path_arg(audio));
    args.extend(
        [
            "-map", "0:v:0", "-map", "1:a:0", "-c:v", "copy", "-c:a", "aac", "-shortest",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args.push(path_arg(output));
    args
}
