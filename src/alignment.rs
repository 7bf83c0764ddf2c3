//! Character-level speech timing and the per-scene durations derived from it.

use crate::error::{PipelineError, Result};
use crate::scene::{Scene, scene_char_ranges};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Shortest time any scene is shown for, in seconds.
pub const MIN_SCENE_DURATION: f64 = 0.1;

/// Parallel per-character timing arrays as returned by the speech provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterAlignment {
    pub characters: Vec<char>,
    pub start_times: Vec<f64>,
    pub end_times: Vec<f64>,
}

impl CharacterAlignment {
    pub fn new(characters: Vec<char>, start_times: Vec<f64>, end_times: Vec<f64>) -> Result<Self> {
        let alignment = Self {
            characters,
            start_times,
            end_times,
        };
        alignment.validate()?;
        Ok(alignment)
    }

    pub fn validate(&self) -> Result<()> {
        let n = self.characters.len();
        if n == 0 || self.start_times.len() != n || self.end_times.len() != n {
            return Err(PipelineError::AlignmentMismatch {
                characters: n,
                start_times: self.start_times.len(),
                end_times: self.end_times.len(),
            });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }

    /// End of the last character; the only value known to bound the audio.
    pub fn last_end(&self) -> f64 {
        self.end_times.last().copied().unwrap_or(0.0)
    }
}

/// How a whole-track alignment is cut into scene durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SceneTiming {
    /// Each scene lasts from its own first start to the next scene's first start,
    /// the last one until the final character ends. Pauses belong to the scene before.
    #[default]
    Boundaries,
    /// Each scene lasts from its first character start to its last character end.
    Spoken,
}

/// Scene index ranges checked against the alignment length.
fn checked_ranges(alignment: &CharacterAlignment, scenes: &[Scene]) -> Result<Vec<(usize, usize)>> {
    alignment.validate()?;
    if scenes.is_empty() {
        return Err(PipelineError::InvalidScript("no scenes to time".to_string()));
    }

    let available = alignment.len();
    let ranges = scene_char_ranges(scenes);
    for (scene, &(start, end)) in ranges.iter().enumerate() {
        if start == end {
            return Err(PipelineError::EmptyNarration { scene });
        }
        if end > available {
            return Err(PipelineError::AlignmentOutOfBounds {
                scene,
                end_index: end,
                available,
            });
        }
        if scene > 0 {
            let separator = alignment.characters[start - 1];
            if !separator.is_whitespace() {
                warn!(
                    "Expected a separator before scene {} at character {}, found {:?}",
                    scene,
                    start - 1,
                    separator
                );
            }
        }
    }

    let covered = ranges.last().map(|r| r.1).unwrap_or(0);
    if covered != available {
        return Err(PipelineError::AlignmentOutOfBounds {
            scene: scenes.len() - 1,
            end_index: covered,
            available,
        });
    }
    Ok(ranges)
}

/// Spoken duration of each scene inside one alignment over the joined narration.
///
/// `duration_i = max(MIN_SCENE_DURATION, end[last char of i] - start[first char of i])`.
pub fn compute_scene_durations(
    alignment: &CharacterAlignment,
    scenes: &[Scene],
) -> Result<Vec<f64>> {
    let ranges = checked_ranges(alignment, scenes)?;
    Ok(ranges
        .iter()
        .map(|&(start, end)| {
            let first_start = alignment.start_times[start];
            let last_end = alignment.end_times[end - 1];
            (last_end - first_start).max(MIN_SCENE_DURATION)
        })
        .collect())
}

/// Scene boundaries: `0`, the first start time of every later scene, then the track end.
///
/// The result has `scenes.len() + 1` entries.
pub fn scene_start_times(alignment: &CharacterAlignment, scenes: &[Scene]) -> Result<Vec<f64>> {
    let ranges = checked_ranges(alignment, scenes)?;
    let mut boundaries = Vec::with_capacity(ranges.len() + 1);
    boundaries.push(0.0);
    boundaries.extend(ranges.iter().skip(1).map(|&(start, _)| alignment.start_times[start]));
    boundaries.push(alignment.last_end());
    Ok(boundaries)
}

/// Durations between consecutive boundaries, floored at [`MIN_SCENE_DURATION`].
pub fn boundary_durations(boundaries: &[f64]) -> Vec<f64> {
    boundaries
        .windows(2)
        .map(|w| (w[1] - w[0]).max(MIN_SCENE_DURATION))
        .collect()
}

/// Something that can say how long each scene's image stays on screen.
pub trait DurationSource {
    fn scene_durations(&self, scenes: &[Scene]) -> Result<Vec<f64>>;
}

/// One alignment covering the whole joined narration (single synthesis request).
#[derive(Debug, Clone)]
pub struct WholeTrackTiming {
    pub alignment: CharacterAlignment,
    pub timing: SceneTiming,
}

impl DurationSource for WholeTrackTiming {
    fn scene_durations(&self, scenes: &[Scene]) -> Result<Vec<f64>> {
        let durations = match self.timing {
            SceneTiming::Spoken => compute_scene_durations(&self.alignment, scenes)?,
            SceneTiming::Boundaries => {
                boundary_durations(&scene_start_times(&self.alignment, scenes)?)
            }
        };
        debug!("Whole-track durations: {:?}", durations);
        Ok(durations)
    }
}

/// One alignment per scene, each starting at time zero (chunked synthesis).
#[derive(Debug, Clone)]
pub struct ChunkTiming {
    pub alignments: Vec<CharacterAlignment>,
}

impl DurationSource for ChunkTiming {
    fn scene_durations(&self, scenes: &[Scene]) -> Result<Vec<f64>> {
        if self.alignments.len() != scenes.len() {
            return Err(PipelineError::ChunkCountMismatch {
                chunks: self.alignments.len(),
                scenes: scenes.len(),
            });
        }
        self.alignments
            .iter()
            .zip(scenes)
            .enumerate()
            .map(|(i, (alignment, scene))| {
                alignment.validate()?;
                if alignment.len() < scene.char_len() {
                    return Err(PipelineError::AlignmentOutOfBounds {
                        scene: i,
                        end_index: scene.char_len(),
                        available: alignment.len(),
                    });
                }
                Ok(alignment.last_end().max(MIN_SCENE_DURATION))
            })
            .collect()
    }
}
