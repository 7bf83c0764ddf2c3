use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Inserted between adjacent narration texts whenever they are sent as one
/// synthesis request. Offset arithmetic over a combined alignment relies on it.
pub const NARRATION_SEPARATOR: &str = " ";

/// One narration beat and the image shown while it is spoken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub narration_text: String,
    pub image_prompt: String,
}

impl Scene {
    pub fn new(narration_text: impl Into<String>, image_prompt: impl Into<String>) -> Self {
        Self {
            narration_text: narration_text.into(),
            image_prompt: image_prompt.into(),
        }
    }

    /// Length in characters, the unit the speech provider aligns on.
    pub fn char_len(&self) -> usize {
        self.narration_text.chars().count()
    }
}

/// Topic plus ordered scenes, as produced by the script writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptPlan {
    pub topic: String,
    pub scenes: Vec<Scene>,
}

impl ScriptPlan {
    pub fn image_prompts(&self) -> Vec<String> {
        self.scenes.iter().map(|s| s.image_prompt.clone()).collect()
    }

    /// Rejects plans the timing code cannot handle.
    pub fn validate(&self) -> Result<()> {
        if self.scenes.is_empty() {
            return Err(PipelineError::InvalidScript("script has no scenes".to_string()));
        }
        for (i, scene) in self.scenes.iter().enumerate() {
            if scene.narration_text.trim().is_empty() {
                return Err(PipelineError::EmptyNarration { scene: i });
            }
            if scene.image_prompt.trim().is_empty() {
                return Err(PipelineError::InvalidScript(format!(
                    "scene {} has an empty image prompt",
                    i
                )));
            }
        }
        Ok(())
    }
}

/// Narration of every scene joined with [`NARRATION_SEPARATOR`].
pub fn join_narration(scenes: &[Scene]) -> String {
    scenes
        .iter()
        .map(|s| s.narration_text.as_str())
        .collect::<Vec<_>>()
        .join(NARRATION_SEPARATOR)
}

/// Character range `[start, end)` of each scene inside the joined narration.
pub fn scene_char_ranges(scenes: &[Scene]) -> Vec<(usize, usize)> {
    let separator = NARRATION_SEPARATOR.chars().count();
    let mut ranges = Vec::with_capacity(scenes.len());
    let mut offset = 0;
    for (i, scene) in scenes.iter().enumerate() {
        let end = offset + scene.char_len();
        ranges.push((offset, end));
        offset = end;
        if i + 1 < scenes.len() {
            offset += separator;
        }
    }
    ranges
}

/// Trims every text and forces exactly `count` scenes.
///
/// Extra scenes are dropped; a short plan is padded by repeating its last scene.
pub fn normalize_scenes(scenes: Vec<Scene>, count: usize) -> Result<Vec<Scene>> {
    let mut scenes: Vec<Scene> = scenes
        .into_iter()
        .map(|s| Scene::new(s.narration_text.trim(), s.image_prompt.trim()))
        .filter(|s| !s.narration_text.is_empty())
        .collect();

    let Some(last) = scenes.last().cloned() else {
        return Err(PipelineError::InvalidScript(
            "script writer returned no usable scenes".to_string(),
        ));
    };

    if scenes.len() > count {
        warn!("Script has {} scenes, truncating to {}", scenes.len(), count);
        scenes.truncate(count);
    } else if scenes.len() < count {
        warn!(
            "Script has {} scenes, padding to {} with the last scene",
            scenes.len(),
            count
        );
        scenes.resize(count, last);
    }
    Ok(scenes)
}
