use super::{ImageProvider, ImageRequest, ScriptWriter, send_for_text};
use crate::config::ScriptConfig;
use crate::error::{PipelineError, Result};
use crate::scene::{Scene, ScriptPlan, normalize_scenes};
use crate::utils::{extract_json_block, sanitize_title};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

const PROVIDER: &str = "openai";

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    api_key: String,
    base_url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    data: Option<Vec<ImageData>>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    b64_json: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Option<Vec<ChatChoice>>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Shape the scene prompt asks the model to return.
#[derive(Debug, Deserialize)]
struct SceneList {
    scenes: Vec<SceneItem>,
}

#[derive(Debug, Deserialize)]
struct SceneItem {
    script: String,
    image_description: String,
}

impl OpenAiClient {
    pub fn new(api_key: String, base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<String> {
        let request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .json(&body);
        send_for_text(PROVIDER, request).await
    }

    async fn chat(&self, body: serde_json::Value) -> Result<String> {
        let text = self.post("/v1/chat/completions", body).await?;
        parse_chat_response(&text)
    }

    async fn generate_topic(&self, config: &ScriptConfig) -> Result<String> {
        let persona = &config.personality;
        let body = json!({
            "model": config.model,
            "messages": [
                {
                    "role": "system",
                    "content": "You write short, catchy titles for vertical short-form videos."
                },
                {
                    "role": "user",
                    "content": format!(
                        "Propose one concrete, intriguing topic for a {}-second narrated video. \
                         Narrator: {} ({}). {} Return only the title, without quotes.",
                        config.duration_seconds,
                        persona.name,
                        persona.speaking_style,
                        persona.description
                    )
                }
            ],
            "temperature": 0.9,
            "max_tokens": 48
        });
        let raw = self.chat(body).await?;
        Ok(sanitize_title(&raw))
    }

    async fn generate_scenes(&self, config: &ScriptConfig, topic: &str) -> Result<Vec<Scene>> {
        let persona = &config.personality;
        let body = json!({
            "model": config.model,
            "messages": [
                {
                    "role": "system",
                    "content": "You write scripts for short vertical videos. Always answer with valid JSON and nothing else."
                },
                {
                    "role": "user",
                    "content": format!(
                        "Write a voiceover about: '{}'. Narrator: {} ({}). {} \
                         Aim for about {} words in total, split into exactly {} consecutive scenes. \
                         Each scene has `script`: 1-3 sentences read aloud, no timestamps or stage directions, \
                         and `image_description`: 1-3 sentences describing a photorealistic vertical frame with no text in it. \
                         Return JSON of the form {{\"scenes\":[{{\"script\":str,\"image_description\":str}}]}}.",
                        topic,
                        persona.name,
                        persona.speaking_style,
                        persona.description,
                        config.target_words(),
                        config.num_scenes
                    )
                }
            ],
            "temperature": config.temperature,
            "max_tokens": 2400,
            "response_format": { "type": "json_object" }
        });
        let content = self.chat(body).await?;
        parse_scene_list(&content)
    }
}

#[async_trait]
impl ImageProvider for OpenAiClient {
    async fn generate(&self, request: &ImageRequest) -> Result<Vec<u8>> {
        let mut body = json!({
            "model": request.model,
            "prompt": request.prompt,
            "size": request.size,
            "n": 1
        });
        if let Some(quality) = &request.quality {
            body["quality"] = json!(quality);
        }
        let text = self.post("/v1/images/generations", body).await?;
        parse_image_response(&text)
    }
}

#[async_trait]
impl ScriptWriter for OpenAiClient {
    async fn write_script(&self, config: &ScriptConfig) -> Result<ScriptPlan> {
        let topic = self.generate_topic(config).await?;
        info!("Topic: {}", topic);
        let scenes = self.generate_scenes(config, &topic).await?;
        debug!("Script writer returned {} scenes", scenes.len());
        let scenes = normalize_scenes(scenes, config.num_scenes)?;
        Ok(ScriptPlan { topic, scenes })
    }
}

/// Decodes the first image of an images/generations response.
pub fn parse_image_response(body: &str) -> Result<Vec<u8>> {
    let response: ImagesResponse = serde_json::from_str(body)?;
    let b64 = response
        .data
        .and_then(|d| d.into_iter().next())
        .and_then(|d| d.b64_json)
        .ok_or(PipelineError::MissingField {
            provider: PROVIDER,
            field: "data[0].b64_json",
        })?;
    Ok(STANDARD.decode(b64.trim())?)
}

/// Content of the first choice of a chat completion.
pub fn parse_chat_response(body: &str) -> Result<String> {
    let response: ChatResponse = serde_json::from_str(body)?;
    response
        .choices
        .and_then(|c| c.into_iter().next())
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .map(|c| c.trim().to_string())
        .ok_or(PipelineError::MissingField {
            provider: PROVIDER,
            field: "choices[0].message.content",
        })
}

/// Scenes from the JSON reply to the scene prompt.
pub fn parse_scene_list(content: &str) -> Result<Vec<Scene>> {
    let list: SceneList = serde_json::from_str(extract_json_block(content))?;
    Ok(list
        .scenes
        .into_iter()
        .map(|item| Scene::new(item.script, item.image_description))
        .collect())
}
