mod args;

use anyhow::Context;
use args::Args;
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use storyreel::api::{ElevenLabsClient, OpenAiClient};
use storyreel::{Config, Pipeline, ScriptPlan, ScriptSource};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    dotenvy::dotenv().ok();
    let args = Args::parse();

    if args.init {
        return write_default_config(&args.config);
    }

    let config = if args.config.exists() {
        Config::load(&args.config)
            .with_context(|| format!("Failed to load config {}", args.config.display()))?
    } else {
        info!("No config at {}, using defaults", args.config.display());
        Config::default()
    };

    let source = match &args.script {
        Some(path) => {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read script {}", path.display()))?;
            let plan: ScriptPlan = serde_json::from_str(&text)
                .with_context(|| format!("Invalid script file {}", path.display()))?;
            info!("Using saved script '{}' ({} scenes)", plan.topic, plan.scenes.len());
            ScriptSource::Saved(plan)
        }
        None => ScriptSource::Writer(Arc::new(openai_client(&config)?)),
    };

    let speech = ElevenLabsClient::new(
        require_env(&["ELEVENLABS_API_KEY", "ELEVEN_API_KEY"])?,
        &config.providers.elevenlabs_base_url,
        config.timeouts.request(),
    )?;
    let images = openai_client(&config)?;

    info!("Starting narrated video generation pipeline");
    let pipeline = Pipeline::new(config, Arc::new(speech), Arc::new(images));
    match pipeline.run(source, &args.output_dir).await {
        Ok(video) => {
            info!("Topic: {}", video.topic);
            info!("Final video written to {}", video.video_path.display());
            info!("Process complete.");
            Ok(())
        }
        Err(e) if e.is_quota_exhausted() => {
            error!("Provider quota exhausted, top up billing and rerun: {}", e);
            Err(e.into())
        }
        Err(e) => {
            error!("Video generation failed: {}", e);
            Err(e.into())
        }
    }
}

fn openai_client(config: &Config) -> anyhow::Result<OpenAiClient> {
    Ok(OpenAiClient::new(
        require_env(&["OPENAI_API_KEY"])?,
        &config.providers.openai_base_url,
        config.timeouts.request(),
    )?)
}

fn require_env(names: &[&str]) -> anyhow::Result<String> {
    names
        .iter()
        .find_map(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
        .with_context(|| {
            format!(
                "Missing {}. Add it to a .env file or the environment and rerun.",
                names.join(" or ")
            )
        })
}

fn write_default_config(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        info!("Config already exists at {}", path.display());
        return Ok(());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, Config::default().to_toml()?)?;
    info!("Wrote default config to {}", path.display());
    Ok(())
}
