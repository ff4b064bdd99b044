//! Voice Synth Server - HTTP API for voice synthesis.

mod app;
mod page;
mod voices;

use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use voice_synth_core::{select_device, ChatterboxTTS, Config, OrtProbe};

use crate::app::{router, AppState};
use crate::voices::available_voices;

const DEFAULT_PORT: &str = "8001";

/// Server settings read from the environment.
struct ServerConfig {
    port: String,
    references_dir: PathBuf,
    output_dir: PathBuf,
}

impl ServerConfig {
    fn from_env() -> Self {
        let var = |key: &str, default: &str| std::env::var(key).unwrap_or_else(|_| default.to_string());
        Self {
            port: var("PORT", DEFAULT_PORT),
            references_dir: PathBuf::from(var("VOICE_SYNTH_REFERENCES", "./references")),
            output_dir: PathBuf::from(var("VOICE_SYNTH_OUTPUT", "./output")),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let server = ServerConfig::from_env();

    let device = select_device(&OrtProbe)?;
    let config = Config {
        device,
        ..Config::from_env()?
    };
    tracing::info!(%device, dtype = ?config.dtype, "Loading Chatterbox model");
    let tts = tokio::task::spawn_blocking(move || ChatterboxTTS::new(config)).await??;

    let state = AppState::new(tts, &server.references_dir, &server.output_dir);

    let voices = available_voices(state.references_dir()).await;
    tracing::info!("Available voices: {}", voices.join(", "));

    let addr = format!("0.0.0.0:{}", server.port);
    tracing::info!("Chatterbox voice synthesis server starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}
