//! Voice session service binary.
//!
//! Runs the pipeline against the default microphone (feature `audio`) or a
//! WAV file named by `VOICE_SESSION_INPUT_WAV`, with the in-crate energy
//! engines standing in for the detectors. Keyword and context resources
//! come from `VOICE_SESSION_KEYWORD` and `VOICE_SESSION_CONTEXT`.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{error, info, warn};
use voice_session::{
    AudioSessionManager, FrameSource, Inference, MockEngineProvider, PipelineConfig,
    SessionCallbacks, WavFrameSource,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("voice_session=debug".parse()?),
        )
        .init();

    info!(version = voice_session::VERSION, "starting voice session service");

    let config = load_config().context("loading configuration")?;
    let source = make_source()?;

    let callbacks = SessionCallbacks::new(|inference: Inference| match serde_json::to_string(
        &inference,
    ) {
        Ok(json) => info!(inference = %json, "utterance finalized"),
        Err(e) => error!(error = %e, "inference serialization failed"),
    })
    .with_wake_word(|| info!("wake word detected"));

    let manager = AudioSessionManager::new(
        config,
        Arc::new(MockEngineProvider::default()),
        source,
        callbacks,
    );

    let Some(mut errors) = manager.take_error_receiver() else {
        bail!("error receiver already taken");
    };

    manager.start().context("starting audio session")?;
    info!("listening");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
            err = errors.recv() => match err {
                Some(e) => warn!(error = %e, "frame processing error"),
                None => {
                    error!("error channel closed");
                    break;
                }
            }
        }
    }

    manager.stop().context("stopping audio session")?;
    info!("voice session service stopped");
    Ok(())
}

/// Load configuration from environment variables.
fn load_config() -> Result<PipelineConfig> {
    let mut config = PipelineConfig::default();

    config.wake_word.keyword_path =
        std::env::var("VOICE_SESSION_KEYWORD").context("VOICE_SESSION_KEYWORD not set")?;
    config.inference.context_path =
        std::env::var("VOICE_SESSION_CONTEXT").context("VOICE_SESSION_CONTEXT not set")?;

    if let Ok(value) = std::env::var("VOICE_SESSION_WAKE_SENSITIVITY") {
        config.wake_word.sensitivity = value
            .parse()
            .context("parsing VOICE_SESSION_WAKE_SENSITIVITY")?;
    }
    if let Ok(value) = std::env::var("VOICE_SESSION_INFERENCE_SENSITIVITY") {
        config.inference.sensitivity = value
            .parse()
            .context("parsing VOICE_SESSION_INFERENCE_SENSITIVITY")?;
    }

    Ok(config)
}

fn make_source() -> Result<Box<dyn FrameSource>> {
    if let Ok(path) = std::env::var("VOICE_SESSION_INPUT_WAV") {
        info!(path = %path, "replaying wav input");
        return Ok(Box::new(WavFrameSource::new(path).realtime(true)));
    }
    mic_source()
}

#[cfg(feature = "audio")]
fn mic_source() -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(voice_session::MicFrameSource::new()))
}

#[cfg(not(feature = "audio"))]
fn mic_source() -> Result<Box<dyn FrameSource>> {
    bail!("built without the audio feature; set VOICE_SESSION_INPUT_WAV to replay a file")
}
