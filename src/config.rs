//! Pipeline configuration.
//!
//! Resource paths are opaque to this crate; they are validated for
//! existence and passed through to the engine implementations untouched.

use std::fs;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::engine::EngineKind;
use crate::session::ConstructionError;

/// Default detection sensitivity for both engines.
pub const DEFAULT_SENSITIVITY: f32 = 0.5;

/// Wake-word spotter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WakeWordConfig {
    /// Path to the keyword resource the spotter is trained on.
    pub keyword_path: String,

    /// Path to the acoustic model; engine default when absent.
    pub model_path: Option<String>,

    /// Sensitivity in [0, 1]. Higher means fewer misses at the cost of
    /// more false alarms.
    pub sensitivity: f32,
}

impl Default for WakeWordConfig {
    fn default() -> Self {
        Self {
            keyword_path: String::new(), // Must be provided by user
            model_path: None,
            sensitivity: DEFAULT_SENSITIVITY,
        }
    }
}

/// Intent-inference engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Path to the context resource (intents, expressions, slots).
    pub context_path: String,

    /// Path to the acoustic model; engine default when absent.
    pub model_path: Option<String>,

    /// Sensitivity in [0, 1]. Higher means fewer misses at the cost of
    /// more erroneous inferences.
    pub sensitivity: f32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            context_path: String::new(), // Must be provided by user
            model_path: None,
            sensitivity: DEFAULT_SENSITIVITY,
        }
    }
}

/// Configuration for one conversational session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub wake_word: WakeWordConfig,
    pub inference: InferenceConfig,
}

impl PipelineConfig {
    /// Validate resource paths and sensitivity ranges.
    ///
    /// Keyword and context resources must name existing, non-empty files.
    /// Model resources are optional; a configured-but-missing model is
    /// only warned about here and left for the engine to reject.
    pub fn validate(&self) -> Result<(), ConstructionError> {
        require_resource(&self.wake_word.keyword_path, "keyword")
            .map_err(ConstructionError::KeywordResource)?;
        require_resource(&self.inference.context_path, "context")
            .map_err(ConstructionError::ContextResource)?;

        check_sensitivity(EngineKind::WakeWord, self.wake_word.sensitivity)?;
        check_sensitivity(EngineKind::Inference, self.inference.sensitivity)?;

        for (kind, model) in [
            (EngineKind::WakeWord, &self.wake_word.model_path),
            (EngineKind::Inference, &self.inference.model_path),
        ] {
            if let Some(path) = model {
                if fs::metadata(path).is_err() {
                    warn!(engine = %kind, path = %path, "model resource not found");
                }
            }
        }

        Ok(())
    }
}

fn require_resource(path: &str, what: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err(format!("no {what} resource configured"));
    }

    match fs::metadata(path) {
        Err(_) => Err(format!("{what} resource not found at {path}")),
        Ok(meta) if !meta.is_file() => Err(format!("{what} resource at {path} is not a file")),
        Ok(meta) if meta.len() == 0 => Err(format!("{what} resource at {path} is empty")),
        Ok(_) => Ok(()),
    }
}

fn check_sensitivity(engine: EngineKind, value: f32) -> Result<(), ConstructionError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConstructionError::SensitivityOutOfRange { engine, value })
    }
}
