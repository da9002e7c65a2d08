//! Engine contracts for the two detection stages.
//!
//! The pipeline treats both detectors as black boxes behind one capability
//! surface: a fixed frame length and sample rate, an acquire/release pair
//! for the underlying handle, and a per-frame `process` call. Keeping the
//! surface uniform lets the session route frames without knowing which
//! engine is which, and lets test doubles stand in for either.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Audio sample format both engines consume (16-bit linear PCM, mono).
pub type AudioSample = i16;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine used before init or after release")]
    NotInitialized,

    #[error("engine resource could not be acquired: {0}")]
    Acquisition(String),

    #[error("no inference available: last frame did not finalize")]
    NoInference,

    #[error("{0}")]
    Processing(String),
}

/// Which of the two cascaded engines an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    WakeWord,
    Inference,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::WakeWord => write!(f, "wake word"),
            EngineKind::Inference => write!(f, "inference"),
        }
    }
}

/// Result of a finalized utterance.
///
/// Allocated once per finalized utterance and handed to the inference
/// callback; `intent` and `slots` are only populated when the utterance was
/// understood.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inference {
    /// Whether the utterance matched the configured context.
    pub understood: bool,

    /// Matched intent name.
    pub intent: Option<String>,

    /// Slot name to extracted value (e.g. "room" -> "kitchen").
    pub slots: HashMap<String, String>,
}

impl Inference {
    /// An understood utterance with its intent and slots.
    pub fn understood(intent: impl Into<String>, slots: HashMap<String, String>) -> Self {
        Self {
            understood: true,
            intent: Some(intent.into()),
            slots,
        }
    }

    /// An utterance the context did not cover.
    pub fn not_understood() -> Self {
        Self {
            understood: false,
            intent: None,
            slots: HashMap::new(),
        }
    }
}

/// Capability surface shared by both engines.
///
/// `frame_length`, `sample_rate` and `version` must be answerable before
/// `init`, so a session can validate engine compatibility without acquiring
/// anything. `init` acquires the underlying handle; `release` frees it and
/// must be idempotent.
pub trait Engine: Send {
    /// Samples per processing frame.
    fn frame_length(&self) -> usize;

    /// Required input sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Engine version string.
    fn version(&self) -> &str;

    /// Acquire the underlying engine handle.
    fn init(&mut self) -> Result<(), EngineError>;

    /// Release the underlying engine handle. Safe to call repeatedly.
    fn release(&mut self) -> Result<(), EngineError>;
}

/// Continuous keyword spotter.
pub trait WakeWordEngine: Engine {
    /// Process one frame; returns the index of the detected keyword, if any.
    fn process(&mut self, frame: &[AudioSample]) -> Result<Option<u32>, EngineError>;
}

/// Speech-to-intent engine.
pub trait InferenceEngine: Engine {
    /// Process one frame; returns true once the utterance is finalized.
    fn process(&mut self, frame: &[AudioSample]) -> Result<bool, EngineError>;

    /// Fetch the result of the finalized utterance.
    ///
    /// Valid only immediately after a `process` call that returned true.
    fn inference(&mut self) -> Result<Inference, EngineError>;

    /// Source description of the configured context (intents, expressions,
    /// slots).
    fn context_info(&self) -> &str;
}
