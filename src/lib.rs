//! Voice command session orchestration.
//!
//! Cascades two frame-processing engines over one audio stream: a
//! lightweight wake-word spotter that runs continuously, and an
//! intent-inference engine that takes over once the wake word fires.
//! [`SessionCore`] owns the per-frame state machine and callback dispatch;
//! [`AudioSessionManager`] owns the capture resource and the start/stop
//! lifecycle around it.
//!
//! Frames are fixed-length, single-channel, 16-bit linear PCM. Both
//! engines must agree on frame length and sample rate; that invariant is
//! checked once at session construction, never per frame.

pub mod capture;
pub mod config;
pub mod engine;
pub mod frame_buffer;
pub mod manager;
pub mod mock;
pub mod session;

// Re-export main types
pub use capture::{CaptureError, FrameSink, FrameSource, WavFrameSource};
#[cfg(feature = "audio")]
pub use capture::MicFrameSource;
pub use config::{InferenceConfig, PipelineConfig, WakeWordConfig, DEFAULT_SENSITIVITY};
pub use engine::{
    AudioSample, Engine, EngineError, EngineKind, Inference, InferenceEngine, WakeWordEngine,
};
pub use frame_buffer::FrameBuffer;
pub use manager::{AudioSessionManager, EngineProvider, SessionCallbacks, StartError, StopError};
pub use mock::{
    EnergyInferenceEngine, EnergyWakeWordEngine, MockEngineProvider, ScriptedInferenceEngine,
    ScriptedWakeWordEngine,
};
pub use session::{
    ConstructionError, InferenceCallback, ProcessingError, SessionCore, SessionPhase,
    SessionStats, WakeWordCallback,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
