//! Per-frame session state machine.
//!
//! [`SessionCore`] owns one wake-word engine and one inference engine and
//! routes every incoming frame to exactly one of them, depending on the
//! current phase. Phase transitions fire the user callbacks synchronously:
//! a callback has always completed before `process` returns for the frame
//! that triggered it.

use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::engine::{
    AudioSample, EngineError, EngineKind, Inference, InferenceEngine, WakeWordEngine,
};

/// Called when the wake word fires.
pub type WakeWordCallback = Box<dyn FnMut() + Send>;

/// Called with the result of each finalized utterance.
pub type InferenceCallback = Box<dyn FnMut(Inference) + Send>;

#[derive(Error, Debug)]
pub enum ConstructionError {
    #[error("keyword resource: {0}")]
    KeywordResource(String),

    #[error("context resource: {0}")]
    ContextResource(String),

    #[error("{engine} sensitivity {value} outside [0, 1]")]
    SensitivityOutOfRange { engine: EngineKind, value: f32 },

    #[error("engine frame lengths differ: wake word {wake_word}, inference {inference}")]
    FrameLengthMismatch { wake_word: usize, inference: usize },

    #[error("engine sample rates differ: wake word {wake_word} Hz, inference {inference} Hz")]
    SampleRateMismatch { wake_word: u32, inference: u32 },

    #[error("{engine} engine failed to initialize: {source}")]
    EngineInit { engine: EngineKind, source: EngineError },
}

#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("frame holds {got} samples, engines require {expected}")]
    BadFrameSize { got: usize, expected: usize },

    #[error("{engine} engine failure: {source}")]
    EngineFailure { engine: EngineKind, source: EngineError },

    #[error("session already destroyed")]
    SessionClosed,
}

/// Which engine the next frame will be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Passively spotting the wake word.
    AwaitingWakeWord,

    /// Wake word fired; frames feed the inference engine until it
    /// finalizes.
    Inferring,
}

/// Processing counters, queryable at any time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionStats {
    pub frames_processed: u64,
    pub wake_words_detected: u64,
    pub utterances_finalized: u64,
}

struct Engines {
    wake_word: Box<dyn WakeWordEngine>,
    inference: Box<dyn InferenceEngine>,
}

struct Inner {
    engines: Option<Engines>, // None once destroyed
    phase: SessionPhase,
    on_wake_word: Option<WakeWordCallback>,
    on_inference: InferenceCallback,
    stats: SessionStats,
}

/// One conversational session over two cascaded engines.
///
/// `process` is synchronous and guarded by an internal mutex, so the
/// single-frame-in-flight invariant holds even for capture sources without
/// their own serialization guarantee. Callbacks run on whatever thread is
/// inside `process` at that moment and must not call back into the session.
pub struct SessionCore {
    inner: Mutex<Inner>,
    frame_length: usize,
    sample_rate: u32,
    version: String,
    context_info: String,
}

impl std::fmt::Debug for SessionCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCore")
            .field("frame_length", &self.frame_length)
            .field("sample_rate", &self.sample_rate)
            .field("version", &self.version)
            .field("context_info", &self.context_info)
            .finish_non_exhaustive()
    }
}

impl SessionCore {
    /// Build a session from two unacquired engines.
    ///
    /// The frame-length/sample-rate invariant is checked before either
    /// engine is initialized, so a mismatch acquires nothing. If the
    /// second engine fails to initialize, the first is released before the
    /// error is returned; construction never leaves a partially-held
    /// engine handle behind.
    pub fn new(
        mut wake_word: Box<dyn WakeWordEngine>,
        mut inference: Box<dyn InferenceEngine>,
        on_wake_word: Option<WakeWordCallback>,
        on_inference: InferenceCallback,
    ) -> Result<Self, ConstructionError> {
        if wake_word.frame_length() != inference.frame_length() {
            return Err(ConstructionError::FrameLengthMismatch {
                wake_word: wake_word.frame_length(),
                inference: inference.frame_length(),
            });
        }
        if wake_word.sample_rate() != inference.sample_rate() {
            return Err(ConstructionError::SampleRateMismatch {
                wake_word: wake_word.sample_rate(),
                inference: inference.sample_rate(),
            });
        }

        wake_word.init().map_err(|source| ConstructionError::EngineInit {
            engine: EngineKind::WakeWord,
            source,
        })?;

        if let Err(source) = inference.init() {
            if let Err(e) = wake_word.release() {
                warn!(error = %e, "wake word engine release failed during aborted construction");
            }
            return Err(ConstructionError::EngineInit {
                engine: EngineKind::Inference,
                source,
            });
        }

        let frame_length = wake_word.frame_length();
        let sample_rate = wake_word.sample_rate();
        let version = format!(
            "{} (wake word v{}) (inference v{})",
            crate::VERSION,
            wake_word.version(),
            inference.version()
        );
        let context_info = inference.context_info().to_string();

        debug!(frame_length, sample_rate, "session constructed");

        Ok(Self {
            inner: Mutex::new(Inner {
                engines: Some(Engines {
                    wake_word,
                    inference,
                }),
                phase: SessionPhase::AwaitingWakeWord,
                on_wake_word,
                on_inference,
                stats: SessionStats::default(),
            }),
            frame_length,
            sample_rate,
            version,
            context_info,
        })
    }

    /// Route one frame to the engine the current phase selects.
    ///
    /// A wake-word detection flips the phase to [`SessionPhase::Inferring`]
    /// and fires the wake-word callback before returning. A finalizing
    /// frame flips the phase back first, then fetches the result, then
    /// fires the inference callback; finalization has already reset the
    /// engine, so the callback sees a session that is ready for the next
    /// wake word. Engine failures leave the phase unchanged and are never
    /// retried here.
    pub fn process(&self, frame: &[AudioSample]) -> Result<(), ProcessingError> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let engines = inner.engines.as_mut().ok_or(ProcessingError::SessionClosed)?;

        if frame.len() != self.frame_length {
            return Err(ProcessingError::BadFrameSize {
                got: frame.len(),
                expected: self.frame_length,
            });
        }

        match inner.phase {
            SessionPhase::AwaitingWakeWord => {
                let detection = engines.wake_word.process(frame).map_err(|source| {
                    ProcessingError::EngineFailure {
                        engine: EngineKind::WakeWord,
                        source,
                    }
                })?;

                if let Some(keyword) = detection {
                    debug!(keyword, "wake word detected");
                    inner.phase = SessionPhase::Inferring;
                    inner.stats.wake_words_detected += 1;
                    if let Some(callback) = inner.on_wake_word.as_mut() {
                        callback();
                    }
                }
            }
            SessionPhase::Inferring => {
                let finalized = engines.inference.process(frame).map_err(|source| {
                    ProcessingError::EngineFailure {
                        engine: EngineKind::Inference,
                        source,
                    }
                })?;

                if finalized {
                    inner.phase = SessionPhase::AwaitingWakeWord;
                    let result = engines.inference.inference().map_err(|source| {
                        ProcessingError::EngineFailure {
                            engine: EngineKind::Inference,
                            source,
                        }
                    })?;
                    debug!(understood = result.understood, "utterance finalized");
                    inner.stats.utterances_finalized += 1;
                    (inner.on_inference)(result);
                }
            }
        }

        inner.stats.frames_processed += 1;
        Ok(())
    }

    /// Release both engine handles and close the session.
    ///
    /// Both releases are attempted even if one fails; the first failure is
    /// reported. A second call is a no-op. Any later `process` fails with
    /// [`ProcessingError::SessionClosed`].
    pub fn destroy(&self) -> Result<(), ProcessingError> {
        let mut guard = self.inner.lock().unwrap();
        let Some(mut engines) = guard.engines.take() else {
            return Ok(());
        };

        let wake_result = engines.wake_word.release();
        let inference_result = engines.inference.release();
        info!("session destroyed");

        match (wake_result, inference_result) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(source), _) => Err(ProcessingError::EngineFailure {
                engine: EngineKind::WakeWord,
                source,
            }),
            (Ok(()), Err(source)) => Err(ProcessingError::EngineFailure {
                engine: EngineKind::Inference,
                source,
            }),
        }
    }

    /// Current phase, or `None` once destroyed.
    pub fn phase(&self) -> Option<SessionPhase> {
        let guard = self.inner.lock().unwrap();
        guard.engines.as_ref().map(|_| guard.phase)
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.lock().unwrap().engines.is_none()
    }

    pub fn stats(&self) -> SessionStats {
        self.inner.lock().unwrap().stats
    }

    /// Samples per frame, as agreed by both engines.
    pub fn frame_length(&self) -> usize {
        self.frame_length
    }

    /// Required input sample rate in Hz, as agreed by both engines.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Combined pipeline and engine version string.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Source description of the inference engine's configured context.
    pub fn context_info(&self) -> &str {
        &self.context_info
    }
}

impl Drop for SessionCore {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            warn!(error = %e, "engine release failed during drop");
        }
    }
}
