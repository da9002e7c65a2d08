//! Audio session lifecycle.
//!
//! [`AudioSessionManager`] owns the capture resource and runs one
//! [`SessionCore`] at a time against it. Each `start` builds a fresh
//! session from the stored configuration; `stop` tears capture down before
//! the session so no in-flight frame can race a destroyed core. Per-frame
//! processing errors are forwarded on a manager-level channel and never
//! stop capture.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::capture::{CaptureError, FrameSink, FrameSource};
use crate::config::PipelineConfig;
use crate::engine::{Inference, InferenceEngine, WakeWordEngine};
use crate::session::{
    ConstructionError, InferenceCallback, ProcessingError, SessionCore, SessionStats,
    WakeWordCallback,
};

#[derive(Error, Debug)]
pub enum StartError {
    #[error("session construction failed: {0}")]
    Construction(#[from] ConstructionError),

    #[error("capture unavailable: {0}")]
    CaptureUnavailable(#[from] CaptureError),
}

#[derive(Error, Debug)]
pub enum StopError {
    #[error("engine release failed: {0}")]
    Engine(ProcessingError),
}

/// Builds one fresh, unacquired engine pair per session.
pub trait EngineProvider: Send + Sync {
    fn build(
        &self,
        config: &PipelineConfig,
    ) -> Result<(Box<dyn WakeWordEngine>, Box<dyn InferenceEngine>), ConstructionError>;
}

/// User callbacks, shared across the sessions a manager creates.
#[derive(Clone)]
pub struct SessionCallbacks {
    on_wake_word: Option<Arc<dyn Fn() + Send + Sync>>,
    on_inference: Arc<dyn Fn(Inference) + Send + Sync>,
}

impl SessionCallbacks {
    /// Callbacks with only the required inference handler.
    pub fn new(on_inference: impl Fn(Inference) + Send + Sync + 'static) -> Self {
        Self {
            on_wake_word: None,
            on_inference: Arc::new(on_inference),
        }
    }

    /// Also observe wake-word detections.
    pub fn with_wake_word(mut self, on_wake_word: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_wake_word = Some(Arc::new(on_wake_word));
        self
    }

    fn for_session(&self) -> (Option<WakeWordCallback>, InferenceCallback) {
        let wake = self.on_wake_word.clone().map(|callback| {
            let boxed: WakeWordCallback = Box::new(move || callback());
            boxed
        });
        let inference = self.on_inference.clone();
        let on_inference: InferenceCallback = Box::new(move |result| inference(result));
        (wake, on_inference)
    }
}

struct RunState {
    source: Box<dyn FrameSource>,
    session: Option<Arc<SessionCore>>, // Some while running
}

/// Owns the capture resource and the start/stop lifecycle around one
/// session at a time.
///
/// `start` and `stop` may be called from any thread; both are idempotent
/// and mutually exclusive with each other and with session construction
/// and teardown.
pub struct AudioSessionManager {
    config: PipelineConfig,
    engines: Arc<dyn EngineProvider>,
    callbacks: SessionCallbacks,
    state: Mutex<RunState>,
    error_tx: mpsc::UnboundedSender<ProcessingError>,
    error_rx: Mutex<Option<mpsc::UnboundedReceiver<ProcessingError>>>,
}

impl AudioSessionManager {
    pub fn new(
        config: PipelineConfig,
        engines: Arc<dyn EngineProvider>,
        source: Box<dyn FrameSource>,
        callbacks: SessionCallbacks,
    ) -> Self {
        let (error_tx, error_rx) = mpsc::unbounded_channel();

        Self {
            config,
            engines,
            callbacks,
            state: Mutex::new(RunState {
                source,
                session: None,
            }),
            error_tx,
            error_rx: Mutex::new(Some(error_rx)),
        }
    }

    /// Build a fresh session and begin capture into it.
    ///
    /// A no-op while already running. On any failure nothing is left
    /// half-started: a session constructed before a capture failure is
    /// destroyed before the error is returned.
    pub fn start(&self) -> Result<(), StartError> {
        let mut state = self.state.lock().unwrap();
        if state.session.is_some() {
            debug!("start ignored, session already running");
            return Ok(());
        }

        self.config.validate()?;
        let (wake_word, inference) = self.engines.build(&self.config)?;
        let (on_wake_word, on_inference) = self.callbacks.for_session();
        let session = Arc::new(SessionCore::new(
            wake_word,
            inference,
            on_wake_word,
            on_inference,
        )?);

        let sink_session = session.clone();
        let error_tx = self.error_tx.clone();
        let sink: FrameSink = Box::new(move |frame| {
            if let Err(e) = sink_session.process(frame) {
                warn!(error = %e, "frame processing failed");
                let _ = error_tx.send(e);
            }
        });

        if let Err(e) = state
            .source
            .open(session.frame_length(), session.sample_rate(), sink)
        {
            if let Err(teardown) = session.destroy() {
                warn!(error = %teardown, "session teardown failed after capture error");
            }
            return Err(StartError::CaptureUnavailable(e));
        }

        info!(
            frame_length = session.frame_length(),
            sample_rate = session.sample_rate(),
            "audio session started"
        );
        state.session = Some(session);
        Ok(())
    }

    /// Tear down capture and the running session.
    ///
    /// Capture closes first so no further frame can reach the session,
    /// then the session is destroyed. A no-op when not running, including
    /// before the first `start`.
    pub fn stop(&self) -> Result<(), StopError> {
        let mut state = self.state.lock().unwrap();
        let Some(session) = state.session.take() else {
            debug!("stop ignored, no active session");
            return Ok(());
        };

        state.source.close();
        let result = session.destroy();
        info!("audio session stopped");
        result.map_err(StopError::Engine)
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().session.is_some()
    }

    /// Stats of the running session, or `None` when stopped.
    pub fn stats(&self) -> Option<SessionStats> {
        self.state
            .lock()
            .unwrap()
            .session
            .as_ref()
            .map(|session| session.stats())
    }

    /// Take the processing-error receiver.
    ///
    /// Errors from frame delivery land here instead of interrupting
    /// capture. The receiver can be taken once; subsequent calls return
    /// `None`.
    pub fn take_error_receiver(&self) -> Option<mpsc::UnboundedReceiver<ProcessingError>> {
        self.error_rx.lock().unwrap().take()
    }
}
