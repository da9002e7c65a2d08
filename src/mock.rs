//! In-crate engine implementations.
//!
//! The detectors this pipeline orchestrates are external collaborators;
//! these stand-ins keep the pipeline runnable end to end without them. The
//! energy variants do crude RMS gating, a demo rather than a detector. The
//! scripted variants replay predetermined per-frame outcomes and count
//! init/release calls, which is what the lifecycle tests assert against.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::config::PipelineConfig;
use crate::engine::{
    AudioSample, Engine, EngineError, Inference, InferenceEngine, WakeWordEngine,
};
use crate::manager::EngineProvider;
use crate::session::ConstructionError;

/// Frame length the mock engines default to.
pub const DEFAULT_FRAME_LENGTH: usize = 512;

/// Sample rate the mock engines default to.
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

const SCRIPTED_VERSION: &str = "scripted-1.0";
const ENERGY_VERSION: &str = "energy-1.0";

/// Consecutive low-energy frames that end an utterance (~0.5 s at the
/// default frame geometry).
const TRAILING_SILENCE_FRAMES: usize = 15;

/// Hard bound on utterance length (~10 s at the default frame geometry).
const MAX_UTTERANCE_FRAMES: usize = 312;

/// Acquire/release counters shared with the test that owns the engine.
#[derive(Debug, Default)]
pub struct EngineCounters {
    pub inits: AtomicUsize,
    pub releases: AtomicUsize,
}

fn rms(frame: &[AudioSample]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = frame
        .iter()
        .map(|&s| {
            let normalized = f32::from(s) / f32::from(i16::MAX);
            normalized * normalized
        })
        .sum();
    (sum_squares / frame.len() as f32).sqrt()
}

fn energy_threshold(sensitivity: f32) -> f32 {
    // Higher sensitivity gates lower, like a real detector trading misses
    // for false alarms.
    0.5 * (1.0 - sensitivity.clamp(0.0, 1.0))
}

/// Wake-word spotter replaying a scripted sequence of frame outcomes.
///
/// Outcomes are consumed front to back, one per `process` call; an empty
/// script reports no detection.
pub struct ScriptedWakeWordEngine {
    frame_length: usize,
    sample_rate: u32,
    outcomes: VecDeque<Result<Option<u32>, String>>,
    counters: Arc<EngineCounters>,
    initialized: bool,
    fail_init: bool,
}

impl ScriptedWakeWordEngine {
    pub fn new(frame_length: usize, sample_rate: u32) -> Self {
        Self {
            frame_length,
            sample_rate,
            outcomes: VecDeque::new(),
            counters: Arc::new(EngineCounters::default()),
            initialized: false,
            fail_init: false,
        }
    }

    /// Handle to the init/release counters.
    pub fn counters(&self) -> Arc<EngineCounters> {
        self.counters.clone()
    }

    /// Make `init` fail with an acquisition error.
    pub fn fail_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// Queue `count` frames with no detection.
    pub fn quiet_frames(&mut self, count: usize) {
        for _ in 0..count {
            self.outcomes.push_back(Ok(None));
        }
    }

    /// Queue one detecting frame.
    pub fn then_detect(&mut self, keyword: u32) {
        self.outcomes.push_back(Ok(Some(keyword)));
    }

    /// Queue one failing frame.
    pub fn then_fail(&mut self, message: impl Into<String>) {
        self.outcomes.push_back(Err(message.into()));
    }
}

impl Engine for ScriptedWakeWordEngine {
    fn frame_length(&self) -> usize {
        self.frame_length
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn version(&self) -> &str {
        SCRIPTED_VERSION
    }

    fn init(&mut self) -> Result<(), EngineError> {
        if self.fail_init {
            return Err(EngineError::Acquisition("scripted init failure".to_string()));
        }
        self.counters.inits.fetch_add(1, Ordering::SeqCst);
        self.initialized = true;
        Ok(())
    }

    fn release(&mut self) -> Result<(), EngineError> {
        if self.initialized {
            self.initialized = false;
            self.counters.releases.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl WakeWordEngine for ScriptedWakeWordEngine {
    fn process(&mut self, _frame: &[AudioSample]) -> Result<Option<u32>, EngineError> {
        if !self.initialized {
            return Err(EngineError::NotInitialized);
        }
        match self.outcomes.pop_front() {
            Some(Ok(detection)) => Ok(detection),
            Some(Err(message)) => Err(EngineError::Processing(message)),
            None => Ok(None),
        }
    }
}

/// Inference engine replaying a scripted sequence of frame outcomes.
///
/// Each finalizing frame consumes one queued [`Inference`]; an empty
/// result queue finalizes as not understood.
pub struct ScriptedInferenceEngine {
    frame_length: usize,
    sample_rate: u32,
    outcomes: VecDeque<Result<bool, String>>,
    results: VecDeque<Inference>,
    context_info: String,
    counters: Arc<EngineCounters>,
    initialized: bool,
    fail_init: bool,
    finalize_pending: bool,
}

impl ScriptedInferenceEngine {
    pub fn new(frame_length: usize, sample_rate: u32) -> Self {
        Self {
            frame_length,
            sample_rate,
            outcomes: VecDeque::new(),
            results: VecDeque::new(),
            context_info: String::new(),
            counters: Arc::new(EngineCounters::default()),
            initialized: false,
            fail_init: false,
            finalize_pending: false,
        }
    }

    /// Handle to the init/release counters.
    pub fn counters(&self) -> Arc<EngineCounters> {
        self.counters.clone()
    }

    /// Make `init` fail with an acquisition error.
    pub fn fail_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn with_context_info(mut self, context_info: impl Into<String>) -> Self {
        self.context_info = context_info.into();
        self
    }

    /// Queue `count` non-finalizing frames.
    pub fn pending_frames(&mut self, count: usize) {
        for _ in 0..count {
            self.outcomes.push_back(Ok(false));
        }
    }

    /// Queue one finalizing frame producing `result`.
    pub fn then_finalize(&mut self, result: Inference) {
        self.outcomes.push_back(Ok(true));
        self.results.push_back(result);
    }

    /// Queue one failing frame.
    pub fn then_fail(&mut self, message: impl Into<String>) {
        self.outcomes.push_back(Err(message.into()));
    }
}

impl Engine for ScriptedInferenceEngine {
    fn frame_length(&self) -> usize {
        self.frame_length
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn version(&self) -> &str {
        SCRIPTED_VERSION
    }

    fn init(&mut self) -> Result<(), EngineError> {
        if self.fail_init {
            return Err(EngineError::Acquisition("scripted init failure".to_string()));
        }
        self.counters.inits.fetch_add(1, Ordering::SeqCst);
        self.initialized = true;
        Ok(())
    }

    fn release(&mut self) -> Result<(), EngineError> {
        if self.initialized {
            self.initialized = false;
            self.counters.releases.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl InferenceEngine for ScriptedInferenceEngine {
    fn process(&mut self, _frame: &[AudioSample]) -> Result<bool, EngineError> {
        if !self.initialized {
            return Err(EngineError::NotInitialized);
        }
        match self.outcomes.pop_front() {
            Some(Ok(finalized)) => {
                self.finalize_pending = finalized;
                Ok(finalized)
            }
            Some(Err(message)) => Err(EngineError::Processing(message)),
            None => {
                self.finalize_pending = false;
                Ok(false)
            }
        }
    }

    fn inference(&mut self) -> Result<Inference, EngineError> {
        if !self.initialized {
            return Err(EngineError::NotInitialized);
        }
        if !self.finalize_pending {
            return Err(EngineError::NoInference);
        }
        self.finalize_pending = false;
        Ok(self
            .results
            .pop_front()
            .unwrap_or_else(Inference::not_understood))
    }

    fn context_info(&self) -> &str {
        &self.context_info
    }
}

/// Wake-word stand-in that fires when frame RMS energy crosses a
/// sensitivity-derived threshold.
pub struct EnergyWakeWordEngine {
    frame_length: usize,
    sample_rate: u32,
    threshold: f32,
    initialized: bool,
}

impl EnergyWakeWordEngine {
    pub fn new(frame_length: usize, sample_rate: u32, sensitivity: f32) -> Self {
        Self {
            frame_length,
            sample_rate,
            threshold: energy_threshold(sensitivity),
            initialized: false,
        }
    }
}

impl Engine for EnergyWakeWordEngine {
    fn frame_length(&self) -> usize {
        self.frame_length
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn version(&self) -> &str {
        ENERGY_VERSION
    }

    fn init(&mut self) -> Result<(), EngineError> {
        self.initialized = true;
        Ok(())
    }

    fn release(&mut self) -> Result<(), EngineError> {
        self.initialized = false;
        Ok(())
    }
}

impl WakeWordEngine for EnergyWakeWordEngine {
    fn process(&mut self, frame: &[AudioSample]) -> Result<Option<u32>, EngineError> {
        if !self.initialized {
            return Err(EngineError::NotInitialized);
        }
        let energy = rms(frame);
        if energy > self.threshold {
            debug!(energy, threshold = self.threshold, "energy gate fired");
            Ok(Some(0))
        } else {
            Ok(None)
        }
    }
}

/// Inference stand-in that finalizes after trailing silence.
///
/// Speech is any frame above the energy threshold; once speech has been
/// heard, [`TRAILING_SILENCE_FRAMES`] quiet frames in a row finalize the
/// utterance. Utterance length is bounded internally, so a session never
/// waits on this engine forever.
pub struct EnergyInferenceEngine {
    frame_length: usize,
    sample_rate: u32,
    threshold: f32,
    context_info: String,
    result: Inference,
    initialized: bool,
    heard_speech: bool,
    silence_run: usize,
    frames_seen: usize,
    finalize_pending: bool,
}

impl EnergyInferenceEngine {
    pub fn new(frame_length: usize, sample_rate: u32, sensitivity: f32) -> Self {
        let mut slots = HashMap::new();
        slots.insert("source".to_string(), "energy gate".to_string());
        Self {
            frame_length,
            sample_rate,
            threshold: energy_threshold(sensitivity),
            context_info: "demo context: one intent (utteranceHeard), slot source".to_string(),
            result: Inference::understood("utteranceHeard", slots),
            initialized: false,
            heard_speech: false,
            silence_run: 0,
            frames_seen: 0,
            finalize_pending: false,
        }
    }

    /// Replace the canned result returned for every finalized utterance.
    pub fn with_result(mut self, result: Inference) -> Self {
        self.result = result;
        self
    }

    fn reset_utterance(&mut self) {
        self.heard_speech = false;
        self.silence_run = 0;
        self.frames_seen = 0;
    }
}

impl Engine for EnergyInferenceEngine {
    fn frame_length(&self) -> usize {
        self.frame_length
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn version(&self) -> &str {
        ENERGY_VERSION
    }

    fn init(&mut self) -> Result<(), EngineError> {
        self.initialized = true;
        self.reset_utterance();
        Ok(())
    }

    fn release(&mut self) -> Result<(), EngineError> {
        self.initialized = false;
        Ok(())
    }
}

impl InferenceEngine for EnergyInferenceEngine {
    fn process(&mut self, frame: &[AudioSample]) -> Result<bool, EngineError> {
        if !self.initialized {
            return Err(EngineError::NotInitialized);
        }

        self.frames_seen += 1;
        let energy = rms(frame);
        if energy > self.threshold {
            self.heard_speech = true;
            self.silence_run = 0;
        } else if self.heard_speech {
            self.silence_run += 1;
        }

        let finalized = (self.heard_speech && self.silence_run >= TRAILING_SILENCE_FRAMES)
            || self.frames_seen >= MAX_UTTERANCE_FRAMES;

        if finalized {
            // Finalization resets internal state so the result fetch finds
            // an engine that is already ready for the next utterance.
            self.reset_utterance();
            self.finalize_pending = true;
        }
        Ok(finalized)
    }

    fn inference(&mut self) -> Result<Inference, EngineError> {
        if !self.initialized {
            return Err(EngineError::NotInitialized);
        }
        if !self.finalize_pending {
            return Err(EngineError::NoInference);
        }
        self.finalize_pending = false;
        Ok(self.result.clone())
    }

    fn context_info(&self) -> &str {
        &self.context_info
    }
}

/// Builds the energy stand-ins from a pipeline config.
pub struct MockEngineProvider {
    pub frame_length: usize,
    pub sample_rate: u32,
}

impl Default for MockEngineProvider {
    fn default() -> Self {
        Self {
            frame_length: DEFAULT_FRAME_LENGTH,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

impl EngineProvider for MockEngineProvider {
    fn build(
        &self,
        config: &PipelineConfig,
    ) -> Result<(Box<dyn WakeWordEngine>, Box<dyn InferenceEngine>), ConstructionError> {
        Ok((
            Box::new(EnergyWakeWordEngine::new(
                self.frame_length,
                self.sample_rate,
                config.wake_word.sensitivity,
            )),
            Box::new(EnergyInferenceEngine::new(
                self.frame_length,
                self.sample_rate,
                config.inference.sensitivity,
            )),
        ))
    }
}
