//! End-to-end tests for the voice session pipeline.
//!
//! Drives a full manager + session + engines stack with scripted engines
//! for exact per-frame assertions, and with the energy stand-ins over a
//! synthetic WAV file for the capture path.

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use voice_session::{
    AudioSample, AudioSessionManager, CaptureError, ConstructionError, EngineProvider, FrameSink,
    FrameSource, Inference, InferenceEngine, MockEngineProvider, PipelineConfig,
    ProcessingError, ScriptedInferenceEngine, ScriptedWakeWordEngine, SessionCallbacks,
    WakeWordEngine, WavFrameSource,
};

const FRAME_LENGTH: usize = 512;
const SAMPLE_RATE: u32 = 16_000;

/// Frame source the test drives by hand; frames go into the sink
/// synchronously on the calling thread.
#[derive(Default)]
struct ManualSourceShared {
    sink: Mutex<Option<FrameSink>>,
    open: AtomicBool,
}

impl ManualSourceShared {
    fn deliver(&self, frame: &[AudioSample]) {
        if let Some(sink) = self.sink.lock().unwrap().as_mut() {
            sink(frame);
        }
    }
}

struct ManualSource {
    shared: Arc<ManualSourceShared>,
}

impl ManualSource {
    fn new() -> (Self, Arc<ManualSourceShared>) {
        let shared = Arc::new(ManualSourceShared::default());
        (
            Self {
                shared: shared.clone(),
            },
            shared,
        )
    }
}

impl FrameSource for ManualSource {
    fn open(
        &mut self,
        _frame_length: usize,
        _sample_rate: u32,
        sink: FrameSink,
    ) -> Result<(), CaptureError> {
        if self.shared.open.swap(true, Ordering::SeqCst) {
            return Err(CaptureError::AlreadyOpen);
        }
        *self.shared.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    fn close(&mut self) {
        self.shared.open.store(false, Ordering::SeqCst);
        *self.shared.sink.lock().unwrap() = None;
    }
}

/// Engine provider building one scripted pair per session.
struct ScriptedProvider {
    build: Box<
        dyn Fn() -> (ScriptedWakeWordEngine, ScriptedInferenceEngine) + Send + Sync,
    >,
}

impl EngineProvider for ScriptedProvider {
    fn build(
        &self,
        _config: &PipelineConfig,
    ) -> Result<(Box<dyn WakeWordEngine>, Box<dyn InferenceEngine>), ConstructionError> {
        let (wake, inference) = (self.build)();
        Ok((Box::new(wake), Box::new(inference)))
    }
}

struct Fixture {
    manager: AudioSessionManager,
    source: Arc<ManualSourceShared>,
    wake_count: Arc<AtomicUsize>,
    inferences: Arc<Mutex<Vec<Inference>>>,
    _dir: tempfile::TempDir,
}

fn resource_config(dir: &tempfile::TempDir) -> PipelineConfig {
    let keyword = dir.path().join("keyword.ppn");
    let context = dir.path().join("context.rhn");
    std::fs::File::create(&keyword)
        .unwrap()
        .write_all(b"keyword bytes")
        .unwrap();
    std::fs::File::create(&context)
        .unwrap()
        .write_all(b"context bytes")
        .unwrap();

    let mut config = PipelineConfig::default();
    config.wake_word.keyword_path = keyword.to_string_lossy().into_owned();
    config.inference.context_path = context.to_string_lossy().into_owned();
    config
}

fn fixture(provider: Arc<dyn EngineProvider>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let (source, shared) = ManualSource::new();

    let wake_count = Arc::new(AtomicUsize::new(0));
    let inferences = Arc::new(Mutex::new(Vec::new()));

    let wake_clone = wake_count.clone();
    let inference_clone = inferences.clone();
    let callbacks = SessionCallbacks::new(move |inference| {
        inference_clone.lock().unwrap().push(inference);
    })
    .with_wake_word(move || {
        wake_clone.fetch_add(1, Ordering::SeqCst);
    });

    let manager =
        AudioSessionManager::new(resource_config(&dir), provider, Box::new(source), callbacks);

    Fixture {
        manager,
        source: shared,
        wake_count,
        inferences,
        _dir: dir,
    }
}

#[test]
fn test_full_conversation_scenario() {
    // Silence, one detection, a short utterance, one finalization.
    let provider = Arc::new(ScriptedProvider {
        build: Box::new(|| {
            let mut wake = ScriptedWakeWordEngine::new(FRAME_LENGTH, SAMPLE_RATE);
            wake.quiet_frames(6);
            wake.then_detect(0);

            let mut slots = HashMap::new();
            slots.insert("room".to_string(), "kitchen".to_string());
            let mut inference = ScriptedInferenceEngine::new(FRAME_LENGTH, SAMPLE_RATE);
            inference.pending_frames(4);
            inference.then_finalize(Inference::understood("turnLightsOn", slots));

            (wake, inference)
        }),
    });

    let fx = fixture(provider);
    fx.manager.start().unwrap();

    let frame = vec![0i16; FRAME_LENGTH];

    // Six silent frames: no transition, no callbacks.
    for _ in 0..6 {
        fx.source.deliver(&frame);
    }
    assert_eq!(fx.wake_count.load(Ordering::SeqCst), 0);
    assert!(fx.inferences.lock().unwrap().is_empty());

    // Detecting frame: exactly one wake callback, no inference yet.
    fx.source.deliver(&frame);
    assert_eq!(fx.wake_count.load(Ordering::SeqCst), 1);
    assert!(fx.inferences.lock().unwrap().is_empty());

    // Four utterance frames that do not finalize.
    for _ in 0..4 {
        fx.source.deliver(&frame);
    }
    assert!(fx.inferences.lock().unwrap().is_empty());

    // Finalizing frame carries the full result.
    fx.source.deliver(&frame);
    assert_eq!(fx.wake_count.load(Ordering::SeqCst), 1);
    {
        let results = fx.inferences.lock().unwrap();
        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert!(result.understood);
        assert_eq!(result.intent.as_deref(), Some("turnLightsOn"));
        assert_eq!(result.slots.get("room").map(String::as_str), Some("kitchen"));
    }

    let stats = fx.manager.stats().unwrap();
    assert_eq!(stats.frames_processed, 12);
    assert_eq!(stats.wake_words_detected, 1);
    assert_eq!(stats.utterances_finalized, 1);

    fx.manager.stop().unwrap();
}

#[test]
fn test_session_rearms_for_second_wake_word() {
    let provider = Arc::new(ScriptedProvider {
        build: Box::new(|| {
            let mut wake = ScriptedWakeWordEngine::new(FRAME_LENGTH, SAMPLE_RATE);
            wake.then_detect(0);
            wake.quiet_frames(1);
            wake.then_detect(1);

            let mut inference = ScriptedInferenceEngine::new(FRAME_LENGTH, SAMPLE_RATE);
            inference.then_finalize(Inference::not_understood());
            inference.then_finalize(Inference::not_understood());

            (wake, inference)
        }),
    });

    let fx = fixture(provider);
    fx.manager.start().unwrap();

    let frame = vec![0i16; FRAME_LENGTH];

    // wake -> finalize -> quiet -> wake -> finalize
    for _ in 0..5 {
        fx.source.deliver(&frame);
    }

    assert_eq!(fx.wake_count.load(Ordering::SeqCst), 2);
    assert_eq!(fx.inferences.lock().unwrap().len(), 2);
    fx.manager.stop().unwrap();
}

#[test]
fn test_lifecycle_across_start_stop_cycles() {
    let provider = Arc::new(ScriptedProvider {
        build: Box::new(|| {
            (
                ScriptedWakeWordEngine::new(FRAME_LENGTH, SAMPLE_RATE),
                ScriptedInferenceEngine::new(FRAME_LENGTH, SAMPLE_RATE),
            )
        }),
    });

    let fx = fixture(provider);

    // stop before any start is safe
    fx.manager.stop().unwrap();

    for _ in 0..3 {
        fx.manager.start().unwrap();
        fx.manager.start().unwrap(); // idempotent
        assert!(fx.manager.is_running());

        fx.source.deliver(&vec![0i16; FRAME_LENGTH]);
        assert_eq!(fx.manager.stats().unwrap().frames_processed, 1);

        fx.manager.stop().unwrap();
        fx.manager.stop().unwrap(); // idempotent
        assert!(!fx.manager.is_running());
    }
}

#[tokio::test]
async fn test_engine_failure_lands_on_error_channel() {
    let provider = Arc::new(ScriptedProvider {
        build: Box::new(|| {
            let mut wake = ScriptedWakeWordEngine::new(FRAME_LENGTH, SAMPLE_RATE);
            wake.then_fail("transient decoder fault");
            (
                wake,
                ScriptedInferenceEngine::new(FRAME_LENGTH, SAMPLE_RATE),
            )
        }),
    });

    let fx = fixture(provider);
    let mut errors = fx.manager.take_error_receiver().unwrap();

    fx.manager.start().unwrap();
    fx.source.deliver(&vec![0i16; FRAME_LENGTH]);

    let error = tokio::time::timeout(Duration::from_secs(1), errors.recv())
        .await
        .expect("timed out waiting for processing error")
        .expect("error channel closed");
    assert!(matches!(error, ProcessingError::EngineFailure { .. }));

    // The failure did not stop capture.
    fx.source.deliver(&vec![0i16; FRAME_LENGTH]);
    assert_eq!(fx.manager.stats().unwrap().frames_processed, 1);

    fx.manager.stop().unwrap();
}

#[test]
fn test_energy_pipeline_over_wav_capture() {
    // Synthetic recording: silence, a loud burst, then enough silence for
    // the inference stand-in to finalize.
    let dir = tempfile::tempdir().unwrap();
    let wav_path = dir.path().join("utterance.wav");
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&wav_path, spec).unwrap();
    let loud = i16::MAX / 2;
    for _ in 0..FRAME_LENGTH * 16 {
        writer.write_sample(0i16).unwrap();
    }
    for _ in 0..FRAME_LENGTH * 16 {
        writer.write_sample(loud).unwrap();
    }
    for _ in 0..FRAME_LENGTH * 32 {
        writer.write_sample(0i16).unwrap();
    }
    writer.finalize().unwrap();

    let wake_count = Arc::new(AtomicUsize::new(0));
    let inferences = Arc::new(Mutex::new(Vec::new()));
    let wake_clone = wake_count.clone();
    let inference_clone = inferences.clone();

    let callbacks = SessionCallbacks::new(move |inference| {
        inference_clone.lock().unwrap().push(inference);
    })
    .with_wake_word(move || {
        wake_clone.fetch_add(1, Ordering::SeqCst);
    });

    let manager = AudioSessionManager::new(
        resource_config(&dir),
        Arc::new(MockEngineProvider::default()),
        Box::new(WavFrameSource::new(&wav_path)),
        callbacks,
    );

    manager.start().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while inferences.lock().unwrap().is_empty() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }

    manager.stop().unwrap();

    assert_eq!(wake_count.load(Ordering::SeqCst), 1);
    let results = inferences.lock().unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].understood);
    assert_eq!(results[0].intent.as_deref(), Some("utteranceHeard"));
}
