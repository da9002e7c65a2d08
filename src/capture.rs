//! Capture sources.
//!
//! A [`FrameSource`] owns some stream of 16-bit mono audio and delivers it
//! as exact fixed-length frames, in arrival order, one delivery at a time.
//! The session manager treats the source as a black box: `open` starts
//! delivery into the supplied sink, `close` guarantees no frame reaches the
//! sink after it returns. A source outlives any single session and can be
//! opened again after a close.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::engine::AudioSample;
use crate::frame_buffer::FrameBuffer;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture already open")]
    AlreadyOpen,

    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("no supported input configuration: {0}")]
    UnsupportedFormat(String),

    #[error("capture stream failed: {0}")]
    Stream(String),

    #[error("audio file: {0}")]
    File(String),
}

/// Receives one exact frame per invocation, in delivery order.
pub type FrameSink = Box<dyn FnMut(&[AudioSample]) + Send>;

/// Contract the capture resource must satisfy: frames of exactly the
/// requested length at exactly the requested rate, mono 16-bit, in strict
/// arrival order, with no two deliveries overlapping in time.
pub trait FrameSource: Send {
    /// Begin delivering frames into `sink` on a thread owned by the
    /// source.
    fn open(
        &mut self,
        frame_length: usize,
        sample_rate: u32,
        sink: FrameSink,
    ) -> Result<(), CaptureError>;

    /// Stop delivery. No frame reaches the sink after this returns.
    fn close(&mut self);
}

/// Replays a mono 16-bit PCM WAV file as a frame stream.
///
/// Frames are delivered from a reader thread, as fast as the sink accepts
/// them or paced to real time when `realtime` is set. A trailing partial
/// frame is dropped.
pub struct WavFrameSource {
    path: PathBuf,
    realtime: bool,
    worker: Option<WavWorker>,
}

struct WavWorker {
    stop: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

impl WavFrameSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            realtime: false,
            worker: None,
        }
    }

    /// Pace delivery to one frame per frame-duration instead of draining
    /// the file at full speed.
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }
}

impl FrameSource for WavFrameSource {
    fn open(
        &mut self,
        frame_length: usize,
        sample_rate: u32,
        mut sink: FrameSink,
    ) -> Result<(), CaptureError> {
        if self.worker.is_some() {
            return Err(CaptureError::AlreadyOpen);
        }

        let reader =
            hound::WavReader::open(&self.path).map_err(|e| CaptureError::File(e.to_string()))?;
        let spec = reader.spec();
        if spec.channels != 1
            || spec.bits_per_sample != 16
            || spec.sample_format != hound::SampleFormat::Int
        {
            return Err(CaptureError::UnsupportedFormat(format!(
                "need mono 16-bit PCM, got {} ch / {} bit",
                spec.channels, spec.bits_per_sample
            )));
        }
        if spec.sample_rate != sample_rate {
            return Err(CaptureError::UnsupportedFormat(format!(
                "file is {} Hz, engines require {} Hz",
                spec.sample_rate, sample_rate
            )));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let realtime = self.realtime;
        let frame_period = Duration::from_secs_f64(frame_length as f64 / f64::from(sample_rate));

        let handle = thread::Builder::new()
            .name("wav-frame-source".to_string())
            .spawn(move || {
                let buffer = FrameBuffer::new(frame_length);
                let mut samples = reader.into_samples::<i16>();

                'replay: loop {
                    if thread_stop.load(Ordering::Acquire) {
                        break;
                    }

                    let mut run = Vec::with_capacity(frame_length);
                    for sample in samples.by_ref().take(frame_length) {
                        match sample {
                            Ok(value) => run.push(value),
                            Err(e) => {
                                warn!(error = %e, "wav read failed, stopping replay");
                                break 'replay;
                            }
                        }
                    }
                    let at_eof = run.len() < frame_length;
                    buffer.write(&run);

                    while let Some(frame) = buffer.pop_frame() {
                        if thread_stop.load(Ordering::Acquire) {
                            break 'replay;
                        }
                        sink(&frame);
                        if realtime {
                            thread::sleep(frame_period);
                        }
                    }

                    if at_eof {
                        break;
                    }
                }

                debug!("wav frame source drained");
            })
            .map_err(|e| CaptureError::Stream(e.to_string()))?;

        self.worker = Some(WavWorker { stop, handle });
        debug!(path = %self.path.display(), frame_length, sample_rate, "wav frame source opened");
        Ok(())
    }

    fn close(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop.store(true, Ordering::Release);
            if worker.handle.join().is_err() {
                warn!("wav frame source thread panicked");
            }
        }
    }
}

impl Drop for WavFrameSource {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(feature = "audio")]
pub use self::mic::MicFrameSource;

#[cfg(feature = "audio")]
mod mic {
    use super::*;

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleFormat, SampleRate};
    use std::sync::mpsc;
    use tracing::error;

    /// Captures frames from the default input device.
    ///
    /// The cpal stream must stay on the thread that created it, so `open`
    /// spawns a dedicated capture thread that owns the stream for the whole
    /// cycle and reports acquisition errors back before `open` returns.
    pub struct MicFrameSource {
        worker: Option<MicWorker>,
    }

    struct MicWorker {
        stop: Arc<AtomicBool>,
        handle: thread::JoinHandle<()>,
    }

    impl MicFrameSource {
        pub fn new() -> Self {
            Self { worker: None }
        }
    }

    impl Default for MicFrameSource {
        fn default() -> Self {
            Self::new()
        }
    }

    impl FrameSource for MicFrameSource {
        fn open(
            &mut self,
            frame_length: usize,
            sample_rate: u32,
            sink: FrameSink,
        ) -> Result<(), CaptureError> {
            if self.worker.is_some() {
                return Err(CaptureError::AlreadyOpen);
            }

            let stop = Arc::new(AtomicBool::new(false));
            let thread_stop = stop.clone();
            let (ready_tx, ready_rx) = mpsc::channel::<Result<(), CaptureError>>();

            let handle = thread::Builder::new()
                .name("mic-frame-source".to_string())
                .spawn(move || {
                    let stream = match build_stream(frame_length, sample_rate, sink) {
                        Ok(stream) => {
                            let _ = ready_tx.send(Ok(()));
                            stream
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };

                    while !thread_stop.load(Ordering::Acquire) {
                        thread::sleep(Duration::from_millis(50));
                    }

                    if let Err(e) = stream.pause() {
                        warn!(error = %e, "capture stream pause failed");
                    }
                    drop(stream);
                    debug!("microphone capture stopped");
                })
                .map_err(|e| CaptureError::Stream(e.to_string()))?;

            match ready_rx.recv() {
                Ok(Ok(())) => {
                    self.worker = Some(MicWorker { stop, handle });
                    debug!(frame_length, sample_rate, "microphone capture started");
                    Ok(())
                }
                Ok(Err(e)) => {
                    let _ = handle.join();
                    Err(e)
                }
                Err(_) => {
                    let _ = handle.join();
                    Err(CaptureError::Stream(
                        "capture thread exited before reporting readiness".to_string(),
                    ))
                }
            }
        }

        fn close(&mut self) {
            if let Some(worker) = self.worker.take() {
                worker.stop.store(true, Ordering::Release);
                if worker.handle.join().is_err() {
                    warn!("microphone capture thread panicked");
                }
            }
        }
    }

    impl Drop for MicFrameSource {
        fn drop(&mut self) {
            self.close();
        }
    }

    fn build_stream(
        frame_length: usize,
        sample_rate: u32,
        mut sink: FrameSink,
    ) -> Result<cpal::Stream, CaptureError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| CaptureError::DeviceUnavailable("no default input device".to_string()))?;

        let supported = device
            .supported_input_configs()
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?
            .find(|c| {
                c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
                    && matches!(c.sample_format(), SampleFormat::I16 | SampleFormat::F32)
            })
            .ok_or_else(|| {
                CaptureError::UnsupportedFormat(format!("no input config at {sample_rate} Hz"))
            })?;

        let sample_format = supported.sample_format();
        let channels = supported.channels() as usize;
        let config = supported.with_sample_rate(SampleRate(sample_rate)).config();

        debug!(
            device = device.name().unwrap_or_default(),
            ?sample_format,
            channels,
            "input device selected"
        );

        let buffer = FrameBuffer::new(frame_length);
        let err_fn = |err: cpal::StreamError| error!(error = %err, "capture stream error");

        let stream = match sample_format {
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let mono: Vec<AudioSample> =
                        data.chunks_exact(channels).map(|f| f[0]).collect();
                    assemble(&mono, &buffer, &mut sink);
                },
                err_fn,
                None,
            ),
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono: Vec<AudioSample> = data
                        .chunks_exact(channels)
                        .map(|f| (f[0].clamp(-1.0, 1.0) * 32767.0) as i16)
                        .collect();
                    assemble(&mono, &buffer, &mut sink);
                },
                err_fn,
                None,
            ),
            other => {
                return Err(CaptureError::UnsupportedFormat(format!(
                    "unsupported sample format {other:?}"
                )))
            }
        }
        .map_err(|e| CaptureError::Stream(e.to_string()))?;

        stream.play().map_err(|e| CaptureError::Stream(e.to_string()))?;
        Ok(stream)
    }

    fn assemble(mono: &[AudioSample], buffer: &FrameBuffer, sink: &mut FrameSink) {
        buffer.write(mono);
        while let Some(frame) = buffer.pop_frame() {
            sink(&frame);
        }
    }
}
