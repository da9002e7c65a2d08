//! Frame reassembly buffer.
//!
//! Capture backends deliver whatever buffer sizes the device hands them;
//! the engines consume fixed-length frames. This ring buffer sits between
//! the two: the capture side writes raw sample runs, the session side pops
//! exact frames. Single producer, single consumer.

use cache_padded::CachePadded;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;
use std::sync::Mutex;
use tracing::warn;

use crate::engine::AudioSample;

/// Default capacity: one second of 16 kHz audio.
pub const DEFAULT_CAPACITY: usize = 16_000;

type RingBuffer = HeapRb<AudioSample>;
type RingProducer = <RingBuffer as Split>::Prod;
type RingConsumer = <RingBuffer as Split>::Cons;

/// Ring buffer that yields exact fixed-length frames.
pub struct FrameBuffer {
    producer: CachePadded<Mutex<RingProducer>>,
    consumer: CachePadded<Mutex<RingConsumer>>,
    frame_length: usize,
}

impl FrameBuffer {
    /// Create a buffer with the default one-second capacity.
    pub fn new(frame_length: usize) -> Self {
        Self::with_capacity(frame_length, DEFAULT_CAPACITY)
    }

    /// Create a buffer with a custom capacity.
    ///
    /// Capacity is raised to hold at least two frames so a full frame can
    /// always accumulate while another is being popped.
    pub fn with_capacity(frame_length: usize, capacity: usize) -> Self {
        let capacity = capacity.max(frame_length * 2);
        let rb = HeapRb::<AudioSample>::new(capacity);
        let (producer, consumer) = rb.split();

        Self {
            producer: CachePadded::new(Mutex::new(producer)),
            consumer: CachePadded::new(Mutex::new(consumer)),
            frame_length,
        }
    }

    /// Write a run of samples, dropping the oldest buffered samples if the
    /// run does not fit.
    ///
    /// Returns the number of samples written.
    pub fn write(&self, samples: &[AudioSample]) -> usize {
        let mut producer = self.producer.lock().unwrap();

        let vacant = producer.vacant_len();
        if samples.len() > vacant {
            let to_drop = samples.len() - vacant;
            let mut consumer = self.consumer.lock().unwrap();
            consumer.skip(to_drop);
            drop(consumer);

            warn!(dropped = to_drop, "frame buffer full, dropping oldest samples");
        }

        producer.push_slice(samples)
    }

    /// Pop one exact frame, or `None` while fewer than `frame_length`
    /// samples are buffered.
    pub fn pop_frame(&self) -> Option<Vec<AudioSample>> {
        let mut consumer = self.consumer.lock().unwrap();
        if consumer.occupied_len() < self.frame_length {
            return None;
        }

        let mut frame = vec![0; self.frame_length];
        let read = consumer.pop_slice(&mut frame);
        debug_assert_eq!(read, self.frame_length);
        Some(frame)
    }

    /// Number of samples currently buffered.
    pub fn len(&self) -> usize {
        self.consumer.lock().unwrap().occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.consumer.lock().unwrap().capacity().get()
    }

    pub fn frame_length(&self) -> usize {
        self.frame_length
    }

    /// Discard all buffered samples.
    pub fn clear(&self) {
        let mut consumer = self.consumer.lock().unwrap();
        let occupied = consumer.occupied_len();
        consumer.skip(occupied);
    }
}
