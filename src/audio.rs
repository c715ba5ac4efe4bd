use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::error::CaptureError;

pub const SAMPLE_RATE: u32 = 16_000;

/// Samples per callback at 16 kHz (100 ms).
const FRAME_SAMPLES: u32 = 1600;

/// Frames held between the audio callback and the controller. Roughly 100 s of audio.
const QUEUE_FRAMES: usize = 1024;

/// Something that records mono 16 kHz audio between `start` and `stop`.
pub trait CaptureDevice {
    fn start(&mut self) -> Result<(), CaptureError>;

    /// Stop recording and hand back everything captured since `start`.
    /// Returns an empty buffer when nothing was recorded.
    fn stop(&mut self) -> Vec<f32>;
}

/// Bounded hand-off from the audio callback to the controlling thread.
pub struct FrameQueue {
    tx: Sender<Vec<f32>>,
    rx: Receiver<Vec<f32>>,
    dropped: Arc<AtomicUsize>,
}

/// Sending half given to the audio callback.
#[derive(Clone)]
pub struct FrameProducer {
    tx: Sender<Vec<f32>>,
    dropped: Arc<AtomicUsize>,
}

impl FrameQueue {
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        Self {
            tx,
            rx,
            dropped: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn producer(&self) -> FrameProducer {
        FrameProducer {
            tx: self.tx.clone(),
            dropped: self.dropped.clone(),
        }
    }

    /// Concatenate every queued frame in arrival order.
    pub fn drain(&self) -> Vec<f32> {
        self.rx.try_iter().flatten().collect()
    }

    /// Number of frames lost to a full queue since the last call.
    pub fn take_dropped(&self) -> usize {
        self.dropped.swap(0, Ordering::Relaxed)
    }
}

impl FrameProducer {
    pub fn push(&self, frame: Vec<f32>) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(frame) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Default input device, opened fresh for every recording.
pub struct Microphone {
    queue: FrameQueue,
    stream: Option<cpal::Stream>,
}

impl Microphone {
    pub fn new() -> Self {
        Self {
            queue: FrameQueue::bounded(QUEUE_FRAMES),
            stream: None,
        }
    }

    fn open_stream(&self) -> Result<cpal::Stream, CaptureError> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or(CaptureError::NoDevice)?;

        let config = StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Fixed(FRAME_SAMPLES),
        };

        let format = device
            .default_input_config()
            .map_err(|e| CaptureError::Stream(e.to_string()))?
            .sample_format();

        let err_fn = |e: cpal::StreamError| tracing::error!(error = %e, "audio capture error");
        let producer = self.queue.producer();

        let stream = match format {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| producer.push(data.to_vec()),
                err_fn,
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    producer.push(data.iter().map(|&v| f32::from(v) / f32::from(i16::MAX)).collect());
                },
                err_fn,
                None,
            ),
            other => {
                return Err(CaptureError::Stream(format!(
                    "unsupported sample format {other:?}"
                )))
            }
        }
        .map_err(|e| CaptureError::Stream(e.to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            format = ?format,
            "input stream opened"
        );
        Ok(stream)
    }
}

impl CaptureDevice for Microphone {
    fn start(&mut self) -> Result<(), CaptureError> {
        if self.stream.is_some() {
            return Ok(());
        }

        // Leftovers from an aborted attempt must not leak into this one.
        let stale = self.queue.drain();
        if !stale.is_empty() {
            tracing::debug!(samples = stale.len(), "discarded stale audio");
        }
        self.queue.take_dropped();

        let stream = self.open_stream()?;
        stream
            .play()
            .map_err(|e| CaptureError::Stream(e.to_string()))?;
        self.stream = Some(stream);
        tracing::debug!("audio capture started");
        Ok(())
    }

    fn stop(&mut self) -> Vec<f32> {
        let Some(stream) = self.stream.take() else {
            return Vec::new();
        };
        // Dropping the stream ends the callback before we drain.
        drop(stream);

        let samples = self.queue.drain();
        let dropped = self.queue.take_dropped();
        if dropped > 0 {
            tracing::warn!(dropped_frames = dropped, "audio queue overflowed while recording");
        }
        tracing::debug!(samples = samples.len(), "audio capture stopped");
        samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_concatenates_frames_in_order() {
        let queue = FrameQueue::bounded(8);
        let producer = queue.producer();
        producer.push(vec![0.1, 0.2]);
        producer.push(vec![0.3]);

        assert_eq!(queue.drain(), vec![0.1, 0.2, 0.3]);
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn full_queue_counts_dropped_frames() {
        let queue = FrameQueue::bounded(2);
        let producer = queue.producer();
        for _ in 0..5 {
            producer.push(vec![0.5; 4]);
        }

        assert_eq!(queue.take_dropped(), 3);
        assert_eq!(queue.take_dropped(), 0);
        assert_eq!(queue.drain().len(), 8);
    }

    #[test]
    fn producer_works_from_another_thread() {
        let queue = FrameQueue::bounded(16);
        let producer = queue.producer();
        std::thread::spawn(move || {
            for i in 0..4 {
                producer.push(vec![i as f32]);
            }
        })
        .join()
        .unwrap();

        assert_eq!(queue.drain(), vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn stop_without_start_is_empty() {
        let mut mic = Microphone::new();
        assert!(mic.stop().is_empty());
    }
}
