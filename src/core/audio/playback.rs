//! Playback queue for synthesized speech.
//!
//! Audio deltas arrive faster than they play, so decoded buffers wait in
//! a FIFO. A single driver task plays one buffer at a time and dequeues
//! the next when the sink reports completion. When the user starts
//! speaking the queue is flushed and the in-flight buffer is cancelled.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use base64::prelude::*;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::pcm::{self, PcmError};

/// Errors raised by playback sinks.
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// The output device failed
    #[error("Audio output error: {0}")]
    Device(String),

    /// The sink was closed
    #[error("Audio output closed")]
    Closed,
}

/// A decoded mono buffer ready to play.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    /// Float samples in `[-1.0, 1.0]`
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl PlaybackBuffer {
    /// Decode a base64 PCM16 audio delta.
    pub fn from_base64(delta: &str, sample_rate: u32) -> Result<Self, PcmError> {
        let bytes = BASE64_STANDARD.decode(delta)?;
        Ok(Self {
            samples: pcm::decode_pcm16(&bytes)?,
            sample_rate,
        })
    }

    /// Playback length in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / u64::from(self.sample_rate)
    }
}

/// An audio output device.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play `buffer` and resolve once it has finished.
    ///
    /// The future may be dropped mid-way; [`AudioSink::stop`] is called
    /// right after when that happens.
    async fn play(&self, buffer: PlaybackBuffer) -> Result<(), PlaybackError>;

    /// Silence whatever is currently playing.
    fn stop(&self);

    /// Release the device.
    fn close(&self);
}

// =============================================================================
// Queue
// =============================================================================

/// FIFO of pending buffers plus the single-flight playing flag.
#[derive(Default)]
pub struct PlaybackQueue {
    pending: VecDeque<PlaybackBuffer>,
    playing: bool,
    current: Option<CancellationToken>,
}

impl PlaybackQueue {
    /// Append a buffer. Returns true if the driver is idle and must be woken.
    pub fn push(&mut self, buffer: PlaybackBuffer) -> bool {
        self.pending.push_back(buffer);
        !self.playing
    }

    /// Take the head buffer and mark playing, or mark idle when empty.
    pub fn begin_next(&mut self) -> Option<(PlaybackBuffer, CancellationToken)> {
        match self.pending.pop_front() {
            Some(buffer) => {
                let token = CancellationToken::new();
                self.playing = true;
                self.current = Some(token.clone());
                Some((buffer, token))
            }
            None => {
                self.playing = false;
                self.current = None;
                None
            }
        }
    }

    /// Drop every queued buffer and cancel the one in flight.
    ///
    /// Returns the number of discarded queued buffers.
    pub fn clear(&mut self) -> usize {
        let discarded = self.pending.len();
        self.pending.clear();
        self.playing = false;
        if let Some(token) = self.current.take() {
            token.cancel();
        }
        discarded
    }

    /// Number of buffers waiting.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no buffers are waiting.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Whether a buffer is in flight.
    pub fn is_playing(&self) -> bool {
        self.playing
    }
}

// =============================================================================
// Player
// =============================================================================

/// Single-flight playback driver.
pub struct AudioPlayer {
    queue: Arc<Mutex<PlaybackQueue>>,
    wake: Arc<Notify>,
    sink: Arc<dyn AudioSink>,
    sample_rate: u32,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl AudioPlayer {
    /// Create a player and spawn its driver task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(sink: Arc<dyn AudioSink>, sample_rate: u32) -> Self {
        let queue = Arc::new(Mutex::new(PlaybackQueue::default()));
        let wake = Arc::new(Notify::new());
        let driver = tokio::spawn(drive(queue.clone(), wake.clone(), sink.clone()));

        Self {
            queue,
            wake,
            sink,
            sample_rate,
            driver: Mutex::new(Some(driver)),
        }
    }

    /// Rate buffers are decoded at.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Decode a base64 audio delta and queue it.
    pub fn enqueue_base64(&self, delta: &str) -> Result<(), PcmError> {
        let buffer = PlaybackBuffer::from_base64(delta, self.sample_rate)?;
        self.enqueue(buffer);
        Ok(())
    }

    /// Queue a decoded buffer, starting playback if idle.
    pub fn enqueue(&self, buffer: PlaybackBuffer) {
        if self.driver.lock().is_none() {
            tracing::debug!("Player closed, dropping audio buffer");
            return;
        }
        let idle = self.queue.lock().push(buffer);
        if idle {
            self.wake.notify_one();
        }
    }

    /// Barge-in: flush the queue and halt the current buffer.
    pub fn clear(&self) {
        let discarded = self.queue.lock().clear();
        self.sink.stop();
        tracing::debug!(discarded, "Playback queue cleared");
    }

    /// Number of buffers waiting to play.
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether a buffer is in flight.
    pub fn is_playing(&self) -> bool {
        self.queue.lock().is_playing()
    }

    /// Stop the driver, drop queued audio and release the sink. Idempotent.
    pub fn close(&self) {
        let driver = self.driver.lock().take();
        if let Some(driver) = driver {
            driver.abort();
            self.queue.lock().clear();
            self.sink.stop();
            self.sink.close();
            tracing::debug!("Audio player closed");
        }
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        self.close();
    }
}

async fn drive(queue: Arc<Mutex<PlaybackQueue>>, wake: Arc<Notify>, sink: Arc<dyn AudioSink>) {
    loop {
        let next = queue.lock().begin_next();
        let Some((buffer, token)) = next else {
            wake.notified().await;
            continue;
        };

        // Cancellation first: a stopped sink may also fail the play future
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                sink.stop();
            }
            result = sink.play(buffer) => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "Audio buffer playback failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(marker: f32) -> PlaybackBuffer {
        PlaybackBuffer {
            samples: vec![marker; 4],
            sample_rate: 24000,
        }
    }

    #[test]
    fn test_queue_fifo_and_idle() {
        let mut queue = PlaybackQueue::default();
        assert!(queue.push(buffer(0.1)));
        // Still idle until the driver begins
        assert!(queue.push(buffer(0.2)));

        let (first, _) = queue.begin_next().unwrap();
        assert_eq!(first.samples[0], 0.1);
        assert!(queue.is_playing());
        assert!(!queue.push(buffer(0.3)));

        assert_eq!(queue.begin_next().unwrap().0.samples[0], 0.2);
        assert_eq!(queue.begin_next().unwrap().0.samples[0], 0.3);
        assert!(queue.begin_next().is_none());
        assert!(!queue.is_playing());
    }

    #[test]
    fn test_queue_clear_cancels_current() {
        let mut queue = PlaybackQueue::default();
        queue.push(buffer(0.1));
        queue.push(buffer(0.2));
        queue.push(buffer(0.3));

        let (_, token) = queue.begin_next().unwrap();
        assert_eq!(queue.clear(), 2);
        assert!(token.is_cancelled());
        assert!(queue.is_empty());
        assert!(!queue.is_playing());
    }

    #[test]
    fn test_buffer_from_base64() {
        let encoded = BASE64_STANDARD.encode([0xFFu8, 0x7F, 0x01, 0x80]);
        let buffer = PlaybackBuffer::from_base64(&encoded, 24000).unwrap();
        assert_eq!(buffer.samples, vec![1.0, -1.0]);
        assert_eq!(buffer.sample_rate, 24000);
    }

    #[test]
    fn test_buffer_from_invalid_base64() {
        assert!(matches!(
            PlaybackBuffer::from_base64("not base64!!", 24000),
            Err(PcmError::Base64(_))
        ));
        let odd = BASE64_STANDARD.encode([1u8, 2, 3]);
        assert!(matches!(
            PlaybackBuffer::from_base64(&odd, 24000),
            Err(PcmError::OddLength(3))
        ));
    }

    #[test]
    fn test_buffer_duration() {
        let buffer = PlaybackBuffer {
            samples: vec![0.0; 2400],
            sample_rate: 24000,
        };
        assert_eq!(buffer.duration_ms(), 100);
    }
}
