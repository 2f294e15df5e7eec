//! Microphone capture pipeline.
//!
//! The device callback runs on the audio thread and must never block. It
//! only slices incoming samples into fixed render quanta and pushes them
//! into a wait-free SPSC ring ([`rtrb`]). A drain task on the tokio
//! runtime pops the quanta, converts them to PCM16 and hands the bytes to
//! the caller's callback.
//!
//! ```text
//! device thread                      tokio runtime
//! ┌────────────┐   rtrb ring   ┌───────────────────────────┐
//! │ BlockSink  │ ────────────▶ │ drain task ─▶ on_audio_block │
//! └────────────┘  [f32; 128]   └───────────────────────────┘
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};
use serde::Deserialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::pcm::{self, DEFAULT_CAPTURE_SAMPLE_RATE, RENDER_QUANTUM};

/// One render quantum of float samples.
pub type AudioBlock = [f32; RENDER_QUANTUM];

/// Callback receiving each captured block as little-endian PCM16 bytes.
pub type AudioBlockCallback =
    Arc<dyn Fn(Bytes) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Default ring capacity in blocks (~1s at 24kHz).
const DEFAULT_RING_CAPACITY: usize = 192;

/// Default interval between drains of the ring.
const DEFAULT_DRAIN_INTERVAL_MS: u64 = 5;

/// Errors raised by the capture pipeline.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The OS or user refused microphone access
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No usable input device or configuration
    #[error("Audio input device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Backend failure after the device was opened
    #[error("Audio stream error: {0}")]
    Stream(String),
}

/// Capture settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Sample rate requested from the microphone
    pub sample_rate: u32,
    /// Capacity of the device-to-runtime ring, in blocks
    pub ring_capacity: usize,
    /// How often the runtime drains the ring
    pub drain_interval_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_CAPTURE_SAMPLE_RATE,
            ring_capacity: DEFAULT_RING_CAPACITY,
            drain_interval_ms: DEFAULT_DRAIN_INTERVAL_MS,
        }
    }
}

// =============================================================================
// Render side
// =============================================================================

/// Audio-thread end of the capture ring.
///
/// Accumulates device callback slices of any length into fixed quanta.
/// A full ring drops the quantum instead of waiting.
pub struct BlockSink {
    producer: Producer<AudioBlock>,
    pending: AudioBlock,
    filled: usize,
    dropped: Arc<AtomicU64>,
}

impl BlockSink {
    fn new(producer: Producer<AudioBlock>, dropped: Arc<AtomicU64>) -> Self {
        Self {
            producer,
            pending: [0.0; RENDER_QUANTUM],
            filled: 0,
            dropped,
        }
    }

    /// Append samples from the device callback. Wait-free.
    pub fn write(&mut self, mut samples: &[f32]) {
        while !samples.is_empty() {
            let take = (RENDER_QUANTUM - self.filled).min(samples.len());
            self.pending[self.filled..self.filled + take].copy_from_slice(&samples[..take]);
            self.filled += take;
            samples = &samples[take..];

            if self.filled == RENDER_QUANTUM {
                self.flush();
            }
        }
    }

    /// Append interleaved multi-channel samples, keeping the first channel.
    pub fn write_interleaved(&mut self, data: &[f32], channels: usize) {
        if channels <= 1 {
            self.write(data);
            return;
        }
        for frame in data.chunks(channels) {
            self.pending[self.filled] = frame[0];
            self.filled += 1;
            if self.filled == RENDER_QUANTUM {
                self.flush();
            }
        }
    }

    fn flush(&mut self) {
        if self.producer.push(self.pending).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.filled = 0;
    }
}

// =============================================================================
// Backend seam
// =============================================================================

/// A microphone backend.
pub trait AudioSource: Send + Sync {
    /// Open the input device and start feeding `sink` from the audio thread.
    fn open(
        &self,
        sample_rate_hint: u32,
        sink: BlockSink,
    ) -> Result<Box<dyn SourceControl>, CaptureError>;
}

/// Control handle for an opened input device.
pub trait SourceControl: Send {
    /// Enable or disable the hardware track.
    fn set_enabled(&mut self, enabled: bool) -> Result<(), CaptureError>;

    /// Stop the device. Called at most once.
    fn stop(&mut self);
}

// =============================================================================
// Pipeline
// =============================================================================

/// Entry point for microphone capture.
pub struct CapturePipeline;

impl CapturePipeline {
    /// Open the microphone and start delivering PCM16 blocks to `on_audio_block`.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Propagates [`CaptureError::PermissionDenied`] or
    /// [`CaptureError::DeviceUnavailable`] from the backend.
    pub fn start(
        source: &dyn AudioSource,
        config: &CaptureConfig,
        on_audio_block: AudioBlockCallback,
    ) -> Result<MicrophoneStream, CaptureError> {
        let (producer, consumer) = RingBuffer::<AudioBlock>::new(config.ring_capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));

        let control = source.open(
            config.sample_rate,
            BlockSink::new(producer, dropped.clone()),
        )?;

        let muted = Arc::new(AtomicBool::new(false));
        let drain_task = tokio::spawn(drain(
            consumer,
            muted.clone(),
            Duration::from_millis(config.drain_interval_ms.max(1)),
            on_audio_block,
        ));

        tracing::info!(sample_rate = config.sample_rate, "Microphone capture started");

        Ok(MicrophoneStream {
            control: Mutex::new(Some(control)),
            drain_task: Mutex::new(Some(drain_task)),
            muted,
            dropped,
            sample_rate: config.sample_rate,
        })
    }
}

async fn drain(
    mut consumer: Consumer<AudioBlock>,
    muted: Arc<AtomicBool>,
    interval: Duration,
    on_audio_block: AudioBlockCallback,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        while let Ok(block) = consumer.pop() {
            // Muted blocks are dropped, not held for later
            if muted.load(Ordering::Acquire) {
                continue;
            }
            on_audio_block(pcm::encode_block(&block)).await;
        }
    }
}

/// Handle to a running microphone capture.
pub struct MicrophoneStream {
    control: Mutex<Option<Box<dyn SourceControl>>>,
    drain_task: Mutex<Option<JoinHandle<()>>>,
    muted: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    sample_rate: u32,
}

impl MicrophoneStream {
    /// Mute or unmute delivery and the hardware track. Idempotent.
    pub fn set_mute(&self, muted: bool) {
        self.muted.store(muted, Ordering::Release);

        if let Some(control) = self.control.lock().as_mut()
            && let Err(e) = control.set_enabled(!muted)
        {
            tracing::warn!(error = %e, muted, "Failed to toggle microphone track");
        }
        tracing::debug!(muted, "Microphone mute changed");
    }

    /// Whether delivery is currently muted.
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    /// Blocks dropped on the audio thread because the ring was full.
    pub fn dropped_blocks(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Rate the device was opened at.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Whether the stream has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.control.lock().is_none() && self.drain_task.lock().is_none()
    }

    /// Stop the device and the drain task. Safe to call repeatedly.
    pub fn dispose(&self) {
        let control = self.control.lock().take();
        if let Some(mut control) = control {
            control.stop();
            tracing::info!("Microphone capture stopped");
        }
        if let Some(handle) = self.drain_task.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for MicrophoneStream {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_sink_slices_into_quanta() {
        let (producer, mut consumer) = RingBuffer::<AudioBlock>::new(4);
        let mut sink = BlockSink::new(producer, Arc::new(AtomicU64::new(0)));

        // 100 + 100 samples: one full quantum, 72 pending
        sink.write(&[0.25; 100]);
        assert!(consumer.pop().is_err());
        sink.write(&[0.5; 100]);

        let block = consumer.pop().unwrap();
        assert_eq!(block[0], 0.25);
        assert_eq!(block[99], 0.25);
        assert_eq!(block[100], 0.5);
        assert_eq!(block[127], 0.5);
        assert!(consumer.pop().is_err());
    }

    #[test]
    fn test_block_sink_drops_when_full() {
        let (producer, mut consumer) = RingBuffer::<AudioBlock>::new(1);
        let dropped = Arc::new(AtomicU64::new(0));
        let mut sink = BlockSink::new(producer, dropped.clone());

        sink.write(&[0.1; RENDER_QUANTUM * 3]);
        assert_eq!(dropped.load(Ordering::Relaxed), 2);
        assert_eq!(consumer.pop().unwrap()[0], 0.1);
    }

    #[test]
    fn test_block_sink_keeps_first_channel() {
        let (producer, mut consumer) = RingBuffer::<AudioBlock>::new(2);
        let mut sink = BlockSink::new(producer, Arc::new(AtomicU64::new(0)));

        let stereo: Vec<f32> = (0..RENDER_QUANTUM)
            .flat_map(|_| [0.75f32, -0.75])
            .collect();
        sink.write_interleaved(&stereo, 2);

        let block = consumer.pop().unwrap();
        assert!(block.iter().all(|&s| s == 0.75));
    }

    #[test]
    fn test_default_config() {
        let config = CaptureConfig::default();
        assert_eq!(config.sample_rate, 24000);
        assert!(config.ring_capacity > 0);
        assert!(config.drain_interval_ms > 0);
    }

    #[test]
    fn test_error_display() {
        let err = CaptureError::PermissionDenied("denied".to_string());
        assert!(err.to_string().contains("permission denied"));
    }
}
