//! Capture and playback pipeline tests
//!
//! Both directions run against in-memory backends: the microphone is a
//! source whose render end is driven by the test, and the speaker is a
//! sink that records what it was asked to play.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::*;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio::time::{sleep, timeout};

use voice_intake::core::audio::{
    AudioBlockCallback, AudioPlayer, AudioSink, AudioSource, BlockSink, CaptureConfig,
    CaptureError, CapturePipeline, PlaybackBuffer, PlaybackError, RENDER_QUANTUM, SourceControl,
    float_to_pcm16, pcm16_to_float,
};

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Capture doubles
// =============================================================================

#[derive(Default)]
struct SourceState {
    sink: Mutex<Option<BlockSink>>,
    enabled: Mutex<Vec<bool>>,
    stops: AtomicUsize,
    opened_at: Mutex<Option<u32>>,
}

/// Microphone whose audio thread is the test itself.
#[derive(Clone, Default)]
struct ScriptedSource {
    state: Arc<SourceState>,
    refuse: bool,
}

impl ScriptedSource {
    fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    fn speak(&self, samples: &[f32]) {
        if let Some(sink) = self.state.sink.lock().as_mut() {
            sink.write(samples);
        }
    }
}

struct ScriptedControl {
    state: Arc<SourceState>,
}

impl SourceControl for ScriptedControl {
    fn set_enabled(&mut self, enabled: bool) -> Result<(), CaptureError> {
        self.state.enabled.lock().push(enabled);
        Ok(())
    }

    fn stop(&mut self) {
        self.state.stops.fetch_add(1, Ordering::SeqCst);
        self.state.sink.lock().take();
    }
}

impl AudioSource for ScriptedSource {
    fn open(
        &self,
        sample_rate_hint: u32,
        sink: BlockSink,
    ) -> Result<Box<dyn SourceControl>, CaptureError> {
        if self.refuse {
            return Err(CaptureError::PermissionDenied("user declined".to_string()));
        }
        *self.state.opened_at.lock() = Some(sample_rate_hint);
        *self.state.sink.lock() = Some(sink);
        Ok(Box::new(ScriptedControl {
            state: self.state.clone(),
        }))
    }
}

fn block_channel() -> (AudioBlockCallback, mpsc::UnboundedReceiver<Bytes>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: AudioBlockCallback = Arc::new(move |block: Bytes| {
        let _ = tx.send(block);
        Box::pin(async {}) as Pin<Box<dyn Future<Output = ()> + Send>>
    });
    (callback, rx)
}

async fn next_block(rx: &mut mpsc::UnboundedReceiver<Bytes>) -> Bytes {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for audio block")
        .expect("block channel closed")
}

fn first_sample(block: &Bytes) -> i16 {
    i16::from_le_bytes([block[0], block[1]])
}

// =============================================================================
// Playback doubles
// =============================================================================

/// Speaker that takes a fixed time per buffer and tracks overlap.
#[derive(Default)]
struct TimedSink {
    played: Mutex<Vec<f32>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    stops: AtomicUsize,
    closes: AtomicUsize,
    closed: AtomicBool,
}

#[async_trait]
impl AudioSink for TimedSink {
    async fn play(&self, buffer: PlaybackBuffer) -> Result<(), PlaybackError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PlaybackError::Closed);
        }
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        sleep(Duration::from_millis(15)).await;

        self.played.lock().push(buffer.samples[0]);
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Speaker whose `stop` fails the buffer in flight, like a device that
/// drops its completion signal.
#[derive(Default)]
struct AbortingSink {
    halt: Notify,
    started: AtomicUsize,
    stops: AtomicUsize,
}

#[async_trait]
impl AudioSink for AbortingSink {
    async fn play(&self, _buffer: PlaybackBuffer) -> Result<(), PlaybackError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.halt.notified().await;
        Err(PlaybackError::Closed)
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.halt.notify_waiters();
    }

    fn close(&self) {}
}

fn buffer(marker: f32) -> PlaybackBuffer {
    PlaybackBuffer {
        samples: vec![marker; 8],
        sample_rate: 24000,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// =============================================================================
// Capture
// =============================================================================

#[tokio::test]
async fn test_capture_delivers_pcm16_blocks() {
    let source = ScriptedSource::default();
    let (callback, mut blocks) = block_channel();
    let config = CaptureConfig {
        sample_rate: 16000,
        ..CaptureConfig::default()
    };

    let microphone = CapturePipeline::start(&source, &config, callback).unwrap();
    assert_eq!(*source.state.opened_at.lock(), Some(16000));
    assert_eq!(microphone.sample_rate(), 16000);

    // One and a half quanta: only the full one is delivered
    source.speak(&vec![0.5; RENDER_QUANTUM + RENDER_QUANTUM / 2]);

    let block = next_block(&mut blocks).await;
    assert_eq!(block.len(), RENDER_QUANTUM * 2);
    assert_eq!(first_sample(&block), float_to_pcm16(0.5));

    sleep(Duration::from_millis(30)).await;
    assert!(blocks.try_recv().is_err());

    microphone.dispose();
}

#[tokio::test]
async fn test_capture_mute_drops_without_replay() {
    let source = ScriptedSource::default();
    let (callback, mut blocks) = block_channel();
    let microphone =
        CapturePipeline::start(&source, &CaptureConfig::default(), callback).unwrap();

    microphone.set_mute(true);
    // Idempotent
    microphone.set_mute(true);
    assert!(microphone.is_muted());

    source.speak(&[0.25; RENDER_QUANTUM * 2]);
    sleep(Duration::from_millis(40)).await;
    assert!(blocks.try_recv().is_err());

    microphone.set_mute(false);
    assert!(!microphone.is_muted());
    source.speak(&[-0.5; RENDER_QUANTUM]);

    let block = next_block(&mut blocks).await;
    assert_eq!(first_sample(&block), float_to_pcm16(-0.5));

    sleep(Duration::from_millis(30)).await;
    assert!(blocks.try_recv().is_err(), "muted audio was replayed");

    assert_eq!(*source.state.enabled.lock(), vec![false, false, true]);
}

#[tokio::test]
async fn test_capture_full_ring_drops_blocks() {
    let source = ScriptedSource::default();
    let (callback, mut blocks) = block_channel();
    let config = CaptureConfig {
        ring_capacity: 1,
        ..CaptureConfig::default()
    };

    let microphone = CapturePipeline::start(&source, &config, callback).unwrap();

    // The drain task has not run yet on this single-threaded runtime
    source.speak(&[0.1; RENDER_QUANTUM * 3]);
    assert_eq!(microphone.dropped_blocks(), 2);

    let block = next_block(&mut blocks).await;
    assert_eq!(first_sample(&block), float_to_pcm16(0.1));
}

#[tokio::test]
async fn test_capture_dispose_is_idempotent() {
    let source = ScriptedSource::default();
    let (callback, mut blocks) = block_channel();
    let microphone =
        CapturePipeline::start(&source, &CaptureConfig::default(), callback).unwrap();
    assert!(!microphone.is_disposed());

    microphone.dispose();
    microphone.dispose();

    assert!(microphone.is_disposed());
    assert_eq!(source.state.stops.load(Ordering::SeqCst), 1);

    // Device is gone and the drain task stopped
    source.speak(&[0.3; RENDER_QUANTUM]);
    sleep(Duration::from_millis(30)).await;
    assert!(blocks.try_recv().is_err());

    // Mute after dispose is a no-op on the hardware
    microphone.set_mute(true);
    assert!(source.state.enabled.lock().is_empty());
}

#[tokio::test]
async fn test_capture_permission_denied() {
    let source = ScriptedSource::refusing();
    let (callback, _blocks) = block_channel();

    let result = CapturePipeline::start(&source, &CaptureConfig::default(), callback);
    assert!(matches!(result, Err(CaptureError::PermissionDenied(_))));
}

// =============================================================================
// Playback
// =============================================================================

#[tokio::test]
async fn test_playback_fifo_without_overlap() {
    let sink = Arc::new(TimedSink::default());
    let player = AudioPlayer::new(sink.clone(), 24000);

    for marker in [0.1, 0.2, 0.3, 0.4, 0.5] {
        player.enqueue(buffer(marker));
    }

    wait_until(|| sink.played.lock().len() == 5).await;
    wait_until(|| !player.is_playing()).await;

    assert_eq!(*sink.played.lock(), vec![0.1, 0.2, 0.3, 0.4, 0.5]);
    assert_eq!(sink.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(player.queued(), 0);
}

#[tokio::test]
async fn test_playback_resumes_after_idle() {
    let sink = Arc::new(TimedSink::default());
    let player = AudioPlayer::new(sink.clone(), 24000);

    player.enqueue(buffer(0.1));
    wait_until(|| sink.played.lock().len() == 1).await;
    wait_until(|| !player.is_playing()).await;

    player.enqueue(buffer(0.2));
    wait_until(|| sink.played.lock().len() == 2).await;
    assert_eq!(*sink.played.lock(), vec![0.1, 0.2]);
}

#[tokio::test]
async fn test_playback_clear_before_start() {
    let sink = Arc::new(TimedSink::default());
    let player = AudioPlayer::new(sink.clone(), 24000);

    // No await in between, so the driver never saw these
    player.enqueue(buffer(0.1));
    player.enqueue(buffer(0.2));
    player.enqueue(buffer(0.3));
    assert_eq!(player.queued(), 3);

    player.clear();
    assert_eq!(player.queued(), 0);
    assert!(!player.is_playing());

    sleep(Duration::from_millis(50)).await;
    assert!(sink.played.lock().is_empty());

    // New audio after a barge-in plays normally
    player.enqueue(buffer(0.9));
    wait_until(|| sink.played.lock().len() == 1).await;
    assert_eq!(*sink.played.lock(), vec![0.9]);
}

#[tokio::test]
async fn test_playback_clear_mid_buffer() {
    let sink = Arc::new(TimedSink::default());
    let player = AudioPlayer::new(sink.clone(), 24000);

    player.enqueue(buffer(0.1));
    player.enqueue(buffer(0.2));
    player.enqueue(buffer(0.3));
    wait_until(|| sink.active.load(Ordering::SeqCst) == 1).await;

    player.clear();
    assert!(sink.stops.load(Ordering::SeqCst) >= 1);

    sleep(Duration::from_millis(60)).await;
    // The interrupted buffer never completed
    assert!(sink.played.lock().is_empty());
    assert!(!player.is_playing());
}

#[tokio::test]
async fn test_playback_clear_takes_cancel_path_when_sink_fails() {
    let sink = Arc::new(AbortingSink::default());
    let player = AudioPlayer::new(sink.clone(), 24000);

    player.enqueue(buffer(0.1));
    player.enqueue(buffer(0.2));
    wait_until(|| sink.started.load(Ordering::SeqCst) == 1).await;

    // stop() resolves the in-flight play with an error at the same time
    // as the cancellation; the driver must treat it as a cancel
    player.clear();
    wait_until(|| sink.stops.load(Ordering::SeqCst) == 2).await;

    sleep(Duration::from_millis(30)).await;
    assert_eq!(sink.stops.load(Ordering::SeqCst), 2);
    assert_eq!(sink.started.load(Ordering::SeqCst), 1);
    assert!(!player.is_playing());
}

#[tokio::test]
async fn test_playback_enqueue_base64() {
    let sink = Arc::new(TimedSink::default());
    let player = AudioPlayer::new(sink.clone(), 24000);

    assert!(player.enqueue_base64("%%%").is_err());
    assert!(player.enqueue_base64(&BASE64_STANDARD.encode([1u8, 2, 3])).is_err());
    assert_eq!(player.queued(), 0);

    player
        .enqueue_base64(&BASE64_STANDARD.encode([0x00u8, 0x40]))
        .unwrap();
    wait_until(|| sink.played.lock().len() == 1).await;
    assert_eq!(sink.played.lock()[0], pcm16_to_float(0x4000));
}

#[tokio::test]
async fn test_playback_close_is_idempotent() {
    let sink = Arc::new(TimedSink::default());
    let player = AudioPlayer::new(sink.clone(), 24000);

    player.close();
    player.close();
    assert_eq!(sink.closes.load(Ordering::SeqCst), 1);

    player.enqueue(buffer(0.1));
    assert_eq!(player.queued(), 0);

    drop(player);
    assert_eq!(sink.closes.load(Ordering::SeqCst), 1);
}
