//! cpal-backed microphone and speaker.
//!
//! cpal streams are not `Send`, so each stream lives on its own OS thread
//! and is driven through a command channel. The audio callbacks never
//! block: capture pushes into the rtrb ring, playback `try_lock`s the
//! shared buffer and outputs silence when contended.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, Stream, StreamConfig};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::capture::{AudioSource, BlockSink, CaptureError, SourceControl};
use super::playback::{AudioSink, PlaybackBuffer, PlaybackError};

enum StreamCommand {
    Enable(bool),
    Stop,
}

/// Spawn a thread owning a cpal stream and wait until it is running.
fn spawn_stream_thread<E, F>(
    name: &str,
    build: F,
) -> Result<(mpsc::Sender<StreamCommand>, JoinHandle<()>), E>
where
    E: Send + 'static + From<String>,
    F: FnOnce() -> Result<Stream, E> + Send + 'static,
{
    let (ready_tx, ready_rx) = mpsc::channel::<Result<(), E>>();
    let (command_tx, command_rx) = mpsc::channel::<StreamCommand>();

    let thread = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let stream = match build() {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(E::from(e.to_string())));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            while let Ok(command) = command_rx.recv() {
                match command {
                    StreamCommand::Enable(true) => {
                        if let Err(e) = stream.play() {
                            tracing::warn!(error = %e, "Failed to resume audio stream");
                        }
                    }
                    StreamCommand::Enable(false) => {
                        if let Err(e) = stream.pause() {
                            tracing::warn!(error = %e, "Failed to pause audio stream");
                        }
                    }
                    StreamCommand::Stop => break,
                }
            }
            drop(stream);
        })
        .map_err(|e| E::from(e.to_string()))?;

    ready_rx
        .recv()
        .map_err(|_| E::from("audio thread exited during startup".to_string()))??;

    Ok((command_tx, thread))
}

// =============================================================================
// Microphone
// =============================================================================

impl From<String> for CaptureError {
    fn from(message: String) -> Self {
        CaptureError::Stream(message)
    }
}

fn map_build_error(err: cpal::BuildStreamError) -> CaptureError {
    match err {
        cpal::BuildStreamError::BackendSpecific { err }
            if err.description.to_lowercase().contains("permission") =>
        {
            CaptureError::PermissionDenied(err.description)
        }
        other => CaptureError::DeviceUnavailable(other.to_string()),
    }
}

/// Default system microphone.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalMicrophone;

impl CpalMicrophone {
    fn build_stream(sample_rate: u32, mut sink: BlockSink) -> Result<Stream, CaptureError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| CaptureError::DeviceUnavailable("no input device available".into()))?;

        let supported = device
            .supported_input_configs()
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?
            .filter(|c| {
                c.sample_format() == SampleFormat::F32
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
            .min_by_key(|c| c.channels())
            .ok_or_else(|| {
                CaptureError::DeviceUnavailable(format!(
                    "no f32 input config supports {sample_rate}Hz"
                ))
            })?;

        let config: StreamConfig = supported.with_sample_rate(SampleRate(sample_rate)).config();
        let channels = usize::from(config.channels);

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels,
            "Audio capture initialized"
        );

        device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    sink.write_interleaved(data, channels);
                },
                |err| {
                    tracing::error!(error = %err, "Audio capture error");
                },
                None,
            )
            .map_err(map_build_error)
    }
}

impl AudioSource for CpalMicrophone {
    fn open(
        &self,
        sample_rate_hint: u32,
        sink: BlockSink,
    ) -> Result<Box<dyn SourceControl>, CaptureError> {
        let (commands, thread) = spawn_stream_thread("mic-capture", move || {
            Self::build_stream(sample_rate_hint, sink)
        })?;

        Ok(Box::new(CpalSourceControl {
            commands,
            thread: Some(thread),
        }))
    }
}

struct CpalSourceControl {
    commands: mpsc::Sender<StreamCommand>,
    thread: Option<JoinHandle<()>>,
}

impl SourceControl for CpalSourceControl {
    fn set_enabled(&mut self, enabled: bool) -> Result<(), CaptureError> {
        self.commands
            .send(StreamCommand::Enable(enabled))
            .map_err(|_| CaptureError::Stream("capture thread has exited".into()))
    }

    fn stop(&mut self) {
        let _ = self.commands.send(StreamCommand::Stop);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

// =============================================================================
// Speaker
// =============================================================================

impl From<String> for PlaybackError {
    fn from(message: String) -> Self {
        PlaybackError::Device(message)
    }
}

#[derive(Default)]
struct OutputSlot {
    samples: Vec<f32>,
    position: usize,
    done: Option<oneshot::Sender<()>>,
}

/// Default system speaker.
pub struct CpalSpeaker {
    slot: Arc<Mutex<OutputSlot>>,
    commands: Mutex<Option<mpsc::Sender<StreamCommand>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl CpalSpeaker {
    /// Open the default output device at `sample_rate`.
    ///
    /// # Errors
    ///
    /// Returns [`PlaybackError::Device`] if no output config supports the rate.
    pub fn open(sample_rate: u32) -> Result<Self, PlaybackError> {
        let slot = Arc::new(Mutex::new(OutputSlot::default()));
        let callback_slot = slot.clone();

        let (commands, thread) = spawn_stream_thread("speaker-playback", move || {
            Self::build_stream(sample_rate, callback_slot)
        })?;

        Ok(Self {
            slot,
            commands: Mutex::new(Some(commands)),
            thread: Mutex::new(Some(thread)),
        })
    }

    fn build_stream(
        sample_rate: u32,
        slot: Arc<Mutex<OutputSlot>>,
    ) -> Result<Stream, PlaybackError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlaybackError::Device("no output device available".into()))?;

        let supported = device
            .supported_output_configs()
            .map_err(|e| PlaybackError::Device(e.to_string()))?
            .filter(|c| {
                c.sample_format() == SampleFormat::F32
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
            .min_by_key(|c| c.channels())
            .ok_or_else(|| {
                PlaybackError::Device(format!("no f32 output config supports {sample_rate}Hz"))
            })?;

        let config: StreamConfig = supported.with_sample_rate(SampleRate(sample_rate)).config();
        let channels = usize::from(config.channels);

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels,
            "Audio playback initialized"
        );

        device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let Some(mut slot) = slot.try_lock() else {
                        data.fill(0.0);
                        return;
                    };
                    for frame in data.chunks_mut(channels) {
                        let sample = slot.samples.get(slot.position).copied().unwrap_or(0.0);
                        if slot.position < slot.samples.len() {
                            slot.position += 1;
                        }
                        frame.fill(sample);
                    }
                    if slot.position >= slot.samples.len()
                        && let Some(done) = slot.done.take()
                    {
                        let _ = done.send(());
                    }
                },
                |err| {
                    tracing::error!(error = %err, "Audio playback error");
                },
                None,
            )
            .map_err(|e| PlaybackError::Device(e.to_string()))
    }
}

#[async_trait]
impl AudioSink for CpalSpeaker {
    async fn play(&self, buffer: PlaybackBuffer) -> Result<(), PlaybackError> {
        if self.commands.lock().is_none() {
            return Err(PlaybackError::Closed);
        }

        let (done_tx, done_rx) = oneshot::channel();
        {
            let mut slot = self.slot.lock();
            slot.samples = buffer.samples;
            slot.position = 0;
            slot.done = Some(done_tx);
        }

        done_rx.await.map_err(|_| PlaybackError::Closed)
    }

    fn stop(&self) {
        let mut slot = self.slot.lock();
        slot.samples.clear();
        slot.position = 0;
        slot.done = None;
    }

    fn close(&self) {
        if let Some(commands) = self.commands.lock().take() {
            let _ = commands.send(StreamCommand::Stop);
        }
        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
        }
    }
}

impl Drop for CpalSpeaker {
    fn drop(&mut self) {
        self.close();
    }
}
