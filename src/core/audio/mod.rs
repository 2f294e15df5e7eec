//! Local audio I/O.
//!
//! - [`capture`]: microphone -> fixed render quanta -> PCM16 blocks
//! - [`playback`]: base64 PCM16 deltas -> FIFO -> speaker
//! - [`pcm`]: sample conversion shared by both directions
//! - `device`: cpal backends (feature `device-audio`)

pub mod capture;
#[cfg(feature = "device-audio")]
pub mod device;
pub mod pcm;
pub mod playback;

pub use capture::{
    AudioBlock, AudioBlockCallback, AudioSource, BlockSink, CaptureConfig, CaptureError,
    CapturePipeline, MicrophoneStream, SourceControl,
};
#[cfg(feature = "device-audio")]
pub use device::{CpalMicrophone, CpalSpeaker};
pub use pcm::{
    DEFAULT_CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE, PcmError, RENDER_QUANTUM, decode_pcm16,
    encode_block, float_to_pcm16, pcm16_to_float,
};
pub use playback::{AudioPlayer, AudioSink, PlaybackBuffer, PlaybackError, PlaybackQueue};
