pub mod audio;
pub mod realtime;
pub mod record;

pub use audio::{AudioPlayer, CapturePipeline, MicrophoneStream};
pub use realtime::{ConnectionState, RealtimeError, RealtimeResult, RealtimeSession};
pub use record::{TyreCondition, TyreSet, VehicleRecord};
