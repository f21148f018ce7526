pub mod error;
pub mod ffmpeg;

pub use error::TranscodeError;
pub use ffmpeg::{
    DeliveryPolicy, Progress, ProgressLayout, ProgressPayload, RunEvents, RunOutcome,
    TranscodeRequest, Transcoder, TranscoderConfig,
};
