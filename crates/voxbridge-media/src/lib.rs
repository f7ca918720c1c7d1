//! Audio codec transcoder: G.711 µ-law companding, resampling, WAV containers.

pub mod error;
pub mod g711;
pub mod resample;
pub mod transcoder;
pub mod wav;

pub use error::CodecError;
pub use transcoder::Transcoder;

/// Sample rate of the telephony leg.
pub const TELEPHONY_SAMPLE_RATE: u32 = 8000;
