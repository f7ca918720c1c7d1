use thiserror::Error;

use voxbridge_core::error::VoxBridgeError;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("invalid sample rate: {0} Hz")]
    InvalidSampleRate(u32),

    #[error("malformed WAV container: {0}")]
    MalformedWav(String),

    #[error("unsupported WAV format: tag {format}, {bits} bits per sample")]
    UnsupportedFormat { format: u16, bits: u16 },
}

impl From<CodecError> for VoxBridgeError {
    fn from(err: CodecError) -> Self {
        VoxBridgeError::Codec(err.to_string())
    }
}
