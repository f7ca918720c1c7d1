//! The two one-way transforms between the telephony leg and the agent.

use bytes::Bytes;
use tracing::debug;

use crate::TELEPHONY_SAMPLE_RATE;
use crate::error::CodecError;
use crate::g711::encode_ulaw;
use crate::resample::resample_linear;
use crate::wav::decode_linear16;

/// Converts caller audio for the agent and agent audio for the caller.
#[derive(Debug, Clone, Copy)]
pub struct Transcoder {
    /// Rate assumed for agent audio that arrives without a WAV header.
    fallback_rate: u32,
}

impl Transcoder {
    pub fn new(fallback_rate: u32) -> Self {
        Self { fallback_rate }
    }

    /// Caller µ-law passes through unchanged; the agent is configured to
    /// accept 8 kHz µ-law directly. Empty chunks are suppressed.
    pub fn upstream(&self, chunk: Bytes) -> Option<Bytes> {
        (!chunk.is_empty()).then_some(chunk)
    }

    /// Agent LINEAR16 audio (WAV or headerless) to 8 kHz µ-law.
    ///
    /// Returns `Ok(None)` when there is nothing to play, so callers never
    /// emit a zero-length media frame.
    pub fn downstream(&self, audio: &[u8]) -> Result<Option<Vec<u8>>, CodecError> {
        if audio.is_empty() {
            return Ok(None);
        }

        let pcm = decode_linear16(audio, self.fallback_rate)?;
        let source_rate = pcm.sample_rate;
        let mono = pcm.into_mono();
        if mono.is_empty() {
            return Ok(None);
        }

        let resampled = resample_linear(&mono, source_rate, TELEPHONY_SAMPLE_RATE)?;
        let ulaw = encode_ulaw(&resampled);
        debug!(
            source_rate,
            in_samples = mono.len(),
            out_bytes = ulaw.len(),
            "Transcoded agent audio"
        );
        Ok(Some(ulaw))
    }
}
