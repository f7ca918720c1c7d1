//! LINEAR16 agent audio: WAV containers through `hound`, or headerless PCM.

use std::io::Cursor;

use hound::{SampleFormat, WavReader};

use crate::error::CodecError;

/// Interleaved 16-bit PCM with its stream parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmAudio {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl PcmAudio {
    /// Average all channels into one.
    pub fn into_mono(self) -> Vec<i16> {
        let channels = self.channels.max(1) as usize;
        if channels == 1 {
            return self.samples;
        }
        self.samples
            .chunks_exact(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / channels as i32) as i16
            })
            .collect()
    }
}

pub fn is_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

/// Read a WAV container at any integer or float sample format, converted
/// to 16-bit PCM at the header's rate and channel count.
///
/// Reading stops at the first unreadable sample, so a `data` size larger
/// than the buffer (as written by streaming encoders) yields what is present.
pub fn parse_wav(bytes: &[u8]) -> Result<PcmAudio, CodecError> {
    let mut reader =
        WavReader::new(Cursor::new(bytes)).map_err(|e| CodecError::MalformedWav(e.to_string()))?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(CodecError::InvalidSampleRate(0));
    }
    if spec.channels == 0 {
        return Err(CodecError::MalformedWav("zero channels".into()));
    }

    let samples: Vec<i16> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .map_while(Result::ok)
            .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            .collect(),
        SampleFormat::Int => {
            let bits = spec.bits_per_sample;
            if bits == 0 || bits > 32 {
                return Err(CodecError::UnsupportedFormat {
                    format: 1,
                    bits,
                });
            }
            reader
                .samples::<i32>()
                .map_while(Result::ok)
                .map(|s| to_i16(s, bits))
                .collect()
        }
    };

    Ok(PcmAudio {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        samples,
    })
}

/// Scale a signed integer sample of `bits` width to 16 bits.
fn to_i16(sample: i32, bits: u16) -> i16 {
    if bits >= 16 {
        (sample >> (bits - 16)) as i16
    } else {
        (sample << (16 - bits)) as i16
    }
}

/// Decode a LINEAR16 buffer: a WAV container when one is present, otherwise
/// headerless mono little-endian PCM at `fallback_rate`.
pub fn decode_linear16(bytes: &[u8], fallback_rate: u32) -> Result<PcmAudio, CodecError> {
    if is_wav(bytes) {
        return parse_wav(bytes);
    }
    if fallback_rate == 0 {
        return Err(CodecError::InvalidSampleRate(0));
    }
    // A trailing odd byte is ignored.
    let samples = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Ok(PcmAudio {
        sample_rate: fallback_rate,
        channels: 1,
        samples,
    })
}

/// WAV fixtures for tests.
#[cfg(test)]
pub(crate) fn write_wav<S: hound::Sample + Copy>(samples: &[S], spec: hound::WavSpec) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
    for &s in samples {
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
    cursor.into_inner()
}

#[cfg(test)]
pub(crate) fn pcm16_spec(sample_rate: u32, channels: u16) -> hound::WavSpec {
    hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pcm16_stereo() {
        let pcm = vec![1i16, -2, 300, -400];
        let audio = parse_wav(&write_wav(&pcm, pcm16_spec(24000, 2))).unwrap();
        assert_eq!(audio.sample_rate, 24000);
        assert_eq!(audio.channels, 2);
        assert_eq!(audio.samples, pcm);
    }

    #[test]
    fn test_parse_8_bit_pcm() {
        let spec = hound::WavSpec {
            bits_per_sample: 8,
            ..pcm16_spec(16000, 1)
        };
        let wav = write_wav(&[0i8, 64, -64, 127], spec);
        let audio = parse_wav(&wav).unwrap();
        assert_eq!(audio.sample_rate, 16000);
        assert_eq!(audio.samples, vec![0, 64 << 8, -64 << 8, 127 << 8]);
    }

    #[test]
    fn test_parse_24_bit_pcm() {
        let spec = hound::WavSpec {
            bits_per_sample: 24,
            ..pcm16_spec(16000, 1)
        };
        let wav = write_wav(&[0i32, 0x10_0000, -0x10_0000], spec);
        assert_eq!(parse_wav(&wav).unwrap().samples, vec![0, 0x1000, -0x1000]);
    }

    #[test]
    fn test_parse_float_wav() {
        let spec = hound::WavSpec {
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
            ..pcm16_spec(22050, 1)
        };
        let wav = write_wav(&[0.0f32, 1.0, -1.0, 2.0], spec);
        let audio = parse_wav(&wav).unwrap();
        assert_eq!(audio.sample_rate, 22050);
        assert_eq!(audio.samples, vec![0, i16::MAX, -i16::MAX, i16::MAX]);
    }

    #[test]
    fn test_truncated_data_yields_present_samples() {
        let wav = write_wav(&[5i16, 6, 7], pcm16_spec(16000, 1));
        let audio = parse_wav(&wav[..wav.len() - 2]).unwrap();
        assert_eq!(audio.samples, vec![5, 6]);
    }

    #[test]
    fn test_garbage_container_is_malformed() {
        let bytes = b"RIFF\x04\x00\x00\x00WAVEjunk";
        assert!(matches!(parse_wav(bytes), Err(CodecError::MalformedWav(_))));
    }

    #[test]
    fn test_headerless_uses_fallback_rate() {
        let audio = decode_linear16(&[0x01, 0x00, 0xff, 0xff, 0x09], 16000).unwrap();
        assert_eq!(audio.sample_rate, 16000);
        assert_eq!(audio.samples, vec![1, -1]);
    }

    #[test]
    fn test_into_mono_averages_channels() {
        let audio = PcmAudio {
            sample_rate: 8000,
            channels: 2,
            samples: vec![100, 300, -100, -300],
        };
        assert_eq!(audio.into_mono(), vec![200, -200]);
    }
}
