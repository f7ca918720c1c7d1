//! Linear-interpolation resampling of 16-bit PCM.

use crate::error::CodecError;

/// Resample mono PCM from `from_rate` to `to_rate`.
///
/// The output holds `ceil(len * to_rate / from_rate)` samples. Each output
/// sample interpolates between the two nearest source samples; the tail
/// repeats the last source sample.
pub fn resample_linear(samples: &[i16], from_rate: u32, to_rate: u32) -> Result<Vec<i16>, CodecError> {
    if from_rate == 0 {
        return Err(CodecError::InvalidSampleRate(from_rate));
    }
    if to_rate == 0 {
        return Err(CodecError::InvalidSampleRate(to_rate));
    }
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let output_len = output_len(samples.len(), from_rate, to_rate);
    let step = from_rate as f64 / to_rate as f64;
    let last = samples.len() - 1;

    let mut output = Vec::with_capacity(output_len);
    for i in 0..output_len {
        let src_pos = i as f64 * step;
        let src_idx = (src_pos.floor() as usize).min(last);
        let frac = src_pos - src_idx as f64;

        let sample = if src_idx < last {
            let a = samples[src_idx] as f64;
            let b = samples[src_idx + 1] as f64;
            a + (b - a) * frac
        } else {
            samples[last] as f64
        };
        output.push(sample.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16);
    }

    Ok(output)
}

/// Number of samples produced for `len` input samples.
pub fn output_len(len: usize, from_rate: u32, to_rate: u32) -> usize {
    (len as u64 * to_rate as u64).div_ceil(from_rate as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downsample_length() {
        let input = vec![0i16; 16000];
        let out = resample_linear(&input, 16000, 8000).unwrap();
        assert_eq!(out.len(), 8000);

        let input = vec![0i16; 441];
        let out = resample_linear(&input, 44100, 8000).unwrap();
        assert_eq!(out.len(), 80);

        // ceil(3 * 8000 / 24000) = 1
        let out = resample_linear(&[1, 2, 3], 24000, 8000).unwrap();
        assert_eq!(out, vec![1]);
    }

    #[test]
    fn test_same_rate_is_identity() {
        let input = vec![1i16, -2, 3];
        assert_eq!(resample_linear(&input, 8000, 8000).unwrap(), input);
    }

    #[test]
    fn test_upsample_interpolates() {
        let out = resample_linear(&[0, 100], 8000, 16000).unwrap();
        assert_eq!(out, vec![0, 50, 100, 100]);
    }

    #[test]
    fn test_zero_rate_rejected() {
        assert_eq!(
            resample_linear(&[1], 0, 8000),
            Err(CodecError::InvalidSampleRate(0))
        );
        assert!(resample_linear(&[1], 8000, 0).is_err());
    }

    #[test]
    fn test_empty_input() {
        assert!(resample_linear(&[], 16000, 8000).unwrap().is_empty());
    }
}
