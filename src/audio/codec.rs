//! # Sample Codec
//!
//! Pure functions that move 16-bit mono PCM between the telephony leg (8kHz SLIN)
//! and the runner leg (16kHz and up), plus the AudioSocket SLIN wrapper.
//!
//! ## Audio Format:
//! - **Encoding**: signed 16-bit, little-endian
//! - **Channels**: mono
//! - **Alignment**: buffers are always an even number of bytes

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{BridgeError, BridgeResult};

/// Native sample rate of the telephony leg.
pub const TELEPHONY_SAMPLE_RATE: u32 = 8000;

/// AudioSocket message kind for signed linear audio.
pub const KIND_SLIN: u8 = 0x10;

/// Reduce `pcm` recorded at `input_rate_hz` to 8kHz by keeping the first sample
/// of every `input_rate_hz / 8000` window.
///
/// ## Returns:
/// - the input unchanged when it is already 8kHz
/// - `UnsupportedRate` when the ratio is not an integer
/// - `InvalidPcm` when the buffer is not 16-bit aligned
pub fn downsample(input_rate_hz: u32, pcm: &[u8]) -> BridgeResult<Vec<u8>> {
    if input_rate_hz == TELEPHONY_SAMPLE_RATE {
        return Ok(pcm.to_vec());
    }

    if input_rate_hz == 0 || input_rate_hz % TELEPHONY_SAMPLE_RATE != 0 {
        return Err(BridgeError::UnsupportedRate(input_rate_hz));
    }

    if pcm.len() % 2 != 0 {
        return Err(BridgeError::InvalidPcm(pcm.len()));
    }

    let ratio = (input_rate_hz / TELEPHONY_SAMPLE_RATE) as usize;
    let mut res = Vec::with_capacity(pcm.len() / ratio + 2);
    for sample in pcm.chunks_exact(2).step_by(ratio) {
        res.extend_from_slice(sample);
    }

    Ok(res)
}

/// Double the sample rate of 8kHz PCM with linear interpolation.
///
/// Each original sample is followed by the mean of itself and its successor.
/// The last sample has no successor and is emitted alone, so `n` samples
/// become `2n - 1`. A trailing odd byte is ignored.
pub fn upsample_8k_to_16k(pcm: &[u8]) -> Vec<u8> {
    let samples: Vec<i16> = pcm.chunks_exact(2).map(LittleEndian::read_i16).collect();
    if samples.is_empty() {
        return Vec::new();
    }

    let mut res = Vec::with_capacity(samples.len() * 4);
    for pair in samples.windows(2) {
        let mid = ((pair[0] as i32 + pair[1] as i32) / 2) as i16;
        res.extend_from_slice(&pair[0].to_le_bytes());
        res.extend_from_slice(&mid.to_le_bytes());
    }
    if let Some(last) = samples.last() {
        res.extend_from_slice(&last.to_le_bytes());
    }

    res
}

/// Wrap PCM into one AudioSocket SLIN message: `[0x10][u16 BE length][data]`.
pub fn wrap_pcm16(data: &[u8]) -> BridgeResult<Vec<u8>> {
    if data.len() % 2 != 0 {
        return Err(BridgeError::InvalidPcm(data.len()));
    }

    let len = u16::try_from(data.len()).map_err(|_| {
        BridgeError::Protocol(format!("PCM fragment too large for one message: {} bytes", data.len()))
    })?;

    let mut res = Vec::with_capacity(3 + data.len());
    res.push(KIND_SLIN);
    res.extend_from_slice(&len.to_be_bytes());
    res.extend_from_slice(data);
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn samples(pcm: &[u8]) -> Vec<i16> {
        pcm.chunks_exact(2).map(LittleEndian::read_i16).collect()
    }

    #[test]
    fn test_downsample_passthrough_at_8k() {
        let data = pcm(&[1, 2, 3]);
        assert_eq!(downsample(8000, &data).unwrap(), data);
    }

    #[test]
    fn test_downsample_keeps_first_of_each_window() {
        let data = pcm(&[10, 11, 20, 21, 30, 31, 40, 41]);
        assert_eq!(samples(&downsample(16000, &data).unwrap()), vec![10, 20, 30, 40]);

        let data = pcm(&[10, 11, 12, 20, 21, 22, 30, 31, 32]);
        assert_eq!(samples(&downsample(24000, &data).unwrap()), vec![10, 20, 30]);

        let data = pcm(&[-5, 1, 2, 3, 4, 5, -6, 7, 8, 9, 10, 11]);
        assert_eq!(samples(&downsample(48000, &data).unwrap()), vec![-5, -6]);
    }

    #[test]
    fn test_downsample_preserves_byte_order() {
        let data = vec![0x34, 0x12, 0xff, 0xff];
        assert_eq!(downsample(16000, &data).unwrap(), vec![0x34, 0x12]);
    }

    #[test]
    fn test_downsample_rejects_non_integer_ratio() {
        let data = pcm(&[1, 2, 3, 4]);
        assert!(matches!(downsample(11025, &data), Err(BridgeError::UnsupportedRate(11025))));
        assert!(matches!(downsample(22050, &data), Err(BridgeError::UnsupportedRate(22050))));
        assert!(matches!(downsample(0, &data), Err(BridgeError::UnsupportedRate(0))));
    }

    #[test]
    fn test_downsample_rejects_odd_length() {
        assert!(matches!(downsample(16000, &[1, 2, 3]), Err(BridgeError::InvalidPcm(3))));
    }

    #[test]
    fn test_upsample_even_sample_count() {
        let out = upsample_8k_to_16k(&pcm(&[1000, 2000, 3000, 4000]));
        assert_eq!(samples(&out), vec![1000, 1500, 2000, 2500, 3000, 3500, 4000]);
    }

    #[test]
    fn test_upsample_odd_sample_count() {
        let out = upsample_8k_to_16k(&pcm(&[1000, 2000, 3000]));
        assert_eq!(samples(&out), vec![1000, 1500, 2000, 2500, 3000]);
    }

    #[test]
    fn test_upsample_extremes_do_not_overflow() {
        let out = upsample_8k_to_16k(&pcm(&[i16::MAX, i16::MAX, i16::MIN]));
        assert_eq!(samples(&out), vec![i16::MAX, i16::MAX, i16::MAX, 0, i16::MIN]);
    }

    #[test]
    fn test_upsample_writes_little_endian() {
        // 0x1234 and 0x1434 average to 0x1334
        let out = upsample_8k_to_16k(&[0x34, 0x12, 0x34, 0x14, 0xff]);
        assert_eq!(out, vec![0x34, 0x12, 0x34, 0x13, 0x34, 0x14]);
    }

    #[test]
    fn test_upsample_short_inputs() {
        assert!(upsample_8k_to_16k(&[]).is_empty());
        assert_eq!(samples(&upsample_8k_to_16k(&pcm(&[7]))), vec![7]);
    }

    #[test]
    fn test_wrap_pcm16() {
        let data = vec![0u8; 320];
        let wrapped = wrap_pcm16(&data).unwrap();
        assert_eq!(&wrapped[..3], &[0x10, 0x01, 0x40]);
        assert_eq!(wrapped.len(), 323);

        assert_eq!(wrap_pcm16(&[0xaa, 0xbb]).unwrap(), vec![0x10, 0x00, 0x02, 0xaa, 0xbb]);
    }

    #[test]
    fn test_wrap_pcm16_rejects_odd_length() {
        assert!(matches!(wrap_pcm16(&[1, 2, 3]), Err(BridgeError::InvalidPcm(3))));
    }
}
