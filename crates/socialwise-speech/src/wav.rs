//! Raw PCM to RIFF/WAVE packaging, and WAV input decoding.

use std::io::Cursor;

use hound::{SampleFormat, WavReader, WavSpec};

use crate::error::{Result, SpeechError};

const HEADER_LEN: usize = 44;

/// Wrap raw little-endian PCM in a canonical 44-byte WAV header.
///
/// The payload is copied unmodified after the header.
pub fn wrap(raw: &[u8], channels: u16, bits_per_sample: u16, sample_rate: u32) -> Result<Vec<u8>> {
    if channels == 0 {
        return Err(SpeechError::Configuration("channel count must be non-zero".into()));
    }
    if sample_rate == 0 {
        return Err(SpeechError::Configuration("sample rate must be non-zero".into()));
    }
    if bits_per_sample == 0 || bits_per_sample % 8 != 0 {
        return Err(SpeechError::Configuration(format!(
            "unsupported bits per sample: {bits_per_sample}"
        )));
    }

    let block_align = u32::from(channels) * u32::from(bits_per_sample / 8);
    if raw.len() as u64 % u64::from(block_align) != 0 {
        return Err(SpeechError::InvalidInput(format!(
            "PCM payload of {} bytes is not a whole number of {block_align}-byte sample frames",
            raw.len()
        )));
    }
    let data_len = u32::try_from(raw.len())
        .ok()
        .filter(|len| len.checked_add(36).is_some())
        .ok_or_else(|| SpeechError::InvalidInput("PCM payload exceeds the WAV size limit".into()))?;
    let block_align = u16::try_from(block_align)
        .map_err(|_| SpeechError::Configuration("sample frame too wide for WAV".into()))?;
    let byte_rate = sample_rate
        .checked_mul(u32::from(block_align))
        .ok_or_else(|| SpeechError::Configuration("byte rate overflows WAV header".into()))?;

    let mut wav = Vec::with_capacity(HEADER_LEN + raw.len());

    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&bits_per_sample.to_le_bytes());

    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.extend_from_slice(raw);

    Ok(wav)
}

/// Wrap mono 16-bit PCM, the format both speech endpoints use.
pub fn wrap_l16_mono(raw: &[u8], sample_rate: u32) -> Result<Vec<u8>> {
    wrap(raw, 1, 16, sample_rate)
}

/// Decode a 16-bit integer PCM WAV into its format and raw little-endian bytes.
pub fn read_wav(bytes: &[u8]) -> Result<(WavSpec, Vec<u8>)> {
    let reader = WavReader::new(Cursor::new(bytes))
        .map_err(|e| SpeechError::InvalidInput(format!("failed to parse WAV data: {e}")))?;
    let spec = reader.spec();
    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(SpeechError::InvalidInput(format!(
            "expected 16-bit integer PCM, got {}-bit {:?}",
            spec.bits_per_sample, spec.sample_format
        )));
    }

    let mut raw = Vec::with_capacity(reader.len() as usize * 2);
    for sample in reader.into_samples::<i16>() {
        let sample = sample
            .map_err(|e| SpeechError::InvalidInput(format!("failed to read WAV samples: {e}")))?;
        raw.extend_from_slice(&sample.to_le_bytes());
    }
    Ok((spec, raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_round_trip_through_hound() {
        let raw = pcm(&[0, 1, -1, i16::MAX, i16::MIN, 1234]);
        let wav = wrap(&raw, 1, 16, 16_000).unwrap();
        assert_eq!(wav.len(), HEADER_LEN + raw.len());

        let mut reader = WavReader::new(Cursor::new(&wav)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_rate, 16_000);
        assert_eq!(spec.sample_format, SampleFormat::Int);

        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(pcm(&samples), raw);
    }

    #[test]
    fn test_read_wav_recovers_payload() {
        let raw = pcm(&[5, -5, 300, -300]);
        let wav = wrap(&raw, 2, 16, 8_000).unwrap();
        let (spec, decoded) = read_wav(&wav).unwrap();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 8_000);
        assert_eq!(decoded, raw);
    }

    #[test]
    fn test_header_fields() {
        let wav = wrap(&[0u8; 8], 2, 16, 44_100).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(wav[4..8].try_into().unwrap()), 44);
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(u32::from_le_bytes(wav[28..32].try_into().unwrap()), 44_100 * 4);
        assert_eq!(u16::from_le_bytes(wav[32..34].try_into().unwrap()), 4);
        assert_eq!(&wav[36..40], b"data");
        assert_eq!(u32::from_le_bytes(wav[40..44].try_into().unwrap()), 8);
    }

    #[test]
    fn test_empty_payload_is_valid() {
        let wav = wrap_l16_mono(&[], 16_000).unwrap();
        let (spec, decoded) = read_wav(&wav).unwrap();
        assert_eq!(spec.sample_rate, 16_000);
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_rejects_bad_parameters() {
        assert!(matches!(wrap(&[], 0, 16, 16_000), Err(SpeechError::Configuration(_))));
        assert!(matches!(wrap(&[], 1, 12, 16_000), Err(SpeechError::Configuration(_))));
        assert!(matches!(wrap(&[], 1, 16, 0), Err(SpeechError::Configuration(_))));
        assert!(matches!(wrap(&[1, 2, 3], 1, 16, 16_000), Err(SpeechError::InvalidInput(_))));
    }

    #[test]
    fn test_read_wav_rejects_garbage() {
        assert!(matches!(read_wav(b"not a wav"), Err(SpeechError::InvalidInput(_))));
    }
}
