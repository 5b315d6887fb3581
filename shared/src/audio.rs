use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bytes per sample for 16-bit PCM.
pub const PCM16_SAMPLE_WIDTH: u16 = 2;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormatError {
    #[error("Unsupported sample width: {0} bytes (expected 2)")]
    UnsupportedSampleWidth(u16),

    #[error("Unsupported channel count: {0} (expected mono)")]
    UnsupportedChannels(u16),

    #[error("PCM buffer length {0} is not a whole number of 16-bit samples")]
    OddByteLength(usize),

    #[error("Sample rate must be non-zero")]
    ZeroSampleRate,
}

/// One block of captured audio, little-endian 16-bit mono PCM.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub data: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_width: u16,
    /// Milliseconds since the capture session started.
    pub timestamp_ms: u64,
}

impl AudioChunk {
    pub fn from_samples(samples: &[i16], sample_rate: u32, timestamp_ms: u64) -> Self {
        Self {
            data: samples_to_pcm16(samples),
            sample_rate,
            channels: 1,
            sample_width: PCM16_SAMPLE_WIDTH,
            timestamp_ms,
        }
    }

    pub fn validate(&self) -> Result<(), FormatError> {
        if self.sample_width != PCM16_SAMPLE_WIDTH {
            return Err(FormatError::UnsupportedSampleWidth(self.sample_width));
        }
        if self.channels != 1 {
            return Err(FormatError::UnsupportedChannels(self.channels));
        }
        if self.sample_rate == 0 {
            return Err(FormatError::ZeroSampleRate);
        }
        if self.data.len() % 2 != 0 {
            return Err(FormatError::OddByteLength(self.data.len()));
        }
        Ok(())
    }

    pub fn samples(&self) -> Vec<i16> {
        pcm16_to_samples(&self.data)
    }

    pub fn duration_ms(&self) -> u64 {
        pcm16_duration_ms(self.data.len(), self.sample_rate)
    }
}

pub fn samples_to_pcm16(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Decodes little-endian 16-bit PCM. A trailing odd byte is ignored.
pub fn pcm16_to_samples(data: &[u8]) -> Vec<i16> {
    data.chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

pub fn pcm16_duration_ms(byte_len: usize, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    let samples = (byte_len / 2) as u64;
    samples * 1000 / sample_rate as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_samples_little_endian() {
        let chunk = AudioChunk::from_samples(&[1, -2], 16000, 0);
        assert_eq!(chunk.data, vec![0x01, 0x00, 0xFE, 0xFF]);
        assert_eq!(chunk.samples(), vec![1, -2]);
    }

    #[test]
    fn test_duration_ms() {
        let chunk = AudioChunk::from_samples(&vec![0i16; 480], 16000, 0);
        assert_eq!(chunk.duration_ms(), 30);
        assert_eq!(pcm16_duration_ms(32000, 16000), 1000);
        assert_eq!(pcm16_duration_ms(100, 0), 0);
    }

    #[test]
    fn test_pcm16_to_samples_ignores_trailing_byte() {
        assert_eq!(pcm16_to_samples(&[0x10, 0x00, 0x7F]), vec![16]);
        assert!(pcm16_to_samples(&[0x01]).is_empty());
    }

    #[test]
    fn test_validate_rejects_bad_formats() {
        let mut chunk = AudioChunk::from_samples(&[0, 0], 16000, 0);
        assert!(chunk.validate().is_ok());

        chunk.sample_width = 4;
        assert_eq!(chunk.validate(), Err(FormatError::UnsupportedSampleWidth(4)));

        chunk.sample_width = 2;
        chunk.channels = 2;
        assert_eq!(chunk.validate(), Err(FormatError::UnsupportedChannels(2)));

        chunk.channels = 1;
        chunk.data.push(0);
        assert_eq!(chunk.validate(), Err(FormatError::OddByteLength(5)));

        chunk.data.pop();
        chunk.sample_rate = 0;
        assert_eq!(chunk.validate(), Err(FormatError::ZeroSampleRate));
    }

    #[test]
    fn test_format_error_display() {
        let err = FormatError::OddByteLength(3);
        assert!(err.to_string().contains("16-bit"));
    }
}
