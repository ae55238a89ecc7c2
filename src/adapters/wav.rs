//! Minimal RIFF/WAVE handling: write 16-bit mono PCM, read back the format
//! and length of whatever a backend returns.

use crate::core::errors::SynthesisError;

/// Format and length of a WAV payload
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WavInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub data_len: usize,
}

impl WavInfo {
    pub fn duration_secs(&self) -> f64 {
        let bytes_per_second =
            self.sample_rate as f64 * self.channels as f64 * (self.bits_per_sample as f64 / 8.0);
        if bytes_per_second == 0.0 {
            return 0.0;
        }
        self.data_len as f64 / bytes_per_second
    }
}

/// Encode samples as a 16-bit mono PCM WAV file
pub fn encode_pcm16_mono(samples: &[i16], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut out = Vec::with_capacity(44 + data_len as usize);

    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&1u16.to_le_bytes()); // mono
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Read the header of a WAV payload.
///
/// Streaming encoders (espeak-ng --stdout among them) write a placeholder
/// data size, so the length is capped at the bytes actually present.
pub fn parse(bytes: &[u8]) -> Result<WavInfo, SynthesisError> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(SynthesisError::InvalidAudio("not a RIFF/WAVE payload".to_string()));
    }

    let mut format: Option<(u32, u16, u16)> = None;
    let mut offset = 12;

    while offset + 8 <= bytes.len() {
        let chunk_id = &bytes[offset..offset + 4];
        let chunk_len = read_u32(bytes, offset + 4) as usize;
        let body = offset + 8;

        match chunk_id {
            b"fmt " => {
                if body + 16 > bytes.len() {
                    break;
                }
                let channels = read_u16(bytes, body + 2);
                let sample_rate = read_u32(bytes, body + 4);
                let bits = read_u16(bytes, body + 14);
                format = Some((sample_rate, channels, bits));
            }
            b"data" => {
                let (sample_rate, channels, bits_per_sample) = format.ok_or_else(|| {
                    SynthesisError::InvalidAudio("data chunk before fmt chunk".to_string())
                })?;
                let available = bytes.len() - body;
                return Ok(WavInfo {
                    sample_rate,
                    channels,
                    bits_per_sample,
                    data_len: chunk_len.min(available),
                });
            }
            _ => {}
        }

        // Chunks are word aligned
        offset = body.saturating_add(chunk_len + (chunk_len & 1));
    }

    Err(SynthesisError::InvalidAudio("missing data chunk".to_string()))
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}
