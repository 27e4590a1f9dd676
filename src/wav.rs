//! Fixed-layout PCM WAV container reader and writer
//!
//! Recordings are expected to carry the canonical 44-byte RIFF header
//! (`RIFF` / `WAVE` / `fmt ` / `data`) immediately followed by the payload.

use crate::config::SUPPORTED_SAMPLE_RATE;
use crate::error::{CorpusError, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

const RIFF_TAG: [u8; 4] = *b"RIFF";
const WAVE_TAG: [u8; 4] = *b"WAVE";
const FMT_TAG: [u8; 4] = *b"fmt ";
const DATA_TAG: [u8; 4] = *b"data";

/// PCM compression code
const PCM_FORMAT: u16 = 1;

/// Canonical WAV header, field for field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub chunk_id: [u8; 4],
    /// File size minus the first 8 bytes
    pub chunk_size: u32,
    pub format: [u8; 4],
    pub subchunk1_id: [u8; 4],
    pub subchunk1_size: u32,
    pub audio_format: u16,
    pub num_channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub subchunk2_id: [u8; 4],
    /// Payload size in bytes
    pub subchunk2_size: u32,
}

impl WavHeader {
    pub const SIZE: usize = 44;

    /// Header for an uncompressed 16-bit payload of `data_size` bytes.
    pub fn pcm16(sample_rate: u32, num_channels: u16, data_size: u32) -> Self {
        let block_align = num_channels * 2;
        Self {
            chunk_id: RIFF_TAG,
            chunk_size: 36 + data_size,
            format: WAVE_TAG,
            subchunk1_id: FMT_TAG,
            subchunk1_size: 16,
            audio_format: PCM_FORMAT,
            num_channels,
            sample_rate,
            byte_rate: sample_rate * block_align as u32,
            block_align,
            bits_per_sample: 16,
            subchunk2_id: DATA_TAG,
            subchunk2_size: data_size,
        }
    }

    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Result<Self> {
        let tag = |at: usize| -> [u8; 4] { [bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]] };
        let u32_at = |at: usize| u32::from_le_bytes(tag(at));
        let u16_at = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);

        let header = Self {
            chunk_id: tag(0),
            chunk_size: u32_at(4),
            format: tag(8),
            subchunk1_id: tag(12),
            subchunk1_size: u32_at(16),
            audio_format: u16_at(20),
            num_channels: u16_at(22),
            sample_rate: u32_at(24),
            byte_rate: u32_at(28),
            block_align: u16_at(32),
            bits_per_sample: u16_at(34),
            subchunk2_id: tag(36),
            subchunk2_size: u32_at(40),
        };

        if header.chunk_id != RIFF_TAG || header.format != WAVE_TAG {
            return Err(CorpusError::Format(format!(
                "not a RIFF/WAVE container (tags {:?} / {:?})",
                String::from_utf8_lossy(&header.chunk_id),
                String::from_utf8_lossy(&header.format)
            )));
        }

        Ok(header)
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.chunk_id);
        out[4..8].copy_from_slice(&self.chunk_size.to_le_bytes());
        out[8..12].copy_from_slice(&self.format);
        out[12..16].copy_from_slice(&self.subchunk1_id);
        out[16..20].copy_from_slice(&self.subchunk1_size.to_le_bytes());
        out[20..22].copy_from_slice(&self.audio_format.to_le_bytes());
        out[22..24].copy_from_slice(&self.num_channels.to_le_bytes());
        out[24..28].copy_from_slice(&self.sample_rate.to_le_bytes());
        out[28..32].copy_from_slice(&self.byte_rate.to_le_bytes());
        out[32..34].copy_from_slice(&self.block_align.to_le_bytes());
        out[34..36].copy_from_slice(&self.bits_per_sample.to_le_bytes());
        out[36..40].copy_from_slice(&self.subchunk2_id);
        out[40..44].copy_from_slice(&self.subchunk2_size.to_le_bytes());
        out
    }

    pub fn is_supported_format(&self) -> bool {
        is_supported_format(self)
    }
}

/// Only 44.1kHz mono 16-bit recordings are fed to the feature scripts.
pub fn is_supported_format(header: &WavHeader) -> bool {
    header.sample_rate == SUPPORTED_SAMPLE_RATE && header.num_channels == 1 && header.bits_per_sample == 16
}

/// One decoded recording: header plus owned payload.
///
/// `Clone` deep-copies the payload buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct WavFile {
    header: WavHeader,
    data: Vec<u8>,
}

impl WavFile {
    /// Build a container from a header and payload; the payload must match the declared size.
    pub fn new(header: WavHeader, data: Vec<u8>) -> Result<Self> {
        if data.len() != header.subchunk2_size as usize {
            return Err(CorpusError::Format(format!(
                "payload is {} bytes, header declares {}",
                data.len(),
                header.subchunk2_size
            )));
        }
        Ok(Self { header, data })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut header_bytes = [0u8; WavHeader::SIZE];
        read_exact_or_format(&mut reader, &mut header_bytes, "header")?;
        let header = WavHeader::from_bytes(&header_bytes)?;

        // read no more than is actually there, whatever size the header claims
        let expected = header.subchunk2_size as usize;
        let mut data = Vec::new();
        reader.take(u64::from(header.subchunk2_size)).read_to_end(&mut data)?;
        if data.len() != expected {
            return Err(CorpusError::Format(format!(
                "truncated payload ({} of {} bytes)",
                data.len(),
                expected
            )));
        }

        Ok(Self { header, data })
    }

    pub fn header(&self) -> WavHeader {
        self.header
    }

    pub fn size_in_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Decode the payload as interleaved signed 16-bit samples.
    pub fn amplitudes(&self) -> Result<Vec<i16>> {
        if self.header.bits_per_sample != 16 {
            return Err(CorpusError::Format(format!(
                "amplitudes need 16-bit samples, file has {} bits",
                self.header.bits_per_sample
            )));
        }
        Ok(self
            .data
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect())
    }

    /// Raw bytes of the first channel, de-interleaved by block alignment.
    pub fn first_channel(&self) -> Result<Vec<u8>> {
        let sample_bytes = (self.header.bits_per_sample / 8) as usize;
        let block = self.header.block_align as usize;
        if sample_bytes == 0 || block < sample_bytes {
            return Err(CorpusError::Format(format!(
                "invalid block alignment {} for {}-bit samples",
                block, self.header.bits_per_sample
            )));
        }
        if block == sample_bytes {
            return Ok(self.data.clone());
        }
        Ok(self
            .data
            .chunks_exact(block)
            .flat_map(|frame| frame[..sample_bytes].iter().copied())
            .collect())
    }

    /// Persist bytes `[start_byte, end_byte)` of the first channel.
    ///
    /// `end_byte` is clamped to the channel length. In text mode every byte is
    /// written as a signed integer followed by a space. Returns the number of
    /// channel bytes written.
    pub fn write_channel_slice(
        &self,
        destination: impl AsRef<Path>,
        start_byte: usize,
        end_byte: usize,
        as_text: bool,
    ) -> Result<usize> {
        let channel = self.first_channel()?;
        let end = end_byte.min(channel.len());
        if start_byte > end {
            return Err(CorpusError::Format(format!(
                "slice start {} is past slice end {} (channel has {} bytes)",
                start_byte,
                end,
                channel.len()
            )));
        }
        let slice = &channel[start_byte..end];

        let mut out = BufWriter::new(File::create(destination.as_ref())?);
        if as_text {
            for &byte in slice {
                write!(out, "{} ", byte as i8)?;
            }
            writeln!(out)?;
        } else {
            out.write_all(slice)?;
        }
        out.flush()?;

        Ok(slice.len())
    }

    /// Write header and payload to `path`.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut out = BufWriter::new(File::create(path.as_ref())?);
        out.write_all(&self.header.to_bytes())?;
        out.write_all(&self.data)?;
        out.flush()?;
        Ok(())
    }
}

fn read_exact_or_format<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => {
            CorpusError::Format(format!("truncated {} (expected {} bytes)", what, buf.len()))
        }
        _ => CorpusError::Io(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn mono(samples: &[i16]) -> WavFile {
        let data: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        WavFile::new(WavHeader::pcm16(44100, 1, data.len() as u32), data).unwrap()
    }

    #[test]
    fn test_header_round_trip() {
        let header = WavHeader::pcm16(22050, 2, 4096);
        let parsed = WavHeader::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.byte_rate, 22050 * 4);
        assert_eq!(parsed.block_align, 4);
        assert_eq!(parsed.chunk_size, 36 + 4096);
    }

    #[test]
    fn test_supported_format() {
        let header = WavHeader::pcm16(44100, 1, 0);
        assert!(is_supported_format(&header));

        let wrong_rate = WavHeader { sample_rate: 48000, ..header };
        let wrong_channels = WavHeader { num_channels: 2, ..header };
        let wrong_bits = WavHeader { bits_per_sample: 24, ..header };
        assert!(!is_supported_format(&wrong_rate));
        assert!(!is_supported_format(&wrong_channels));
        assert!(!is_supported_format(&wrong_bits));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tone.wav");
        let wav = mono(&[0, 1, -1, i16::MAX, i16::MIN]);
        wav.write(&path).unwrap();

        let loaded = WavFile::open(&path).unwrap();
        assert_eq!(loaded, wav);
        assert_eq!(loaded.size_in_bytes(), 10);
        assert_eq!(loaded.amplitudes().unwrap(), vec![0, 1, -1, i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_truncated_payload_is_format_error() {
        let mut bytes = WavHeader::pcm16(44100, 1, 100).to_bytes().to_vec();
        bytes.extend_from_slice(&[0u8; 10]);
        let err = WavFile::from_reader(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, CorpusError::Format(_)));
    }

    #[test]
    fn test_oversized_payload_claim_is_format_error() {
        let mut header = WavHeader::pcm16(44100, 1, 0);
        header.subchunk2_size = u32::MAX;
        let mut bytes = header.to_bytes().to_vec();
        bytes.extend_from_slice(&[1u8; 64]);
        match WavFile::from_reader(bytes.as_slice()) {
            Err(CorpusError::Format(reason)) => assert!(reason.contains("64 of")),
            other => panic!("expected format error, got {:?}", other.map(|w| w.size_in_bytes())),
        }
    }

    #[test]
    fn test_truncated_header_is_format_error() {
        let bytes = [0u8; 20];
        let err = WavFile::from_reader(&bytes[..]).unwrap_err();
        assert!(matches!(err, CorpusError::Format(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = WavFile::open("/nonexistent/voice.wav").unwrap_err();
        assert!(matches!(err, CorpusError::Io(_)));
    }

    #[test]
    fn test_payload_length_must_match_header() {
        let err = WavFile::new(WavHeader::pcm16(44100, 1, 8), vec![0u8; 4]).unwrap_err();
        assert!(matches!(err, CorpusError::Format(_)));
    }

    #[test]
    fn test_first_channel_of_stereo() {
        // frames: (L=1, R=2), (L=3, R=4)
        let data: Vec<u8> = [1i16, 2, 3, 4].iter().flat_map(|s| s.to_le_bytes()).collect();
        let wav = WavFile::new(WavHeader::pcm16(44100, 2, 8), data).unwrap();
        assert_eq!(wav.first_channel().unwrap(), vec![1, 0, 3, 0]);
    }

    #[test]
    fn test_write_channel_slice_binary_and_text() {
        let dir = TempDir::new().unwrap();
        let wav = mono(&[1, -2, 3]);

        let raw = dir.path().join("slice.bin");
        assert_eq!(wav.write_channel_slice(&raw, 2, 6, false).unwrap(), 4);
        assert_eq!(std::fs::read(&raw).unwrap(), vec![0xFE, 0xFF, 3, 0]);

        let text = dir.path().join("slice.txt");
        assert_eq!(wav.write_channel_slice(&text, 0, 100, true).unwrap(), 6);
        assert_eq!(std::fs::read_to_string(&text).unwrap(), "1 0 -2 -1 3 0 \n");
    }

    #[test]
    fn test_write_channel_slice_rejects_inverted_range() {
        let dir = TempDir::new().unwrap();
        let wav = mono(&[1, 2]);
        assert!(wav.write_channel_slice(dir.path().join("x"), 3, 1, false).is_err());
    }
}
