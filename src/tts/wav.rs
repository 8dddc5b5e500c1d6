//! WAV header construction and PCM16 extraction.
//!
//! `build_header` is grounded on
//! `sglang-server/ws_gateway_tts/server.py::build_wav_header` (data size is
//! unknown up front for a streamed session, so it is always written as 0 —
//! a client that wants a playable file on disk must patch the size fields
//! after the fact). `strip_and_validate` is adapted from
//! `src/voice/tts_local.rs::wav_to_pcm_i16`'s manual chunk walk, generalized
//! to validate against a requested `AudioSpec` instead of silently
//! resampling (spec.md §4.2: "mismatch fails synthesis ... never silently
//! resamples").

use crate::protocol::AudioSpec;

const BITS_PER_SAMPLE: u16 = 16;

/// Build a 44-byte canonical PCM16 RIFF/WAVE header with `data` size fixed
/// at 0 (spec.md §4.1: "44-byte PCM16 RIFF header with data-size=0").
pub fn build_header(spec: &AudioSpec) -> [u8; 44] {
    let mut out = [0u8; 44];
    let byte_rate = spec.sample_rate * spec.channels as u32 * (BITS_PER_SAMPLE as u32 / 8);
    let block_align = spec.channels * (BITS_PER_SAMPLE / 8);
    let riff_size: u32 = 36;
    let data_size: u32 = 0;

    out[0..4].copy_from_slice(b"RIFF");
    out[4..8].copy_from_slice(&riff_size.to_le_bytes());
    out[8..12].copy_from_slice(b"WAVE");
    out[12..16].copy_from_slice(b"fmt ");
    out[16..20].copy_from_slice(&16u32.to_le_bytes()); // PCM fmt chunk size
    out[20..22].copy_from_slice(&1u16.to_le_bytes()); // PCM format code
    out[22..24].copy_from_slice(&spec.channels.to_le_bytes());
    out[24..28].copy_from_slice(&spec.sample_rate.to_le_bytes());
    out[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    out[32..34].copy_from_slice(&block_align.to_le_bytes());
    out[34..36].copy_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    out[36..40].copy_from_slice(b"data");
    out[40..44].copy_from_slice(&data_size.to_le_bytes());
    out
}

#[derive(Debug, thiserror::Error)]
pub enum WavError {
    #[error("wav data too short: {0} bytes")]
    TooShort(usize),
    #[error("not a RIFF/WAVE file")]
    NotRiffWave,
    #[error("wav fmt chunk too small")]
    FmtChunkTooSmall,
    #[error("missing fmt or data chunk")]
    MissingChunk,
    #[error("unsupported wav audio_format={0} (only PCM=1 is supported)")]
    UnsupportedAudioFormat(u16),
    #[error("unsupported bits_per_sample={0} (only 16 is supported)")]
    UnsupportedBitDepth(u16),
    #[error(
        "backend produced sample_rate={got_rate} channels={got_channels}, \
         requested sample_rate={want_rate} channels={want_channels}"
    )]
    SpecMismatch {
        got_rate: u32,
        got_channels: u16,
        want_rate: u32,
        want_channels: u16,
    },
}

fn is_riff_wave(b: &[u8]) -> bool {
    b.len() >= 12 && &b[0..4] == b"RIFF" && &b[8..12] == b"WAVE"
}

/// Parse a RIFF/WAVE buffer, returning `(sample_rate, channels, pcm_data)`
/// without validating against any particular spec.
fn parse_pcm16(wav: &[u8]) -> Result<(u32, u16, &[u8]), WavError> {
    if !is_riff_wave(wav) {
        return Err(WavError::NotRiffWave);
    }
    if wav.len() < 44 {
        return Err(WavError::TooShort(wav.len()));
    }

    let mut offset = 12usize;
    let mut fmt: Option<(u16, u32, u16)> = None; // (channels, sample_rate, bits_per_sample)
    let mut data: Option<&[u8]> = None;

    while offset + 8 <= wav.len() {
        let chunk_id = &wav[offset..offset + 4];
        let size = u32::from_le_bytes(wav[offset + 4..offset + 8].try_into().unwrap()) as usize;
        let payload_start = offset + 8;
        let payload_end = payload_start.saturating_add(size);
        if payload_end > wav.len() {
            break;
        }

        if chunk_id == b"fmt " {
            if size < 16 {
                return Err(WavError::FmtChunkTooSmall);
            }
            let audio_format = u16::from_le_bytes(wav[payload_start..payload_start + 2].try_into().unwrap());
            let channels = u16::from_le_bytes(wav[payload_start + 2..payload_start + 4].try_into().unwrap());
            let sample_rate = u32::from_le_bytes(wav[payload_start + 4..payload_start + 8].try_into().unwrap());
            let bits_per_sample = u16::from_le_bytes(wav[payload_start + 14..payload_start + 16].try_into().unwrap());
            if audio_format != 1 {
                return Err(WavError::UnsupportedAudioFormat(audio_format));
            }
            fmt = Some((channels, sample_rate, bits_per_sample));
        } else if chunk_id == b"data" {
            data = Some(&wav[payload_start..payload_end]);
        }

        // Chunks are word-aligned.
        offset = payload_end + (size % 2);
        if fmt.is_some() && data.is_some() {
            break;
        }
    }

    let (channels, sample_rate, bits) = fmt.ok_or(WavError::MissingChunk)?;
    let data = data.ok_or(WavError::MissingChunk)?;
    if bits != BITS_PER_SAMPLE {
        return Err(WavError::UnsupportedBitDepth(bits));
    }
    Ok((sample_rate, channels, data))
}

/// Strip a RIFF/WAVE header a backend produced and validate it describes
/// PCM16 at exactly `spec`'s sample rate and channel count. Returns the raw
/// PCM16LE payload.
pub fn strip_and_validate(wav: &[u8], spec: &AudioSpec) -> Result<Vec<u8>, WavError> {
    let (sample_rate, channels, data) = parse_pcm16(wav)?;
    if sample_rate != spec.sample_rate || channels != spec.channels {
        return Err(WavError::SpecMismatch {
            got_rate: sample_rate,
            got_channels: channels,
            want_rate: spec.sample_rate,
            want_channels: spec.channels,
        });
    }
    Ok(data.to_vec())
}
