use crate::protocol::AudioSpec;
use crate::tts::{SynthesisError, TtsEngine};

const TONE_HZ: f32 = 440.0;
const MS_PER_CHAR: u32 = 40;
const MIN_MS: u32 = 120;
const MAX_MS: u32 = 4000;

/// Fixed-tone backend for local development and tests, grounded on the
/// reference implementation's `DummyTtsEngine` and on spec.md §4.2's
/// explicit allowance for "a fixed tone (dummy)". Length is proportional to
/// the input text so downstream flush/chunking logic has something
/// realistic to exercise.
pub struct DummyEngine;

impl DummyEngine {
    pub fn new() -> Self {
        DummyEngine
    }

    fn duration_ms(text: &str) -> u32 {
        let chars = text.chars().count() as u32;
        (chars * MS_PER_CHAR).clamp(MIN_MS, MAX_MS)
    }
}

impl Default for DummyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TtsEngine for DummyEngine {
    fn name(&self) -> &'static str {
        "dummy"
    }

    async fn synthesize_pcm16(&self, text: &str, spec: AudioSpec) -> Result<Vec<u8>, SynthesisError> {
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let duration_ms = Self::duration_ms(text);
        let num_samples = (spec.sample_rate as u64 * duration_ms as u64 / 1000) as usize;
        let mut pcm = Vec::with_capacity(num_samples * spec.channels as usize * 2);

        for n in 0..num_samples {
            let t = n as f32 / spec.sample_rate as f32;
            let sample = (t * TONE_HZ * std::f32::consts::TAU).sin();
            let amplitude = i16::MAX as f32 * 0.2;
            let value = (sample * amplitude) as i16;
            for _ in 0..spec.channels {
                pcm.extend_from_slice(&value.to_le_bytes());
            }
        }

        Ok(pcm)
    }
}
