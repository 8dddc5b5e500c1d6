//! Cross-module checks for the wire codec and WAV container handling that
//! don't belong to any single module's own unit tests.

use tts_gateway_core::protocol::{AudioFormat, AudioSpec, ChatRequest, TtsMessage};
use tts_gateway_core::tts::wav;

#[test]
fn chat_request_defaults_ws_tts_url_to_none_when_absent() {
    let json = r#"{
        "prompt": "hello",
        "session_id": "s1",
        "audio_format": "pcm16_wav",
        "sample_rate": 22050,
        "channels": 1
    }"#;
    let req: ChatRequest = serde_json::from_str(json).unwrap();
    assert_eq!(req.prompt, "hello");
    assert!(req.ws_tts_url.is_none());
    assert!(matches!(req.audio_format, AudioFormat::Pcm16Wav));
}

#[test]
fn chat_request_honors_explicit_ws_tts_url() {
    let json = r#"{
        "prompt": "hello",
        "session_id": "s1",
        "audio_format": "pcm16_raw",
        "sample_rate": 16000,
        "channels": 1,
        "ws_tts_url": "ws://attacker.example/tts"
    }"#;
    let req: ChatRequest = serde_json::from_str(json).unwrap();
    assert_eq!(req.ws_tts_url.as_deref(), Some("ws://attacker.example/tts"));
}

#[test]
fn start_ack_wav_header_round_trips_through_the_tagged_union_codec() {
    let spec = AudioSpec {
        format: AudioFormat::Pcm16Wav,
        sample_rate: 24000,
        channels: 1,
    };
    let header = wav::build_header(&spec);
    let ack = TtsMessage::StartAck {
        session_id: "s1".into(),
        audio_format: spec.format,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        ttl_s: 300,
        wav_header_base64: Some(base64_encode(&header)),
    };

    let json = ack.to_json().unwrap();
    let decoded = TtsMessage::from_json(&json).unwrap();
    let TtsMessage::StartAck { wav_header_base64: Some(b64), sample_rate, .. } = decoded else {
        panic!("expected start_ack with a wav header");
    };

    assert_eq!(sample_rate, 24000);
    let raw = base64_decode(&b64);
    assert_eq!(raw.len(), 44);
    assert_eq!(&raw[0..4], b"RIFF");
    assert_eq!(&raw[8..12], b"WAVE");
}

/// A full synthesized-backend WAV (non-zero `data` size, unlike the
/// zero-size header the gateway hands the client up front) should strip
/// down to exactly its PCM payload when it matches the requested spec.
#[test]
fn a_backend_produced_wav_strips_to_its_pcm_payload() {
    let spec = AudioSpec {
        format: AudioFormat::Pcm16Wav,
        sample_rate: 22050,
        channels: 1,
    };
    let pcm = vec![10u8, 20, 30, 40, 50, 60, 70, 80];
    let full_wav = build_full_wav(spec.sample_rate, spec.channels, &pcm);

    let stripped = wav::strip_and_validate(&full_wav, &spec).unwrap();
    assert_eq!(stripped, pcm);
}

#[test]
fn a_backend_wav_at_the_wrong_sample_rate_is_rejected_not_resampled() {
    let requested = AudioSpec {
        format: AudioFormat::Pcm16Wav,
        sample_rate: 22050,
        channels: 1,
    };
    let wav_at_16k = build_full_wav(16000, 1, &[0, 0, 0, 0]);
    assert!(wav::strip_and_validate(&wav_at_16k, &requested).is_err());
}

fn build_full_wav(sample_rate: u32, channels: u16, pcm: &[u8]) -> Vec<u8> {
    let mut w = Vec::new();
    w.extend_from_slice(b"RIFF");
    w.extend_from_slice(&(36 + pcm.len() as u32).to_le_bytes());
    w.extend_from_slice(b"WAVE");
    w.extend_from_slice(b"fmt ");
    w.extend_from_slice(&16u32.to_le_bytes());
    w.extend_from_slice(&1u16.to_le_bytes());
    w.extend_from_slice(&channels.to_le_bytes());
    w.extend_from_slice(&sample_rate.to_le_bytes());
    let byte_rate = sample_rate * channels as u32 * 2;
    w.extend_from_slice(&byte_rate.to_le_bytes());
    w.extend_from_slice(&(channels * 2).to_le_bytes());
    w.extend_from_slice(&16u16.to_le_bytes());
    w.extend_from_slice(b"data");
    w.extend_from_slice(&(pcm.len() as u32).to_le_bytes());
    w.extend_from_slice(pcm);
    w
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn base64_decode(s: &str) -> Vec<u8> {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.decode(s).unwrap()
}
