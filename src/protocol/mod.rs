//! Wire protocol for the TTS gateway and the orchestrator's two WebSocket
//! surfaces (`/chat` to the end client, `/tts` to the TTS gateway).
//!
//! Every message is a single tagged-union JSON object (`{"type": "...", ...}`)
//! rather than a hierarchy of per-message structs — the codec validates
//! required fields per variant and rejects unknown discriminants at decode
//! time, matching `src/server/mod.rs::WsMessage` in the sibling agent crate
//! this workspace started from.

mod error_code;

pub use error_code::ErrorCode;

use serde::{Deserialize, Serialize};

/// Audio container requested for a session. Immutable once the session is
/// created (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    Pcm16Raw,
    Pcm16Wav,
}

/// Immutable audio parameters negotiated at session creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    pub format: AudioFormat,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Messages exchanged on the TTS gateway's `/tts` WebSocket, in both
/// directions. Field names match the wire format in spec.md §4.1 exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TtsMessage {
    #[serde(rename = "start")]
    Start {
        session_id: String,
        audio_format: AudioFormat,
        sample_rate: u32,
        channels: u16,
    },
    #[serde(rename = "start_ack")]
    StartAck {
        session_id: String,
        audio_format: AudioFormat,
        sample_rate: u32,
        channels: u16,
        ttl_s: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        wav_header_base64: Option<String>,
    },
    #[serde(rename = "text_delta")]
    TextDelta {
        session_id: String,
        seq: u64,
        text: String,
    },
    #[serde(rename = "text_end")]
    TextEnd { session_id: String, seq: u64 },
    #[serde(rename = "cancel")]
    Cancel { session_id: String, seq: u64 },
    #[serde(rename = "resume")]
    Resume {
        session_id: String,
        last_unit_index_received: u64,
    },
    #[serde(rename = "audio_chunk")]
    AudioChunk {
        session_id: String,
        seq: u64,
        unit_index_start: u64,
        unit_index_end: u64,
        pcm_base64: String,
    },
    #[serde(rename = "tts_end")]
    TtsEnd {
        session_id: String,
        seq: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cancelled: Option<bool>,
    },
    #[serde(rename = "error")]
    Error {
        session_id: String,
        seq: u64,
        code: ErrorCode,
        message: String,
    },
}

impl TtsMessage {
    /// The `session_id` every variant carries.
    pub fn session_id(&self) -> &str {
        match self {
            TtsMessage::Start { session_id, .. }
            | TtsMessage::StartAck { session_id, .. }
            | TtsMessage::TextDelta { session_id, .. }
            | TtsMessage::TextEnd { session_id, .. }
            | TtsMessage::Cancel { session_id, .. }
            | TtsMessage::Resume { session_id, .. }
            | TtsMessage::AudioChunk { session_id, .. }
            | TtsMessage::TtsEnd { session_id, .. }
            | TtsMessage::Error { session_id, .. } => session_id,
        }
    }

    /// Serialize to compact (no extra whitespace) UTF-8 JSON, per spec.md §4.1.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, DecodeError> {
        serde_json::from_str(s).map_err(|e| DecodeError::from_serde(s, e))
    }
}

/// Messages the orchestrator sends to / receives from its own client over
/// `/chat`. Grounded on `orchestrator/server.py::ws_chat` (the `*_start`,
/// `*_error`, `llm_delta`, `llm_done`, `tool_calls_delta`, `*_cancelled`
/// variants it emits) plus the inbound `cancel` control frame.
///
/// `audio_chunk` / `tts_end` / `error` frames coming back from the TTS
/// gateway are relayed to the client as raw `TtsMessage` JSON text, verbatim
/// and untransformed (spec.md §4.7) — they are never decoded into this enum
/// on the way through, so they have no variant here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChatMessage {
    #[serde(rename = "cancel")]
    Cancel,
    #[serde(rename = "orchestrator_start")]
    OrchestratorStart {
        session_id: String,
        tts_flush_min_chars: usize,
        tts_flush_on_punct: bool,
    },
    #[serde(rename = "llm_delta")]
    LlmDelta { delta: String },
    #[serde(rename = "tool_calls_delta")]
    ToolCallsDelta { tool_calls: Vec<ToolCallSnapshot> },
    #[serde(rename = "llm_done")]
    LlmDone {
        elapsed_ms: u64,
        full_text_len: usize,
        tool_calls: Vec<ToolCallSnapshot>,
    },
    #[serde(rename = "orchestrator_cancelled")]
    OrchestratorCancelled,
    #[serde(rename = "orchestrator_error")]
    OrchestratorError { code: ErrorCode, message: String },
}

/// Snapshot of one accumulated tool call, reported to the client on every
/// change and at `llm_done` (spec.md §3 "Tool-call accumulator").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCallSnapshot {
    pub index: i64,
    pub id: String,
    pub function: ToolCallFunction,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,
    pub arguments: String,
}

/// The client's initial request on `/chat`, grounded on
/// `orchestrator/server.py::ChatRequest`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub prompt: String,
    pub session_id: String,
    pub audio_format: AudioFormat,
    pub sample_rate: u32,
    pub channels: u16,
    /// Only honored when `ALLOW_CLIENT_TTS_URL=true` (spec.md §4.8).
    #[serde(default)]
    pub ws_tts_url: Option<String>,
}

/// Error produced while decoding a wire message: carries enough of the raw
/// payload to report a useful `bad_request`.
#[derive(Debug, thiserror::Error)]
#[error("failed to decode message: {reason}")]
pub struct DecodeError {
    pub reason: String,
}

impl DecodeError {
    fn from_serde(raw: &str, err: serde_json::Error) -> Self {
        let snippet: String = raw.chars().take(200).collect();
        DecodeError {
            reason: format!("{err} (payload: {snippet})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_round_trips() {
        let msg = TtsMessage::Start {
            session_id: "s1".into(),
            audio_format: AudioFormat::Pcm16Raw,
            sample_rate: 22050,
            channels: 1,
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"start\""));
        let back = TtsMessage::from_json(&json).unwrap();
        assert_eq!(back.session_id(), "s1");
    }

    #[test]
    fn unknown_type_is_decode_error() {
        let err = TtsMessage::from_json(r#"{"type":"bogus"}"#).unwrap_err();
        assert!(err.reason.contains("bogus") || err.reason.len() > 0);
    }

    #[test]
    fn missing_required_field_is_decode_error() {
        // text_delta without `text`
        let err = TtsMessage::from_json(r#"{"type":"text_delta","session_id":"s","seq":1}"#)
            .unwrap_err();
        assert!(!err.reason.is_empty());
    }

    #[test]
    fn start_ack_omits_wav_header_when_absent() {
        let msg = TtsMessage::StartAck {
            session_id: "s1".into(),
            audio_format: AudioFormat::Pcm16Raw,
            sample_rate: 22050,
            channels: 1,
            ttl_s: 60,
            wav_header_base64: None,
        };
        let json = msg.to_json().unwrap();
        assert!(!json.contains("wav_header_base64"));
    }

    #[test]
    fn error_code_serializes_to_wire_string() {
        let msg = TtsMessage::Error {
            session_id: "s1".into(),
            seq: 0,
            code: ErrorCode::ResumeNotAvailable,
            message: "no match".into(),
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"code\":\"resume_not_available\""));
    }

    #[test]
    fn tts_end_with_cancelled_round_trips() {
        let msg = TtsMessage::TtsEnd {
            session_id: "s1".into(),
            seq: 3,
            cancelled: Some(true),
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"tts_end\""));
        assert!(json.contains("\"cancelled\":true"));
        let back = TtsMessage::from_json(&json).unwrap();
        assert!(matches!(back, TtsMessage::TtsEnd { cancelled: Some(true), .. }));
    }
}
