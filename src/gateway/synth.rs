//! The per-session synthesis loop (spec.md §4.4 "Synth loop").

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;

use crate::metrics::Metrics;
use crate::protocol::TtsMessage;
use crate::session::{CachedChunk, Session};
use crate::tts::AnyEngine;

const TEXT_POLL_TIMEOUT: Duration = Duration::from_millis(200);

pub struct SynthLoopConfig {
    pub chunk_bytes: usize,
    pub send_queue_hwm: u64,
}

/// Runs until the session's text queue is drained and `finished` is set, or
/// until `cancelled` is observed. Spawned at most once per session by
/// `start_synth_loop_if_needed`.
pub async fn run(session: Arc<Session>, engine: Arc<AnyEngine>, metrics: Arc<Metrics>, config: SynthLoopConfig) {
    loop {
        if session.is_cancelled() {
            break;
        }

        let text = match session.pop_text_unit(TEXT_POLL_TIMEOUT).await {
            Some(text) => text,
            None => {
                if session.is_finished() {
                    break;
                }
                continue;
            }
        };

        if session.is_cancelled() {
            break;
        }

        let (unit_index_start, unit_index_end) = session.next_unit_range();

        let chunks = match engine
            .synthesize_pcm16_stream(&text, session.audio_spec, config.chunk_bytes)
            .await
        {
            Ok(chunks) => chunks,
            Err(e) => {
                emit_error(&session, &metrics, "internal_error", &e.to_string()).await;
                return;
            }
        };

        for pcm in chunks {
            if session.is_cancelled() {
                break;
            }
            let msg = TtsMessage::AudioChunk {
                session_id: session.session_id.clone(),
                seq: session.seq(),
                unit_index_start,
                unit_index_end,
                pcm_base64: base64::engine::general_purpose::STANDARD.encode(&pcm),
            };
            let json = msg.to_json().expect("TtsMessage always serializes");
            session
                .cache
                .push(CachedChunk {
                    unit_index_start,
                    unit_index_end,
                    json: json.clone(),
                })
                .await;

            let depth = session.push_outbound(json);
            if depth > config.send_queue_hwm {
                emit_error(&session, &metrics, "backpressure", "send queue high-water mark exceeded").await;
                return;
            }
        }
    }

    let cancelled = session.is_cancelled();
    let end_msg = TtsMessage::TtsEnd {
        session_id: session.session_id.clone(),
        seq: session.seq(),
        cancelled: if cancelled { Some(true) } else { None },
    };
    let json = end_msg.to_json().expect("TtsMessage always serializes");
    session.push_outbound(json);
}

async fn emit_error(session: &Session, metrics: &Metrics, code: &str, message: &str) {
    metrics.inc_error(code).await;
    let parsed_code = match code {
        "backpressure" => crate::protocol::ErrorCode::Backpressure,
        _ => crate::protocol::ErrorCode::InternalError,
    };
    let msg = TtsMessage::Error {
        session_id: session.session_id.clone(),
        seq: session.seq(),
        code: parsed_code,
        message: message.to_string(),
    };
    let json = msg.to_json().expect("TtsMessage always serializes");
    session.push_outbound(json);
}
