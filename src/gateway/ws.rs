//! The `/tts` WebSocket handler: one reader loop dispatching control frames,
//! one writer loop draining the session's outbound queue under the
//! connection's own send ordering. Grounded on
//! `sglang-server/ws_gateway_tts/server.py::GatewayApp.ws_tts`.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};

use crate::gateway::synth::{self, SynthLoopConfig};
use crate::gateway::GatewayState;
use crate::protocol::{AudioFormat, AudioSpec, DecodeError, ErrorCode, TtsMessage};
use crate::session::{ResumeOutcome, Session, SessionError};

/// Set once the connection's `start` has been accepted: carries the session
/// and the monotonic instant synthesis began, so the writer task can record
/// time-to-first-audio and drain the session's queue-depth counter without
/// the reader handing it a channel per message.
#[derive(Clone)]
struct ConnCtx {
    session: Arc<Session>,
    start_instant: Instant,
}

pub async fn handle_socket(socket: WebSocket, state: GatewayState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let (ctx_tx, mut ctx_rx) = watch::channel::<Option<ConnCtx>>(None);

    state.metrics.inc_active(1);

    let metrics_for_writer = state.metrics.clone();
    let writer = tokio::spawn(async move {
        let mut ttfa_recorded = false;
        while let Some(json) = out_rx.recv().await {
            if ws_tx.send(Message::Text(json.clone().into())).await.is_err() {
                break;
            }

            let ctx = ctx_rx.borrow_and_update().clone();
            if let Some(ctx) = &ctx {
                ctx.session.mark_outbound_drained();
                if !ttfa_recorded && json.contains("\"type\":\"audio_chunk\"") {
                    ttfa_recorded = true;
                    let ttfa_ms = ctx.start_instant.elapsed().as_secs_f64() * 1000.0;
                    metrics_for_writer.observe_ttfa_ms(ttfa_ms).await;
                }
            }

            let is_terminal = json.contains("\"type\":\"tts_end\"") || json.contains("\"type\":\"error\"");
            if is_terminal {
                let _ = ws_tx.close().await;
                break;
            }
        }
    });

    let mut session: Option<Arc<Session>> = None;

    while let Some(Ok(msg)) = ws_rx.next().await {
        let text = match msg {
            Message::Text(t) => t.to_string(),
            Message::Close(_) => break,
            _ => continue,
        };

        match TtsMessage::from_json(&text) {
            Ok(TtsMessage::Start {
                session_id,
                audio_format,
                sample_rate,
                channels,
            }) => {
                if let Some(existing) = &session {
                    fail(existing, &state, "bad_request", "start already received on this connection").await;
                    break;
                }

                let audio_spec = AudioSpec {
                    format: audio_format,
                    sample_rate,
                    channels,
                };
                match state
                    .sessions
                    .get_or_create(&session_id, audio_spec, out_tx.clone())
                    .await
                {
                    Ok(s) => {
                        s.touch();
                        state.metrics.inc_sessions();
                        let _ = ctx_tx.send(Some(ConnCtx {
                            session: s.clone(),
                            start_instant: Instant::now(),
                        }));
                        session = Some(s.clone());

                        let wav_header_base64 =
                            matches!(audio_format, AudioFormat::Pcm16Wav).then(|| base64_encode(&crate::tts::wav::build_header(&audio_spec)));

                        let ack = TtsMessage::StartAck {
                            session_id: s.session_id.clone(),
                            audio_format,
                            sample_rate,
                            channels,
                            ttl_s: s.ttl_s,
                            wav_header_base64,
                        };
                        s.push_outbound(ack.to_json().expect("TtsMessage always serializes"));
                    }
                    Err(SessionError::AudioSpecMismatch(id)) => {
                        let _ = out_tx.send(
                            TtsMessage::Error {
                                session_id: id,
                                seq: 0,
                                code: ErrorCode::BadRequest,
                                message: "audio_spec does not match existing session".into(),
                            }
                            .to_json()
                            .expect("TtsMessage always serializes"),
                        );
                        break;
                    }
                }
            }
            Ok(other) => {
                let Some(active) = session.clone() else {
                    let _ = out_tx.send(
                        TtsMessage::Error {
                            session_id: String::new(),
                            seq: 0,
                            code: ErrorCode::BadRequest,
                            message: "send start first".into(),
                        }
                        .to_json()
                        .expect("TtsMessage always serializes"),
                    );
                    break;
                };
                active.touch();

                if !dispatch(&active, &state, other).await {
                    break;
                }
            }
            Err(DecodeError { reason }) => {
                if let Some(active) = &session {
                    fail(active, &state, "bad_request", &reason).await;
                } else {
                    let _ = out_tx.send(
                        TtsMessage::Error {
                            session_id: String::new(),
                            seq: 0,
                            code: ErrorCode::BadRequest,
                            message: reason,
                        }
                        .to_json()
                        .expect("TtsMessage always serializes"),
                    );
                }
                break;
            }
        }
    }

    drop(out_tx);
    let _ = writer.await;
    state.metrics.inc_active(-1);
}

/// Handles every non-`start` frame. Returns `false` when the connection
/// should close.
async fn dispatch(session: &Arc<Session>, state: &GatewayState, msg: TtsMessage) -> bool {
    match msg {
        TtsMessage::TextDelta { seq, text, .. } => {
            session.observe_seq(seq);
            session.push_text_unit(text);
            spawn_synth_loop_if_needed(session, state).await;
            true
        }
        TtsMessage::TextEnd { seq, .. } => {
            session.observe_seq(seq);
            session.mark_finished();
            spawn_synth_loop_if_needed(session, state).await;
            true
        }
        TtsMessage::Cancel { seq, .. } => {
            session.observe_seq(seq);
            session.mark_cancelled();
            session.abort_synth_task().await;
            let end = TtsMessage::TtsEnd {
                session_id: session.session_id.clone(),
                seq: session.seq(),
                cancelled: Some(true),
            };
            session.push_outbound(end.to_json().expect("TtsMessage always serializes"));
            true
        }
        TtsMessage::Resume {
            last_unit_index_received,
            ..
        } => {
            match session.cache.resume_from(last_unit_index_received).await {
                ResumeOutcome::Entries(entries) => {
                    for json in entries {
                        session.push_outbound(json);
                    }
                }
                ResumeOutcome::NotAvailable => {
                    let err = TtsMessage::Error {
                        session_id: session.session_id.clone(),
                        seq: session.seq(),
                        code: ErrorCode::ResumeNotAvailable,
                        message: "cache window exceeded or nothing to resend; restart the session".into(),
                    };
                    session.push_outbound(err.to_json().expect("TtsMessage always serializes"));
                }
            }
            true
        }
        _ => {
            fail(session, state, "bad_request", "unexpected message type for an active session").await;
            false
        }
    }
}

async fn fail(session: &Session, state: &GatewayState, code: &str, message: &str) {
    state.metrics.inc_error(code).await;
    let parsed = match code {
        "bad_request" => ErrorCode::BadRequest,
        "resume_not_available" => ErrorCode::ResumeNotAvailable,
        _ => ErrorCode::InternalError,
    };
    let msg = TtsMessage::Error {
        session_id: session.session_id.clone(),
        seq: session.seq(),
        code: parsed,
        message: message.to_string(),
    };
    session.push_outbound(msg.to_json().expect("TtsMessage always serializes"));
}

async fn spawn_synth_loop_if_needed(session: &Arc<Session>, state: &GatewayState) {
    if session.has_synth_task().await {
        return;
    }
    let inner_session = session.clone();
    let engine = state.engine.clone();
    let metrics = state.metrics.clone();
    let config = SynthLoopConfig {
        chunk_bytes: state.chunk_bytes,
        send_queue_hwm: state.send_queue_hwm,
    };
    let handle = tokio::spawn(async move {
        synth::run(inner_session, engine, metrics, config).await;
    });
    session.set_synth_task(handle).await;
}

fn base64_encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
