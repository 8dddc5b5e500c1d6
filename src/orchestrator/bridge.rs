//! The outbound bridge from the orchestrator to the TTS gateway's `/tts`
//! WebSocket: one sender task turning queued text units into `text_delta` /
//! `text_end` / `cancel` frames, one relay loop forwarding every inbound TTS
//! frame to the orchestrator's own client verbatim. Grounded on
//! `orchestrator/server.py::_tts_bridge`.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::protocol::{AudioFormat, TtsMessage};

pub struct BridgeConfig {
    pub ws_tts_url: String,
    pub session_id: String,
    pub audio_format: AudioFormat,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Connects to the TTS gateway, sends `start`, then runs the sender and
/// relay halves concurrently until the gateway closes or sends `tts_end` /
/// `error`. `client_out` is the orchestrator's own client's outbound queue —
/// TTS frames land there completely untouched (spec.md §4.7).
pub async fn run(
    config: BridgeConfig,
    mut tts_text_rx: mpsc::UnboundedReceiver<Option<String>>,
    client_out: mpsc::UnboundedSender<String>,
    mut cancel_rx: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let (stream, _response) = tokio_tungstenite::connect_async(&config.ws_tts_url).await?;
    let (mut tts_tx, mut tts_rx) = stream.split();

    let start = TtsMessage::Start {
        session_id: config.session_id.clone(),
        audio_format: config.audio_format,
        sample_rate: config.sample_rate,
        channels: config.channels,
    };
    tts_tx
        .send(Message::Text(start.to_json()?.into()))
        .await?;

    let session_id = config.session_id.clone();
    let sender = tokio::spawn(async move {
        sender_loop(&mut tts_tx, session_id, &mut tts_text_rx, &mut cancel_rx).await
    });

    relay_loop(&mut tts_rx, &client_out).await;

    sender.abort();
    Ok(())
}

/// Assigns its own monotonically increasing `seq`, starting at 1, to every
/// frame it sends — independent of the TTS gateway's own `seq` echo.
async fn sender_loop(
    tts_tx: &mut TtsWrite,
    session_id: String,
    text_rx: &mut mpsc::UnboundedReceiver<Option<String>>,
    cancel_rx: &mut watch::Receiver<bool>,
) {
    let mut seq: u64 = 1;
    loop {
        tokio::select! {
            unit = text_rx.recv() => {
                match unit {
                    Some(Some(text)) => {
                        let msg = TtsMessage::TextDelta {
                            session_id: session_id.clone(),
                            seq,
                            text,
                        };
                        seq += 1;
                        if send(tts_tx, &msg).await.is_err() {
                            return;
                        }
                    }
                    Some(None) => {
                        let msg = TtsMessage::TextEnd { session_id: session_id.clone(), seq };
                        let _ = send(tts_tx, &msg).await;
                        return;
                    }
                    None => return,
                }
            }
            _ = cancel_rx.changed() => {
                if *cancel_rx.borrow() {
                    let msg = TtsMessage::Cancel { session_id: session_id.clone(), seq };
                    let _ = send(tts_tx, &msg).await;
                    return;
                }
            }
        }
    }
}

async fn send(
    tts_tx: &mut TtsWrite,
    msg: &TtsMessage,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let json = msg.to_json().expect("TtsMessage always serializes");
    tts_tx.send(Message::Text(json.into())).await
}

type TtsRead = futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;
type TtsWrite = futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

async fn relay_loop(tts_rx: &mut TtsRead, client_out: &mpsc::UnboundedSender<String>) {
    while let Some(Ok(msg)) = tts_rx.next().await {
        let Message::Text(text) = msg else {
            continue;
        };
        let text = text.to_string();
        let is_terminal = text.contains("\"type\":\"tts_end\"") || text.contains("\"type\":\"error\"");
        if client_out.send(text).is_err() {
            return;
        }
        if is_terminal {
            return;
        }
    }
}
