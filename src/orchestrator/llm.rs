//! Upstream chat-completions SSE streaming, tool-call accumulation, and the
//! text-flush rules that feed the TTS bridge's text queue. Grounded on
//! `src/agent/llm.rs::stream_complete`'s `bytes_stream()` + `"\n\n"`-event
//! loop (SSE framing) generalized with the tool-call delta handling from
//! `orchestrator/server.py::_stream_sglang_deltas` /
//! `_apply_tool_calls_delta`, which the teacher's own streamer doesn't need.

use std::collections::BTreeMap;

use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::{mpsc, watch};

use crate::protocol::{ChatMessage, ToolCallFunction, ToolCallSnapshot};

/// `，。！？；：,.!?;\n` — matches `orchestrator/server.py::PUNCTUATION` exactly.
const PUNCTUATION: &[char] = &['，', '。', '！', '？', '；', '：', ',', '.', '!', '?', ';', '\n'];

pub struct FlushConfig {
    pub min_chars: usize,
    pub on_punct: bool,
}

pub struct LlmStreamConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl LlmStreamConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let base_url = std::env::var("SGLANG_BASE_URL").unwrap_or_else(|_| "http://localhost:8082".to_string());
        let api_key = std::env::var("SGLANG_API_KEY")
            .map_err(|_| anyhow::anyhow!("missing SGLANG_API_KEY"))?;
        let model = std::env::var("SGLANG_MODEL").unwrap_or_else(|_| "Qwen/Qwen2.5-1.5B-Instruct".to_string());
        Ok(LlmStreamConfig { base_url, api_key, model })
    }
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<RawToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct RawToolCallDelta {
    #[serde(default)]
    index: Option<i64>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<RawFunctionDelta>,
}

#[derive(Debug, Deserialize, Default)]
struct RawFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Mapping `index -> {id, function_name, arguments_buffer}` reconstructed
/// incrementally from provider deltas (spec.md §3).
#[derive(Default)]
struct ToolCallAccumulator {
    by_index: BTreeMap<i64, ToolCallSnapshot>,
}

impl ToolCallAccumulator {
    fn apply(&mut self, deltas: &[RawToolCallDelta]) {
        for (position, delta) in deltas.iter().enumerate() {
            let index = delta.index.unwrap_or(position as i64);
            let entry = self.by_index.entry(index).or_insert_with(|| ToolCallSnapshot {
                index,
                id: String::new(),
                function: ToolCallFunction::default(),
            });

            if let Some(id) = &delta.id {
                if !id.is_empty() {
                    entry.id = id.clone();
                }
            }
            if let Some(func) = &delta.function {
                if let Some(name) = &func.name {
                    if !name.is_empty() {
                        entry.function.name = name.clone();
                    }
                }
                if let Some(args) = &func.arguments {
                    if !args.is_empty() {
                        entry.function.arguments.push_str(args);
                    }
                }
            }
        }
    }

    fn snapshot(&self) -> Vec<ToolCallSnapshot> {
        self.by_index.values().cloned().collect()
    }
}

pub struct LlmResult {
    pub full_text: String,
    pub tool_calls: Vec<ToolCallSnapshot>,
}

/// Runs the upstream SSE stream to completion (or until `stop` fires),
/// emitting `llm_delta` / `tool_calls_delta` / `orchestrator_error` frames to
/// `client_out` as they occur and pushing flushed text units to
/// `tts_text_tx`. On a clean finish it flushes any remainder and pushes the
/// `None` sentinel so the bridge's sender task knows to send `text_end`; on
/// `stop`, it returns without pushing a sentinel (spec.md §4.6 "On external
/// stop signal ... do not push sentinel").
pub async fn stream_deltas(
    http: &reqwest::Client,
    config: &LlmStreamConfig,
    prompt: &str,
    client_out: &mpsc::UnboundedSender<String>,
    tts_text_tx: &mpsc::UnboundedSender<Option<String>>,
    flush: &FlushConfig,
    mut stop: watch::Receiver<bool>,
) -> anyhow::Result<LlmResult> {
    let url = format!("{}/v1/chat/completions", config.base_url.trim_end_matches('/'));
    let body = serde_json::json!({
        "model": config.model,
        "messages": [{"role": "user", "content": prompt}],
        "stream": true,
    });

    let response = http
        .post(&url)
        .bearer_auth(&config.api_key)
        .json(&body)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let snippet: String = text.chars().take(2000).collect();
        anyhow::bail!("upstream chat-completions returned {status}: {snippet}");
    }

    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    let mut full_text = String::new();
    let mut tts_buffer = String::new();
    let mut tool_acc = ToolCallAccumulator::default();

    'outer: while let Some(chunk) = stream.next().await {
        if *stop.borrow() {
            break;
        }
        let chunk = chunk?;
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(pos) = buffer.find("\n\n") {
            if *stop.borrow() {
                break 'outer;
            }
            let event = buffer[..pos].to_string();
            buffer.drain(..pos + 2);

            for line in event.lines() {
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    break 'outer;
                }

                let delta = match serde_json::from_str::<StreamResponse>(data) {
                    Ok(parsed) => match parsed.choices.into_iter().next() {
                        Some(choice) => choice.delta,
                        None => continue,
                    },
                    Err(_) => {
                        send(client_out, &ChatMessage::OrchestratorError {
                            code: crate::protocol::ErrorCode::LlmParseError,
                            message: data.chars().take(2000).collect(),
                        });
                        continue;
                    }
                };

                if !delta.tool_calls.is_empty() {
                    tool_acc.apply(&delta.tool_calls);
                    send(client_out, &ChatMessage::ToolCallsDelta {
                        tool_calls: tool_acc.snapshot(),
                    });
                }

                if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                    full_text.push_str(&content);
                    send(client_out, &ChatMessage::LlmDelta { delta: content.clone() });
                    tts_buffer.push_str(&content);

                    if tts_buffer.chars().count() >= flush.min_chars {
                        let _ = tts_text_tx.send(Some(std::mem::take(&mut tts_buffer)));
                    } else if flush.on_punct && tts_buffer.chars().last().is_some_and(|c| PUNCTUATION.contains(&c)) {
                        let _ = tts_text_tx.send(Some(std::mem::take(&mut tts_buffer)));
                    }
                }
            }
        }
    }

    if !*stop.borrow() {
        if !tts_buffer.is_empty() {
            let _ = tts_text_tx.send(Some(tts_buffer));
        }
        let _ = tts_text_tx.send(None);
    }

    Ok(LlmResult {
        full_text,
        tool_calls: tool_acc.snapshot(),
    })
}

fn send(client_out: &mpsc::UnboundedSender<String>, msg: &ChatMessage) {
    if let Ok(json) = serde_json::to_string(msg) {
        let _ = client_out.send(json);
    }
}
