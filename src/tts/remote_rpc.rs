use serde::{Deserialize, Serialize};

use crate::protocol::AudioSpec;
use crate::tts::wav;
use crate::tts::{SynthesisError, TtsEngine};

/// Calls out to a remote synthesis HTTP endpoint that returns WAV bytes,
/// generalized from `src/voice/tts_local.rs::LocalTts`'s Kokoro-specific
/// `reqwest` POST/JSON-body/WAV-response client into a plain
/// `{text, sample_rate, channels}` request.
pub struct RemoteRpcEngine {
    client: reqwest::Client,
    url: String,
}

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    sample_rate: u32,
    channels: u16,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

impl RemoteRpcEngine {
    /// Build from `TTS_RPC_URL`.
    pub fn from_env() -> anyhow::Result<Self> {
        let url = std::env::var("TTS_RPC_URL")
            .map_err(|_| anyhow::anyhow!("missing TTS_RPC_URL (remote synthesis endpoint)"))?;
        Ok(RemoteRpcEngine {
            client: reqwest::Client::new(),
            url,
        })
    }

    pub fn new(url: impl Into<String>) -> Self {
        RemoteRpcEngine {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

impl TtsEngine for RemoteRpcEngine {
    fn name(&self) -> &'static str {
        "remote_rpc"
    }

    async fn synthesize_pcm16(&self, text: &str, spec: AudioSpec) -> Result<Vec<u8>, SynthesisError> {
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let resp = self
            .client
            .post(&self.url)
            .json(&SynthesizeRequest {
                text,
                sample_rate: spec.sample_rate,
                channels: spec.channels,
            })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.bytes().await.unwrap_or_default();
            let detail = serde_json::from_slice::<ErrorBody>(&body)
                .ok()
                .and_then(|b| b.error)
                .unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned());
            return Err(SynthesisError::Backend(format!(
                "remote tts endpoint returned {status}: {detail}"
            )));
        }

        let wav_bytes = resp.bytes().await?;
        Ok(wav::strip_and_validate(&wav_bytes, &spec)?)
    }
}
