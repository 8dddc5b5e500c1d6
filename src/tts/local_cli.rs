use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::protocol::AudioSpec;
use crate::tts::wav;
use crate::tts::{SynthesisError, TtsEngine};

/// Shells out to a configurable CLI synthesis binary, grounded on
/// `PiperTtsEngine` in
/// `sglang-server/ws_gateway_tts/tts_engines/piper.py`: write text to stdin,
/// read a WAV file back, validate and strip the RIFF/WAVE header. Output mode
/// mirrors Piper's `file` vs `stdout` split (`TTS_CLI_OUTPUT_MODE`).
pub struct LocalCliEngine {
    bin_path: String,
    model_path: Option<String>,
    extra_args: Vec<String>,
    output_mode: OutputMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    File,
    Stdout,
}

impl LocalCliEngine {
    /// Build from `TTS_CLI_BIN` / `TTS_CLI_MODEL` / `TTS_CLI_ARGS` /
    /// `TTS_CLI_OUTPUT_MODE`, mirroring `PiperTtsEngine::from_env`.
    pub fn from_env() -> anyhow::Result<Self> {
        let bin_path = std::env::var("TTS_CLI_BIN")
            .map_err(|_| anyhow::anyhow!("missing TTS_CLI_BIN (path to the synthesis CLI binary)"))?;
        if bin_path.trim().is_empty() {
            anyhow::bail!("TTS_CLI_BIN must not be empty");
        }
        let model_path = std::env::var("TTS_CLI_MODEL").ok().filter(|s| !s.trim().is_empty());
        let extra_args = std::env::var("TTS_CLI_ARGS")
            .ok()
            .map(|raw| raw.split_whitespace().map(str::to_owned).collect())
            .unwrap_or_default();
        let output_mode = match std::env::var("TTS_CLI_OUTPUT_MODE").ok().as_deref() {
            Some("stdout") => OutputMode::Stdout,
            _ => OutputMode::File,
        };

        Ok(LocalCliEngine {
            bin_path,
            model_path,
            extra_args,
            output_mode,
        })
    }

    fn build_args(&self, output_file: &str) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(model) = &self.model_path {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args.push("--output_file".to_string());
        args.push(output_file.to_string());
        args.extend(self.extra_args.iter().cloned());
        args
    }

    async fn run_tempfile(&self, text: &str) -> Result<Vec<u8>, SynthesisError> {
        let out_path = std::env::temp_dir().join(format!("tts-{}.wav", uuid::Uuid::new_v4()));
        let out_path_str = out_path.to_string_lossy().to_string();

        let mut child = Command::new(&self.bin_path)
            .args(self.build_args(&out_path_str))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SynthesisError::Backend(format!("failed to spawn {}: {e}", self.bin_path)))?;

        let mut stdin = child.stdin.take().expect("stdin was piped");
        stdin
            .write_all(format!("{text}\n").as_bytes())
            .await
            .map_err(|e| SynthesisError::Backend(format!("failed to write stdin: {e}")))?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| SynthesisError::Backend(format!("failed to wait for child: {e}")))?;

        if !output.status.success() {
            let msg = String::from_utf8_lossy(if output.stderr.is_empty() { &output.stdout } else { &output.stderr });
            let _ = tokio::fs::remove_file(&out_path).await;
            return Err(SynthesisError::Backend(format!(
                "{} exited with {}: {}",
                self.bin_path,
                output.status,
                &msg[..msg.len().min(2000)]
            )));
        }

        let wav_bytes = tokio::fs::read(&out_path).await?;
        let _ = tokio::fs::remove_file(&out_path).await;
        Ok(wav_bytes)
    }

    async fn run_stdout(&self, text: &str) -> Result<Vec<u8>, SynthesisError> {
        let mut child = Command::new(&self.bin_path)
            .args(self.build_args("-"))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SynthesisError::Backend(format!("failed to spawn {}: {e}", self.bin_path)))?;

        let mut stdin = child.stdin.take().expect("stdin was piped");
        stdin
            .write_all(format!("{text}\n").as_bytes())
            .await
            .map_err(|e| SynthesisError::Backend(format!("failed to write stdin: {e}")))?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| SynthesisError::Backend(format!("failed to wait for child: {e}")))?;

        if !output.status.success() {
            let msg = String::from_utf8_lossy(&output.stderr);
            return Err(SynthesisError::Backend(format!(
                "{} exited with {}: {}",
                self.bin_path,
                output.status,
                &msg[..msg.len().min(2000)]
            )));
        }

        Ok(output.stdout)
    }
}

impl TtsEngine for LocalCliEngine {
    fn name(&self) -> &'static str {
        "local_cli"
    }

    async fn synthesize_pcm16(&self, text: &str, spec: AudioSpec) -> Result<Vec<u8>, SynthesisError> {
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let raw = match self.output_mode {
            OutputMode::File => self.run_tempfile(text).await?,
            OutputMode::Stdout => self.run_stdout(text).await?,
        };

        // The CLI may emit a WAV file or, depending on its flags, raw PCM16
        // directly; only strip a header when one is actually present, as
        // Piper's own adapter does.
        if raw.len() >= 12 && &raw[0..4] == b"RIFF" && &raw[8..12] == b"WAVE" {
            Ok(wav::strip_and_validate(&raw, &spec)?)
        } else {
            Ok(raw)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_args_includes_model_and_output_file() {
        let engine = LocalCliEngine {
            bin_path: "tts-cli".into(),
            model_path: Some("/models/en.onnx".into()),
            extra_args: vec!["--speaker".into(), "3".into()],
            output_mode: OutputMode::File,
        };
        let args = engine.build_args("/tmp/out.wav");
        assert_eq!(
            args,
            vec!["--model", "/models/en.onnx", "--output_file", "/tmp/out.wav", "--speaker", "3"]
        );
    }

    #[test]
    fn build_args_without_model() {
        let engine = LocalCliEngine {
            bin_path: "tts-cli".into(),
            model_path: None,
            extra_args: vec![],
            output_mode: OutputMode::File,
        };
        let args = engine.build_args("-");
        assert_eq!(args, vec!["--output_file", "-"]);
    }
}
