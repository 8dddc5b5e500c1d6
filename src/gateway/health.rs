//! Backend-readiness probes surfaced on `/healthz`, grounded on
//! `piper_bootstrap.py::get_piper_health_fields`. Model/binary *downloading*
//! is explicitly out of scope (spec.md §1 non-goals); this only reports
//! whether the configured files are already present.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct BackendHealthFields {
    pub engine_binary_exists: Option<bool>,
    pub engine_model_exists: Option<bool>,
    pub engine_model_sample_rate: Option<u32>,
}

/// Inspects whatever the active engine's environment points at:
/// `TTS_CLI_BIN` / `TTS_CLI_MODEL` for `local_cli`, nothing checkable for
/// `dummy` or `remote_rpc` (those have no local files to probe).
pub fn probe(engine_name: &str) -> BackendHealthFields {
    if engine_name != "local_cli" {
        return BackendHealthFields {
            engine_binary_exists: None,
            engine_model_exists: None,
            engine_model_sample_rate: None,
        };
    }

    let bin_path = std::env::var("TTS_CLI_BIN").ok();
    let model_path = std::env::var("TTS_CLI_MODEL").ok();

    let binary_exists = bin_path.as_deref().map(|p| std::path::Path::new(p).is_file());
    let model_exists = model_path.as_deref().map(|p| std::path::Path::new(p).is_file());
    let sample_rate = model_path.as_deref().and_then(model_sample_rate_from_sidecar);

    BackendHealthFields {
        engine_binary_exists: binary_exists,
        engine_model_exists: model_exists,
        engine_model_sample_rate: sample_rate,
    }
}

/// Piper-style models ship a `<model>.json` sidecar describing
/// `audio.sample_rate`; read it if present rather than loading the model.
fn model_sample_rate_from_sidecar(model_path: &str) -> Option<u32> {
    let sidecar = format!("{model_path}.json");
    let contents = std::fs::read_to_string(sidecar).ok()?;
    let value: Value = serde_json::from_str(&contents).ok()?;
    value.get("audio")?.get("sample_rate")?.as_u64().map(|n| n as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_local_cli_engines_report_no_fields() {
        let fields = probe("dummy");
        assert!(fields.engine_binary_exists.is_none());
        assert!(fields.engine_model_exists.is_none());
    }
}
