use serde::{Deserialize, Serialize};

/// Error codes carried on `error` / `orchestrator_error` frames (spec.md
/// §4.1, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BadRequest,
    Backpressure,
    ResumeNotAvailable,
    InternalError,
    TtsSendError,
    LlmParseError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "bad_request",
            ErrorCode::Backpressure => "backpressure",
            ErrorCode::ResumeNotAvailable => "resume_not_available",
            ErrorCode::InternalError => "internal_error",
            ErrorCode::TtsSendError => "tts_send_error",
            ErrorCode::LlmParseError => "llm_parse_error",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_match_spec() {
        assert_eq!(ErrorCode::BadRequest.as_str(), "bad_request");
        assert_eq!(ErrorCode::ResumeNotAvailable.as_str(), "resume_not_available");
        assert_eq!(ErrorCode::TtsSendError.as_str(), "tts_send_error");
        assert_eq!(ErrorCode::LlmParseError.as_str(), "llm_parse_error");
    }
}
