use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use strand_agents::AgentError;
use strand_store::StoreError;
use strand_tmux::TmuxError;

/// Wire-level error classification carried inside results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidConfiguration,
    BackendNotAvailable,
    NotSupported,
    NotImplemented,
    RuntimeError,
    SessionAlreadyExists,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidConfiguration => "InvalidConfiguration",
            ErrorCode::BackendNotAvailable => "BackendNotAvailable",
            ErrorCode::NotSupported => "NotSupported",
            ErrorCode::NotImplemented => "NotImplemented",
            ErrorCode::RuntimeError => "RuntimeError",
            ErrorCode::SessionAlreadyExists => "SessionAlreadyExists",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionErrorPayload {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ExecutionErrorPayload {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },
    #[error("backend {backend} is not available: {reason}")]
    BackendNotAvailable { backend: String, reason: String },
    #[error("backend {backend} does not support {operation}")]
    NotSupported { backend: String, operation: String },
    #[error("backend {backend} has not implemented {operation}")]
    NotImplemented { backend: String, operation: String },
    #[error("{message}")]
    Runtime { message: String },
    #[error("tmux session {session} is already running; abort it or wait for it to finish")]
    SessionAlreadyExists { session: String },
    #[error("failed to set up pane for thread {thread}: {source}")]
    PaneSetup {
        thread: String,
        #[source]
        source: TmuxError,
    },
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Tmux(#[from] TmuxError),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ExecError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ExecError::InvalidConfiguration {
            message: message.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        ExecError::Runtime {
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ExecError::InvalidConfiguration { .. } | ExecError::Agent(_) => {
                ErrorCode::InvalidConfiguration
            }
            ExecError::BackendNotAvailable { .. } => ErrorCode::BackendNotAvailable,
            ExecError::NotSupported { .. } => ErrorCode::NotSupported,
            ExecError::NotImplemented { .. } => ErrorCode::NotImplemented,
            ExecError::SessionAlreadyExists { .. } => ErrorCode::SessionAlreadyExists,
            ExecError::Runtime { .. }
            | ExecError::PaneSetup { .. }
            | ExecError::Io { .. }
            | ExecError::Decode { .. }
            | ExecError::Encode { .. }
            | ExecError::Tmux(_)
            | ExecError::Store(_) => ErrorCode::RuntimeError,
        }
    }

    pub fn payload(&self) -> ExecutionErrorPayload {
        ExecutionErrorPayload::new(self.code(), self.to_string())
    }
}

pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> ExecError {
    ExecError::Io {
        path: path.into(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_taxonomy() {
        assert_eq!(
            ExecError::invalid("no models").code(),
            ErrorCode::InvalidConfiguration
        );
        assert_eq!(
            ExecError::SessionAlreadyExists {
                session: "strand-auth-s01".to_string()
            }
            .code(),
            ErrorCode::SessionAlreadyExists
        );
        assert_eq!(
            ExecError::Agent(AgentError::NoModels {
                agent: "build".to_string()
            })
            .code(),
            ErrorCode::InvalidConfiguration
        );
        assert_eq!(ExecError::runtime("boom").code(), ErrorCode::RuntimeError);
    }

    #[test]
    fn payload_serializes_code_by_name() {
        let payload = ExecError::NotSupported {
            backend: "subagent".to_string(),
            operation: "execute".to_string(),
        }
        .payload()
        .with_details(serde_json::json!({"threadId": "01.01.01"}));
        let json = serde_json::to_value(&payload).expect("encode");
        assert_eq!(json["code"], "NotSupported");
        assert_eq!(json["message"], "backend subagent does not support execute");
        assert_eq!(json["details"]["threadId"], "01.01.01");
    }
}
