use std::path::PathBuf;

use strand_agents::AgentError;
use strand_core::{
    ApprovalError, ConfigError, ExecutionBlockReason, IdentifierError, IndexError,
    StateMachineError,
};
use strand_exec::ExecError;
use strand_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum MainError {
    #[error("failed to determine current directory: {source}")]
    CurrentDir {
        #[source]
        source: std::io::Error,
    },
    #[error("failed to locate the strand executable: {source}")]
    CurrentExe {
        #[source]
        source: std::io::Error,
    },
    #[error("no stream selected; pass --stream or run `strand stream use <id>`")]
    NoStream,
    #[error("stream '{stream}' has no task document at {path}")]
    NoTasks { stream: String, path: PathBuf },
    #[error("{0}")]
    Args(String),
    #[error("stage {stage} is not ready to run; pass --force to dispatch anyway")]
    GateClosed {
        stage: u32,
        reasons: Vec<ExecutionBlockReason>,
    },
    #[error("failed to load config at {path}: {source}")]
    LoadConfig {
        path: PathBuf,
        #[source]
        source: ConfigError,
    },
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to remove {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode output: {source}")]
    Encode {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to install signal handler: {source}")]
    Signal {
        #[source]
        source: std::io::Error,
    },
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{command} exited with status {status:?}: {}", .stderr.trim())]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("no agent session found with token {token}")]
    SessionNotFound { token: String },
    #[error(transparent)]
    Identifier(#[from] IdentifierError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Transition(#[from] StateMachineError),
    #[error(transparent)]
    Approval(#[from] ApprovalError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error(transparent)]
    Exec(#[from] ExecError),
}

impl MainError {
    /// Extra lines printed under the error message.
    pub fn details(&self) -> Vec<String> {
        match self {
            MainError::Approval(ApprovalError::ApprovalBlocked { blockers, .. }) => blockers
                .iter()
                .map(|blocker| format!("  - {blocker}"))
                .chain(std::iter::once(
                    "  pass --force to approve anyway".to_string(),
                ))
                .collect(),
            MainError::GateClosed { reasons, .. } => {
                reasons.iter().map(|reason| format!("  - {reason}")).collect()
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_core::{ApprovalStatus, ThreadBlocker, ThreadId};

    #[test]
    fn blocked_approval_lists_threads() {
        let err = MainError::from(ApprovalError::ApprovalBlocked {
            stage: 1,
            blockers: vec![ThreadBlocker {
                thread_id: ThreadId::new(1, 1, 2),
                remaining_task_count: 3,
            }],
        });
        assert_eq!(
            err.details(),
            vec![
                "  - thread 01.01.02 has 3 unfinished task(s)".to_string(),
                "  pass --force to approve anyway".to_string(),
            ]
        );
    }

    #[test]
    fn closed_gate_lists_reasons() {
        let err = MainError::GateClosed {
            stage: 2,
            reasons: vec![ExecutionBlockReason::PreviousStageNotApproved {
                stage: 1,
                status: ApprovalStatus::Draft,
            }],
        };
        assert!(err.to_string().contains("--force"));
        assert_eq!(err.details().len(), 1);
        assert!(err.details()[0].contains("stage 1"));
    }
}
