#[derive(Debug, thiserror::Error)]
pub enum TmuxError {
    #[error("could not start tmux ({command}): {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no tmux server is running ({command})")]
    NoServer { command: String },
    #[error("tmux could not find {target} ({command})")]
    TargetNotFound { command: String, target: String },
    #[error("tmux session {session} already exists")]
    DuplicateSession { session: String },
    #[error("tmux exited with status {status:?} ({command}): {}", .stderr.trim())]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("invalid tmux output: {context}")]
    Parse { context: String },
}

impl TmuxError {
    /// The server or the addressed target simply is not there.
    pub fn is_missing(&self) -> bool {
        matches!(
            self,
            TmuxError::NoServer { .. } | TmuxError::TargetNotFound { .. }
        )
    }
}
