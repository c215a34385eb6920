//! Runs the tmux binary and sorts its failures.
//!
//! tmux reports "nothing there" and "cannot talk to the server" with the same
//! exit status, so failures are classified from stderr.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::TmuxError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmuxOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmuxCli {
    pub binary: PathBuf,
}

impl Default for TmuxCli {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("tmux"),
        }
    }
}

impl TmuxCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn run<I, S>(&self, args: I) -> Result<TmuxOutput, TmuxError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<OsString> = args
            .into_iter()
            .map(|arg| arg.as_ref().to_os_string())
            .collect();
        let rendered = render_command(&self.binary, &args);
        tracing::debug!(command = %rendered, "tmux");

        let output = Command::new(&self.binary)
            .args(&args)
            .output()
            .map_err(|source| TmuxError::Spawn {
                command: rendered.clone(),
                source,
            })?;

        // Pane titles and paths may carry arbitrary bytes.
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if output.status.success() {
            return Ok(TmuxOutput { stdout, stderr });
        }
        Err(classify_failure(rendered, output.status.code(), stderr))
    }
}

const MISSING_TARGET_PREFIXES: [&str; 4] = [
    "can't find session: ",
    "can't find window: ",
    "can't find pane: ",
    "session not found: ",
];

pub(crate) fn classify_failure(command: String, status: Option<i32>, stderr: String) -> TmuxError {
    let message = stderr.trim();
    let socket_missing = message.starts_with("error connecting to")
        && message.contains("(No such file or directory)");
    if message.starts_with("no server running") || socket_missing {
        return TmuxError::NoServer { command };
    }
    for prefix in MISSING_TARGET_PREFIXES {
        if let Some(target) = message.strip_prefix(prefix) {
            return TmuxError::TargetNotFound {
                command,
                target: target.trim().to_string(),
            };
        }
    }
    if let Some(session) = message.strip_prefix("duplicate session: ") {
        return TmuxError::DuplicateSession {
            session: session.trim().to_string(),
        };
    }
    TmuxError::CommandFailed {
        command,
        status,
        stderr,
    }
}

pub(crate) fn render_command(binary: &Path, args: &[OsString]) -> String {
    let mut rendered = binary.to_string_lossy().into_owned();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(&arg.to_string_lossy());
    }
    rendered
}
