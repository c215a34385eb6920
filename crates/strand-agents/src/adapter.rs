//! Command construction for the external agent CLI.

use serde::Deserialize;
use std::path::Path;

use crate::error::AgentError;
use crate::types::{AgentCommand, NormalizedModelSpec};

/// One run of an agent with one candidate model.
#[derive(Debug, Clone, Copy)]
pub struct RunSpec<'a> {
    pub agent: &'a str,
    pub model: &'a NormalizedModelSpec,
    /// Session title; carries the tracking token used to find the session later.
    pub title: &'a str,
    /// Continue this session instead of starting a new one.
    pub session: Option<&'a str>,
    pub stdin: Option<&'a Path>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub updated: i64,
}

pub trait AgentAdapter: Send + Sync {
    fn executable(&self) -> &str;

    /// Working run streaming into the terminal.
    fn run_command(&self, spec: &RunSpec<'_>) -> AgentCommand;

    /// Non-interactive run emitting machine-readable output on stdout.
    fn headless_command(&self, spec: &RunSpec<'_>) -> AgentCommand;

    /// Reattach to an existing session.
    fn resume_command(&self, session_id: &str, agent: Option<&str>) -> AgentCommand;

    fn list_sessions_command(&self) -> AgentCommand;

    fn export_command(&self, session_id: &str) -> AgentCommand;

    fn parse_session_list(&self, stdout: &str) -> Result<Vec<SessionSummary>, AgentError>;
}

/// Adapter for `opencode`-style CLIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpencodeAdapter {
    pub executable: String,
}

impl Default for OpencodeAdapter {
    fn default() -> Self {
        Self {
            executable: "opencode".to_string(),
        }
    }
}

impl OpencodeAdapter {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    fn base_run(&self, spec: &RunSpec<'_>) -> AgentCommand {
        let mut command = AgentCommand::new(&self.executable)
            .args(["run", "--model", spec.model.model.as_str()]);
        if let Some(variant) = &spec.model.variant {
            command = command.args(["--variant", variant.as_str()]);
        }
        command = command.args(["--agent", spec.agent, "--title", spec.title]);
        if let Some(session) = spec.session {
            command = command.args(["--session", session]);
        }
        command.stdin = spec.stdin.map(Path::to_path_buf);
        command
    }
}

#[derive(Debug, Deserialize)]
struct RawSession {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default, alias = "updatedAt", alias = "time_updated")]
    updated: i64,
}

impl AgentAdapter for OpencodeAdapter {
    fn executable(&self) -> &str {
        &self.executable
    }

    fn run_command(&self, spec: &RunSpec<'_>) -> AgentCommand {
        self.base_run(spec)
    }

    fn headless_command(&self, spec: &RunSpec<'_>) -> AgentCommand {
        self.base_run(spec).args(["--format", "json"])
    }

    fn resume_command(&self, session_id: &str, agent: Option<&str>) -> AgentCommand {
        let mut command = AgentCommand::new(&self.executable).args(["--session", session_id]);
        if let Some(agent) = agent {
            command = command.args(["--agent", agent]);
        }
        command
    }

    fn list_sessions_command(&self) -> AgentCommand {
        AgentCommand::new(&self.executable).args(["session", "list", "--format", "json"])
    }

    fn export_command(&self, session_id: &str) -> AgentCommand {
        AgentCommand::new(&self.executable).args(["export", session_id])
    }

    fn parse_session_list(&self, stdout: &str) -> Result<Vec<SessionSummary>, AgentError> {
        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        let raw: Vec<RawSession> =
            serde_json::from_str(trimmed).map_err(|err| AgentError::SessionList {
                message: err.to_string(),
            })?;
        Ok(raw
            .into_iter()
            .map(|session| SessionSummary {
                id: session.id,
                title: session.title,
                updated: session.updated,
            })
            .collect())
    }
}

/// Most recently updated session whose title carries `token`.
pub fn find_session_by_token<'a>(
    sessions: &'a [SessionSummary],
    token: &str,
) -> Option<&'a SessionSummary> {
    sessions
        .iter()
        .filter(|session| session.title.contains(token))
        .max_by_key(|session| session.updated)
}
