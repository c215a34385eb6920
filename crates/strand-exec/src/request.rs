use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use strand_agents::{NormalizedModelSpec, SynthesisSpec};
use strand_core::{TaskId, ThreadId};
use strand_tmux::PaneId;

use crate::error::{ExecError, ExecutionErrorPayload};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadExecutionRequest {
    pub thread_id: ThreadId,
    pub thread_name: String,
    pub stage_name: String,
    pub batch_name: String,
    pub prompt_path: PathBuf,
    /// Candidates in failover order.
    pub models: Vec<NormalizedModelSpec>,
    pub agent_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Anchor task the thread's sessions are recorded on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_task_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<SynthesisSpec>,
}

impl ThreadExecutionRequest {
    pub fn validate(&self) -> Result<(), ExecError> {
        if self.models.is_empty() {
            return Err(ExecError::invalid(format!(
                "thread {} has no candidate models",
                self.thread_id
            )));
        }
        if self.agent_name.trim().is_empty() {
            return Err(ExecError::invalid(format!(
                "thread {} has no agent",
                self.thread_id
            )));
        }
        if self.prompt_path.as_os_str().is_empty() {
            return Err(ExecError::invalid(format!(
                "thread {} is missing promptPath",
                self.thread_id
            )));
        }
        if !self.prompt_path.is_file() {
            return Err(ExecError::invalid(format!(
                "prompt for thread {} not found at {}",
                self.thread_id,
                self.prompt_path.display()
            )));
        }
        if let Some(synthesis) = &self.synthesis {
            if synthesis.models.is_empty() {
                return Err(ExecError::invalid(format!(
                    "synthesis agent {} has no candidate models",
                    synthesis.agent_name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Started,
    Completed,
    Failed,
    Aborted,
    NotSupported,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Started => "started",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Aborted => "aborted",
            ExecutionStatus::NotSupported => "not_supported",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisOutput {
    pub path: PathBuf,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadExecutionResult {
    pub thread_id: ThreadId,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<SynthesisOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionErrorPayload>,
}

impl ThreadExecutionResult {
    pub fn new(thread_id: ThreadId, status: ExecutionStatus) -> Self {
        Self {
            thread_id,
            status,
            session_id: None,
            duration_ms: 0,
            exit_code: None,
            synthesis: None,
            error: None,
        }
    }

    pub fn started(thread_id: ThreadId, session_id: Option<String>) -> Self {
        Self {
            session_id,
            ..Self::new(thread_id, ExecutionStatus::Started)
        }
    }

    pub fn failed(thread_id: ThreadId, error: ExecutionErrorPayload) -> Self {
        Self {
            error: Some(error),
            ..Self::new(thread_id, ExecutionStatus::Failed)
        }
    }

    pub fn rejected(thread_id: ThreadId, err: &ExecError) -> Self {
        Self::failed(thread_id, err.payload())
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status != ExecutionStatus::Started
    }
}

/// Addressing record for one dispatched thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSessionMap {
    pub thread_id: ThreadId,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub task_id: Option<TaskId>,
    #[serde(default)]
    pub pane_id: Option<PaneId>,
    #[serde(default)]
    pub window_index: Option<u32>,
    pub agent_name: String,
    /// Candidate labels in failover order.
    #[serde(default)]
    pub models: Vec<String>,
    pub tracking_token: String,
}

impl ThreadSessionMap {
    /// Label of the candidate that ran `attempt` (1-based). Without a marker
    /// the first candidate is assumed.
    pub fn model_for(&self, attempt: Option<usize>) -> String {
        let index = attempt.unwrap_or(1).saturating_sub(1);
        self.models
            .get(index)
            .or_else(|| self.models.last())
            .cloned()
            .unwrap_or_default()
    }
}
