use serde::{Deserialize, Serialize};
use std::str::FromStr;

use strand_core::StrandConfig;

use crate::error::ExecError;
use crate::request::{
    ExecutionStatus, ThreadExecutionRequest, ThreadExecutionResult, ThreadSessionMap,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Tmux,
    Subagent,
    Sdk,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [BackendKind::Tmux, BackendKind::Subagent, BackendKind::Sdk];

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Tmux => "tmux",
            BackendKind::Subagent => "subagent",
            BackendKind::Sdk => "sdk",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tmux" => Ok(BackendKind::Tmux),
            "subagent" => Ok(BackendKind::Subagent),
            "sdk" => Ok(BackendKind::Sdk),
            other => Err(format!(
                "unknown backend '{other}' (valid values: tmux, subagent, sdk)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Threads run in live terminal panes.
    Multiplexed,
    /// Nothing ran; every thread was answered `not_supported`.
    Degraded,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::Multiplexed => "multiplexed",
            ExecutionMode::Degraded => "degraded",
        }
    }
}

/// Outcome of dispatching one batch. `results` yields one entry per request,
/// in submission order.
pub struct BatchExecution {
    pub backend: BackendKind,
    pub mode: ExecutionMode,
    /// tmux session hosting the batch, when there is one.
    pub session_name: Option<String>,
    pub thread_session_map: Vec<ThreadSessionMap>,
    pub results: Box<dyn Iterator<Item = ThreadExecutionResult>>,
}

impl std::fmt::Debug for BatchExecution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchExecution")
            .field("backend", &self.backend)
            .field("mode", &self.mode)
            .field("session_name", &self.session_name)
            .field("thread_session_map", &self.thread_session_map)
            .finish_non_exhaustive()
    }
}

impl BatchExecution {
    pub fn new(
        backend: BackendKind,
        mode: ExecutionMode,
        results: Vec<ThreadExecutionResult>,
    ) -> Self {
        Self {
            backend,
            mode,
            session_name: None,
            thread_session_map: Vec::new(),
            results: Box::new(results.into_iter()),
        }
    }
}

pub trait ExecutionBackend {
    fn kind(&self) -> BackendKind;

    /// Cheap host check; never starts anything.
    fn is_available(&self) -> bool;

    fn initialize(&mut self, config: &StrandConfig) -> Result<(), ExecError>;

    /// Dispatch `requests`. Per-thread problems become failed results; only
    /// setup failures that affect the whole batch are errors.
    fn execute_batch(
        &mut self,
        requests: Vec<ThreadExecutionRequest>,
    ) -> Result<BatchExecution, ExecError>;

    /// Best effort, whole batch.
    fn abort_all(&mut self) -> Result<(), ExecError>;

    fn dispose(&mut self) -> Result<(), ExecError>;
}

/// Validate every request up front: valid ones are returned with their
/// position, invalid ones become failed results in their slot.
pub(crate) fn partition_requests(
    requests: Vec<ThreadExecutionRequest>,
) -> (
    Vec<(usize, ThreadExecutionRequest)>,
    Vec<Option<ThreadExecutionResult>>,
) {
    let mut slots = vec![None; requests.len()];
    let mut valid = Vec::new();
    for (idx, request) in requests.into_iter().enumerate() {
        match request.validate() {
            Ok(()) => valid.push((idx, request)),
            Err(err) => {
                tracing::warn!(thread = %request.thread_id, error = %err, "rejected request");
                slots[idx] = Some(ThreadExecutionResult::rejected(request.thread_id, &err));
            }
        }
    }
    (valid, slots)
}

/// Answer every request `not_supported` with `err` as its payload.
pub(crate) fn degraded_batch(
    kind: BackendKind,
    requests: Vec<ThreadExecutionRequest>,
    err: &ExecError,
) -> BatchExecution {
    let results = requests
        .into_iter()
        .map(|request| {
            let mut result = ThreadExecutionResult::rejected(request.thread_id, err);
            result.status = ExecutionStatus::NotSupported;
            result
        })
        .collect();
    BatchExecution::new(kind, ExecutionMode::Degraded, results)
}
