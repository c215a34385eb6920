//! Folding dispatch side channels back into the task document.

use chrono::{DateTime, Utc};

use strand_agents::CompletionMarker;
use strand_core::{
    transition_task, SessionRecord, SessionStatus, TaskDocument, TaskId, TaskStatus, ThreadId,
};

use crate::error::ExecError;
use crate::manifest::SessionManifest;
use crate::markers::{read_marker, read_session_id, read_synthesis, ScratchLayout};

/// What the scratch directory says about one dispatched thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadOutcome {
    pub thread_id: ThreadId,
    pub task_id: Option<TaskId>,
    pub agent_name: String,
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub marker: Option<CompletionMarker>,
    pub session_id: Option<String>,
    pub synthesis: Option<String>,
}

impl ThreadOutcome {
    pub fn is_finished(&self) -> bool {
        self.marker.is_some()
    }
}

pub fn gather_outcomes(
    manifest: &SessionManifest,
    layout: &ScratchLayout,
) -> Result<Vec<ThreadOutcome>, ExecError> {
    manifest
        .threads
        .iter()
        .map(|entry| {
            let thread = &entry.thread_id;
            let session_id = read_session_id(&layout.session_path(thread))?
                .or_else(|| entry.session_id.clone());
            let marker = read_marker(&layout.done_path(thread))?;
            Ok(ThreadOutcome {
                thread_id: *thread,
                task_id: entry.task_id,
                agent_name: entry.agent_name.clone(),
                model: entry.model_for(marker.map(|marker| marker.attempt)),
                started_at: manifest.created_at,
                marker,
                session_id,
                synthesis: read_synthesis(&layout.synthesis_path(thread))?,
            })
        })
        .collect()
}

/// Move the open tasks of every dispatched thread from pending to in progress.
pub fn mark_dispatched(
    doc: &mut TaskDocument,
    threads: &[ThreadId],
    at: DateTime<Utc>,
) -> Vec<TaskId> {
    let mut started = Vec::new();
    for task in doc.tasks.iter_mut() {
        let dispatched = threads.iter().any(|thread| task.id.belongs_to(thread));
        if dispatched
            && task.status == TaskStatus::Pending
            && transition_task(task, TaskStatus::InProgress, at).is_ok()
        {
            started.push(task.id);
        }
    }
    started
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectSummary {
    pub completed: Vec<ThreadId>,
    pub failed: Vec<ThreadId>,
    pub running: Vec<ThreadId>,
    /// Finished threads whose agent session could not be located.
    pub unlocated: Vec<ThreadId>,
    pub reports: Vec<TaskId>,
}

/// Record each outcome as a session on the thread's anchor task.
pub fn apply_outcomes(
    doc: &mut TaskDocument,
    outcomes: &[ThreadOutcome],
    at: DateTime<Utc>,
) -> Result<CollectSummary, ExecError> {
    let mut summary = CollectSummary::default();
    for outcome in outcomes {
        let Some(task_id) = outcome.task_id else {
            tracing::warn!(thread = %outcome.thread_id, "no anchor task recorded; skipping");
            continue;
        };
        let task = doc
            .require_mut(&task_id)
            .map_err(|err| ExecError::runtime(err.to_string()))?;

        let status = match &outcome.marker {
            Some(marker) if marker.succeeded() => SessionStatus::Completed,
            Some(_) => SessionStatus::Failed,
            None => SessionStatus::Running,
        };
        match status {
            SessionStatus::Completed => summary.completed.push(outcome.thread_id),
            SessionStatus::Failed => summary.failed.push(outcome.thread_id),
            SessionStatus::Running => summary.running.push(outcome.thread_id),
        }

        match &outcome.session_id {
            Some(session_id) => task.upsert_session(SessionRecord {
                session_id: session_id.clone(),
                agent_name: outcome.agent_name.clone(),
                model: outcome.model.clone(),
                started_at: outcome.started_at,
                completed_at: outcome.marker.map(|_| at),
                status,
                exit_code: outcome.marker.map(|marker| marker.exit_code),
            }),
            None if outcome.is_finished() => {
                tracing::warn!(thread = %outcome.thread_id, "finished without a located session");
                summary.unlocated.push(outcome.thread_id);
            }
            None => {}
        }

        if let Some(report) = &outcome.synthesis {
            task.report = Some(report.clone());
            task.updated_at = at;
            summary.reports.push(task_id);
        }
    }
    Ok(summary)
}
