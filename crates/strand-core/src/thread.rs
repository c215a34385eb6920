//! Thread-level views over a stream's tasks.

use serde::{Deserialize, Serialize};

use crate::id::ThreadId;
use crate::state::{SessionStatus, TaskStatus, ThreadStatus};
use crate::types::{Task, TaskDocument};

/// Infer a thread's status from its tasks.
///
/// Precedence: failed, completed, running, incomplete. A thread is failed
/// as soon as any of its tasks has a failed session, retried or not.
pub fn infer_thread_status<'a, I>(tasks: I) -> ThreadStatus
where
    I: IntoIterator<Item = &'a Task>,
{
    let mut any = false;
    let mut all_done = true;
    let mut any_running = false;

    for task in tasks {
        any = true;
        if task
            .sessions
            .iter()
            .any(|session| session.status == SessionStatus::Failed)
        {
            return ThreadStatus::Failed;
        }
        if !task.status.is_done() {
            all_done = false;
        }
        if task.status == TaskStatus::InProgress {
            any_running = true;
        }
    }

    if any && all_done {
        ThreadStatus::Completed
    } else if any_running {
        ThreadStatus::Running
    } else {
        ThreadStatus::Incomplete
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSummary {
    pub thread_id: ThreadId,
    pub stage_name: String,
    pub batch_name: String,
    pub thread_name: String,
    pub status: ThreadStatus,
    pub task_count: usize,
    pub remaining_task_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_session_id: Option<String>,
}

pub fn summarize_thread(doc: &TaskDocument, thread_id: &ThreadId) -> Option<ThreadSummary> {
    let tasks: Vec<&Task> = doc.tasks_in_thread(thread_id).collect();
    let first = tasks.first()?;
    let last_session_id = tasks
        .iter()
        .filter_map(|task| task.last_session())
        .max_by_key(|session| session.started_at)
        .map(|session| session.session_id.clone());

    Some(ThreadSummary {
        thread_id: *thread_id,
        stage_name: first.stage_name.clone(),
        batch_name: first.batch_name.clone(),
        thread_name: first.thread_name.clone(),
        status: infer_thread_status(tasks.iter().copied()),
        task_count: tasks.len(),
        remaining_task_count: tasks.iter().filter(|task| !task.status.is_done()).count(),
        last_session_id,
    })
}

pub fn summarize_threads(doc: &TaskDocument) -> Vec<ThreadSummary> {
    doc.thread_ids()
        .iter()
        .filter_map(|thread_id| summarize_thread(doc, thread_id))
        .collect()
}
