//! Persisted data model: the stream index and per-stream task documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::id::{TaskId, ThreadId};
use crate::state::{ApprovalStatus, SessionStatus, StreamStatus, TaskStatus};

pub const INDEX_VERSION: u32 = 1;
pub const TASK_DOCUMENT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndexError {
    #[error("stream '{stream_id}' already exists")]
    DuplicateStream { stream_id: String },
    #[error("stream '{stream_id}' does not exist")]
    UnknownStream { stream_id: String },
    #[error("task {task_id} already exists in stream '{stream_id}'")]
    DuplicateTask { stream_id: String, task_id: TaskId },
    #[error("task {task_id} does not exist in stream '{stream_id}'")]
    UnknownTask { stream_id: String, task_id: TaskId },
}

/// One tri-state approval record, used for the stream and for each stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRecord {
    pub status: ApprovalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalMetadata {
    pub status: ApprovalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_reason: Option<String>,
    #[serde(default)]
    pub stages: BTreeMap<u32, ApprovalRecord>,
}

impl ApprovalMetadata {
    pub fn stream_record(&self) -> ApprovalRecord {
        ApprovalRecord {
            status: self.status,
            approved_at: self.approved_at,
            approved_by: self.approved_by.clone(),
            revoked_at: self.revoked_at,
            revoked_reason: self.revoked_reason.clone(),
        }
    }

    pub fn set_stream_record(&mut self, record: ApprovalRecord) {
        self.status = record.status;
        self.approved_at = record.approved_at;
        self.approved_by = record.approved_by;
        self.revoked_at = record.revoked_at;
        self.revoked_reason = record.revoked_reason;
    }

    pub fn stage_status(&self, stage: u32) -> ApprovalStatus {
        self.stages
            .get(&stage)
            .map(|record| record.status)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMetadata {
    pub id: String,
    pub name: String,
    pub order: u32,
    pub status: StreamStatus,
    /// Manual status that wins over the derived one (e.g. on_hold).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_override: Option<StreamStatus>,
    #[serde(default)]
    pub approval: ApprovalMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StreamMetadata {
    pub fn new(id: impl Into<String>, name: impl Into<String>, order: u32) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            order,
            status: StreamStatus::Pending,
            status_override: None,
            approval: ApprovalMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Recompute `status` from the task set, honoring a manual override.
    pub fn refresh_status(&mut self, tasks: &[Task]) {
        let derived = derive_stream_status(tasks);
        let next = self.status_override.unwrap_or(derived);
        if next != self.status {
            self.status = next;
            self.updated_at = Utc::now();
        }
    }
}

pub fn derive_stream_status(tasks: &[Task]) -> StreamStatus {
    if tasks.is_empty() {
        return StreamStatus::Pending;
    }
    if tasks.iter().all(|task| task.status.is_done()) {
        return StreamStatus::Completed;
    }
    let started = tasks
        .iter()
        .any(|task| task.status != TaskStatus::Pending || !task.sessions.is_empty());
    if started {
        StreamStatus::InProgress
    } else {
        StreamStatus::Pending
    }
}

/// Root of the persisted index, one per repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamIndex {
    pub version: u32,
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stream: Option<String>,
    #[serde(default)]
    pub streams: Vec<StreamMetadata>,
}

impl Default for StreamIndex {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION,
            last_updated: Utc::now(),
            current_stream: None,
            streams: Vec::new(),
        }
    }
}

impl StreamIndex {
    pub fn find(&self, stream_id: &str) -> Option<&StreamMetadata> {
        self.streams.iter().find(|stream| stream.id == stream_id)
    }

    pub fn find_mut(&mut self, stream_id: &str) -> Option<&mut StreamMetadata> {
        self.streams.iter_mut().find(|stream| stream.id == stream_id)
    }

    pub fn require(&self, stream_id: &str) -> Result<&StreamMetadata, IndexError> {
        self.find(stream_id).ok_or_else(|| IndexError::UnknownStream {
            stream_id: stream_id.to_string(),
        })
    }

    pub fn require_mut(&mut self, stream_id: &str) -> Result<&mut StreamMetadata, IndexError> {
        self.find_mut(stream_id)
            .ok_or_else(|| IndexError::UnknownStream {
                stream_id: stream_id.to_string(),
            })
    }

    /// Next order value; gaps left by removed streams are never reused.
    pub fn next_order(&self) -> u32 {
        self.streams
            .iter()
            .map(|stream| stream.order)
            .max()
            .map(|max| max + 1)
            .unwrap_or(1)
    }

    pub fn add_stream(&mut self, stream: StreamMetadata) -> Result<(), IndexError> {
        if self.find(&stream.id).is_some() {
            return Err(IndexError::DuplicateStream {
                stream_id: stream.id,
            });
        }
        self.streams.push(stream);
        Ok(())
    }

    pub fn remove_stream(&mut self, stream_id: &str) -> Result<StreamMetadata, IndexError> {
        let pos = self
            .streams
            .iter()
            .position(|stream| stream.id == stream_id)
            .ok_or_else(|| IndexError::UnknownStream {
                stream_id: stream_id.to_string(),
            })?;
        if self.current_stream.as_deref() == Some(stream_id) {
            self.current_stream = None;
        }
        Ok(self.streams.remove(pos))
    }

    pub fn set_current(&mut self, stream_id: &str) -> Result<(), IndexError> {
        self.require(stream_id)?;
        self.current_stream = Some(stream_id.to_string());
        Ok(())
    }

    /// Ids are unique and `current_stream` points at an existing stream.
    pub fn check_invariants(&self) -> Result<(), IndexError> {
        let mut seen = BTreeSet::new();
        for stream in &self.streams {
            if !seen.insert(stream.id.as_str()) {
                return Err(IndexError::DuplicateStream {
                    stream_id: stream.id.clone(),
                });
            }
        }
        if let Some(current) = &self.current_stream {
            self.require(current)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub agent_name: String,
    pub model: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// Reference to an item in an external tracker (issue number, url).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalRef {
    pub tracker: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub stage_name: String,
    pub batch_name: String,
    pub thread_name: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sessions: Vec<SessionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<ExternalRef>,
}

impl Task {
    pub fn new(id: TaskId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            stage_name: String::new(),
            batch_name: String::new(),
            thread_name: String::new(),
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            assigned_agent: None,
            sessions: Vec::new(),
            report: None,
            external_ref: None,
        }
    }

    pub fn with_hierarchy_names(
        mut self,
        stage_name: impl Into<String>,
        batch_name: impl Into<String>,
        thread_name: impl Into<String>,
    ) -> Self {
        self.stage_name = stage_name.into();
        self.batch_name = batch_name.into();
        self.thread_name = thread_name.into();
        self
    }

    pub fn thread_id(&self) -> ThreadId {
        self.id.thread_id()
    }

    pub fn last_session(&self) -> Option<&SessionRecord> {
        self.sessions.last()
    }

    /// Update the session with `session_id` in place, or append a new one.
    pub fn upsert_session(&mut self, record: SessionRecord) {
        match self
            .sessions
            .iter_mut()
            .find(|existing| existing.session_id == record.session_id)
        {
            Some(existing) => *existing = record,
            None => self.sessions.push(record),
        }
        self.updated_at = Utc::now();
    }
}

/// All tasks of one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDocument {
    pub version: u32,
    pub stream_id: String,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl TaskDocument {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            version: TASK_DOCUMENT_VERSION,
            stream_id: stream_id.into(),
            last_updated: Utc::now(),
            tasks: Vec::new(),
        }
    }

    pub fn find(&self, task_id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == *task_id)
    }

    pub fn require_mut(&mut self, task_id: &TaskId) -> Result<&mut Task, IndexError> {
        let stream_id = self.stream_id.clone();
        self.tasks
            .iter_mut()
            .find(|task| task.id == *task_id)
            .ok_or(IndexError::UnknownTask {
                stream_id,
                task_id: *task_id,
            })
    }

    /// Insert keeping the document sorted by id.
    pub fn add_task(&mut self, task: Task) -> Result<(), IndexError> {
        if self.find(&task.id).is_some() {
            return Err(IndexError::DuplicateTask {
                stream_id: self.stream_id.clone(),
                task_id: task.id,
            });
        }
        let pos = self
            .tasks
            .binary_search_by(|existing| existing.id.cmp(&task.id))
            .unwrap_or_else(|pos| pos);
        self.tasks.insert(pos, task);
        Ok(())
    }

    pub fn tasks_in_thread<'a>(&'a self, thread: &'a ThreadId) -> impl Iterator<Item = &'a Task> {
        self.tasks.iter().filter(move |task| task.id.belongs_to(thread))
    }

    pub fn tasks_in_stage(&self, stage: u32) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(move |task| task.id.stage == stage)
    }

    /// Thread ids in hierarchy order.
    pub fn thread_ids(&self) -> Vec<ThreadId> {
        self.tasks
            .iter()
            .map(|task| task.thread_id())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn stage_numbers(&self) -> Vec<u32> {
        self.tasks
            .iter()
            .map(|task| task.id.stage)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_task(id: &str, status: TaskStatus) -> Task {
        let mut task = Task::new(TaskId::parse(id).expect("id"), format!("Task {id}"));
        task.status = status;
        task
    }

    #[test]
    fn next_order_leaves_gaps_after_removal() {
        let mut index = StreamIndex::default();
        assert_eq!(index.next_order(), 1);
        index.add_stream(StreamMetadata::new("a", "A", 1)).unwrap();
        index.add_stream(StreamMetadata::new("b", "B", 2)).unwrap();
        index.add_stream(StreamMetadata::new("c", "C", 3)).unwrap();
        index.remove_stream("b").unwrap();
        assert_eq!(index.next_order(), 4);
        index.remove_stream("c").unwrap();
        assert_eq!(index.next_order(), 2);
    }

    #[test]
    fn add_stream_rejects_duplicates() {
        let mut index = StreamIndex::default();
        index.add_stream(StreamMetadata::new("a", "A", 1)).unwrap();
        let err = index
            .add_stream(StreamMetadata::new("a", "Again", 2))
            .expect_err("duplicate");
        assert_eq!(
            err,
            IndexError::DuplicateStream {
                stream_id: "a".to_string()
            }
        );
    }

    #[test]
    fn removing_current_stream_clears_pointer() {
        let mut index = StreamIndex::default();
        index.add_stream(StreamMetadata::new("a", "A", 1)).unwrap();
        index.set_current("a").unwrap();
        index.remove_stream("a").unwrap();
        assert_eq!(index.current_stream, None);
        assert!(index.check_invariants().is_ok());
    }

    #[test]
    fn set_current_requires_existing_stream() {
        let mut index = StreamIndex::default();
        assert!(matches!(
            index.set_current("missing"),
            Err(IndexError::UnknownStream { .. })
        ));
        index.current_stream = Some("ghost".to_string());
        assert!(index.check_invariants().is_err());
    }

    #[test]
    fn index_serializes_with_camel_case_fields() {
        let mut index = StreamIndex::default();
        let mut stream = StreamMetadata::new("s1", "Stream", 1);
        stream.approval.stages.insert(
            2,
            ApprovalRecord {
                status: ApprovalStatus::Approved,
                ..ApprovalRecord::default()
            },
        );
        index.add_stream(stream).unwrap();
        index.set_current("s1").unwrap();

        let json = serde_json::to_value(&index).unwrap();
        assert!(json.get("lastUpdated").is_some());
        assert_eq!(json["currentStream"], "s1");
        assert_eq!(json["streams"][0]["approval"]["stages"]["2"]["status"], "approved");

        let back: StreamIndex = serde_json::from_value(json).unwrap();
        assert_eq!(back, index);
    }

    #[test]
    fn derive_stream_status_from_tasks() {
        assert_eq!(derive_stream_status(&[]), StreamStatus::Pending);
        let pending = vec![mk_task("1.1.1.1", TaskStatus::Pending)];
        assert_eq!(derive_stream_status(&pending), StreamStatus::Pending);
        let mixed = vec![
            mk_task("1.1.1.1", TaskStatus::Completed),
            mk_task("1.1.1.2", TaskStatus::Pending),
        ];
        assert_eq!(derive_stream_status(&mixed), StreamStatus::InProgress);
        let done = vec![
            mk_task("1.1.1.1", TaskStatus::Completed),
            mk_task("1.1.1.2", TaskStatus::Cancelled),
        ];
        assert_eq!(derive_stream_status(&done), StreamStatus::Completed);
    }

    #[test]
    fn status_override_wins_over_derived() {
        let mut stream = StreamMetadata::new("s1", "Stream", 1);
        stream.status_override = Some(StreamStatus::OnHold);
        stream.refresh_status(&[mk_task("1.1.1.1", TaskStatus::Completed)]);
        assert_eq!(stream.status, StreamStatus::OnHold);
        stream.status_override = None;
        stream.refresh_status(&[mk_task("1.1.1.1", TaskStatus::Completed)]);
        assert_eq!(stream.status, StreamStatus::Completed);
    }

    #[test]
    fn task_document_keeps_tasks_sorted_and_groups_threads() {
        let mut doc = TaskDocument::new("s1");
        doc.add_task(mk_task("1.1.2.1", TaskStatus::Pending)).unwrap();
        doc.add_task(mk_task("1.1.1.2", TaskStatus::Pending)).unwrap();
        doc.add_task(mk_task("1.1.1.1", TaskStatus::Pending)).unwrap();
        doc.add_task(mk_task("2.1.1.1", TaskStatus::Pending)).unwrap();

        let ids: Vec<String> = doc.tasks.iter().map(|task| task.id.to_string()).collect();
        assert_eq!(ids, vec!["01.01.01.01", "01.01.01.02", "01.01.02.01", "02.01.01.01"]);
        assert_eq!(doc.thread_ids().len(), 3);
        assert_eq!(doc.stage_numbers(), vec![1, 2]);
        assert_eq!(doc.tasks_in_thread(&ThreadId::new(1, 1, 1)).count(), 2);
        assert_eq!(doc.tasks_in_stage(1).count(), 3);
        assert!(matches!(
            doc.add_task(mk_task("1.1.1.1", TaskStatus::Pending)),
            Err(IndexError::DuplicateTask { .. })
        ));
    }

    #[test]
    fn upsert_session_replaces_by_id() {
        let mut task = mk_task("1.1.1.1", TaskStatus::InProgress);
        let mut record = SessionRecord {
            session_id: "ses_1".to_string(),
            agent_name: "build".to_string(),
            model: "anthropic/claude-sonnet-4".to_string(),
            started_at: Utc::now(),
            completed_at: None,
            status: SessionStatus::Running,
            exit_code: None,
        };
        task.upsert_session(record.clone());
        record.status = SessionStatus::Completed;
        record.exit_code = Some(0);
        task.upsert_session(record);
        assert_eq!(task.sessions.len(), 1);
        assert_eq!(task.last_session().map(|s| s.status), Some(SessionStatus::Completed));
    }
}
