//! Stream and stage approval gates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::ThreadId;
use crate::state::ApprovalStatus;
use crate::state_machine::StateMachineError;
use crate::thread::summarize_threads;
use crate::types::{ApprovalMetadata, TaskDocument};

/// A thread that still has open tasks in the stage being approved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadBlocker {
    pub thread_id: ThreadId,
    pub remaining_task_count: usize,
}

impl std::fmt::Display for ThreadBlocker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "thread {} has {} unfinished task(s)",
            self.thread_id, self.remaining_task_count
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApprovalError {
    #[error("stage {stage} cannot be approved: {} thread(s) not finished", .blockers.len())]
    ApprovalBlocked {
        stage: u32,
        blockers: Vec<ThreadBlocker>,
    },
    #[error("stage {stage} has no tasks")]
    UnknownStage { stage: u32 },
    #[error(transparent)]
    Transition(#[from] StateMachineError),
}

/// Every thread of `stage` with tasks that are neither completed nor cancelled.
pub fn stage_blockers(doc: &TaskDocument, stage: u32) -> Vec<ThreadBlocker> {
    summarize_threads(doc)
        .into_iter()
        .filter(|summary| summary.thread_id.stage == stage && summary.remaining_task_count > 0)
        .map(|summary| ThreadBlocker {
            thread_id: summary.thread_id,
            remaining_task_count: summary.remaining_task_count,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageApprovalOutcome {
    pub stage: u32,
    /// Blockers that were overridden with `force`.
    pub warnings: Vec<ThreadBlocker>,
}

impl StageApprovalOutcome {
    pub fn forced(&self) -> bool {
        !self.warnings.is_empty()
    }
}

pub fn approve_stage(
    approval: &mut ApprovalMetadata,
    doc: &TaskDocument,
    stage: u32,
    by: Option<String>,
    force: bool,
    at: DateTime<Utc>,
) -> Result<StageApprovalOutcome, ApprovalError> {
    if doc.tasks_in_stage(stage).next().is_none() {
        return Err(ApprovalError::UnknownStage { stage });
    }

    let blockers = stage_blockers(doc, stage);
    if !blockers.is_empty() && !force {
        return Err(ApprovalError::ApprovalBlocked { stage, blockers });
    }

    approval.stages.entry(stage).or_default().approve(by, at)?;
    if !blockers.is_empty() {
        tracing::warn!(
            stage,
            blockers = blockers.len(),
            "stage approved with unfinished threads (forced)"
        );
    }

    Ok(StageApprovalOutcome {
        stage,
        warnings: blockers,
    })
}

pub fn revoke_stage(
    approval: &mut ApprovalMetadata,
    stage: u32,
    reason: Option<String>,
    at: DateTime<Utc>,
) -> Result<(), ApprovalError> {
    let record = approval.stages.entry(stage).or_default();
    record.revoke(reason, at)?;
    Ok(())
}

pub fn approve_stream(
    approval: &mut ApprovalMetadata,
    by: Option<String>,
    at: DateTime<Utc>,
) -> Result<(), ApprovalError> {
    let mut record = approval.stream_record();
    record.approve(by, at)?;
    approval.set_stream_record(record);
    Ok(())
}

pub fn revoke_stream(
    approval: &mut ApprovalMetadata,
    reason: Option<String>,
    at: DateTime<Utc>,
) -> Result<(), ApprovalError> {
    let mut record = approval.stream_record();
    record.revoke(reason, at)?;
    approval.set_stream_record(record);
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum ExecutionBlockReason {
    StreamNotApproved { status: ApprovalStatus },
    PreviousStageNotApproved { stage: u32, status: ApprovalStatus },
}

impl std::fmt::Display for ExecutionBlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionBlockReason::StreamNotApproved { status } => {
                write!(f, "stream plan is {status}, not approved")
            }
            ExecutionBlockReason::PreviousStageNotApproved { stage, status } => {
                write!(f, "stage {stage} is {status}, not approved")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionGateDecision {
    pub allowed: bool,
    pub reasons: Vec<ExecutionBlockReason>,
}

/// Work on `stage` needs an approved stream and an approved preceding stage.
pub fn evaluate_execution_gate(
    approval: &ApprovalMetadata,
    doc: &TaskDocument,
    stage: u32,
) -> ExecutionGateDecision {
    let mut reasons = Vec::new();

    if !approval.status.is_approved() {
        reasons.push(ExecutionBlockReason::StreamNotApproved {
            status: approval.status,
        });
    }

    let previous = doc
        .stage_numbers()
        .into_iter()
        .filter(|candidate| *candidate < stage)
        .max();
    if let Some(previous) = previous {
        let status = approval.stage_status(previous);
        if !status.is_approved() {
            reasons.push(ExecutionBlockReason::PreviousStageNotApproved {
                stage: previous,
                status,
            });
        }
    }

    ExecutionGateDecision {
        allowed: reasons.is_empty(),
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::TaskId;
    use crate::state::TaskStatus;
    use crate::types::Task;

    fn mk_doc(entries: &[(&str, TaskStatus)]) -> TaskDocument {
        let mut doc = TaskDocument::new("s1");
        for (id, status) in entries {
            let mut task = Task::new(TaskId::parse(id).expect("id"), *id);
            task.status = *status;
            doc.add_task(task).expect("add");
        }
        doc
    }

    #[test]
    fn stage_approval_blocked_until_thread_finishes() {
        let mut doc = mk_doc(&[
            ("01.01.01.01", TaskStatus::Completed),
            ("01.01.01.02", TaskStatus::Pending),
        ]);
        let mut approval = ApprovalMetadata::default();

        let err = approve_stage(&mut approval, &doc, 1, None, false, Utc::now())
            .expect_err("pending task blocks");
        assert_eq!(
            err,
            ApprovalError::ApprovalBlocked {
                stage: 1,
                blockers: vec![ThreadBlocker {
                    thread_id: ThreadId::new(1, 1, 1),
                    remaining_task_count: 1,
                }],
            }
        );
        assert_eq!(approval.stage_status(1), ApprovalStatus::Draft);

        doc.tasks[1].status = TaskStatus::Completed;
        let outcome =
            approve_stage(&mut approval, &doc, 1, Some("lead".to_string()), false, Utc::now())
                .expect("approve");
        assert!(!outcome.forced());
        assert_eq!(approval.stage_status(1), ApprovalStatus::Approved);
        assert_eq!(approval.stages[&1].approved_by.as_deref(), Some("lead"));
    }

    #[test]
    fn blocker_list_only_covers_requested_stage() {
        let doc = mk_doc(&[
            ("01.01.01.01", TaskStatus::Completed),
            ("01.01.02.01", TaskStatus::InProgress),
            ("01.02.01.01", TaskStatus::Blocked),
            ("01.02.01.02", TaskStatus::Pending),
            ("02.01.01.01", TaskStatus::Pending),
        ]);
        let blockers = stage_blockers(&doc, 1);
        assert_eq!(
            blockers,
            vec![
                ThreadBlocker {
                    thread_id: ThreadId::new(1, 1, 2),
                    remaining_task_count: 1
                },
                ThreadBlocker {
                    thread_id: ThreadId::new(1, 2, 1),
                    remaining_task_count: 2
                },
            ]
        );
    }

    #[test]
    fn force_turns_rejection_into_warning() {
        let doc = mk_doc(&[("01.01.01.01", TaskStatus::Pending)]);
        let mut approval = ApprovalMetadata::default();
        let outcome =
            approve_stage(&mut approval, &doc, 1, None, true, Utc::now()).expect("forced");
        assert!(outcome.forced());
        assert_eq!(outcome.warnings[0].remaining_task_count, 1);
        assert_eq!(approval.stage_status(1), ApprovalStatus::Approved);
    }

    #[test]
    fn approving_stage_without_tasks_fails() {
        let doc = mk_doc(&[("01.01.01.01", TaskStatus::Completed)]);
        let mut approval = ApprovalMetadata::default();
        assert_eq!(
            approve_stage(&mut approval, &doc, 3, None, false, Utc::now()),
            Err(ApprovalError::UnknownStage { stage: 3 })
        );
    }

    #[test]
    fn revoked_stage_can_be_reapproved() {
        let doc = mk_doc(&[("01.01.01.01", TaskStatus::Completed)]);
        let mut approval = ApprovalMetadata::default();
        approve_stage(&mut approval, &doc, 1, None, false, Utc::now()).unwrap();
        revoke_stage(&mut approval, 1, Some("regression".to_string()), Utc::now()).unwrap();
        assert_eq!(approval.stage_status(1), ApprovalStatus::Revoked);
        approve_stage(&mut approval, &doc, 1, None, false, Utc::now()).unwrap();
        assert_eq!(approval.stage_status(1), ApprovalStatus::Approved);
    }

    #[test]
    fn stream_approval_round_trip() {
        let mut approval = ApprovalMetadata::default();
        approve_stream(&mut approval, Some("lead".to_string()), Utc::now()).unwrap();
        assert_eq!(approval.status, ApprovalStatus::Approved);
        revoke_stream(&mut approval, Some("replan".to_string()), Utc::now()).unwrap();
        assert_eq!(approval.status, ApprovalStatus::Revoked);
        assert_eq!(approval.revoked_reason.as_deref(), Some("replan"));
        assert!(revoke_stream(&mut approval, None, Utc::now()).is_err());
    }

    #[test]
    fn execution_gate_requires_stream_and_previous_stage() {
        let doc = mk_doc(&[
            ("01.01.01.01", TaskStatus::Completed),
            ("02.01.01.01", TaskStatus::Pending),
        ]);
        let mut approval = ApprovalMetadata::default();

        let decision = evaluate_execution_gate(&approval, &doc, 2);
        assert!(!decision.allowed);
        assert_eq!(decision.reasons.len(), 2);

        approve_stream(&mut approval, None, Utc::now()).unwrap();
        let decision = evaluate_execution_gate(&approval, &doc, 1);
        assert!(decision.allowed, "first stage needs only stream approval");

        let decision = evaluate_execution_gate(&approval, &doc, 2);
        assert_eq!(
            decision.reasons,
            vec![ExecutionBlockReason::PreviousStageNotApproved {
                stage: 1,
                status: ApprovalStatus::Draft
            }]
        );

        approve_stage(&mut approval, &doc, 1, None, false, Utc::now()).unwrap();
        assert!(evaluate_execution_gate(&approval, &doc, 2).allowed);
    }
}
