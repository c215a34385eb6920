//! Task and approval transitions.

use chrono::{DateTime, Utc};

use crate::state::{ApprovalStatus, TaskStatus};
use crate::types::{ApprovalRecord, Task};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateMachineError {
    #[error("invalid task status transition: {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
    #[error("invalid approval transition: {from} -> {to}")]
    InvalidApproval {
        from: ApprovalStatus,
        to: ApprovalStatus,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTransition {
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub at: DateTime<Utc>,
}

/// Transition a task to a new status.
pub fn transition_task(
    task: &mut Task,
    to: TaskStatus,
    at: DateTime<Utc>,
) -> Result<StatusTransition, StateMachineError> {
    let from = task.status;
    if !is_transition_allowed(from, to) {
        return Err(StateMachineError::InvalidTransition { from, to });
    }

    task.status = to;
    task.updated_at = at;

    Ok(StatusTransition { from, to, at })
}

/// Check if a task status transition is valid.
///
/// ```text
/// pending → in_progress → completed
///    │          │  ↑
///    │          ↓  │
///    │        blocked
///    ↓
/// cancelled ← (in_progress)
/// ```
pub fn is_transition_allowed(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;

    if from == to {
        return true;
    }

    match (from, to) {
        (Pending, InProgress) => true,
        (Pending, Cancelled) => true,
        (InProgress, Completed) => true,
        (InProgress, Blocked) => true,
        (InProgress, Cancelled) => true,
        // unblock and retry
        (Blocked, InProgress) => true,
        _ => false,
    }
}

impl ApprovalRecord {
    /// draft → approved, revoked → approved (re-stamps `approved_at`).
    pub fn approve(
        &mut self,
        by: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<(), StateMachineError> {
        match self.status {
            ApprovalStatus::Draft | ApprovalStatus::Revoked => {
                self.status = ApprovalStatus::Approved;
                self.approved_at = Some(at);
                self.approved_by = by;
                self.revoked_at = None;
                self.revoked_reason = None;
                Ok(())
            }
            ApprovalStatus::Approved => Err(StateMachineError::InvalidApproval {
                from: ApprovalStatus::Approved,
                to: ApprovalStatus::Approved,
            }),
        }
    }

    /// approved → revoked. The approval stamp is kept for the audit trail.
    pub fn revoke(
        &mut self,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<(), StateMachineError> {
        if self.status != ApprovalStatus::Approved {
            return Err(StateMachineError::InvalidApproval {
                from: self.status,
                to: ApprovalStatus::Revoked,
            });
        }
        self.status = ApprovalStatus::Revoked;
        self.revoked_at = Some(at);
        self.revoked_reason = reason;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::TaskId;
    use chrono::Duration;

    fn mk_task(status: TaskStatus) -> Task {
        let mut task = Task::new(TaskId::new(1, 1, 1, 1), "Test task");
        task.status = status;
        task
    }

    #[test]
    fn allows_normal_flow_transitions() {
        assert!(is_transition_allowed(TaskStatus::Pending, TaskStatus::InProgress));
        assert!(is_transition_allowed(TaskStatus::InProgress, TaskStatus::Completed));
        assert!(is_transition_allowed(TaskStatus::InProgress, TaskStatus::Blocked));
        assert!(is_transition_allowed(TaskStatus::InProgress, TaskStatus::Cancelled));
        assert!(is_transition_allowed(TaskStatus::Blocked, TaskStatus::InProgress));
        assert!(is_transition_allowed(TaskStatus::Pending, TaskStatus::Cancelled));
    }

    #[test]
    fn terminal_states_do_not_move() {
        for to in [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Blocked,
        ] {
            assert!(!is_transition_allowed(TaskStatus::Completed, to));
            assert!(!is_transition_allowed(TaskStatus::Cancelled, to));
        }
        assert!(!is_transition_allowed(TaskStatus::Completed, TaskStatus::Cancelled));
    }

    #[test]
    fn disallows_skipping_in_progress() {
        assert!(!is_transition_allowed(TaskStatus::Pending, TaskStatus::Completed));
        assert!(!is_transition_allowed(TaskStatus::Blocked, TaskStatus::Completed));
        assert!(!is_transition_allowed(TaskStatus::InProgress, TaskStatus::Pending));
    }

    #[test]
    fn transition_updates_task() {
        let mut task = mk_task(TaskStatus::Pending);
        let at = Utc::now();
        let result = transition_task(&mut task, TaskStatus::InProgress, at).expect("valid");
        assert_eq!(result.from, TaskStatus::Pending);
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.updated_at, at);
    }

    #[test]
    fn transition_rejects_invalid_and_leaves_task_untouched() {
        let mut task = mk_task(TaskStatus::Completed);
        let before = task.updated_at;
        let err = transition_task(&mut task, TaskStatus::InProgress, Utc::now())
            .expect_err("terminal");
        assert_eq!(
            err,
            StateMachineError::InvalidTransition {
                from: TaskStatus::Completed,
                to: TaskStatus::InProgress
            }
        );
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.updated_at, before);
    }

    #[test]
    fn approval_flow_draft_approved_revoked_reapproved() {
        let mut record = ApprovalRecord::default();
        let first = Utc::now();
        record.approve(Some("alice".to_string()), first).expect("approve");
        assert_eq!(record.status, ApprovalStatus::Approved);
        assert_eq!(record.approved_at, Some(first));

        record
            .revoke(Some("scope changed".to_string()), first + Duration::seconds(5))
            .expect("revoke");
        assert_eq!(record.status, ApprovalStatus::Revoked);
        assert_eq!(record.revoked_reason.as_deref(), Some("scope changed"));

        let second = first + Duration::seconds(10);
        record.approve(None, second).expect("re-approve");
        assert_eq!(record.approved_at, Some(second));
        assert_eq!(record.revoked_at, None);
    }

    #[test]
    fn cannot_revoke_draft_or_double_approve() {
        let mut record = ApprovalRecord::default();
        assert!(record.revoke(None, Utc::now()).is_err());
        record.approve(None, Utc::now()).unwrap();
        assert!(record.approve(None, Utc::now()).is_err());
    }
}
