use chrono::Utc;

use strand_core::{approve_stage, approve_stream, revoke_stage, revoke_stream};

use crate::error::MainError;
use crate::workspace::Workspace;

fn default_approver() -> Option<String> {
    std::env::var("USER").ok().filter(|user| !user.is_empty())
}

/// Approve the stream plan, or a stage once all its threads are done.
pub fn run_approve(
    workspace: &Workspace,
    stream_id: &str,
    stage: Option<u32>,
    force: bool,
    by: Option<String>,
) -> Result<(), MainError> {
    let by = by.or_else(default_approver);
    let now = Utc::now();
    match stage {
        None => {
            workspace
                .index_store()
                .modify(|index| -> Result<(), MainError> {
                    let stream = index.require_mut(stream_id)?;
                    approve_stream(&mut stream.approval, by, now)?;
                    stream.updated_at = now;
                    Ok(())
                })?;
            println!("stream {stream_id} plan approved");
        }
        Some(stage) => {
            let tasks = workspace.task_store(stream_id);
            if !tasks.exists() {
                return Err(MainError::NoTasks {
                    stream: stream_id.to_string(),
                    path: tasks.path().to_path_buf(),
                });
            }
            // Task edits wait until the approval is recorded.
            let outcome = tasks.read_locked(|doc| {
                workspace
                    .index_store()
                    .modify(|index| -> Result<_, MainError> {
                        let stream = index.require_mut(stream_id)?;
                        let outcome =
                            approve_stage(&mut stream.approval, doc, stage, by, force, now)?;
                        stream.updated_at = now;
                        Ok(outcome)
                    })
            })?;
            if outcome.forced() {
                println!("stage {stage} approved (forced past unfinished threads):");
                for blocker in &outcome.warnings {
                    println!("  - {blocker}");
                }
            } else {
                println!("stage {stage} approved");
            }
        }
    }
    Ok(())
}

pub fn run_revoke(
    workspace: &Workspace,
    stream_id: &str,
    stage: Option<u32>,
    reason: String,
) -> Result<(), MainError> {
    let now = Utc::now();
    workspace
        .index_store()
        .modify(|index| -> Result<(), MainError> {
            let stream = index.require_mut(stream_id)?;
            match stage {
                Some(stage) => revoke_stage(&mut stream.approval, stage, Some(reason), now)?,
                None => revoke_stream(&mut stream.approval, Some(reason), now)?,
            }
            stream.updated_at = now;
            Ok(())
        })?;
    match stage {
        Some(stage) => println!("stage {stage} approval revoked"),
        None => println!("stream {stream_id} plan approval revoked"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::init_stream;
    use strand_core::{ApprovalError, ApprovalStatus, Task, TaskId, TaskStatus};
    use std::time::Duration;
    use strand_store::{DirLock, LockOptions};

    fn seeded() -> (tempfile::TempDir, Workspace) {
        let dir = tempfile::tempdir().expect("tempdir");
        let workspace = Workspace::open(dir.path()).expect("workspace");
        init_stream(&workspace, "auth", None).expect("init");
        workspace
            .modify_tasks("auth", |doc| {
                for id in ["1.1.1.1", "1.1.1.2"] {
                    doc.add_task(Task::new(TaskId::parse(id)?, id))?;
                }
                Ok(())
            })
            .expect("tasks");
        (dir, workspace)
    }

    fn stage_status(workspace: &Workspace, stage: u32) -> ApprovalStatus {
        let index = workspace.index_store().load().expect("index");
        index.require("auth").expect("stream").approval.stage_status(stage)
    }

    #[test]
    fn blocked_stage_approval_leaves_index_untouched() {
        let (_dir, workspace) = seeded();
        let before = std::fs::read(workspace.paths.index_path()).expect("index bytes");
        let err = run_approve(&workspace, "auth", Some(1), false, None).expect_err("blocked");
        match err {
            MainError::Approval(ApprovalError::ApprovalBlocked { stage, blockers }) => {
                assert_eq!(stage, 1);
                assert_eq!(blockers.len(), 1);
                assert_eq!(blockers[0].remaining_task_count, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        let after = std::fs::read(workspace.paths.index_path()).expect("index bytes");
        assert_eq!(before, after);
    }

    #[test]
    fn stage_approves_once_threads_finish_and_force_overrides() {
        let (_dir, workspace) = seeded();
        run_approve(&workspace, "auth", Some(1), true, Some("lead".to_string())).expect("forced");
        assert_eq!(stage_status(&workspace, 1), ApprovalStatus::Approved);

        run_revoke(&workspace, "auth", Some(1), "redo".to_string()).expect("revoke");
        assert_eq!(stage_status(&workspace, 1), ApprovalStatus::Revoked);

        workspace
            .modify_tasks("auth", |doc| {
                for task in doc.tasks.iter_mut() {
                    task.status = TaskStatus::Completed;
                }
                Ok(())
            })
            .expect("complete");
        run_approve(&workspace, "auth", Some(1), false, None).expect("approve");
        assert_eq!(stage_status(&workspace, 1), ApprovalStatus::Approved);
    }

    #[test]
    fn task_added_while_approving_is_seen_by_the_blocker_check() {
        let (_dir, workspace) = seeded();
        workspace
            .modify_tasks("auth", |doc| {
                for task in doc.tasks.iter_mut() {
                    task.status = TaskStatus::Completed;
                }
                Ok(())
            })
            .expect("complete");

        let tasks = workspace.task_store("auth");
        let held = DirLock::acquire(tasks.path(), &LockOptions::default()).expect("hold tasks");
        let approving = std::thread::spawn({
            let root = workspace.root().to_path_buf();
            move || {
                let workspace = Workspace::open(root).expect("workspace");
                run_approve(&workspace, "auth", Some(1), false, None)
            }
        });
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(stage_status(&workspace, 1), ApprovalStatus::Draft);

        let mut doc = tasks.load().expect("tasks");
        doc.add_task(Task::new(TaskId::parse("1.1.1.3").expect("id"), "late"))
            .expect("add");
        tasks.save(&mut doc).expect("save");
        held.release().expect("release");

        let err = approving.join().expect("thread").expect_err("late task blocks");
        assert!(matches!(
            err,
            MainError::Approval(ApprovalError::ApprovalBlocked { .. })
        ));
        assert_eq!(stage_status(&workspace, 1), ApprovalStatus::Draft);
    }

    #[test]
    fn stream_plan_approval_and_revocation() {
        let (_dir, workspace) = seeded();
        run_approve(&workspace, "auth", None, false, Some("lead".to_string())).expect("approve");
        let index = workspace.index_store().load().expect("index");
        let approval = &index.require("auth").expect("stream").approval;
        assert_eq!(approval.status, ApprovalStatus::Approved);
        assert_eq!(approval.approved_by.as_deref(), Some("lead"));

        run_revoke(&workspace, "auth", None, "scope changed".to_string()).expect("revoke");
        let index = workspace.index_store().load().expect("index");
        let approval = &index.require("auth").expect("stream").approval;
        assert_eq!(approval.status, ApprovalStatus::Revoked);
        assert_eq!(approval.revoked_reason.as_deref(), Some("scope changed"));

        assert!(matches!(
            run_revoke(&workspace, "auth", None, "again".to_string()),
            Err(MainError::Approval(ApprovalError::Transition(_)))
        ));
    }
}
