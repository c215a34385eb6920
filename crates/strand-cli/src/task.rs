use chrono::Utc;
use std::fs;

use strand_core::{transition_task, Task, TaskId, TaskStatus};

use crate::cli::TaskAction;
use crate::error::MainError;
use crate::workspace::Workspace;

pub fn run_task(workspace: &Workspace, stream_id: &str, action: TaskAction) -> Result<(), MainError> {
    match action {
        TaskAction::Add {
            id,
            name,
            stage_name,
            batch_name,
            thread_name,
            agent,
        } => {
            let task_id = TaskId::parse(&id)?;
            let mut task = Task::new(task_id, name).with_hierarchy_names(
                stage_name.unwrap_or_else(|| format!("Stage {}", task_id.stage)),
                batch_name.unwrap_or_else(|| format!("Batch {}", task_id.batch)),
                thread_name.unwrap_or_else(|| format!("Thread {}", task_id.thread)),
            );
            task.assigned_agent = agent;
            workspace.modify_tasks(stream_id, |doc| Ok(doc.add_task(task)?))?;
            println!("added task {task_id}");
        }
        TaskAction::SetStatus { id, status } => {
            let task_id = TaskId::parse(&id)?;
            let to: TaskStatus = status.parse().map_err(MainError::Args)?;
            let transition = workspace.modify_tasks(stream_id, |doc| {
                Ok(transition_task(doc.require_mut(&task_id)?, to, Utc::now())?)
            })?;
            tracing::info!(task = %task_id, from = %transition.from, to = %transition.to, "task status changed");
            println!("task {task_id}: {} -> {}", transition.from, transition.to);
        }
        TaskAction::Assign { id, agent } => {
            let task_id = TaskId::parse(&id)?;
            workspace.modify_tasks(stream_id, |doc| {
                let task = doc.require_mut(&task_id)?;
                task.assigned_agent = Some(agent.clone());
                task.updated_at = Utc::now();
                Ok(())
            })?;
            println!("task {task_id} assigned to {agent}");
        }
        TaskAction::Report { id, text, file } => {
            let task_id = TaskId::parse(&id)?;
            let report = match (text, file) {
                (Some(text), _) => text,
                (None, Some(path)) => {
                    fs::read_to_string(&path).map_err(|source| MainError::Read { path, source })?
                }
                (None, None) => return Err(MainError::Args("report text or --file is required".to_string())),
            };
            workspace.modify_tasks(stream_id, |doc| {
                let task = doc.require_mut(&task_id)?;
                task.report = Some(report);
                task.updated_at = Utc::now();
                Ok(())
            })?;
            println!("report saved on task {task_id}");
        }
    }
    Ok(())
}
