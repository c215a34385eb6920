//! Turning a stage selection into execution requests.

use std::path::PathBuf;

use strand_agents::AgentDefinitions;
use strand_core::{PlanSource, StrandConfig, Task, TaskDocument, ThreadId};

use crate::error::ExecError;
use crate::request::ThreadExecutionRequest;

/// Which threads of a stage to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadSelector {
    pub stage: u32,
    pub batch: Option<u32>,
    pub thread: Option<u32>,
}

impl ThreadSelector {
    pub fn stage(stage: u32) -> Self {
        Self {
            stage,
            batch: None,
            thread: None,
        }
    }

    pub fn matches(&self, thread: &ThreadId) -> bool {
        thread.stage == self.stage
            && self.batch.map_or(true, |batch| thread.batch == batch)
            && self.thread.map_or(true, |number| thread.thread == number)
    }
}

/// Build one request per selected thread that still has open tasks.
///
/// The agent is the first one assigned among the thread's open tasks, falling
/// back to `agent.default_agent`; an agent missing from `definitions` fails
/// the whole selection.
pub fn build_requests(
    plan: &dyn PlanSource,
    doc: &TaskDocument,
    selector: &ThreadSelector,
    definitions: &AgentDefinitions,
    config: &StrandConfig,
    prompt_path: impl Fn(&ThreadId) -> PathBuf,
) -> Result<Vec<ThreadExecutionRequest>, ExecError> {
    let synthesis = config
        .agent
        .synthesis_agent
        .as_deref()
        .map(|name| definitions.synthesis_for(name))
        .transpose()?;

    let mut requests = Vec::new();
    for thread in plan.threads_in_stage(selector.stage) {
        if !selector.matches(&thread.thread_id) {
            continue;
        }
        let open: Vec<&Task> = doc
            .tasks_in_thread(&thread.thread_id)
            .filter(|task| !task.status.is_done())
            .collect();
        let Some(anchor) = open.first() else {
            tracing::debug!(thread = %thread.thread_id, "thread has no open tasks; skipping");
            continue;
        };
        let agent_name = open
            .iter()
            .find_map(|task| task.assigned_agent.clone())
            .unwrap_or_else(|| config.agent.default_agent.clone());
        let models = definitions.models_for(&agent_name)?;

        requests.push(ThreadExecutionRequest {
            prompt_path: prompt_path(&thread.thread_id),
            thread_id: thread.thread_id,
            thread_name: thread.thread_name,
            stage_name: thread.stage_name,
            batch_name: thread.batch_name,
            models,
            agent_name,
            session_id: None,
            first_task_id: Some(anchor.id),
            synthesis: synthesis.clone(),
        });
    }

    if requests.is_empty() {
        return Err(ExecError::invalid(format!(
            "no open threads match stage {}{}{}",
            selector.stage,
            selector
                .batch
                .map(|batch| format!(" batch {batch}"))
                .unwrap_or_default(),
            selector
                .thread
                .map(|number| format!(" thread {number}"))
                .unwrap_or_default(),
        )));
    }
    if requests.len() > config.execution.max_parallel {
        return Err(ExecError::invalid(format!(
            "{} threads selected but execution.max_parallel is {}; narrow the selection with --batch or --thread",
            requests.len(),
            config.execution.max_parallel
        )));
    }
    Ok(requests)
}
