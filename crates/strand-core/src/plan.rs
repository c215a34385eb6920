//! Read-only view of the stage/batch/thread hierarchy.

use serde::{Deserialize, Serialize};

use crate::id::ThreadId;
use crate::types::TaskDocument;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanThread {
    pub stage_id: u32,
    pub stage_name: String,
    pub batch_id: u32,
    pub batch_name: String,
    pub thread_id: ThreadId,
    pub thread_name: String,
}

/// Where thread names come from when building execution requests.
pub trait PlanSource {
    fn threads(&self) -> Vec<PlanThread>;

    fn thread(&self, thread_id: &ThreadId) -> Option<PlanThread> {
        self.threads()
            .into_iter()
            .find(|thread| thread.thread_id == *thread_id)
    }

    fn threads_in_stage(&self, stage: u32) -> Vec<PlanThread> {
        self.threads()
            .into_iter()
            .filter(|thread| thread.stage_id == stage)
            .collect()
    }
}

/// The task document doubles as the plan through its denormalized names.
impl PlanSource for TaskDocument {
    fn threads(&self) -> Vec<PlanThread> {
        self.thread_ids()
            .into_iter()
            .filter_map(|thread_id| {
                let first = self.tasks_in_thread(&thread_id).next()?;
                Some(PlanThread {
                    stage_id: thread_id.stage,
                    stage_name: first.stage_name.clone(),
                    batch_id: thread_id.batch,
                    batch_name: first.batch_name.clone(),
                    thread_id,
                    thread_name: first.thread_name.clone(),
                })
            })
            .collect()
    }
}
