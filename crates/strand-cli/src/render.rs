//! Human and JSON renderings of stream state.

use serde::Serialize;

use strand_core::{
    summarize_threads, ApprovalMetadata, ApprovalStatus, StreamMetadata, TaskDocument,
    ThreadSummary,
};
use strand_exec::{BatchExecution, ThreadExecutionResult};

pub fn stream_line(marker: &str, stream: &StreamMetadata) -> String {
    format!(
        "{marker} {:>3}  {:<20} {:<12} plan:{}  {}",
        stream.order, stream.id, stream.status, stream.approval.status, stream.name
    )
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageReport {
    pub stage: u32,
    pub name: String,
    pub approval: ApprovalStatus,
    pub threads: Vec<ThreadSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub stream: StreamMetadata,
    pub stages: Vec<StageReport>,
}

impl StatusReport {
    pub fn build(stream: StreamMetadata, doc: &TaskDocument) -> Self {
        let summaries = summarize_threads(doc);
        let stages = doc
            .stage_numbers()
            .into_iter()
            .map(|stage| {
                let threads: Vec<ThreadSummary> = summaries
                    .iter()
                    .filter(|summary| summary.thread_id.stage == stage)
                    .cloned()
                    .collect();
                StageReport {
                    stage,
                    name: threads
                        .first()
                        .map(|thread| thread.stage_name.clone())
                        .unwrap_or_default(),
                    approval: stream.approval.stage_status(stage),
                    threads,
                }
            })
            .collect();
        Self { stream, stages }
    }

    pub fn render(&self) -> String {
        let mut lines = vec![
            format!(
                "stream {} ({}) status:{}",
                self.stream.id, self.stream.name, self.stream.status
            ),
            format!("plan: {}", approval_detail(&self.stream.approval)),
        ];
        if self.stages.is_empty() {
            lines.push("no tasks yet".to_string());
        }
        for stage in &self.stages {
            lines.push(format!(
                "stage {:02} {}  [{}]",
                stage.stage, stage.name, stage.approval
            ));
            for thread in &stage.threads {
                let mut line = format!(
                    "  {}  {:<10} {}/{} open  {}",
                    thread.thread_id,
                    thread.status,
                    thread.remaining_task_count,
                    thread.task_count,
                    thread.thread_name
                );
                if let Some(session) = &thread.last_session_id {
                    line.push_str(&format!("  session:{session}"));
                }
                lines.push(line);
            }
        }
        lines.join("\n")
    }
}

fn approval_detail(approval: &ApprovalMetadata) -> String {
    match approval.status {
        ApprovalStatus::Approved => match &approval.approved_by {
            Some(by) => format!("approved by {by}"),
            None => "approved".to_string(),
        },
        ApprovalStatus::Revoked => match &approval.revoked_reason {
            Some(reason) => format!("revoked ({reason})"),
            None => "revoked".to_string(),
        },
        ApprovalStatus::Draft => "draft".to_string(),
    }
}

pub fn result_line(result: &ThreadExecutionResult) -> String {
    let mut line = format!("{}  {}", result.thread_id, result.status);
    if let Some(session) = &result.session_id {
        line.push_str(&format!("  session:{session}"));
    }
    if let Some(code) = result.exit_code {
        line.push_str(&format!("  exit:{code}"));
    }
    if let Some(error) = &result.error {
        line.push_str(&format!("  {}: {}", error.code, error.message));
    }
    line
}

pub fn batch_header(batch: &BatchExecution) -> String {
    let mut header = format!("backend {} ({})", batch.backend, batch.mode.as_str());
    if let Some(session) = &batch.session_name {
        header.push_str(&format!("  session {session}"));
    }
    header
}
