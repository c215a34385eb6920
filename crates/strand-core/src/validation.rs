//! Validation for configuration and persisted documents.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::config::{StrandConfig, BACKEND_NAMES};
use crate::types::{StreamIndex, TaskDocument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub level: ValidationLevel,
    pub code: &'static str,
    pub message: String,
}

pub trait Validate {
    fn validate(&self) -> Vec<ValidationIssue>;
}

pub fn has_errors(issues: &[ValidationIssue]) -> bool {
    issues
        .iter()
        .any(|issue| issue.level == ValidationLevel::Error)
}

impl Validate for StrandConfig {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if let Some(backend) = &self.execution.backend {
            if !BACKEND_NAMES.contains(&backend.as_str()) {
                issues.push(ValidationIssue {
                    level: ValidationLevel::Error,
                    code: "execution.backend.unknown",
                    message: format!(
                        "unknown backend '{backend}'. valid values: {}",
                        BACKEND_NAMES.join(", ")
                    ),
                });
            }
        }

        if self.execution.max_parallel == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "execution.max_parallel.zero",
                message: "max_parallel must be greater than zero".to_string(),
            });
        }

        if self.tmux.early_failure_secs == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "tmux.early_failure_secs.zero",
                message: "early failure threshold of 0s disables model failover".to_string(),
            });
        }

        if self.tmux.poll_interval_ms == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "tmux.poll_interval_ms.zero",
                message: "poll interval cannot be 0".to_string(),
            });
        }

        if self.tmux.session_prefix.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "tmux.session_prefix.empty",
                message: "session_prefix must not be empty".to_string(),
            });
        }

        if self.tmux.stagger_ms > 30_000 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "tmux.stagger_ms.high",
                message: format!(
                    "stagger of {}ms delays each additional thread launch by that much",
                    self.tmux.stagger_ms
                ),
            });
        }

        if self.agent.executable.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "agent.executable.empty",
                message: "agent executable must not be empty".to_string(),
            });
        }

        if self.agent.default_agent.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "agent.default_agent.empty",
                message: "default_agent is empty; every task needs an assigned agent".to_string(),
            });
        }

        issues
    }
}

impl Validate for StreamIndex {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let mut seen = BTreeSet::new();

        for stream in &self.streams {
            if stream.id.trim().is_empty() {
                issues.push(ValidationIssue {
                    level: ValidationLevel::Error,
                    code: "stream.id.empty",
                    message: "stream id must not be empty".to_string(),
                });
            }
            if !seen.insert(stream.id.as_str()) {
                issues.push(ValidationIssue {
                    level: ValidationLevel::Error,
                    code: "stream.id.duplicate",
                    message: format!("stream id '{}' appears more than once", stream.id),
                });
            }
        }

        if let Some(current) = &self.current_stream {
            if self.find(current).is_none() {
                issues.push(ValidationIssue {
                    level: ValidationLevel::Error,
                    code: "index.current_stream.dangling",
                    message: format!("current stream '{current}' does not exist"),
                });
            }
        }

        issues
    }
}

impl Validate for TaskDocument {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let mut seen = BTreeSet::new();

        for task in &self.tasks {
            if !seen.insert(task.id) {
                issues.push(ValidationIssue {
                    level: ValidationLevel::Error,
                    code: "task.id.duplicate",
                    message: format!("task {} appears more than once", task.id),
                });
            }
            if task.name.trim().is_empty() {
                issues.push(ValidationIssue {
                    level: ValidationLevel::Error,
                    code: "task.name.empty",
                    message: format!("task {} has an empty name", task.id),
                });
            }
            if task.thread_name.trim().is_empty() {
                issues.push(ValidationIssue {
                    level: ValidationLevel::Warning,
                    code: "task.thread_name.empty",
                    message: format!("task {} has no thread name", task.id),
                });
            }
        }

        issues
    }
}
