//! Dotted work-hierarchy identifiers (`SS.BB.TT.NN`).

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierError {
    #[error("invalid identifier '{value}': {reason}")]
    InvalidIdentifier { value: String, reason: String },
}

fn parse_parts<const N: usize>(value: &str, kind: &str) -> Result<[u32; N], IdentifierError> {
    let invalid = |reason: String| IdentifierError::InvalidIdentifier {
        value: value.to_string(),
        reason,
    };

    let parts: Vec<&str> = value.trim().split('.').collect();
    if parts.len() != N {
        return Err(invalid(format!(
            "expected {N} dot-separated numbers for a {kind} id, found {}",
            parts.len()
        )));
    }

    let mut out = [0u32; N];
    for (idx, part) in parts.iter().enumerate() {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid(format!(
                "segment {} ('{part}') is not a non-negative integer",
                idx + 1
            )));
        }
        out[idx] = part
            .parse::<u32>()
            .map_err(|err| invalid(format!("segment {} ('{part}'): {err}", idx + 1)))?;
    }
    Ok(out)
}

/// Identifier of a single task: stage, batch, thread, task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId {
    pub stage: u32,
    pub batch: u32,
    pub thread: u32,
    pub task: u32,
}

impl TaskId {
    pub fn new(stage: u32, batch: u32, thread: u32, task: u32) -> Self {
        Self {
            stage,
            batch,
            thread,
            task,
        }
    }

    pub fn parse(value: &str) -> Result<Self, IdentifierError> {
        let [stage, batch, thread, task] = parse_parts::<4>(value, "task")?;
        Ok(Self::new(stage, batch, thread, task))
    }

    pub fn thread_id(&self) -> ThreadId {
        ThreadId::new(self.stage, self.batch, self.thread)
    }

    pub fn belongs_to(&self, thread: &ThreadId) -> bool {
        self.thread_id() == *thread
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02}.{:02}.{:02}.{:02}",
            self.stage, self.batch, self.thread, self.task
        )
    }
}

impl std::str::FromStr for TaskId {
    type Err = IdentifierError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

/// Identifier of a thread: stage, batch, thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId {
    pub stage: u32,
    pub batch: u32,
    pub thread: u32,
}

impl ThreadId {
    pub fn new(stage: u32, batch: u32, thread: u32) -> Self {
        Self {
            stage,
            batch,
            thread,
        }
    }

    pub fn parse(value: &str) -> Result<Self, IdentifierError> {
        let [stage, batch, thread] = parse_parts::<3>(value, "thread")?;
        Ok(Self::new(stage, batch, thread))
    }

    pub fn task(&self, task: u32) -> TaskId {
        TaskId::new(self.stage, self.batch, self.thread, task)
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}.{:02}.{:02}", self.stage, self.batch, self.thread)
    }
}

impl std::str::FromStr for ThreadId {
    type Err = IdentifierError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

/// Format a task identifier from its parts.
pub fn format_task_id(stage: u32, batch: u32, thread: u32, task: u32) -> String {
    TaskId::new(stage, batch, thread, task).to_string()
}

/// Re-normalize any accepted spelling (`1.2.3.4`) to canonical form (`01.02.03.04`).
pub fn normalize_task_id(value: &str) -> Result<String, IdentifierError> {
    TaskId::parse(value).map(|id| id.to_string())
}

macro_rules! string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                <$ty>::parse(&raw).map_err(serde::de::Error::custom)
            }
        }
    };
}

string_serde!(TaskId);
string_serde!(ThreadId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_unpadded_and_renormalizes() {
        let id = TaskId::parse("1.2.3.4").expect("parse");
        assert_eq!(id, TaskId::new(1, 2, 3, 4));
        assert_eq!(id.to_string(), "01.02.03.04");
        assert_eq!(normalize_task_id("01.2.003.4").expect("normalize"), "01.02.03.04");
    }

    #[test]
    fn format_then_parse_round_trips() {
        for stage in [0, 1, 9, 10, 99, 120] {
            for batch in [0, 3, 42] {
                for (thread, task) in [(0, 0), (1, 7), (15, 100)] {
                    let formatted = format_task_id(stage, batch, thread, task);
                    let parsed = TaskId::parse(&formatted).expect("round trip");
                    assert_eq!(parsed, TaskId::new(stage, batch, thread, task));
                }
            }
        }
    }

    #[test]
    fn parse_rejects_wrong_arity_and_non_numeric_segments() {
        for bad in ["", "01.02.03", "01.02.03.04.05", "01.a.03.04", "01..03.04", "-1.0.0.0", "1.2.3.+4"] {
            let err = TaskId::parse(bad).expect_err(bad);
            assert!(matches!(err, IdentifierError::InvalidIdentifier { .. }), "{bad}");
        }
    }

    #[test]
    fn task_resolves_to_thread() {
        let id = TaskId::parse("01.02.03.04").expect("parse");
        assert_eq!(id.thread_id(), ThreadId::new(1, 2, 3));
        assert_eq!(id.thread_id().to_string(), "01.02.03");
        assert!(id.belongs_to(&ThreadId::parse("1.2.3").expect("thread")));
        assert!(!id.belongs_to(&ThreadId::new(1, 2, 4)));
    }

    #[test]
    fn serializes_as_canonical_string() {
        let json = serde_json::to_string(&TaskId::new(1, 1, 1, 2)).expect("serialize");
        assert_eq!(json, "\"01.01.01.02\"");
        let back: TaskId = serde_json::from_str("\"1.1.1.2\"").expect("deserialize");
        assert_eq!(back, TaskId::new(1, 1, 1, 2));
        assert!(serde_json::from_str::<ThreadId>("\"1.1\"").is_err());
    }

    #[test]
    fn ordering_follows_hierarchy() {
        let mut ids = vec![
            TaskId::new(2, 1, 1, 1),
            TaskId::new(1, 2, 1, 1),
            TaskId::new(1, 1, 1, 10),
            TaskId::new(1, 1, 1, 2),
        ];
        ids.sort();
        let rendered: Vec<String> = ids.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec!["01.01.01.02", "01.01.01.10", "01.02.01.01", "02.01.01.01"]
        );
    }
}
