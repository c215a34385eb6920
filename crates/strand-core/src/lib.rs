pub mod approval;
pub mod config;
pub mod id;
pub mod plan;
pub mod state;
pub mod state_machine;
pub mod thread;
pub mod types;
pub mod validation;

pub use approval::*;
pub use config::*;
pub use id::*;
pub use plan::*;
pub use state::*;
pub use state_machine::*;
pub use thread::*;
pub use types::*;
pub use validation::*;

#[cfg(test)]
mod tests {
    use super::{parse_config, TaskId, TaskStatus, ThreadStatus, Validate};
    use std::any::TypeId;

    #[test]
    fn crate_root_reexports_core_types() {
        let _ = TypeId::of::<TaskId>();
        let _ = TypeId::of::<TaskStatus>();
        let _ = TypeId::of::<ThreadStatus>();
    }

    #[test]
    fn crate_root_reexports_parse_and_validate_helpers() {
        let mut config = parse_config(
            r#"
[execution]
backend = "tmux"
max_parallel = 4

[agent]
executable = "opencode"
"#,
        )
        .expect("parse config");

        assert!(config.validate().is_empty());

        config.execution.max_parallel = 0;
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|issue| issue.code == "execution.max_parallel.zero"));
    }
}
