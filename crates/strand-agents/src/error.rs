use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("unknown agent '{name}'. defined agents: {}", .known.join(", "))]
    UnknownAgent { name: String, known: Vec<String> },
    #[error("agent '{agent}' has no candidate models")]
    NoModels { agent: String },
    #[error("invalid model spec '{value}': {reason}")]
    InvalidModelSpec { value: String, reason: String },
    #[error("agent '{agent}' is not marked as synthesis-capable")]
    NotSynthesisCapable { agent: String },
    #[error("failed to read agent definitions at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse agent definitions at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("could not read agent session list: {message}")]
    SessionList { message: String },
}
