//! Repository configuration (`.strand/config.toml`).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Backend names the resolver knows how to classify.
pub const BACKEND_NAMES: &[&str] = &["tmux", "subagent", "sdk"];

pub const DEFAULT_BACKEND: &str = "tmux";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize config at {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to create config parent directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StrandConfig {
    pub execution: ExecutionConfig,
    pub tmux: TmuxConfig,
    pub agent: AgentConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Default backend name; a per-call override wins.
    pub backend: Option<String>,
    pub allow_legacy: bool,
    /// Readiness probe port for server-backed backends.
    pub port: u16,
    pub max_parallel: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            backend: None,
            allow_legacy: false,
            port: 4096,
            max_parallel: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TmuxConfig {
    pub binary: String,
    pub session_prefix: String,
    pub stagger_ms: u64,
    pub early_failure_secs: u64,
    pub pager_restart_delay_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for TmuxConfig {
    fn default() -> Self {
        Self {
            binary: "tmux".to_string(),
            session_prefix: "strand".to_string(),
            stagger_ms: 2000,
            early_failure_secs: 10,
            pager_restart_delay_ms: 1000,
            poll_interval_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub executable: String,
    pub default_agent: String,
    pub synthesis_agent: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            executable: "opencode".to_string(),
            default_agent: "build".to_string(),
            synthesis_agent: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PathsConfig {
    pub scratch_dir: Option<PathBuf>,
}

impl StrandConfig {
    pub fn scratch_dir(&self) -> PathBuf {
        self.paths
            .scratch_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("strand"))
    }

    pub fn backend_name(&self) -> &str {
        self.execution.backend.as_deref().unwrap_or(DEFAULT_BACKEND)
    }
}

pub fn parse_config(contents: &str) -> Result<StrandConfig, toml::de::Error> {
    toml::from_str(contents)
}

pub fn load_config(path: impl AsRef<Path>) -> Result<StrandConfig, ConfigError> {
    let path_ref = path.as_ref();
    let body = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
        path: path_ref.to_path_buf(),
        source,
    })?;
    parse_config(&body).map_err(|source| ConfigError::Parse {
        path: path_ref.to_path_buf(),
        source,
    })
}

/// Like [`load_config`], but a missing file yields the defaults.
pub fn load_or_default(path: impl AsRef<Path>) -> Result<StrandConfig, ConfigError> {
    let path_ref = path.as_ref();
    if !path_ref.exists() {
        tracing::debug!(path = %path_ref.display(), "no config file, using defaults");
        return Ok(StrandConfig::default());
    }
    load_config(path_ref)
}

pub fn save_config(path: impl AsRef<Path>, config: &StrandConfig) -> Result<(), ConfigError> {
    let path_ref = path.as_ref();
    if let Some(parent_dir) = path_ref.parent().map(Path::to_path_buf) {
        fs::create_dir_all(&parent_dir).map_err(|source| ConfigError::CreateDir {
            path: parent_dir,
            source,
        })?;
    }

    let body = toml::to_string_pretty(config).map_err(|source| ConfigError::Serialize {
        path: path_ref.to_path_buf(),
        source,
    })?;
    fs::write(path_ref, body).map_err(|source| ConfigError::Write {
        path: path_ref.to_path_buf(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_fills_in_defaults() {
        let config = parse_config(
            r#"
[execution]
backend = "subagent"

[tmux]
stagger_ms = 0
"#,
        )
        .expect("parse");
        assert_eq!(config.backend_name(), "subagent");
        assert_eq!(config.tmux.stagger_ms, 0);
        assert_eq!(config.tmux.early_failure_secs, 10);
        assert_eq!(config.agent.executable, "opencode");
        assert_eq!(config.execution.port, 4096);
    }

    #[test]
    fn empty_file_is_default_config() {
        assert_eq!(parse_config("").expect("parse"), StrandConfig::default());
        assert_eq!(StrandConfig::default().backend_name(), DEFAULT_BACKEND);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(".strand").join("config.toml");
        let mut config = StrandConfig::default();
        config.execution.backend = Some("tmux".to_string());
        config.agent.synthesis_agent = Some("summarize".to_string());
        config.paths.scratch_dir = Some(dir.path().join("scratch"));

        save_config(&path, &config).expect("save");
        assert_eq!(load_config(&path).expect("load"), config);
        assert_eq!(config.scratch_dir(), dir.path().join("scratch"));
    }

    #[test]
    fn load_or_default_tolerates_missing_file_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("config.toml");
        assert_eq!(
            load_or_default(&missing).expect("default"),
            StrandConfig::default()
        );

        fs::write(&missing, "[tmux\n").expect("write fixture");
        let err = load_or_default(&missing).expect_err("invalid toml");
        assert!(matches!(err, ConfigError::Parse { path, .. } if path == missing));
    }
}
