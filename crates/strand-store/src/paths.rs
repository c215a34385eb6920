use std::path::{Path, PathBuf};

use strand_core::ThreadId;

pub const STRAND_DIR: &str = ".strand";

/// On-disk layout under a repository root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    root: PathBuf,
}

impl StorePaths {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            root: repo_root.into(),
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.root
    }

    pub fn strand_dir(&self) -> PathBuf {
        self.root.join(STRAND_DIR)
    }

    pub fn index_path(&self) -> PathBuf {
        self.strand_dir().join("index.json")
    }

    pub fn config_path(&self) -> PathBuf {
        self.strand_dir().join("config.toml")
    }

    pub fn agents_path(&self) -> PathBuf {
        self.strand_dir().join("agents.toml")
    }

    pub fn stream_dir(&self, stream_id: &str) -> PathBuf {
        self.strand_dir().join("streams").join(stream_id)
    }

    pub fn tasks_path(&self, stream_id: &str) -> PathBuf {
        self.stream_dir(stream_id).join("tasks.json")
    }

    /// Conventional prompt location for a thread.
    pub fn prompt_path(&self, stream_id: &str, thread: &ThreadId) -> PathBuf {
        self.stream_dir(stream_id)
            .join("prompts")
            .join(format!("{thread}.md"))
    }
}

/// Walk up from `start` looking for a directory containing `.strand/`.
pub fn discover_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(STRAND_DIR).is_dir())
        .map(Path::to_path_buf)
}
