//! Repository root, configuration and document stores for one invocation.

use std::path::{Path, PathBuf};

use strand_agents::AgentDefinitions;
use strand_core::{load_or_default, StrandConfig, TaskDocument};
use strand_exec::ScratchLayout;
use strand_store::{discover_root, IndexStore, StoreError, StorePaths, TaskStore};

use crate::error::MainError;

pub struct Workspace {
    pub paths: StorePaths,
    pub config: StrandConfig,
}

impl Workspace {
    /// Nearest ancestor holding `.strand/`, or `cwd` itself for a fresh repo.
    pub fn discover(cwd: &Path) -> Result<Self, MainError> {
        let root = discover_root(cwd).unwrap_or_else(|| cwd.to_path_buf());
        Self::open(root)
    }

    pub fn open(root: impl Into<PathBuf>) -> Result<Self, MainError> {
        let paths = StorePaths::new(root);
        let config_path = paths.config_path();
        let config = load_or_default(&config_path).map_err(|source| MainError::LoadConfig {
            path: config_path.clone(),
            source,
        })?;
        tracing::debug!(root = %paths.repo_root().display(), "opened workspace");
        Ok(Self { paths, config })
    }

    pub fn root(&self) -> &Path {
        self.paths.repo_root()
    }

    pub fn index_store(&self) -> IndexStore {
        IndexStore::new(self.paths.index_path())
    }

    pub fn task_store(&self, stream_id: &str) -> TaskStore {
        TaskStore::new(self.paths.tasks_path(stream_id))
    }

    /// `explicit` if given, else the index's current stream. Either way the
    /// stream must exist.
    pub fn resolve_stream(&self, explicit: Option<&str>) -> Result<String, MainError> {
        let index = self.index_store().load()?;
        let stream_id = match explicit {
            Some(id) => id.to_string(),
            None => index.current_stream.clone().ok_or(MainError::NoStream)?,
        };
        index.require(&stream_id)?;
        Ok(stream_id)
    }

    pub fn load_tasks(&self, stream_id: &str) -> Result<TaskDocument, MainError> {
        match self.task_store(stream_id).load() {
            Ok(doc) => Ok(doc),
            Err(StoreError::IndexNotFound { path }) => Err(MainError::NoTasks {
                stream: stream_id.to_string(),
                path,
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Agent definitions; an absent file means no agents are defined.
    pub fn definitions(&self) -> Result<AgentDefinitions, MainError> {
        let path = self.paths.agents_path();
        if !path.is_file() {
            tracing::debug!(path = %path.display(), "no agent definitions file");
            return Ok(AgentDefinitions::default());
        }
        Ok(AgentDefinitions::load(&path)?)
    }

    pub fn scratch(&self, stream_id: &str) -> ScratchLayout {
        ScratchLayout::new(self.config.scratch_dir(), stream_id)
    }

    /// Recompute the stream's derived status from its task document.
    pub fn refresh_stream(&self, stream_id: &str, doc: &TaskDocument) -> Result<(), MainError> {
        self.index_store().modify(|index| -> Result<(), MainError> {
            index.require_mut(stream_id)?.refresh_status(&doc.tasks);
            Ok(())
        })
    }

    /// Locked edit of a stream's task document, refreshing the stream status after.
    pub fn modify_tasks<R>(
        &self,
        stream_id: &str,
        f: impl FnOnce(&mut TaskDocument) -> Result<R, MainError>,
    ) -> Result<R, MainError> {
        let store = self.task_store(stream_id);
        if !store.exists() {
            return Err(MainError::NoTasks {
                stream: stream_id.to_string(),
                path: store.path().to_path_buf(),
            });
        }
        let (out, doc) = store.modify(|doc| -> Result<_, MainError> {
            let out = f(doc)?;
            Ok((out, doc.clone()))
        })?;
        self.refresh_stream(stream_id, &doc)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_core::StreamIndex;

    #[test]
    fn discovers_root_from_nested_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join(".strand")).expect("strand dir");
        std::fs::write(
            dir.path().join(".strand/config.toml"),
            "[tmux]\nsession_prefix = \"work\"\n",
        )
        .expect("config");
        let nested = dir.path().join("src/deep");
        std::fs::create_dir_all(&nested).expect("nested");

        let workspace = Workspace::discover(&nested).expect("workspace");
        assert_eq!(workspace.root(), dir.path());
        assert_eq!(workspace.config.tmux.session_prefix, "work");
    }

    #[test]
    fn stream_resolution_needs_a_known_stream() {
        let dir = tempfile::tempdir().expect("tempdir");
        let workspace = Workspace::open(dir.path()).expect("workspace");
        assert!(matches!(
            workspace.resolve_stream(None),
            Err(MainError::Store(StoreError::IndexNotFound { .. }))
        ));

        workspace
            .index_store()
            .modify_or_else(StreamIndex::default, |index| -> Result<(), MainError> {
                index.add_stream(strand_core::StreamMetadata::new("auth", "Auth", 1))?;
                Ok(())
            })
            .expect("seed");
        assert!(matches!(workspace.resolve_stream(None), Err(MainError::NoStream)));
        assert_eq!(workspace.resolve_stream(Some("auth")).expect("explicit"), "auth");
        assert!(matches!(
            workspace.resolve_stream(Some("ghost")),
            Err(MainError::Index(_))
        ));
    }

    #[test]
    fn missing_agent_file_yields_empty_definitions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let workspace = Workspace::open(dir.path()).expect("workspace");
        assert!(workspace.definitions().expect("definitions").agents.is_empty());
    }
}
