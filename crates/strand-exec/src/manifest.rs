use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use strand_core::ThreadId;
use strand_store::write_atomic;
use strand_tmux::PaneId;

use crate::error::{io, ExecError};
use crate::markers::ScratchLayout;
use crate::request::ThreadSessionMap;

/// Everything needed to watch, page, resume, and collect a dispatched batch
/// after the dispatching process has exited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionManifest {
    pub session_name: String,
    pub stream_id: String,
    pub cwd: PathBuf,
    pub created_at: DateTime<Utc>,
    pub threads: Vec<ThreadSessionMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pager_pane: Option<PaneId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis_agent: Option<String>,
}

impl SessionManifest {
    pub fn entry(&self, thread: &ThreadId) -> Option<&ThreadSessionMap> {
        self.threads.iter().find(|entry| entry.thread_id == *thread)
    }

    pub fn entry_mut(&mut self, thread: &ThreadId) -> Option<&mut ThreadSessionMap> {
        self.threads.iter_mut().find(|entry| entry.thread_id == *thread)
    }

    /// Thread panes in dispatch order.
    pub fn pane_ids(&self) -> Vec<PaneId> {
        self.threads
            .iter()
            .filter_map(|entry| entry.pane_id.clone())
            .collect()
    }

    pub fn load(path: &Path) -> Result<Self, ExecError> {
        let body = fs::read_to_string(path).map_err(|source| io(path, source))?;
        serde_json::from_str(&body).map_err(|source| ExecError::Decode {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ExecError> {
        let mut body = serde_json::to_vec_pretty(self).map_err(|source| ExecError::Encode {
            path: path.to_path_buf(),
            source,
        })?;
        body.push(b'\n');
        write_atomic(path, &body)?;
        Ok(())
    }

    /// Manifest named `session`, or the most recent one for the stream.
    pub fn find(layout: &ScratchLayout, session: Option<&str>) -> Result<Self, ExecError> {
        let path = match session {
            Some(name) => layout.manifest_path(name),
            None => layout.manifests()?.into_iter().next().ok_or_else(|| {
                ExecError::runtime(format!(
                    "no dispatched batch found for stream {}; run `strand execute` first",
                    layout.stream_id()
                ))
            })?,
        };
        if !path.exists() {
            return Err(ExecError::runtime(format!(
                "no manifest at {}",
                path.display()
            )));
        }
        Self::load(&path)
    }
}
