//! Filesystem side channels between runner scripts and the orchestrator.
//!
//! ```text
//! <scratch>/<stream>/
//!   01.02.03.done                      completion marker (JSON)
//!   01.02.03.session                   agent session id
//!   <stream>-01.02.03.run.sh           runner script
//!   <stream>-01.02.03.resume.sh        resume runner
//!   <stream>-01.02.03.synthesis.json   synthesis output
//!   <stream>-01.02.03.working-session  working session id seen by synthesis
//!   <stream>-01.02.03.transcript       exported working transcript
//!   <session>.manifest.json            dispatch manifest
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use strand_agents::CompletionMarker;
use strand_core::ThreadId;

use crate::error::{io, ExecError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchLayout {
    dir: PathBuf,
    stream_id: String,
}

impl ScratchLayout {
    pub fn new(scratch_root: impl AsRef<Path>, stream_id: impl Into<String>) -> Self {
        let stream_id = stream_id.into();
        Self {
            dir: scratch_root.as_ref().join(&stream_id),
            stream_id,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn ensure(&self) -> Result<(), ExecError> {
        fs::create_dir_all(&self.dir).map_err(|source| io(&self.dir, source))
    }

    pub fn done_path(&self, thread: &ThreadId) -> PathBuf {
        self.dir.join(format!("{thread}.done"))
    }

    pub fn session_path(&self, thread: &ThreadId) -> PathBuf {
        self.dir.join(format!("{thread}.session"))
    }

    pub fn script_path(&self, thread: &ThreadId) -> PathBuf {
        self.stream_file(thread, "run.sh")
    }

    pub fn resume_script_path(&self, thread: &ThreadId) -> PathBuf {
        self.stream_file(thread, "resume.sh")
    }

    pub fn synthesis_path(&self, thread: &ThreadId) -> PathBuf {
        self.stream_file(thread, "synthesis.json")
    }

    pub fn working_session_path(&self, thread: &ThreadId) -> PathBuf {
        self.stream_file(thread, "working-session")
    }

    pub fn transcript_path(&self, thread: &ThreadId) -> PathBuf {
        self.stream_file(thread, "transcript")
    }

    pub fn manifest_path(&self, session_name: &str) -> PathBuf {
        self.dir.join(format!("{session_name}.manifest.json"))
    }

    pub fn pager_state_path(&self, session_name: &str) -> PathBuf {
        self.dir.join(format!("{session_name}.pager.json"))
    }

    fn stream_file(&self, thread: &ThreadId, suffix: &str) -> PathBuf {
        self.dir.join(format!("{}-{thread}.{suffix}", self.stream_id))
    }

    /// Drop the marker and published session id of the previous run.
    pub fn clear_completion(&self, thread: &ThreadId) -> Result<(), ExecError> {
        remove_if_present(&self.done_path(thread))?;
        remove_if_present(&self.session_path(thread))
    }

    /// Drop outputs of an earlier dispatch so they are not mistaken for this one.
    pub fn clear_thread(&self, thread: &ThreadId) -> Result<(), ExecError> {
        self.clear_completion(thread)?;
        for path in [
            self.synthesis_path(thread),
            self.working_session_path(thread),
            self.transcript_path(thread),
        ] {
            remove_if_present(&path)?;
        }
        Ok(())
    }

    /// Manifests in this stream's scratch dir, newest first.
    pub fn manifests(&self) -> Result<Vec<PathBuf>, ExecError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(io(&self.dir, source)),
        };
        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| io(&self.dir, source))?;
            let path = entry.path();
            let is_manifest = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(".manifest.json"));
            if !is_manifest {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .map_err(|source| io(&path, source))?;
            found.push((modified, path));
        }
        found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        Ok(found.into_iter().map(|(_, path)| path).collect())
    }
}

fn remove_if_present(path: &Path) -> Result<(), ExecError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(io(path, source)),
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, ExecError> {
    match fs::read_to_string(path) {
        Ok(body) => Ok(Some(body)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(io(path, source)),
    }
}

/// `None` until the runner has published its marker.
pub fn read_marker(path: &Path) -> Result<Option<CompletionMarker>, ExecError> {
    let Some(body) = read_optional(path)? else {
        return Ok(None);
    };
    serde_json::from_str(body.trim())
        .map(Some)
        .map_err(|source| ExecError::Decode {
            path: path.to_path_buf(),
            source,
        })
}

/// First non-empty line of a session-id file.
pub fn read_session_id(path: &Path) -> Result<Option<String>, ExecError> {
    Ok(read_optional(path)?.and_then(|body| {
        body.lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
    }))
}

pub fn read_synthesis(path: &Path) -> Result<Option<String>, ExecError> {
    Ok(read_optional(path)?
        .map(|body| body.trim().to_string())
        .filter(|body| !body.is_empty()))
}
