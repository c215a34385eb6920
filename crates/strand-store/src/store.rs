//! Locked read-modify-write of JSON documents.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use strand_core::{StreamIndex, TaskDocument};

use crate::atomic::write_atomic;
use crate::error::StoreError;
use crate::lock::{DirLock, LockOptions};

/// A document persisted as one JSON file.
pub trait JsonDocument: Serialize + DeserializeOwned {
    /// Stamp the document's last-updated time.
    fn touch(&mut self, now: DateTime<Utc>);
}

impl JsonDocument for StreamIndex {
    fn touch(&mut self, now: DateTime<Utc>) {
        self.last_updated = now;
    }
}

impl JsonDocument for TaskDocument {
    fn touch(&mut self, now: DateTime<Utc>) {
        self.last_updated = now;
    }
}

pub type IndexStore = DocumentStore<StreamIndex>;
pub type TaskStore = DocumentStore<TaskDocument>;

#[derive(Debug, Clone)]
pub struct DocumentStore<T> {
    path: PathBuf,
    lock: LockOptions,
    _doc: PhantomData<fn() -> T>,
}

impl<T: JsonDocument> DocumentStore<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: LockOptions::default(),
            _doc: PhantomData,
        }
    }

    pub fn with_lock_options(mut self, lock: LockOptions) -> Self {
        self.lock = lock;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Unlocked read. May be stale, never partial.
    pub fn load(&self) -> Result<T, StoreError> {
        let body = match fs::read(&self.path) {
            Ok(body) => body,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StoreError::IndexNotFound {
                    path: self.path.clone(),
                })
            }
            Err(source) => return Err(StoreError::io(&self.path, source)),
        };
        serde_json::from_slice(&body).map_err(|source| StoreError::IndexCorrupt {
            path: self.path.clone(),
            source,
        })
    }

    /// Stamp `doc` and replace the file atomically.
    pub fn save(&self, doc: &mut T) -> Result<(), StoreError> {
        doc.touch(Utc::now());
        let mut body = serde_json::to_vec_pretty(doc).map_err(|source| StoreError::Serialize {
            path: self.path.clone(),
            source,
        })?;
        body.push(b'\n');
        write_atomic(&self.path, &body)
    }

    /// Lock, load, apply `f`, save, unlock. Nothing is written when `f` fails.
    pub fn modify<R, E>(&self, f: impl FnOnce(&mut T) -> Result<R, E>) -> Result<R, E>
    where
        E: From<StoreError>,
    {
        self.locked(|| self.load(), f)
    }

    /// Lock, load, hand `f` the document, unlock. Nothing is written; other
    /// writers wait until `f` returns.
    pub fn read_locked<R, E>(&self, f: impl FnOnce(&T) -> Result<R, E>) -> Result<R, E>
    where
        E: From<StoreError>,
    {
        let guard = DirLock::acquire(&self.path, &self.lock)?;
        let doc = self.load()?;
        let out = f(&doc)?;
        guard.release()?;
        Ok(out)
    }

    /// Like [`modify`](Self::modify), starting from `init()` when the file is absent.
    pub fn modify_or_else<R, E>(
        &self,
        init: impl FnOnce() -> T,
        f: impl FnOnce(&mut T) -> Result<R, E>,
    ) -> Result<R, E>
    where
        E: From<StoreError>,
    {
        self.locked(
            || match self.load() {
                Err(StoreError::IndexNotFound { .. }) => Ok(init()),
                other => other,
            },
            f,
        )
    }

    fn locked<R, E>(
        &self,
        load: impl FnOnce() -> Result<T, StoreError>,
        f: impl FnOnce(&mut T) -> Result<R, E>,
    ) -> Result<R, E>
    where
        E: From<StoreError>,
    {
        let guard = DirLock::acquire(&self.path, &self.lock)?;
        let mut doc = load()?;
        let out = f(&mut doc)?;
        self.save(&mut doc)?;
        guard.release()?;
        Ok(out)
    }
}
