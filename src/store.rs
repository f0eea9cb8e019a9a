//! Persistence collaborators for schema artifacts.
//!
//! The registry talks to storage only through [`ArtifactStore`]:
//! insert, find, update and delete by [`ArtifactFilter`]. Two stores ship
//! with the crate: [`MemoryStore`] for tests and embedding, and [`FileStore`],
//! which keeps every artifact in one JSON document on disk.

use std::cell::RefCell;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard, RwLock};

use crate::artifact::{ArtifactFilter, ArtifactPatch, SchemaArtifact};
use crate::error::StoreError;

pub trait ArtifactStore: Send + Sync {
    /// Add a new artifact. Fails with `DuplicateId` if the id is taken.
    fn insert(&self, artifact: SchemaArtifact) -> Result<(), StoreError>;

    /// Every matching artifact, in insertion order.
    fn find(&self, filter: &ArtifactFilter) -> Result<Vec<SchemaArtifact>, StoreError>;

    /// Apply `patch` to every match and return how many rows changed.
    fn update(&self, filter: &ArtifactFilter, patch: &ArtifactPatch) -> Result<usize, StoreError>;

    /// Delete every match and return how many rows were removed.
    fn delete(&self, filter: &ArtifactFilter) -> Result<usize, StoreError>;

    /// Exclusive access to the backing data until the guard drops.
    ///
    /// Calls made through this store on the same thread while the guard is
    /// held still go through. Stores whose data lives only in this process
    /// return an empty guard.
    fn lock(&self) -> Result<StoreGuard<'_>, StoreError> {
        Ok(StoreGuard::empty())
    }
}

trait Held {}

impl<T> Held for T {}

/// Returned by [`ArtifactStore::lock`]; releases the lock on drop.
pub struct StoreGuard<'a> {
    _held: Option<Box<dyn Held + 'a>>,
}

impl<'a> StoreGuard<'a> {
    pub fn new<T: 'a>(held: T) -> Self {
        Self {
            _held: Some(Box::new(held)),
        }
    }

    pub fn empty() -> Self {
        Self { _held: None }
    }
}

/// Shared row operations over an in-memory table.
fn insert_row(rows: &mut Vec<SchemaArtifact>, artifact: SchemaArtifact) -> Result<(), StoreError> {
    if rows.iter().any(|row| row.id == artifact.id) {
        return Err(StoreError::DuplicateId(artifact.id));
    }
    rows.push(artifact);
    Ok(())
}

fn update_rows(rows: &mut [SchemaArtifact], filter: &ArtifactFilter, patch: &ArtifactPatch) -> usize {
    let now = Utc::now();
    rows.iter_mut()
        .filter(|row| filter.matches(row))
        .map(|row| patch.apply(row, now))
        .filter(|changed| *changed)
        .count()
}

fn delete_rows(rows: &mut Vec<SchemaArtifact>, filter: &ArtifactFilter) -> usize {
    let before = rows.len();
    rows.retain(|row| !filter.matches(row));
    before - rows.len()
}

/// Artifacts kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RwLock<Vec<SchemaArtifact>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArtifactStore for MemoryStore {
    fn insert(&self, artifact: SchemaArtifact) -> Result<(), StoreError> {
        insert_row(&mut self.rows.write(), artifact)
    }

    fn find(&self, filter: &ArtifactFilter) -> Result<Vec<SchemaArtifact>, StoreError> {
        Ok(self
            .rows
            .read()
            .iter()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect())
    }

    fn update(&self, filter: &ArtifactFilter, patch: &ArtifactPatch) -> Result<usize, StoreError> {
        Ok(update_rows(&mut self.rows.write(), filter, patch))
    }

    fn delete(&self, filter: &ArtifactFilter) -> Result<usize, StoreError> {
        Ok(delete_rows(&mut self.rows.write(), filter))
    }
}

/// Artifacts kept in a JSON array on disk.
///
/// Every operation takes an advisory lock on `<path>.lock` and reads the
/// document fresh, so several processes may share one file. Mutations are
/// written to `<path>.tmp` and renamed over the original.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    gate: ReentrantMutex<RefCell<Gate>>,
}

/// Lock state for the current holder thread.
#[derive(Debug, Default)]
struct Gate {
    depth: usize,
    file: Option<File>,
}

/// One level of a held [`FileStore`] lock.
struct Hold<'a> {
    gate: ReentrantMutexGuard<'a, RefCell<Gate>>,
}

impl Drop for Hold<'_> {
    fn drop(&mut self) {
        let mut gate = self.gate.borrow_mut();
        gate.depth -= 1;
        if gate.depth == 0 {
            if let Some(file) = gate.file.take() {
                if let Err(e) = FileExt::unlock(&file) {
                    tracing::warn!(error = %e, "failed to release store lock");
                }
            }
        }
    }
}

impl FileStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self {
            path: path.into(),
            gate: ReentrantMutex::new(RefCell::new(Gate::default())),
        };
        let rows = store.load()?;
        tracing::debug!(path = %store.path.display(), artifacts = rows.len(), "opened artifact store");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lock, or deepen it when this thread already holds it.
    fn enter(&self) -> Result<Hold<'_>, StoreError> {
        let guard = self.gate.lock();
        {
            let mut gate = guard.borrow_mut();
            if gate.depth == 0 {
                gate.file = Some(self.lock_file()?);
            }
            gate.depth += 1;
        }
        Ok(Hold { gate: guard })
    }

    fn lock_file(&self) -> Result<File, StoreError> {
        let lock_path = self.path.with_extension("lock");
        let io = io_error(&lock_path);
        if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(&io)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(&io)?;
        file.lock_exclusive().map_err(&io)?;
        tracing::trace!(path = %lock_path.display(), "acquired store lock");
        Ok(file)
    }

    fn load(&self) -> Result<Vec<SchemaArtifact>, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(Vec::new()),
            Ok(content) => serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
                path: self.path.clone(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(source) => Err(StoreError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Run `change` on the current table and persist the result.
    fn mutate<T, F>(&self, change: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Vec<SchemaArtifact>) -> Result<T, StoreError>,
    {
        let _hold = self.enter()?;
        let mut rows = self.load()?;
        let result = change(&mut rows)?;
        self.persist(&rows)?;
        Ok(result)
    }

    fn persist(&self, rows: &[SchemaArtifact]) -> Result<(), StoreError> {
        let io = io_error(&self.path);
        let content = serde_json::to_string_pretty(rows).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(&io)?;
        }
        let temp = self.path.with_extension("tmp");
        fs::write(&temp, content).map_err(&io)?;
        fs::rename(&temp, &self.path).map_err(&io)?;
        Ok(())
    }
}

fn io_error(path: &Path) -> impl Fn(std::io::Error) -> StoreError {
    let path = path.to_path_buf();
    move |source| StoreError::Io {
        path: path.clone(),
        source,
    }
}

impl ArtifactStore for FileStore {
    fn insert(&self, artifact: SchemaArtifact) -> Result<(), StoreError> {
        self.mutate(|rows| insert_row(rows, artifact))
    }

    fn find(&self, filter: &ArtifactFilter) -> Result<Vec<SchemaArtifact>, StoreError> {
        let _hold = self.enter()?;
        Ok(self
            .load()?
            .into_iter()
            .filter(|row| filter.matches(row))
            .collect())
    }

    fn update(&self, filter: &ArtifactFilter, patch: &ArtifactPatch) -> Result<usize, StoreError> {
        self.mutate(|rows| Ok(update_rows(rows, filter, patch)))
    }

    fn delete(&self, filter: &ArtifactFilter) -> Result<usize, StoreError> {
        self.mutate(|rows| Ok(delete_rows(rows, filter)))
    }

    fn lock(&self) -> Result<StoreGuard<'_>, StoreError> {
        Ok(StoreGuard::new(self.enter()?))
    }
}
