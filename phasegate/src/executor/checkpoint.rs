//! Checkpoint stores for workflow contexts.
//!
//! A checkpoint is the latest [`WorkflowContext`] of an execution. Writes are
//! monotonic: a context whose `sequence` is not greater than the stored one is
//! rejected with [`CheckpointError::Stale`], so a slow writer can never rewind
//! an execution.

use super::WorkflowContext;
use crate::errors::CheckpointError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Persistence seam for workflow contexts.
#[cfg_attr(test, mockall::automock)]
pub trait CheckpointStore: Send + Sync {
    /// Persists a context.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Stale`] when the stored sequence is not
    /// older than the context's, or an IO/serialization error.
    fn save(&self, context: &WorkflowContext) -> Result<(), CheckpointError>;

    /// Loads the latest context of an execution.
    ///
    /// # Errors
    ///
    /// Returns an IO or serialization error if the checkpoint is unreadable.
    fn load(&self, execution_id: &str) -> Result<Option<WorkflowContext>, CheckpointError>;

    /// Lists the execution ids with a checkpoint, sorted.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the backing storage cannot be listed.
    fn list(&self) -> Result<Vec<String>, CheckpointError>;
}

fn check_sequence(execution_id: &str, stored: Option<u64>, attempted: u64) -> Result<(), CheckpointError> {
    match stored {
        Some(stored) if attempted <= stored => Err(CheckpointError::Stale {
            execution_id: execution_id.to_string(),
            stored,
            attempted,
        }),
        _ => Ok(()),
    }
}

/// Keeps checkpoints in memory.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    contexts: RwLock<HashMap<String, WorkflowContext>>,
}

impl InMemoryCheckpointStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored checkpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.contexts.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contexts.read().is_empty()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn save(&self, context: &WorkflowContext) -> Result<(), CheckpointError> {
        let mut contexts = self.contexts.write();
        let stored = contexts.get(&context.execution_id).map(|c| c.sequence);
        check_sequence(&context.execution_id, stored, context.sequence)?;
        contexts.insert(context.execution_id.clone(), context.clone());
        Ok(())
    }

    fn load(&self, execution_id: &str) -> Result<Option<WorkflowContext>, CheckpointError> {
        Ok(self.contexts.read().get(execution_id).cloned())
    }

    fn list(&self) -> Result<Vec<String>, CheckpointError> {
        let mut ids: Vec<String> = self.contexts.read().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// Writes checkpoints as `{dir}/{execution_id}.json`.
///
/// Each write goes to a temporary sibling first and is renamed into place.
#[derive(Debug)]
pub struct FileCheckpointStore {
    dir: PathBuf,
    sequences: RwLock<HashMap<String, u64>>,
}

impl FileCheckpointStore {
    /// Opens (creating if needed) a checkpoint directory.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            sequences: RwLock::new(HashMap::new()),
        })
    }

    /// Returns the checkpoint directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, execution_id: &str) -> PathBuf {
        self.dir.join(format!("{execution_id}.json"))
    }

    fn read(path: &Path) -> Result<Option<WorkflowContext>, CheckpointError> {
        match fs::read_to_string(path) {
            Ok(raw) => WorkflowContext::from_json(&raw).map(Some),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, context: &WorkflowContext) -> Result<(), CheckpointError> {
        let path = self.path_for(&context.execution_id);
        let mut sequences = self.sequences.write();
        let stored = match sequences.get(&context.execution_id) {
            Some(seq) => Some(*seq),
            None => Self::read(&path)?.map(|c| c.sequence),
        };
        check_sequence(&context.execution_id, stored, context.sequence)?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, context.to_json()?)?;
        fs::rename(&tmp, &path)?;
        sequences.insert(context.execution_id.clone(), context.sequence);
        debug!(
            execution_id = %context.execution_id,
            sequence = context.sequence,
            path = %path.display(),
            "Checkpoint written"
        );
        Ok(())
    }

    fn load(&self, execution_id: &str) -> Result<Option<WorkflowContext>, CheckpointError> {
        Self::read(&self.path_for(execution_id))
    }

    fn list(&self) -> Result<Vec<String>, CheckpointError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}
