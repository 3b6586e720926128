//! Resume checkpoints.
//!
//! After every successful flush the pipeline records how many bytes of the input have been
//! loaded. A later run over the same input (same checkpoint id) can seek past them.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LoadError, LoadResult};
use crate::ingestion::FormatOptions;

/// File name of the checkpoint map inside the data directory.
pub const CHECKPOINT_FILE: &str = "resume.json";

/// Progress of one input stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Bytes of the input fully loaded, measured from the start of the input.
    pub bytes_consumed: u64,
    /// Size of the input when the checkpoint was written, when known.
    pub total_bytes: Option<u64>,
    /// Extractor options in effect, so a resumed run can parse a headerless tail.
    pub format_options: FormatOptions,
}

impl Checkpoint {
    /// Whether there is anything left to resume.
    pub fn is_resumable(&self) -> bool {
        self.bytes_consumed > 0 && self.total_bytes.is_some_and(|total| self.bytes_consumed < total)
    }
}

/// Persistence for checkpoints, keyed by stream id.
pub trait CheckpointStore: Send {
    fn load(&self, id: &str) -> LoadResult<Option<Checkpoint>>;
    fn save(&mut self, id: &str, checkpoint: &Checkpoint) -> LoadResult<()>;
}

/// Stores all checkpoints as one JSON object in `<dir>/resume.json`.
///
/// Writes go to a temp file which is then renamed over the previous map.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Path of the checkpoint map.
    pub fn path(&self) -> PathBuf {
        self.dir.join(CHECKPOINT_FILE)
    }

    fn read_all(&self) -> LoadResult<HashMap<String, Checkpoint>> {
        let path = self.path();
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let bytes = fs::read(&path)?;
        if bytes.is_empty() {
            return Ok(HashMap::new());
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self, id: &str) -> LoadResult<Option<Checkpoint>> {
        Ok(self.read_all()?.remove(id))
    }

    fn save(&mut self, id: &str, checkpoint: &Checkpoint) -> LoadResult<()> {
        let mut all = self.read_all()?;
        all.insert(id.to_string(), checkpoint.clone());

        fs::create_dir_all(&self.dir)?;
        let final_path = self.path();
        let temp_path = final_path.with_extension("json.tmp");
        fs::write(&temp_path, serde_json::to_vec_pretty(&all)?)?;
        fs::rename(&temp_path, &final_path)?;

        debug!(
            id,
            bytes_consumed = checkpoint.bytes_consumed,
            total_bytes = ?checkpoint.total_bytes,
            "saved checkpoint"
        );
        Ok(())
    }
}

/// In-memory store. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    inner: Arc<Mutex<HashMap<String, Checkpoint>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every checkpoint saved so far.
    pub fn entries(&self) -> HashMap<String, Checkpoint> {
        self.inner.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self, id: &str) -> LoadResult<Option<Checkpoint>> {
        let map = self
            .inner
            .lock()
            .map_err(|_| LoadError::stream("checkpoint store lock poisoned"))?;
        Ok(map.get(id).cloned())
    }

    fn save(&mut self, id: &str, checkpoint: &Checkpoint) -> LoadResult<()> {
        let mut map = self
            .inner
            .lock()
            .map_err(|_| LoadError::stream("checkpoint store lock poisoned"))?;
        map.insert(id.to_string(), checkpoint.clone());
        Ok(())
    }
}
