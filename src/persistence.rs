//! Caller-owned storage of the last state each plan reached.

use crate::core::{PlanError, Result, StateToken};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::fs;
use tokio::sync::Mutex;

lazy_static! {
    // One writer lock per state file, shared by every store opened on it.
    static ref FILE_LOCKS: std::sync::Mutex<HashMap<PathBuf, Arc<Mutex<()>>>> =
        std::sync::Mutex::new(HashMap::new());
}

fn file_lock(path: &Path) -> Arc<Mutex<()>> {
    let key = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut locks = FILE_LOCKS
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    Arc::clone(locks.entry(key).or_default())
}

/// Durable, read-your-writes storage of one state token per key.
#[async_trait]
pub trait StatePersistence: Send + Sync {
    /// The last saved state, or `None` when the key has no history.
    async fn load(&self, key: &str) -> Result<Option<StateToken>>;

    async fn save(&self, key: &str, state: &StateToken) -> Result<()>;
}

/// A saved state with its bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub state: StateToken,
    pub updated_at: DateTime<Utc>,
}

impl PersistedState {
    pub fn now(state: StateToken) -> Self {
        Self {
            state,
            updated_at: Utc::now(),
        }
    }
}

/// Process-local store, mostly for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: Mutex<BTreeMap<String, PersistedState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a key, as if a previous run had saved it.
    pub async fn seed(&self, key: impl Into<String>, state: impl Into<StateToken>) {
        self.entries
            .lock()
            .await
            .insert(key.into(), PersistedState::now(state.into()));
    }

    pub async fn entry(&self, key: &str) -> Option<PersistedState> {
        self.entries.lock().await.get(key).cloned()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.entries.lock().await.keys().cloned().collect()
    }
}

#[async_trait]
impl StatePersistence for MemoryStateStore {
    async fn load(&self, key: &str) -> Result<Option<StateToken>> {
        Ok(self
            .entries
            .lock()
            .await
            .get(key)
            .map(|entry| entry.state.clone()))
    }

    async fn save(&self, key: &str, state: &StateToken) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), PersistedState::now(state.clone()));
        Ok(())
    }
}

/// All keys in one pretty-printed JSON file, rewritten atomically on save.
///
/// Stores opened on the same path within a process share one writer lock,
/// so one store per plan is safe. Other processes must not write the file.
#[derive(Debug)]
pub struct JsonFileStateStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl JsonFileStateStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            write_lock: file_lock(&path),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every saved entry, keyed by persistence key.
    pub async fn entries(&self) -> Result<BTreeMap<String, PersistedState>> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => {
                return Err(PlanError::Persistence(format!(
                    "Failed to read state file '{}': {}",
                    self.path.display(),
                    err
                )));
            }
        };
        serde_json::from_slice(&bytes).map_err(|err| {
            PlanError::Persistence(format!(
                "Failed to parse state file '{}': {}",
                self.path.display(),
                err
            ))
        })
    }
}

#[async_trait]
impl StatePersistence for JsonFileStateStore {
    async fn load(&self, key: &str) -> Result<Option<StateToken>> {
        Ok(self.entries().await?.remove(key).map(|entry| entry.state))
    }

    async fn save(&self, key: &str, state: &StateToken) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.entries().await?;
        entries.insert(key.to_string(), PersistedState::now(state.clone()));

        let json = serde_json::to_vec_pretty(&entries).map_err(|err| {
            PlanError::Persistence(format!("Failed to serialize state file: {}", err))
        })?;
        atomic_write(&self.path, json).await
    }
}

// Writes a uniquely named sibling temp file, then renames it over `path`.
async fn atomic_write(path: &Path, bytes: Vec<u8>) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).await.map_err(|err| {
        PlanError::Persistence(format!(
            "Failed to create parent directory '{}': {}",
            dir.display(),
            err
        ))
    })?;

    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut tmp = NamedTempFile::new_in(&dir).map_err(|err| {
            PlanError::Persistence(format!(
                "Failed to create temp file in '{}': {}",
                dir.display(),
                err
            ))
        })?;
        tmp.write_all(&bytes)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|err| {
                PlanError::Persistence(format!(
                    "Failed to write temp file '{}': {}",
                    tmp.path().display(),
                    err
                ))
            })?;
        tmp.persist(&target).map_err(|err| {
            PlanError::Persistence(format!(
                "Failed to replace '{}': {}",
                target.display(),
                err.error
            ))
        })?;
        Ok(())
    })
    .await
    .map_err(|err| PlanError::Persistence(format!("State file writer panicked: {}", err)))?
}
