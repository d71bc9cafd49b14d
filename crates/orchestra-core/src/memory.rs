//! Memory persistence
//!
//! Agents depend only on [`MemoryStore`]. Two stores are provided: one JSON
//! document per key on disk, and a process-local map. Neither locks keys
//! across writers: concurrent saves to one key are last-write-wins.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{MemoryBackend, MemoryConfig};

/// A stored value with its write time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub key: String,
    pub value: Value,
    pub timestamp: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
            timestamp: Utc::now(),
        }
    }
}

/// Key/value persistence contract
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn save(&self, key: &str, value: Value) -> Result<()>;

    /// `None` for unknown keys
    async fn load(&self, key: &str) -> Result<Option<Value>>;

    /// Remove a key; clearing an unknown key is not an error
    async fn clear(&self, key: &str) -> Result<()>;
}

/// Typed helpers over any store
#[async_trait]
pub trait MemoryStoreExt: MemoryStore {
    async fn save_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value).with_context(|| format!("Failed to serialize memory value for {}", key))?;
        self.save(key, value).await
    }

    async fn load_json<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        match self.load(key).await? {
            Some(value) => {
                let typed = serde_json::from_value(value)
                    .with_context(|| format!("Failed to decode memory value for {}", key))?;
                Ok(Some(typed))
            }
            None => Ok(None),
        }
    }
}

impl<S: MemoryStore + ?Sized> MemoryStoreExt for S {}

/// Distinguishes temp files of concurrent writers within one process
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// One JSON document per key under a base directory
#[derive(Debug, Clone)]
pub struct FileMemory {
    base_dir: PathBuf,
}

impl FileMemory {
    /// Open (and create if needed) a store rooted at `base_dir`
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)
            .with_context(|| format!("Failed to create memory directory {}", base_dir.display()))?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", encode_key(key)))
    }
}

#[async_trait]
impl MemoryStore for FileMemory {
    async fn save(&self, key: &str, value: Value) -> Result<()> {
        let path = self.entry_path(key);
        let json = serde_json::to_string_pretty(&MemoryEntry::new(key, value))
            .context("Failed to serialize memory entry")?;

        // Write then rename so readers never see a partial document
        let tmp = path.with_extension(format!(
            "json.{}-{}.tmp",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move memory entry into {}", path.display()))?;

        debug!(key, path = %path.display(), "Saved memory entry");
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Value>> {
        let path = self.entry_path(key);
        let json = match tokio::fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };

        let entry: MemoryEntry =
            serde_json::from_str(&json).with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(entry.value))
    }

    async fn clear(&self, key: &str) -> Result<()> {
        let path = self.entry_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key, "Cleared memory entry");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
        }
    }
}

/// Process-local store
#[derive(Debug, Default)]
pub struct InMemoryMemory {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

impl InMemoryMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Full entry including its timestamp
    pub fn entry(&self, key: &str) -> Option<MemoryEntry> {
        self.entries.read().get(key).cloned()
    }

    pub fn clear_all(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemory {
    async fn save(&self, key: &str, value: Value) -> Result<()> {
        self.entries.write().insert(key.to_string(), MemoryEntry::new(key, value));
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().get(key).map(|e| e.value.clone()))
    }

    async fn clear(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

/// Build the store selected in configuration
pub fn open_store(config: &MemoryConfig) -> Result<Arc<dyn MemoryStore>> {
    match config.backend {
        MemoryBackend::File => {
            let path = config.resolved_path();
            info!(path = %path.display(), "Using file-backed memory");
            Ok(Arc::new(FileMemory::new(path)?))
        }
        MemoryBackend::InMemory => {
            info!("Using in-memory store");
            Ok(Arc::new(InMemoryMemory::new()))
        }
    }
}

/// Map a key to a file stem: ASCII alphanumerics, '-' and '_' pass through,
/// every other byte becomes `%XX`, so distinct keys never share a file.
fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    if encoded.is_empty() {
        encoded.push_str("%00");
    }
    encoded
}
