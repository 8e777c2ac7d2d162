//! In-memory engine with an optional JSON snapshot.

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::debug;

use super::{KvEngine, WriteBatch};
use crate::error::Result;

const SNAPSHOT_FILE: &str = "memory-store.json";

/// A `BTreeMap` behind a lock. When opened on a directory the map is
/// loaded from, and written back to, a snapshot file on `flush`.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    snapshot: Option<PathBuf>,
}

impl MemoryEngine {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let snapshot = dir.join(SNAPSHOT_FILE);
        let entries = if snapshot.exists() {
            let raw = std::fs::read(&snapshot)?;
            let pairs: Vec<(Vec<u8>, Vec<u8>)> = serde_json::from_slice(&raw)?;
            debug!(entries = pairs.len(), path = %snapshot.display(), "Loaded memory snapshot");
            pairs.into_iter().collect()
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            entries: RwLock::new(entries),
            snapshot: Some(snapshot),
        })
    }
}

impl KvEngine for MemoryEngine {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn visit_prefix(
        &self,
        prefix: &[u8],
        visit: &mut dyn FnMut(&[u8], &[u8]) -> Result<ControlFlow<()>>,
    ) -> Result<()> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        for (key, value) in entries.range(prefix.to_vec()..) {
            if !key.starts_with(prefix) {
                break;
            }
            if visit(key, value)?.is_break() {
                break;
            }
        }
        Ok(())
    }

    fn apply(&self, batch: WriteBatch) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        for (key, value) in batch {
            match value {
                Some(value) => entries.insert(key, value),
                None => entries.remove(&key),
            };
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let raw = {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            let pairs: Vec<(&Vec<u8>, &Vec<u8>)> = entries.iter().collect();
            serde_json::to_vec(&pairs)?
        };
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}
