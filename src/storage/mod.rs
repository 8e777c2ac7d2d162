//! Ordered transactional key-value storage behind the quota store.
//!
//! Engines only need ordered prefix scans and atomic batch application.
//! Transactions stage their writes in memory and apply them as one batch
//! while holding the single writer lock, so readers never observe a
//! partially applied transaction.

pub mod keys;
mod memory;
mod sled_engine;

pub use memory::MemoryEngine;
pub use sled_engine::SledEngine;

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::Backend;
use crate::error::{QuotaError, Result};

/// Staged writes: `None` deletes the key.
pub type WriteBatch = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

/// An ordered key-value engine.
pub trait KvEngine: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Visits entries under `prefix` in ascending key order until `visit`
    /// breaks.
    fn visit_prefix(
        &self,
        prefix: &[u8],
        visit: &mut dyn FnMut(&[u8], &[u8]) -> Result<ControlFlow<()>>,
    ) -> Result<()>;

    /// Applies every write in `batch` atomically.
    fn apply(&self, batch: WriteBatch) -> Result<()>;

    fn flush(&self) -> Result<()>;

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut entries = Vec::new();
        self.visit_prefix(prefix, &mut |k, v| {
            entries.push((k.to_vec(), v.to_vec()));
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(entries)
    }
}

/// Read-your-writes view over an engine.
pub struct Transaction<'e> {
    engine: &'e dyn KvEngine,
    writes: WriteBatch,
}

impl<'e> Transaction<'e> {
    fn new(engine: &'e dyn KvEngine) -> Self {
        Self {
            engine,
            writes: WriteBatch::new(),
        }
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.writes.get(key) {
            Some(staged) => Ok(staged.clone()),
            None => self.engine.get(key),
        }
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.writes.insert(key, Some(value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.writes.insert(key, None);
    }

    /// Committed entries under `prefix` overlaid with this transaction's writes.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.engine.scan_prefix(prefix)?.into_iter().collect();
        for (key, staged) in self.writes.range(prefix.to_vec()..) {
            if !key.starts_with(prefix) {
                break;
            }
            match staged {
                Some(value) => merged.insert(key.clone(), value.clone()),
                None => merged.remove(key),
            };
        }
        Ok(merged.into_iter().collect())
    }

    /// Visits entries under `prefix` in key order, including staged writes.
    pub fn visit_prefix(
        &self,
        prefix: &[u8],
        visit: &mut dyn FnMut(&[u8], &[u8]) -> Result<ControlFlow<()>>,
    ) -> Result<()> {
        let staged = self
            .writes
            .range(prefix.to_vec()..)
            .next()
            .is_some_and(|(key, _)| key.starts_with(prefix));
        if !staged {
            return self.engine.visit_prefix(prefix, visit);
        }
        for (key, value) in self.scan_prefix(prefix)? {
            if visit(&key, &value)?.is_break() {
                break;
            }
        }
        Ok(())
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn put_json<T: Serialize>(&mut self, key: Vec<u8>, value: &T) -> Result<()> {
        let raw = serde_json::to_vec(value)?;
        self.put(key, raw);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Engine plus the locking discipline that makes transactions serial and
/// reads consistent. Once closed, the engine is released and every call
/// fails with [`QuotaError::Closed`], including calls through handles
/// cloned before the close.
pub struct Storage {
    engine: RwLock<Option<Box<dyn KvEngine>>>,
    writer: Mutex<()>,
}

impl Storage {
    pub fn new(engine: Box<dyn KvEngine>) -> Self {
        Self {
            engine: RwLock::new(Some(engine)),
            writer: Mutex::new(()),
        }
    }

    /// Opens the configured backend under `dir`.
    pub fn open(backend: Backend, dir: &Path) -> Result<Self> {
        let engine: Box<dyn KvEngine> = match backend {
            Backend::Sled => Box::new(SledEngine::open(dir)?),
            Backend::Memory => Box::new(MemoryEngine::open(dir)?),
        };
        Ok(Self::new(engine))
    }

    /// Runs `body` in a transaction. Its writes are applied atomically if it
    /// returns `Ok`, and discarded otherwise.
    pub fn transaction<T>(&self, body: impl FnOnce(&mut Transaction<'_>) -> Result<T>) -> Result<T> {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let (out, writes) = {
            let engine = self.engine.read().unwrap_or_else(|e| e.into_inner());
            let mut tx = Transaction::new(engine.as_deref().ok_or(QuotaError::Closed)?);
            let out = body(&mut tx)?;
            (out, tx.writes)
        };
        if !writes.is_empty() {
            // Exclusive while applying, so readers never see half a batch.
            let engine = self.engine.write().unwrap_or_else(|e| e.into_inner());
            engine.as_deref().ok_or(QuotaError::Closed)?.apply(writes)?;
        }
        Ok(out)
    }

    /// Runs `body` against committed state only. Writes staged by `body`
    /// are never applied.
    pub fn read<T>(&self, body: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let engine = self.engine.read().unwrap_or_else(|e| e.into_inner());
        let view = Transaction::new(engine.as_deref().ok_or(QuotaError::Closed)?);
        body(&view)
    }

    pub fn flush(&self) -> Result<()> {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let engine = self.engine.read().unwrap_or_else(|e| e.into_inner());
        engine.as_deref().ok_or(QuotaError::Closed)?.flush()
    }

    /// Flushes and releases the engine. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let engine = self.engine.write().unwrap_or_else(|e| e.into_inner()).take();
        match engine {
            Some(engine) => engine.flush(),
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.engine
            .read()
            .map(|engine| engine.is_none())
            .unwrap_or(true)
    }
}

/// Decodes a JSON value from a scanned entry.
pub fn decode<T: DeserializeOwned>(raw: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(raw)?)
}
