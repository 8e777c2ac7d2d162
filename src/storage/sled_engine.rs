//! sled-backed engine.

use std::ops::ControlFlow;
use std::path::Path;

use sled::Db;
use tracing::debug;

use super::{KvEngine, WriteBatch};
use crate::error::Result;

pub struct SledEngine {
    db: Db,
}

impl SledEngine {
    pub fn open(dir: &Path) -> Result<Self> {
        let db = sled::open(dir)?;
        debug!(path = %dir.display(), recovered = db.was_recovered(), "Opened sled page store");
        Ok(Self { db })
    }
}

impl KvEngine for SledEngine {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    fn visit_prefix(
        &self,
        prefix: &[u8],
        visit: &mut dyn FnMut(&[u8], &[u8]) -> Result<ControlFlow<()>>,
    ) -> Result<()> {
        for entry in self.db.scan_prefix(prefix) {
            let (key, value) = entry?;
            if visit(&key, &value)?.is_break() {
                break;
            }
        }
        Ok(())
    }

    fn apply(&self, batch: WriteBatch) -> Result<()> {
        let mut sled_batch = sled::Batch::default();
        for (key, value) in batch {
            match value {
                Some(value) => sled_batch.insert(key, value),
                None => sled_batch.remove(key),
            }
        }
        self.db.apply_batch(sled_batch)?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}
