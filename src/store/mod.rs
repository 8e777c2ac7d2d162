//! The quota store: TileSet quotas, page statistics and expiration candidates.
//!
//! The store is a small state machine, `CLOSED -> OPEN -> CLOSED`. While
//! open it owns the persistence handle and a pool of serial workers that
//! apply asynchronous hit updates. Every accounting call made while closed
//! fails with [`QuotaError::Closed`].
//!
//! All writes run as single transactions behind one writer lock, so quota,
//! tile-count and cascading changes are all-or-nothing and a hit update can
//! never resurrect a page a concurrent delete just removed.

mod aggregator;
mod ledger;
mod lifecycle;
mod records;
mod selector;
mod usage;

pub use aggregator::{UsageAggregator, MAX_AGGREGATES_BEFORE_COMMIT, MAX_COMMIT_WINDOW};
pub use lifecycle::{STORE_VERSION, VERSION_FILE};
pub use usage::StatsUpdate;

use std::sync::{Arc, Mutex, RwLock};

use tracing::warn;

use crate::catalog::LayerCatalog;
use crate::clock::Clock;
use crate::config::Config;
use crate::error::{QuotaError, Result};
use crate::metrics::QuotaMetrics;
use crate::paging::TilePageCalculator;
use crate::storage::Storage;
use usage::StatsWorkers;

/// Resources that exist only while the store is open.
struct OpenStore {
    storage: Arc<Storage>,
    workers: Mutex<Option<StatsWorkers>>,
}

impl OpenStore {
    fn shutdown(&self) -> Result<()> {
        let workers = self.workers.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(workers) = workers {
            workers.shutdown();
        }
        self.storage.close()
    }
}

/// Disk-quota and page-usage store for a tile cache.
pub struct QuotaStore {
    config: Arc<Config>,
    calculator: Arc<TilePageCalculator>,
    clock: Arc<dyn Clock>,
    metrics: Arc<QuotaMetrics>,
    state: RwLock<Option<Arc<OpenStore>>>,
}

impl QuotaStore {
    /// Creates a closed store. Call [`QuotaStore::start_up`] before use.
    pub fn new(config: Arc<Config>, catalog: Arc<dyn LayerCatalog>, clock: Arc<dyn Clock>) -> Result<Self> {
        let calculator = Arc::new(TilePageCalculator::new(
            catalog,
            config.paging.strategy.clone(),
        ));
        Ok(Self {
            config,
            calculator,
            clock,
            metrics: Arc::new(QuotaMetrics::new()?),
            state: RwLock::new(None),
        })
    }

    pub fn is_open(&self) -> bool {
        self.state
            .read()
            .map(|state| state.is_some())
            .unwrap_or(false)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn calculator(&self) -> &Arc<TilePageCalculator> {
        &self.calculator
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn metrics(&self) -> &QuotaMetrics {
        &self.metrics
    }

    fn open_store(&self) -> Result<Arc<OpenStore>> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.clone().ok_or(QuotaError::Closed)
    }

    fn storage(&self) -> Result<Arc<Storage>> {
        Ok(self.open_store()?.storage.clone())
    }
}

impl Drop for QuotaStore {
    fn drop(&mut self) {
        let open = self
            .state
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(open) = open {
            if let Err(e) = open.shutdown() {
                warn!(error = %e, "Failed to flush quota store on drop");
            }
        }
    }
}
