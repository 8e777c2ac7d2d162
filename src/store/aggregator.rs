//! Coalesces individual tile hits into page-level hit batches.

use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use futures::future::{self, FutureExt};
use tracing::{debug, error};

use super::{QuotaStore, StatsUpdate};
use crate::error::Result;
use crate::model::{PageStatsPayload, TilePage, TileSet};

/// Aggregated hits that force a flush.
pub const MAX_AGGREGATES_BEFORE_COMMIT: usize = 3000;

/// Oldest age of pending hits before a flush.
pub const MAX_COMMIT_WINDOW: Duration = Duration::from_millis(100);

struct Pending {
    pages: HashMap<TilePage, PageStatsPayload>,
    aggregations: usize,
    since: Instant,
}

impl Pending {
    fn new() -> Self {
        Self {
            pages: HashMap::new(),
            aggregations: 0,
            since: Instant::now(),
        }
    }

    fn take(&mut self) -> Vec<PageStatsPayload> {
        let drained = std::mem::replace(self, Pending::new());
        drained.pages.into_values().collect()
    }
}

/// State shared with the background flusher.
struct Shared {
    store: Arc<QuotaStore>,
    pending: Mutex<Pending>,
    max_aggregates: usize,
    max_window: Duration,
}

impl Shared {
    fn flush(&self) -> StatsUpdate {
        let payloads = self.pending.lock().unwrap_or_else(|e| e.into_inner()).take();
        if payloads.is_empty() {
            return future::ready(Ok(Vec::new())).boxed();
        }
        self.submit(payloads)
    }

    /// Flushes only when the oldest pending hit has outlived the window.
    fn flush_expired(&self) {
        let payloads = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            if pending.pages.is_empty() || pending.since.elapsed() < self.max_window {
                return;
            }
            pending.take()
        };
        // The handle is dropped; the update is applied regardless.
        drop(self.submit(payloads));
    }

    fn submit(&self, payloads: Vec<PageStatsPayload>) -> StatsUpdate {
        debug!(pages = payloads.len(), "Flushing aggregated hits");
        self.store.add_hits_and_set_access_time(payloads)
    }
}

/// Tile-hit front end of the asynchronous stats path.
///
/// Each hit is mapped to its page and folded into a pending payload; the
/// batch is submitted when it holds [`MAX_AGGREGATES_BEFORE_COMMIT`]
/// aggregations or is older than [`MAX_COMMIT_WINDOW`]. A background thread
/// commits batches that age out while no new hits arrive, and flushes what
/// is left when the aggregator is dropped.
pub struct UsageAggregator {
    shared: Arc<Shared>,
    stop: Option<mpsc::Sender<()>>,
    flusher: Option<JoinHandle<()>>,
}

impl UsageAggregator {
    pub fn new(store: Arc<QuotaStore>) -> Result<Self> {
        Self::with_limits(store, MAX_AGGREGATES_BEFORE_COMMIT, MAX_COMMIT_WINDOW)
    }

    pub fn with_limits(store: Arc<QuotaStore>, max_aggregates: usize, max_window: Duration) -> Result<Self> {
        let shared = Arc::new(Shared {
            store,
            pending: Mutex::new(Pending::new()),
            max_aggregates: max_aggregates.max(1),
            max_window,
        });

        let (stop, stopped) = mpsc::channel::<()>();
        let flusher = {
            let shared = shared.clone();
            std::thread::Builder::new()
                .name("quota-aggregator".to_string())
                .spawn(move || run_flusher(&shared, &stopped))?
        };

        Ok(Self {
            shared,
            stop: Some(stop),
            flusher: Some(flusher),
        })
    }

    /// Records one hit on tile `(x, y, zoom)`. Returns the flush handle when
    /// this hit triggered a flush.
    pub fn tile_requested(&self, tile_set: &TileSet, x: u64, y: u64, zoom: u8) -> Result<Option<StatsUpdate>> {
        let shared = &self.shared;
        let page = shared.store.calculator().to_page(tile_set, x, y, zoom)?;
        let now = shared.store.clock().now_millis();

        let batch = {
            let mut pending = shared.pending.lock().unwrap_or_else(|e| e.into_inner());
            if pending.pages.is_empty() {
                pending.since = Instant::now();
            }
            let hit = PageStatsPayload::new(page.clone())
                .with_hits(1)
                .with_access_time(now);
            match pending.pages.get_mut(&page) {
                Some(payload) => payload.merge(&hit),
                None => {
                    pending.pages.insert(page, hit);
                }
            }
            pending.aggregations += 1;

            if pending.aggregations >= shared.max_aggregates || pending.since.elapsed() >= shared.max_window {
                Some(pending.take())
            } else {
                None
            }
        };

        Ok(batch.map(|payloads| shared.submit(payloads)))
    }

    /// Submits whatever is pending.
    pub fn flush(&self) -> StatsUpdate {
        self.shared.flush()
    }

    pub fn pending_pages(&self) -> usize {
        self.shared
            .pending
            .lock()
            .map(|p| p.pages.len())
            .unwrap_or(0)
    }
}

impl Drop for UsageAggregator {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(flusher) = self.flusher.take() {
            if flusher.join().is_err() {
                error!("Aggregator flusher panicked");
            }
        }
    }
}

fn run_flusher(shared: &Shared, stopped: &mpsc::Receiver<()>) {
    let tick = shared.max_window.max(Duration::from_millis(1));
    loop {
        match stopped.recv_timeout(tick) {
            Err(RecvTimeoutError::Timeout) => shared.flush_expired(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    drop(shared.flush());
    debug!("Aggregator flusher exiting");
}
