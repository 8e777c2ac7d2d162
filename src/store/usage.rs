//! Page usage statistics: the asynchronous hit path and synchronous page reads.
//!
//! Hit batches are coalesced per page, sharded by page key and handed to a
//! fixed set of worker threads. Each shard is a FIFO served by one thread,
//! so updates to the same page apply in submission order while different
//! pages proceed independently.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::thread::JoinHandle;

use futures::future::{self, BoxFuture, FutureExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::{records, QuotaStore};
use crate::catalog::TileRange;
use crate::clock::{millis_to_minutes, Clock};
use crate::error::{QuotaError, Result};
use crate::metrics::QuotaMetrics;
use crate::model::{PageStats, PageStatsPayload, TilePage, TileSet};
use crate::storage::Storage;

/// Completion handle of an asynchronous hit update. Resolves to the
/// updated stats of each distinct page, in first-submitted order. Pages of
/// TileSets that no longer exist are skipped.
pub type StatsUpdate = BoxFuture<'static, Result<Vec<PageStats>>>;

type ShardResult = Result<Vec<(usize, PageStats)>>;

struct StatsJob {
    payloads: Vec<(usize, PageStatsPayload)>,
    reply: oneshot::Sender<ShardResult>,
}

/// Applies hit batches inside a single transaction each.
pub(crate) struct HitRecorder {
    storage: Arc<Storage>,
    clock: Arc<dyn Clock>,
    metrics: Arc<QuotaMetrics>,
}

impl HitRecorder {
    pub(crate) fn new(storage: Arc<Storage>, clock: Arc<dyn Clock>, metrics: Arc<QuotaMetrics>) -> Self {
        Self {
            storage,
            clock,
            metrics,
        }
    }

    fn record(&self, batch: &[(usize, PageStatsPayload)]) -> ShardResult {
        let now = self.clock.now_minutes();
        let result = self.storage.transaction(|tx| {
            let mut updated = Vec::with_capacity(batch.len());
            for (index, payload) in batch {
                let page = &payload.page;
                if records::tile_set(tx, page.tile_set_id())?.is_none() {
                    info!(page = %page, "Skipping hits for a TileSet that no longer exists");
                    continue;
                }
                let previous = records::page_stats(tx, page)?;
                let mut stats = previous.clone().unwrap_or_else(|| PageStats::new(now));
                let access = match payload.last_access_time {
                    0 => now,
                    millis => millis_to_minutes(millis),
                };
                stats.add_hits_and_access_time(payload.num_hits, access);
                records::put_page(tx, page, previous.as_ref(), &stats)?;
                updated.push((*index, stats));
            }
            Ok(updated)
        });

        match &result {
            Ok(updated) => {
                self.metrics.stats_batches.inc();
                debug!(pages = updated.len(), "Hit batch committed");
            }
            Err(e) => {
                self.metrics.stats_batch_failures.inc();
                warn!(error = %e, pages = batch.len(), "Hit batch failed");
            }
        }
        result
    }
}

/// Serial hit-update workers, one FIFO per shard.
pub(crate) struct StatsWorkers {
    senders: Vec<mpsc::UnboundedSender<StatsJob>>,
    handles: Vec<JoinHandle<()>>,
}

impl StatsWorkers {
    pub(crate) fn spawn(count: usize, recorder: Arc<HitRecorder>) -> Result<Self> {
        let count = count.max(1);
        let mut senders = Vec::with_capacity(count);
        let mut handles = Vec::with_capacity(count);
        for shard in 0..count {
            let (tx, rx) = mpsc::unbounded_channel();
            let recorder = recorder.clone();
            let handle = std::thread::Builder::new()
                .name(format!("quota-stats-{shard}"))
                .spawn(move || run_worker(shard, rx, recorder))?;
            senders.push(tx);
            handles.push(handle);
        }
        debug!(workers = count, "Stats workers started");
        Ok(Self { senders, handles })
    }

    pub(crate) fn submit(&self, payloads: Vec<PageStatsPayload>) -> StatsUpdate {
        if payloads.is_empty() {
            return future::ready(Ok(Vec::new())).boxed();
        }

        let shard_count = self.senders.len();
        let mut shards: Vec<Vec<(usize, PageStatsPayload)>> = vec![Vec::new(); shard_count];
        for (index, payload) in coalesce(payloads).into_iter().enumerate() {
            shards[shard_of(&payload.page, shard_count)].push((index, payload));
        }

        let mut replies = Vec::new();
        for (shard, batch) in shards.into_iter().enumerate() {
            if batch.is_empty() {
                continue;
            }
            let (reply, receiver) = oneshot::channel();
            let job = StatsJob {
                payloads: batch,
                reply,
            };
            if self.senders[shard].send(job).is_err() {
                return future::ready(Err(QuotaError::Closed)).boxed();
            }
            replies.push(receiver.map(|r| r.unwrap_or_else(|_| Err(QuotaError::Closed))));
        }

        async move {
            let shard_results = future::try_join_all(replies).await?;
            let mut updated: Vec<(usize, PageStats)> = shard_results.into_iter().flatten().collect();
            updated.sort_by_key(|(index, _)| *index);
            Ok::<_, QuotaError>(updated.into_iter().map(|(_, stats)| stats).collect())
        }
        .boxed()
    }

    /// Closes every queue and waits for the workers to drain them.
    pub(crate) fn shutdown(self) {
        drop(self.senders);
        for handle in self.handles {
            if handle.join().is_err() {
                error!("Stats worker panicked");
            }
        }
        debug!("Stats workers stopped");
    }
}

fn run_worker(shard: usize, mut rx: mpsc::UnboundedReceiver<StatsJob>, recorder: Arc<HitRecorder>) {
    while let Some(job) = rx.blocking_recv() {
        let result = recorder.record(&job.payloads);
        // The caller may have dropped the handle.
        let _ = job.reply.send(result);
    }
    debug!(shard, "Stats worker exiting");
}

/// Merges payloads for the same page, keeping first-seen page order.
fn coalesce(payloads: Vec<PageStatsPayload>) -> Vec<PageStatsPayload> {
    let mut positions: HashMap<TilePage, usize> = HashMap::new();
    let mut merged: Vec<PageStatsPayload> = Vec::new();
    for payload in payloads {
        match positions.get(&payload.page) {
            Some(&at) => merged[at].merge(&payload),
            None => {
                positions.insert(payload.page.clone(), merged.len());
                merged.push(payload);
            }
        }
    }
    merged
}

fn shard_of(page: &TilePage, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    page.hash(&mut hasher);
    (hasher.finish() % shards as u64) as usize
}

impl QuotaStore {
    /// Queues hit counts and access times for asynchronous application.
    ///
    /// Never blocks on persistence. The returned handle may be awaited or
    /// dropped; dropping it does not cancel the update.
    ///
    /// Payloads stamped `0` take the current time before coalescing, so a
    /// batch mixing "now" and explicit past accesses keeps the latest one.
    pub fn add_hits_and_set_access_time(&self, mut payloads: Vec<PageStatsPayload>) -> StatsUpdate {
        let open = match self.open_store() {
            Ok(open) => open,
            Err(e) => return future::ready(Err(e)).boxed(),
        };
        let now = self.clock.now_millis();
        for payload in payloads.iter_mut().filter(|p| p.last_access_time == 0) {
            payload.last_access_time = now;
        }
        let workers = open.workers.lock().unwrap_or_else(|e| e.into_inner());
        match workers.as_ref() {
            Some(workers) => workers.submit(payloads),
            None => future::ready(Err(QuotaError::Closed)).boxed(),
        }
    }

    /// Marks a page as emptied after its tiles were deleted.
    pub fn set_truncated(&self, page: &TilePage) -> Result<PageStats> {
        let stats = self.storage()?.transaction(|tx| {
            let previous = records::page_stats(tx, page)?
                .ok_or_else(|| QuotaError::NotFound(format!("no stats for page {page}")))?;
            let mut stats = previous.clone();
            stats.truncate();
            records::put_page(tx, page, Some(&previous), &stats)?;
            Ok(stats)
        })?;
        debug!(page = %page, "Page truncated");
        Ok(stats)
    }

    /// Current stats of a page. Fails with `NotFound` if never recorded.
    pub fn page_stats(&self, page: &TilePage) -> Result<PageStats> {
        self.storage()?.read(|view| {
            records::page_stats(view, page)?
                .ok_or_else(|| QuotaError::NotFound(format!("no stats for page {page}")))
        })
    }

    /// Inclusive tile range covered by `page`.
    pub fn tiles_for_page(&self, page: &TilePage) -> Result<TileRange> {
        let tile_set = self.tile_set_by_id(page.tile_set_id())?;
        self.calculator.to_tile_bounds(&tile_set, page)
    }

    /// Fails with `IllegalArgument` if the TileSet was never created.
    pub fn tile_set_by_id(&self, tile_set_id: &str) -> Result<TileSet> {
        self.storage()?.read(|view| {
            records::tile_set(view, tile_set_id)?.ok_or_else(|| {
                QuotaError::IllegalArgument(format!("TileSet {tile_set_id} does not exist"))
            })
        })
    }
}
