//! Integration tests for LRU / LFU page selection.

use std::path::Path;
use std::sync::Arc;

use tile_quota::config::Backend;
use tile_quota::{
    Config, ExpirationPolicy, GridSubset, LayerInfo, ManualClock, PageStatsPayload, QuotaStore,
    StaticCatalog, TilePage, TileSet,
};

fn layer(name: &str) -> LayerInfo {
    LayerInfo {
        name: name.to_string(),
        grid_subsets: vec![GridSubset::quad_tree("EPSG:900913", 1, 1, 10)],
        mime_formats: vec!["image/png".to_string()],
        parameter_ids: vec![],
    }
}

fn open_store(root: &Path, clock: Arc<ManualClock>) -> QuotaStore {
    let mut config = Config::with_root(root);
    config.store.backend = Backend::Memory;
    let catalog = StaticCatalog::new([layer("roads"), layer("rivers")]);
    let store = QuotaStore::new(Arc::new(config), Arc::new(catalog), clock).unwrap();
    store.start_up().unwrap();
    store
}

fn page_of(store: &QuotaStore, layer: &str, x: u64) -> TilePage {
    let ts = TileSet::new(layer, "EPSG:900913", "image/png", None).unwrap();
    store.calculator().to_page(&ts, x, 0, 9).unwrap()
}

async fn hit(store: &QuotaStore, page: &TilePage, hits: u64) {
    store
        .add_hits_and_set_access_time(vec![PageStatsPayload::new(page.clone()).with_hits(hits)])
        .await
        .unwrap();
}

#[tokio::test]
async fn test_least_frequently_used() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), Arc::new(ManualClock::at_minute(30)));
    let a = page_of(&store, "roads", 0);
    let b = page_of(&store, "roads", 100);

    hit(&store, &a, 100).await;
    hit(&store, &b, 10).await;
    assert_eq!(store.least_frequently_used_page(["roads"]).unwrap(), Some(b.clone()));

    hit(&store, &b, 990).await;
    assert_eq!(store.page_stats(&b).unwrap().num_hits, 1000);
    assert_eq!(store.least_frequently_used_page(["roads"]).unwrap(), Some(a));
}

#[tokio::test]
async fn test_least_recently_used() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::at_minute(1));
    let store = open_store(dir.path(), clock.clone());
    let a = page_of(&store, "roads", 0);
    let b = page_of(&store, "roads", 100);

    hit(&store, &a, 1).await;
    clock.advance_minutes(3);
    hit(&store, &b, 1).await;
    assert_eq!(store.least_recently_used_page(["roads"]).unwrap(), Some(a.clone()));

    clock.advance_minutes(3);
    hit(&store, &a, 1).await;
    assert_eq!(store.least_recently_used_page(["roads"]).unwrap(), Some(b.clone()));
    assert_eq!(
        store.expiration_candidate(ExpirationPolicy::Lru, ["roads"]).unwrap(),
        Some(b)
    );
}

#[tokio::test]
async fn test_selection_is_scoped_to_layers() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::at_minute(1));
    let store = open_store(dir.path(), clock.clone());
    let road = page_of(&store, "roads", 0);
    let river = page_of(&store, "rivers", 0);

    hit(&store, &river, 1).await;
    clock.advance_minutes(10);
    hit(&store, &road, 50).await;

    assert_eq!(store.least_recently_used_page(["roads"]).unwrap(), Some(road.clone()));
    assert_eq!(store.least_frequently_used_page(["roads"]).unwrap(), Some(road));
    assert_eq!(
        store.least_recently_used_page(["roads", "rivers"]).unwrap(),
        Some(river)
    );
    assert_eq!(store.least_recently_used_page(["lakes"]).unwrap(), None);
    assert_eq!(store.least_recently_used_page(Vec::<String>::new()).unwrap(), None);
}

#[tokio::test]
async fn test_truncated_pages_are_not_candidates() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), Arc::new(ManualClock::at_minute(7)));
    let a = page_of(&store, "roads", 0);
    let b = page_of(&store, "roads", 100);

    hit(&store, &a, 1).await;
    hit(&store, &b, 5).await;
    store.set_truncated(&a).unwrap();
    assert_eq!(store.least_frequently_used_page(["roads"]).unwrap(), Some(b.clone()));

    store.set_truncated(&b).unwrap();
    assert_eq!(store.least_frequently_used_page(["roads"]).unwrap(), None);
    assert_eq!(store.least_recently_used_page(["roads"]).unwrap(), None);
}

#[tokio::test]
async fn test_ties_resolve_by_page_key() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), Arc::new(ManualClock::at_minute(7)));
    let first = page_of(&store, "roads", 0);
    let second = page_of(&store, "roads", 100);
    assert!(first.key() < second.key());

    hit(&store, &second, 4).await;
    hit(&store, &first, 4).await;
    assert_eq!(store.least_recently_used_page(["roads"]).unwrap(), Some(first.clone()));
    assert_eq!(store.least_frequently_used_page(["roads"]).unwrap(), Some(first));
}
