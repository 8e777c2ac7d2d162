//! Integration tests for quota accounting and cascading deletes.

use std::path::Path;
use std::sync::Arc;

use tile_quota::config::Backend;
use tile_quota::{
    Config, GridSubset, LayerInfo, ManualClock, PageStatsPayload, Quota, QuotaError, QuotaStore,
    StaticCatalog, TileSet,
};

fn layer(name: &str, parameter_ids: &[&str]) -> LayerInfo {
    LayerInfo {
        name: name.to_string(),
        grid_subsets: vec![
            GridSubset::quad_tree("EPSG:4326", 2, 1, 12),
            GridSubset::quad_tree("EPSG:900913", 1, 1, 12),
        ],
        mime_formats: vec!["image/png".to_string(), "image/jpeg".to_string()],
        parameter_ids: parameter_ids.iter().map(|p| p.to_string()).collect(),
    }
}

fn open_store(root: &Path) -> QuotaStore {
    let mut config = Config::with_root(root);
    config.store.backend = Backend::Memory;
    let catalog = StaticCatalog::new([layer("topp:states", &[]), layer("roads", &["p1", "p2"])]);
    let store = QuotaStore::new(
        Arc::new(config),
        Arc::new(catalog),
        Arc::new(ManualClock::at_minute(1_000)),
    )
    .unwrap();
    store.start_up().unwrap();
    store
}

fn states(gridset: &str) -> TileSet {
    TileSet::new("topp:states", gridset, "image/png", None).unwrap()
}

#[test]
fn test_quota_additivity() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    let ts1 = states("EPSG:4326");
    let ts2 = states("EPSG:900913");

    for delta in [100, 250, -50] {
        store.add_to_quota_and_tile_counts(&ts1, delta, &[]).unwrap();
    }
    let global = store.add_to_quota_and_tile_counts(&ts2, 500, &[]).unwrap();

    assert_eq!(store.used_quota_by_tile_set_id(ts1.id()).unwrap(), Quota::from_bytes(300));
    assert_eq!(store.used_quota_by_tile_set_id(ts2.id()).unwrap(), Quota::from_bytes(500));
    assert_eq!(store.used_quota_by_layer_name("topp:states").unwrap(), Quota::from_bytes(800));
    assert_eq!(store.globally_used_quota().unwrap(), Quota::from_bytes(800));
    assert_eq!(global, Quota::from_bytes(800));
}

#[test]
fn test_oversized_release_keeps_global_equal_to_sum() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    let ts1 = states("EPSG:4326");
    let ts2 = states("EPSG:900913");

    store.add_to_quota_and_tile_counts(&ts1, 100, &[]).unwrap();
    store.add_to_quota_and_tile_counts(&ts2, 500, &[]).unwrap();
    let global = store.add_to_quota_and_tile_counts(&ts1, -300, &[]).unwrap();

    let t1 = store.used_quota_by_tile_set_id(ts1.id()).unwrap();
    let t2 = store.used_quota_by_tile_set_id(ts2.id()).unwrap();
    assert_eq!(t1, Quota::ZERO);
    assert_eq!(t2, Quota::from_bytes(500));
    assert_eq!(global, Quota::from_bytes(500));

    let mut sum = Quota::ZERO;
    for tile_set in store.tile_sets().unwrap() {
        sum.add(&store.used_quota_by_tile_set_id(tile_set.id()).unwrap());
    }
    assert_eq!(store.globally_used_quota().unwrap(), sum);
}

#[test]
fn test_tile_counts_drive_fill_factor() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    let ts = states("EPSG:4326");
    let page = store.calculator().to_page(&ts, 10, 5, 6).unwrap();
    let capacity = store.calculator().page_capacity(&ts, &page).unwrap();
    assert!(capacity > 1);

    store
        .add_to_quota_and_tile_counts(&ts, 4096, &[PageStatsPayload::new(page.clone()).with_tiles(1)])
        .unwrap();
    let stats = store.page_stats(&page).unwrap();
    assert_eq!(stats.tile_count, 1);
    assert!((stats.fill_factor - 1.0 / capacity as f32).abs() < 1e-6);
    assert_eq!(stats.creation_time_minutes, 1_000);

    store
        .add_to_quota_and_tile_counts(&ts, -4096, &[PageStatsPayload::new(page.clone()).with_tiles(-1)])
        .unwrap();
    let stats = store.page_stats(&page).unwrap();
    assert_eq!(stats.tile_count, 0);
    assert_eq!(stats.fill_factor, 0.0);
    assert_eq!(store.used_quota_by_tile_set_id(ts.id()).unwrap(), Quota::ZERO);
}

#[test]
fn test_unknown_ids() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());

    assert!(matches!(
        store.used_quota_by_tile_set_id("nope#EPSG:4326#image/png"),
        Err(QuotaError::NotFound(_))
    ));
    assert_eq!(store.used_quota_by_layer_name("nope").unwrap(), Quota::ZERO);
    assert!(matches!(
        store.tile_set_by_id("nope#EPSG:4326#image/png"),
        Err(QuotaError::IllegalArgument(_))
    ));
}

#[test]
fn test_write_for_layer_outside_catalog_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    let stranger = TileSet::new("rivers", "EPSG:4326", "image/png", None).unwrap();

    let result = store.add_to_quota_and_tile_counts(&stranger, 1000, &[]);
    assert!(matches!(result, Err(QuotaError::NotFound(_))));
    assert_eq!(store.globally_used_quota().unwrap(), Quota::ZERO);
    assert!(store.tile_sets_for_layer("rivers").unwrap().is_empty());
}

#[test]
fn test_failed_write_applies_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    let ts = states("EPSG:4326");
    let other = states("EPSG:900913");
    let foreign_page = store.calculator().to_page(&other, 0, 0, 3).unwrap();

    let result = store.add_to_quota_and_tile_counts(
        &ts,
        1000,
        &[PageStatsPayload::new(foreign_page).with_tiles(1)],
    );
    assert!(matches!(result, Err(QuotaError::IllegalArgument(_))));
    assert_eq!(store.used_quota_by_tile_set_id(ts.id()).unwrap(), Quota::ZERO);
    assert_eq!(store.globally_used_quota().unwrap(), Quota::ZERO);
}

#[test]
fn test_concurrent_writers_do_not_lose_deltas() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(open_store(dir.path()));
    let ts = states("EPSG:4326");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            let ts = ts.clone();
            std::thread::spawn(move || {
                for _ in 0..100 {
                    store.add_to_quota_and_tile_counts(&ts, 10, &[]).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.used_quota_by_tile_set_id(ts.id()).unwrap(), Quota::from_bytes(8000));
    assert_eq!(store.globally_used_quota().unwrap(), Quota::from_bytes(8000));
}

#[test]
fn test_delete_grid_subset_leaves_other_gridset_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    let kept = states("EPSG:4326");
    let dropped = states("EPSG:900913");
    store.add_to_quota_and_tile_counts(&kept, 1234, &[]).unwrap();
    store.add_to_quota_and_tile_counts(&dropped, 4321, &[]).unwrap();

    let freed = store.delete_grid_subset("topp:states", "EPSG:900913").unwrap();

    assert_eq!(freed, Quota::from_bytes(4321));
    assert_eq!(store.used_quota_by_tile_set_id(kept.id()).unwrap(), Quota::from_bytes(1234));
    assert!(matches!(
        store.used_quota_by_tile_set_id(dropped.id()),
        Err(QuotaError::NotFound(_))
    ));
    assert_eq!(store.globally_used_quota().unwrap(), Quota::from_bytes(1234));
    assert!(store
        .tile_sets_for_layer("topp:states")
        .unwrap()
        .iter()
        .all(|ts| ts.gridset_id() == "EPSG:4326"));
}

#[test]
fn test_delete_parameters_matches_exact_id() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    let p1 = TileSet::new("roads", "EPSG:4326", "image/png", Some("p1")).unwrap();
    let p2 = TileSet::new("roads", "EPSG:4326", "image/png", Some("p2")).unwrap();
    store.add_to_quota_and_tile_counts(&p1, 10, &[]).unwrap();
    store.add_to_quota_and_tile_counts(&p2, 20, &[]).unwrap();

    store.delete_parameters("roads", "p1").unwrap();

    assert_eq!(store.used_quota_by_layer_name("roads").unwrap(), Quota::from_bytes(20));
    assert!(store
        .tile_sets_for_layer("roads")
        .unwrap()
        .iter()
        .all(|ts| ts.parameters_id() == Some("p2")));
}

#[test]
fn test_delete_layer_only_touches_that_layer() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    let road = TileSet::new("roads", "EPSG:900913", "image/jpeg", Some("p2")).unwrap();
    store.add_to_quota_and_tile_counts(&states("EPSG:4326"), 700, &[]).unwrap();
    store.add_to_quota_and_tile_counts(&road, 300, &[]).unwrap();

    let freed = store.delete_layer("topp:states").unwrap();

    assert_eq!(freed, Quota::from_bytes(700));
    assert_eq!(store.used_quota_by_layer_name("topp:states").unwrap(), Quota::ZERO);
    assert!(store.tile_sets_for_layer("topp:states").unwrap().is_empty());
    assert_eq!(store.used_quota_by_layer_name("roads").unwrap(), Quota::from_bytes(300));
    assert_eq!(store.globally_used_quota().unwrap(), Quota::from_bytes(300));
}

#[test]
fn test_invalid_layer_names_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    assert!(matches!(store.delete_layer(""), Err(QuotaError::IllegalArgument(_))));
    assert!(matches!(
        store.rename_layer("roads", "bad#name"),
        Err(QuotaError::IllegalArgument(_))
    ));
}

#[test]
fn test_accounting_on_closed_store_fails() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    store.close().unwrap();

    let ts = states("EPSG:4326");
    assert!(matches!(
        store.add_to_quota_and_tile_counts(&ts, 1, &[]),
        Err(QuotaError::Closed)
    ));
    assert!(matches!(store.globally_used_quota(), Err(QuotaError::Closed)));
    assert!(matches!(store.delete_layer("roads"), Err(QuotaError::Closed)));
}
