//! tile-quota: inspect and reconcile a tile cache's disk-quota store.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use tile_quota::cleaner::resolvers_from_config;
use tile_quota::config::{Cli, Command, Config};
use tile_quota::{LayerCatalog, QuotaStore, StaticCatalog, SystemClock};

fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "tile_quota=debug"
    } else {
        "tile_quota=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("tile-quota v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let config = Arc::new(Config::load(&cli.config)?);
    let catalog: Arc<dyn LayerCatalog> = Arc::new(
        StaticCatalog::load(&config.catalog)
            .with_context(|| format!("loading layer catalog {}", config.catalog.display()))?,
    );

    info!(
        root = %config.store.root.display(),
        backend = ?config.store.backend,
        layers = catalog.layer_names().len(),
        "Configuration loaded"
    );

    let store = QuotaStore::new(config.clone(), catalog.clone(), Arc::new(SystemClock))?;
    store.start_up()?;
    if !store.is_open() {
        return Ok(());
    }

    match cli.command {
        Command::Reconcile => {
            println!("reconciled: {} tile sets", store.tile_sets()?.len());
        }
        Command::Report => report(&store, &config, catalog.as_ref())?,
        Command::Candidate { policy, layers } => {
            let layers: BTreeSet<String> = if layers.is_empty() {
                catalog.layer_names()
            } else {
                layers.into_iter().collect()
            };
            match store.expiration_candidate(policy, &layers)? {
                Some(page) => {
                    let stats = store.page_stats(&page)?;
                    let bounds = store.tiles_for_page(&page)?;
                    println!(
                        "{page} tiles={bounds:?} fill={:.3} last_access_min={} freq={:.3}",
                        stats.fill_factor, stats.last_access_time_minutes, stats.frequency_of_use_per_minute
                    );
                }
                None => println!("no candidate page"),
            }
        }
    }

    store.close()?;
    Ok(())
}

fn report(store: &QuotaStore, config: &Config, catalog: &dyn LayerCatalog) -> anyhow::Result<()> {
    let (global, layer_limits) = resolvers_from_config(&config.quota);

    let mut layers = catalog.layer_names();
    store.accept(|tile_set, _| {
        layers.insert(tile_set.layer_name().to_string());
        std::ops::ControlFlow::Continue(())
    })?;

    for layer in &layers {
        let used = store.used_quota_by_layer_name(layer)?;
        match layer_limits.iter().find(|l| &l.layer == layer) {
            Some(limit) => println!("{layer:<40} {used:>14} / {} ({:?})", limit.limit, limit.policy),
            None => println!("{layer:<40} {used:>14}"),
        }
    }

    let used = store.globally_used_quota()?;
    match global {
        Some(global) => println!("{:<40} {used:>14} / {} ({:?})", "TOTAL", global.limit, global.policy),
        None => println!("{:<40} {used:>14}", "TOTAL"),
    }
    Ok(())
}
