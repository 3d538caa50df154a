//! Application bootstrap: parse flags, assemble the service graph, hand it
//! to the supervisor, and tear everything down in order afterwards.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use seedgate_api::ApiState;
use seedgate_config::{Cli, Settings};
use seedgate_core::{MetainfoStore, ObjectStore, TorrentDropper};
use seedgate_engine::WebseedEngine;
use seedgate_session::{
    BucketPool, DiskStorageFactory, FileStore, GrpcMetainfoStore, MetaSource, StatAggregator,
    TorrentMap, TorrentMapConfig, Vault,
};
use seedgate_snapshot::{S3Store, SnapshotMap};
use seedgate_storage::{Cleaner, FileCacheMap, StatvfsProbe, TouchMap};
use seedgate_telemetry::{LoggingConfig, Metrics, init_logging};

use crate::servables::{
    CleanerServable, GraceServable, ProbeServable, PromServable, StatGrpcServable, WebServable,
};
use crate::supervisor::{Servable, supervise};

/// Upper bound on waiting for in-flight snapshot uploads at shutdown.
const SNAPSHOT_DRAIN_GRACE: std::time::Duration = std::time::Duration::from_secs(30 * 60);

/// Parse the environment and run the gateway until shutdown.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from_cli(&cli).context("invalid configuration")?;
    init_logging(&LoggingConfig::default())?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %settings.storage.data_dir,
        "seedgate starting"
    );

    let metrics = Metrics::new()?;
    let shutdown = CancellationToken::new();
    let http_client = reqwest::Client::new();

    let file_store = Arc::new(
        FileStore::load(settings.metainfo.input.as_deref()).context("load file store")?,
    );
    let remote: Option<Arc<dyn MetainfoStore>> = match settings.metainfo.store_addr.as_deref() {
        Some(addr) => Some(Arc::new(
            GrpcMetainfoStore::new(addr).context("torrent-store client")?,
        )),
        None => None,
    };
    let meta = Arc::new(MetaSource::new(file_store, remote));
    let vault = settings
        .vault
        .as_ref()
        .map(|vault| Arc::new(Vault::new(&vault.host, vault.port, http_client.clone())));

    let engine = WebseedEngine::new(http_client, settings.download_rate);
    let map = TorrentMap::new(
        engine,
        meta,
        vault,
        Arc::new(DiskStorageFactory::new(settings.storage.data_dir.clone())),
        metrics.clone(),
        TorrentMapConfig::default(),
    );

    let snapshots = settings.snapshot.as_ref().map(|snapshot| {
        let store: Arc<dyn ObjectStore> = Arc::new(S3Store::new(&snapshot.s3));
        SnapshotMap::new(
            Arc::clone(&map),
            store,
            snapshot.clone(),
            metrics.clone(),
            shutdown.clone(),
        )
    });

    let state = ApiState::new(
        Arc::clone(&map),
        StatAggregator::new(Arc::clone(&map)),
        TouchMap::new(settings.storage.data_dir.clone()),
        Arc::new(FileCacheMap::new(settings.storage.data_dir.clone())),
        Arc::new(BucketPool::new()),
        snapshots,
        metrics.clone(),
        shutdown.clone(),
    );

    let cleaner = Cleaner::new(
        settings.storage.data_dir.clone(),
        settings.storage.keep_free,
        Arc::clone(&map) as Arc<dyn TorrentDropper>,
        Arc::new(StatvfsProbe),
        metrics.clone(),
    );

    let mut servables: Vec<Box<dyn Servable>> = vec![
        Box::new(WebServable {
            settings: settings.web.clone(),
            state: Arc::clone(&state),
        }),
        Box::new(ProbeServable {
            settings: settings.probe.clone(),
        }),
        Box::new(PromServable {
            settings: settings.prom.clone(),
            metrics: metrics.clone(),
        }),
        Box::new(CleanerServable { cleaner }),
    ];
    if let Some(stat) = settings.stat.clone() {
        servables.push(Box::new(StatGrpcServable {
            settings: stat,
            state: Arc::clone(&state),
        }));
    }
    if let Some(grace) = settings.grace_period {
        servables.push(Box::new(GraceServable {
            grace,
            state: Arc::clone(&state),
        }));
    }

    let outcome = supervise(servables, shutdown.clone()).await;

    // Listeners are down; let in-flight snapshot work wind down, then
    // release swarm resources and flush storage before reporting.
    if let Some(snapshots) = &state.snapshots {
        let drain = snapshots.drain();
        if tokio::time::timeout(SNAPSHOT_DRAIN_GRACE, drain).await.is_err() {
            tracing::warn!("snapshot drain timed out during shutdown");
        }
    }
    map.shutdown().await;
    info!("shutdown complete");
    outcome
}
