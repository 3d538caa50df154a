//! Prometheus-backed metrics registry shared across services.
//!
//! Encapsulates collector registration so components receive one cloneable
//! handle instead of reaching into a global registry.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Prometheus-backed metrics registry shared across services.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    http_requests_total: IntCounterVec,
    bytes_served_total: IntCounter,
    active_torrents: IntGauge,
    torrents_activated_total: IntCounter,
    activation_failures_total: IntCounter,
    time_to_first_peer_seconds: Histogram,
    time_to_ten_peers_seconds: Histogram,
    time_to_thirty_peers_seconds: Histogram,
    time_to_first_byte_seconds: Histogram,
    stall_seconds_total: IntCounterVec,
    snapshot_uploads_total: IntCounter,
    snapshot_upload_failures_total: IntCounter,
    cleaner_drops_total: IntCounter,
    cleaner_free_bytes: IntGauge,
}

/// Peer-acquisition buckets tuned for swarm join latency (50 ms to ~2 min).
const ACTIVATION_BUCKETS: &[f64] = &[
    0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 40.0, 80.0, 120.0,
];

/// Stall accounting phases: no peers yet, peers but no bytes, bytes but no
/// growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallPhase {
    /// No peers and no bytes.
    Discovery,
    /// Peers connected, nothing downloaded yet.
    Idle,
    /// Bytes on disk, but no growth this tick.
    Download,
}

impl StallPhase {
    const fn label(self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Idle => "idle",
            Self::Download => "download",
        }
    }
}

impl Metrics {
    /// Construct a new registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any collector cannot be registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total HTTP requests received"),
            &["route", "code"],
        )?;
        let bytes_served_total = IntCounter::with_opts(Opts::new(
            "bytes_served_total",
            "Payload bytes written to HTTP clients",
        ))?;
        let active_torrents =
            IntGauge::with_opts(Opts::new("active_torrents", "Number of active torrents"))?;
        let torrents_activated_total = IntCounter::with_opts(Opts::new(
            "torrents_activated_total",
            "Torrent activations since start",
        ))?;
        let activation_failures_total = IntCounter::with_opts(Opts::new(
            "activation_failures_total",
            "Torrent activations that failed",
        ))?;
        let time_to_first_peer_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "time_to_first_peer_seconds",
                "Seconds from activation to the first connected peer",
            )
            .buckets(ACTIVATION_BUCKETS.to_vec()),
        )?;
        let time_to_ten_peers_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "time_to_ten_peers_seconds",
                "Seconds from activation to ten connected peers",
            )
            .buckets(ACTIVATION_BUCKETS.to_vec()),
        )?;
        let time_to_thirty_peers_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "time_to_thirty_peers_seconds",
                "Seconds from activation to thirty connected peers",
            )
            .buckets(ACTIVATION_BUCKETS.to_vec()),
        )?;
        let time_to_first_byte_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "time_to_first_byte_seconds",
                "Seconds from activation to the first verified byte",
            )
            .buckets(ACTIVATION_BUCKETS.to_vec()),
        )?;
        let stall_seconds_total = IntCounterVec::new(
            Opts::new(
                "stall_seconds_total",
                "Seconds an open torrent spent stalled, by phase",
            ),
            &["phase"],
        )?;
        let snapshot_uploads_total = IntCounter::with_opts(Opts::new(
            "snapshot_uploads_total",
            "Piece objects uploaded to the snapshot store",
        ))?;
        let snapshot_upload_failures_total = IntCounter::with_opts(Opts::new(
            "snapshot_upload_failures_total",
            "Piece uploads that failed",
        ))?;
        let cleaner_drops_total = IntCounter::with_opts(Opts::new(
            "cleaner_drops_total",
            "Torrent directories evicted by the cleaner",
        ))?;
        let cleaner_free_bytes = IntGauge::with_opts(Opts::new(
            "cleaner_free_bytes",
            "Free bytes on the data directory filesystem at the last tick",
        ))?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(bytes_served_total.clone()))?;
        registry.register(Box::new(active_torrents.clone()))?;
        registry.register(Box::new(torrents_activated_total.clone()))?;
        registry.register(Box::new(activation_failures_total.clone()))?;
        registry.register(Box::new(time_to_first_peer_seconds.clone()))?;
        registry.register(Box::new(time_to_ten_peers_seconds.clone()))?;
        registry.register(Box::new(time_to_thirty_peers_seconds.clone()))?;
        registry.register(Box::new(time_to_first_byte_seconds.clone()))?;
        registry.register(Box::new(stall_seconds_total.clone()))?;
        registry.register(Box::new(snapshot_uploads_total.clone()))?;
        registry.register(Box::new(snapshot_upload_failures_total.clone()))?;
        registry.register(Box::new(cleaner_drops_total.clone()))?;
        registry.register(Box::new(cleaner_free_bytes.clone()))?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                http_requests_total,
                bytes_served_total,
                active_torrents,
                torrents_activated_total,
                activation_failures_total,
                time_to_first_peer_seconds,
                time_to_ten_peers_seconds,
                time_to_thirty_peers_seconds,
                time_to_first_byte_seconds,
                stall_seconds_total,
                snapshot_uploads_total,
                snapshot_upload_failures_total,
                cleaner_drops_total,
                cleaner_free_bytes,
            }),
        })
    }

    /// Increment the HTTP request counter for the given route and status.
    pub fn inc_http_request(&self, route: &str, status: u16) {
        self.inner
            .http_requests_total
            .with_label_values(&[route, &status.to_string()])
            .inc();
    }

    /// Record payload bytes written to a client.
    pub fn add_bytes_served(&self, n: u64) {
        self.inner.bytes_served_total.inc_by(n);
    }

    /// Adjust the active-torrent gauge by +1.
    pub fn inc_active_torrents(&self) {
        self.inner.active_torrents.inc();
        self.inner.torrents_activated_total.inc();
    }

    /// Adjust the active-torrent gauge by -1.
    pub fn dec_active_torrents(&self) {
        self.inner.active_torrents.dec();
    }

    /// Current value of the active-torrent gauge.
    #[must_use]
    pub fn active_torrents(&self) -> i64 {
        self.inner.active_torrents.get()
    }

    /// Record a failed activation.
    pub fn inc_activation_failure(&self) {
        self.inner.activation_failures_total.inc();
    }

    /// Record the latency to the first connected peer.
    pub fn observe_first_peer(&self, elapsed: Duration) {
        self.inner
            .time_to_first_peer_seconds
            .observe(elapsed.as_secs_f64());
    }

    /// Record the latency to ten connected peers.
    pub fn observe_ten_peers(&self, elapsed: Duration) {
        self.inner
            .time_to_ten_peers_seconds
            .observe(elapsed.as_secs_f64());
    }

    /// Record the latency to thirty connected peers.
    pub fn observe_thirty_peers(&self, elapsed: Duration) {
        self.inner
            .time_to_thirty_peers_seconds
            .observe(elapsed.as_secs_f64());
    }

    /// Record the latency to the first verified byte.
    pub fn observe_first_byte(&self, elapsed: Duration) {
        self.inner
            .time_to_first_byte_seconds
            .observe(elapsed.as_secs_f64());
    }

    /// Account one stalled second in the given phase.
    pub fn add_stall_second(&self, phase: StallPhase) {
        self.inner
            .stall_seconds_total
            .with_label_values(&[phase.label()])
            .inc();
    }

    /// Record a successful piece upload.
    pub fn inc_snapshot_upload(&self) {
        self.inner.snapshot_uploads_total.inc();
    }

    /// Record a failed piece upload.
    pub fn inc_snapshot_upload_failure(&self) {
        self.inner.snapshot_upload_failures_total.inc();
    }

    /// Record an eviction performed by the cleaner.
    pub fn inc_cleaner_drop(&self) {
        self.inner.cleaner_drops_total.inc();
    }

    /// Publish the free-space sample from the last cleaner tick.
    pub fn set_cleaner_free_bytes(&self, free: u64) {
        self.inner
            .cleaner_free_bytes
            .set(i64::try_from(free).unwrap_or(i64::MAX));
    }

    /// Render the registry in the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&families, &mut buffer)
            .context("failed to encode Prometheus metrics")?;
        String::from_utf8(buffer).context("metrics output was not valid UTF-8")
    }
}
