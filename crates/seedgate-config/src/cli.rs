//! Command-line flags and environment variables recognised by the gateway.

use clap::Parser;

/// Raw command line as parsed by clap. Turned into validated [`crate::Settings`]
/// via [`crate::Settings::from_cli`].
#[derive(Debug, Clone, Parser)]
#[command(
    name = "seedgate",
    about = "BitTorrent web-seeder gateway",
    version
)]
pub struct Cli {
    /// Base of the on-disk torrent trees; a `*` suffix enables shard-dir
    /// distribution.
    #[arg(long, env = "DATA_DIR", default_value = "/tmp")]
    pub data_dir: String,

    /// Free bytes the cleaner keeps available (humanized, e.g. `50GB`).
    #[arg(long, env = "KEEP_FREE", default_value = "50GB")]
    pub keep_free: String,

    /// Global download cap (humanized); absent means unlimited.
    #[arg(long, env = "DOWNLOAD_RATE")]
    pub download_rate: Option<String>,

    /// HTTP listening host.
    #[arg(long, env = "HOST", default_value = "")]
    pub host: String,

    /// HTTP listening port.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Enable the stat gRPC listener.
    #[arg(
        long,
        env = "USE_STAT",
        action = clap::ArgAction::Set,
        default_value_t = true
    )]
    pub use_stat: bool,

    /// Stat gRPC listening host.
    #[arg(long, env = "STAT_HOST", default_value = "")]
    pub stat_host: String,

    /// Stat gRPC listening port.
    #[arg(long, env = "STAT_PORT", default_value_t = 50051)]
    pub stat_port: u16,

    /// Probe (liveness/readiness) listening port.
    #[arg(long, env = "PROBE_PORT", default_value_t = 8081)]
    pub probe_port: u16,

    /// Prometheus exposition listening port.
    #[arg(long, env = "PROM_PORT", default_value_t = 8082)]
    pub prom_port: u16,

    /// Pre-loaded `.torrent` file or directory of them.
    #[arg(long, env = "INPUT")]
    pub input: Option<String>,

    /// Remote torrent-store host.
    #[arg(long, env = "TORRENT_STORE_HOST", default_value = "")]
    pub torrent_store_host: String,

    /// Remote torrent-store port.
    #[arg(long, env = "TORRENT_STORE_PORT", default_value_t = 50051)]
    pub torrent_store_port: u16,

    /// Vault host; empty disables webseed lookup.
    #[arg(long, env = "VAULT_SERVICE_HOST")]
    pub vault_host: Option<String>,

    /// Vault port.
    #[arg(long, env = "VAULT_SERVICE_PORT", default_value_t = 8080)]
    pub vault_port: u16,

    /// Enable snapshot mirroring to the object store.
    #[arg(long, env = "USE_SNAPSHOT", default_value_t = false)]
    pub use_snapshot: bool,

    /// Destination bucket for snapshots.
    #[arg(long, env = "AWS_BUCKET")]
    pub aws_bucket: Option<String>,

    /// Spread piece payloads across per-torrent buckets.
    #[arg(long, env = "AWS_BUCKET_SPREAD", default_value_t = false)]
    pub aws_bucket_spread: bool,

    /// Concurrent piece uploads.
    #[arg(long, env = "AWS_CONCURRENCY", default_value_t = 5)]
    pub aws_concurrency: usize,

    /// Minimum seconds between writes of snapshot progress objects.
    #[arg(long, env = "AWS_STAT_WRITE_DELAY", default_value_t = 60)]
    pub aws_stat_write_delay: u64,

    /// Completion fraction required before uploading any piece.
    #[arg(long, env = "SNAPSHOT_START_THRESHOLD", default_value_t = 0.5)]
    pub snapshot_start_threshold: f64,

    /// Upload only when cumulative served bytes exceed this multiple of the
    /// torrent length.
    #[arg(long, env = "SNAPSHOT_DOWNLOAD_RATIO", default_value_t = 2.0)]
    pub snapshot_download_ratio: f64,

    /// Completion fraction at which the engine downloads all remaining
    /// pieces.
    #[arg(
        long,
        env = "SNAPSHOT_START_FULL_DOWNLOAD_THRESHOLD",
        default_value_t = 0.75
    )]
    pub snapshot_start_full_download_threshold: f64,

    /// Torrents larger than this (humanized) are never snapshotted.
    #[arg(long, env = "SNAPSHOT_TORRENT_SIZE_LIMIT", default_value = "10GB")]
    pub snapshot_torrent_size_limit: String,

    /// Seconds without byte progress before a full snapshot is forced.
    #[arg(long, env = "SNAPSHOT_WRITE_TIMEOUT", default_value_t = 600)]
    pub snapshot_write_timeout: u64,

    /// AWS access key id.
    #[arg(long, env = "AWS_ACCESS_KEY_ID", default_value = "")]
    pub aws_access_key_id: String,

    /// AWS secret access key.
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", default_value = "")]
    pub aws_secret_access_key: String,

    /// AWS endpoint override (e.g. a MinIO URL).
    #[arg(long, env = "AWS_ENDPOINT", default_value = "")]
    pub aws_endpoint: String,

    /// AWS region.
    #[arg(long, env = "AWS_REGION", default_value = "")]
    pub aws_region: String,

    /// Seconds without data-port I/O before the process exits gracefully;
    /// zero disables the grace listener.
    #[arg(long, env = "GRACE_PERIOD", default_value_t = 0)]
    pub grace_period: u64,
}
