//! Validated settings model derived from the raw command line.

use std::time::Duration;

use byte_unit::Byte;

use crate::cli::Cli;
use crate::error::ConfigError;

/// Validated application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Data listener.
    pub web: ListenSettings,
    /// Stat gRPC listener; `None` when disabled.
    pub stat: Option<ListenSettings>,
    /// Probe listener.
    pub probe: ListenSettings,
    /// Prometheus exposition listener.
    pub prom: ListenSettings,
    /// On-disk storage knobs.
    pub storage: StorageSettings,
    /// Metainfo suppliers.
    pub metainfo: MetainfoSettings,
    /// Vault webseed lookup; `None` when disabled.
    pub vault: Option<VaultSettings>,
    /// Snapshot mirroring; `None` when disabled.
    pub snapshot: Option<SnapshotSettings>,
    /// Global download cap in bytes per second.
    pub download_rate: Option<u64>,
    /// Grace period before a scale-to-zero exit.
    pub grace_period: Option<Duration>,
}

/// One TCP listener.
#[derive(Debug, Clone)]
pub struct ListenSettings {
    /// Host to bind; empty binds all interfaces.
    pub host: String,
    /// Port to bind.
    pub port: u16,
}

impl ListenSettings {
    /// `host:port` form accepted by the socket APIs.
    #[must_use]
    pub fn addr(&self) -> String {
        let host = if self.host.is_empty() {
            "0.0.0.0"
        } else {
            &self.host
        };
        format!("{host}:{}", self.port)
    }
}

/// On-disk storage knobs.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// Base of the torrent trees; may end in `*` for shard fan-out.
    pub data_dir: String,
    /// Free bytes the cleaner keeps available.
    pub keep_free: u64,
}

/// Metainfo supplier endpoints.
#[derive(Debug, Clone)]
pub struct MetainfoSettings {
    /// Pre-loaded `.torrent` file or directory.
    pub input: Option<String>,
    /// Remote torrent-store endpoint, `None` when no host is configured.
    pub store_addr: Option<String>,
}

/// Vault webseed lookup endpoint.
#[derive(Debug, Clone)]
pub struct VaultSettings {
    /// Vault host.
    pub host: String,
    /// Vault port.
    pub port: u16,
}

/// Snapshot mirroring configuration.
#[derive(Debug, Clone)]
pub struct SnapshotSettings {
    /// Destination bucket.
    pub bucket: String,
    /// Spread piece payloads across per-torrent buckets.
    pub bucket_spread: bool,
    /// Concurrent piece uploads.
    pub concurrency: usize,
    /// Minimum interval between progress-object writes.
    pub stat_write_delay: Duration,
    /// No-progress watchdog before a forced full snapshot.
    pub write_timeout: Duration,
    /// Completion fraction required before uploading.
    pub start_threshold: f64,
    /// Completion fraction forcing a full download.
    pub start_full_download_threshold: f64,
    /// Served-bytes ratio required before uploading.
    pub download_ratio: f64,
    /// Torrents above this size are never snapshotted.
    pub torrent_size_limit: u64,
    /// Object-store credentials and endpoint.
    pub s3: S3Settings,
}

/// Object-store client configuration.
#[derive(Debug, Clone)]
pub struct S3Settings {
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Endpoint override; empty uses the SDK default.
    pub endpoint: String,
    /// Region; empty falls back to `us-east-1`.
    pub region: String,
}

impl Settings {
    /// Validate the raw command line into settings.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when a humanized size cannot be parsed or a
    /// flag combination is inconsistent (e.g. snapshots without a bucket).
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let keep_free = parse_size("keep-free", &cli.keep_free)?;
        let download_rate = cli
            .download_rate
            .as_deref()
            .map(|raw| parse_size("download-rate", raw))
            .transpose()?;

        let snapshot = if cli.use_snapshot {
            let bucket = cli
                .aws_bucket
                .clone()
                .filter(|bucket| !bucket.is_empty())
                .ok_or(ConfigError::Invalid {
                    flag: "aws-bucket",
                    reason: "required when use-snapshot is on",
                })?;
            if cli.aws_concurrency == 0 {
                return Err(ConfigError::Invalid {
                    flag: "aws-concurrency",
                    reason: "must be at least 1",
                });
            }
            Some(SnapshotSettings {
                bucket,
                bucket_spread: cli.aws_bucket_spread,
                concurrency: cli.aws_concurrency,
                stat_write_delay: Duration::from_secs(cli.aws_stat_write_delay),
                write_timeout: Duration::from_secs(cli.snapshot_write_timeout),
                start_threshold: cli.snapshot_start_threshold,
                start_full_download_threshold: cli.snapshot_start_full_download_threshold,
                download_ratio: cli.snapshot_download_ratio,
                torrent_size_limit: parse_size(
                    "snapshot-torrent-size-limit",
                    &cli.snapshot_torrent_size_limit,
                )?,
                s3: S3Settings {
                    access_key_id: cli.aws_access_key_id.clone(),
                    secret_access_key: cli.aws_secret_access_key.clone(),
                    endpoint: cli.aws_endpoint.clone(),
                    region: cli.aws_region.clone(),
                },
            })
        } else {
            None
        };

        let vault = cli
            .vault_host
            .clone()
            .filter(|host| !host.is_empty())
            .map(|host| VaultSettings {
                host,
                port: cli.vault_port,
            });

        let store_addr = if cli.torrent_store_host.is_empty() {
            None
        } else {
            Some(format!(
                "http://{}:{}",
                cli.torrent_store_host, cli.torrent_store_port
            ))
        };

        Ok(Self {
            web: ListenSettings {
                host: cli.host.clone(),
                port: cli.port,
            },
            stat: cli.use_stat.then(|| ListenSettings {
                host: cli.stat_host.clone(),
                port: cli.stat_port,
            }),
            probe: ListenSettings {
                host: String::new(),
                port: cli.probe_port,
            },
            prom: ListenSettings {
                host: String::new(),
                port: cli.prom_port,
            },
            storage: StorageSettings {
                data_dir: cli.data_dir.clone(),
                keep_free,
            },
            metainfo: MetainfoSettings {
                input: cli.input.clone(),
                store_addr,
            },
            vault,
            snapshot,
            download_rate,
            grace_period: (cli.grace_period > 0)
                .then(|| Duration::from_secs(cli.grace_period)),
        })
    }
}

/// Parse a humanized size string like `50GB` or `1MiB` into bytes.
pub fn parse_size(flag: &'static str, raw: &str) -> Result<u64, ConfigError> {
    Byte::parse_str(raw, true)
        .map(|byte| byte.as_u64())
        .map_err(|_| ConfigError::BadSize {
            flag,
            value: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        let mut full = vec!["seedgate"];
        full.extend_from_slice(args);
        Cli::try_parse_from(full).expect("cli parses")
    }

    #[test]
    fn defaults_validate() {
        let settings = Settings::from_cli(&parse(&[])).expect("valid");
        assert_eq!(settings.web.port, 8080);
        assert_eq!(settings.storage.keep_free, 50_000_000_000);
        assert!(settings.snapshot.is_none());
        assert!(settings.download_rate.is_none());
        assert!(settings.grace_period.is_none());
    }

    #[test]
    fn humanized_sizes_parse() {
        assert_eq!(parse_size("keep-free", "1MB").expect("parses"), 1_000_000);
        assert_eq!(
            parse_size("keep-free", "1MiB").expect("parses"),
            1_048_576
        );
        assert!(parse_size("keep-free", "one gig").is_err());
    }

    #[test]
    fn snapshot_requires_bucket() {
        let cli = parse(&["--use-snapshot"]);
        assert!(Settings::from_cli(&cli).is_err());

        let cli = parse(&["--use-snapshot", "--aws-bucket", "pieces"]);
        let settings = Settings::from_cli(&cli).expect("valid");
        let snapshot = settings.snapshot.expect("snapshot on");
        assert_eq!(snapshot.bucket, "pieces");
        assert_eq!(snapshot.concurrency, 5);
        assert_eq!(snapshot.torrent_size_limit, 10_000_000_000);
    }

    #[test]
    fn vault_disabled_without_host() {
        let settings = Settings::from_cli(&parse(&[])).expect("valid");
        assert!(settings.vault.is_none());

        let cli = parse(&["--vault-host", "vault.local"]);
        let settings = Settings::from_cli(&cli).expect("valid");
        assert_eq!(settings.vault.expect("vault on").host, "vault.local");
    }

    #[test]
    fn listener_addr_defaults_host() {
        let listen = ListenSettings {
            host: String::new(),
            port: 9000,
        };
        assert_eq!(listen.addr(), "0.0.0.0:9000");
    }
}
