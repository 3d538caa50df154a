//! Composite metainfo provider: pre-loaded `.torrent` files first, then the
//! remote torrent-store RPC, with a bounded cache of parsed descriptors.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use moka::future::Cache;
use tonic::transport::Endpoint;
use tracing::{info, warn};

use seedgate_core::{Error, InfoHash, MetainfoStore, Result, TorrentDescriptor};

use crate::store_pb::{PullRequest, torrent_store_client::TorrentStoreClient};

/// Deadline for a single metainfo pull.
const PULL_TIMEOUT: Duration = Duration::from_secs(60);

/// Parsed descriptors cached from remote pulls.
const CACHE_CAPACITY: u64 = 1000;

/// Process-local mapping of pre-loaded `.torrent` files.
pub struct FileStore {
    entries: HashMap<InfoHash, Arc<TorrentDescriptor>>,
}

impl FileStore {
    /// Load `input`: a single `.torrent` file (parse failures are fatal) or a
    /// directory of them (parse failures are logged and skipped). `None`
    /// yields an empty store.
    pub fn load(input: Option<&str>) -> Result<Self> {
        let mut entries = HashMap::new();
        let Some(input) = input else {
            return Ok(Self { entries });
        };

        let path = Path::new(input);
        let meta =
            std::fs::metadata(path).map_err(|err| Error::io("stat file-store input", err))?;
        if meta.is_dir() {
            let listing =
                std::fs::read_dir(path).map_err(|err| Error::io("read file-store dir", err))?;
            for entry in listing {
                let entry = entry.map_err(|err| Error::io("read file-store dir", err))?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if !name.ends_with(".torrent") || entry.path().is_dir() {
                    continue;
                }
                match load_descriptor(&entry.path()) {
                    Ok(descriptor) => {
                        entries.insert(descriptor.info_hash(), descriptor);
                    }
                    Err(err) => {
                        warn!(file = %entry.path().display(), error = %err, "skipping torrent file");
                    }
                }
            }
        } else {
            let descriptor = load_descriptor(path)?;
            entries.insert(descriptor.info_hash(), descriptor);
        }
        info!(torrents = entries.len(), "file store loaded");
        Ok(Self { entries })
    }

    /// Descriptor for `hash`, if pre-loaded.
    #[must_use]
    pub fn get(&self, hash: InfoHash) -> Option<Arc<TorrentDescriptor>> {
        self.entries.get(&hash).cloned()
    }

    /// All pre-loaded info-hashes, hex-sorted.
    #[must_use]
    pub fn list(&self) -> Vec<InfoHash> {
        let mut hashes: Vec<InfoHash> = self.entries.keys().copied().collect();
        hashes.sort_by_key(InfoHash::hex);
        hashes
    }
}

fn load_descriptor(path: &Path) -> Result<Arc<TorrentDescriptor>> {
    let raw = std::fs::read(path).map_err(|err| Error::io("read torrent file", err))?;
    TorrentDescriptor::from_metainfo(raw)
}

/// Torrent-store client speaking the `Pull` RPC.
pub struct GrpcMetainfoStore {
    channel: tonic::transport::Channel,
}

impl GrpcMetainfoStore {
    /// Lazily-connecting client for `addr` (e.g. `http://store:50051`).
    pub fn new(addr: &str) -> Result<Self> {
        let endpoint = Endpoint::from_shared(addr.to_string())
            .map_err(|err| Error::fatal(format!("bad torrent-store address {addr:?}: {err}")))?;
        Ok(Self {
            channel: endpoint.connect_lazy(),
        })
    }
}

#[async_trait]
impl MetainfoStore for GrpcMetainfoStore {
    async fn pull(&self, hash: InfoHash) -> Result<Bytes> {
        let mut client = TorrentStoreClient::new(self.channel.clone());
        let request = PullRequest {
            info_hash: hash.hex(),
        };
        let reply = tokio::time::timeout(PULL_TIMEOUT, client.pull(request))
            .await
            .map_err(|_| Error::timeout(format!("torrent-store pull for {hash}")))?;
        match reply {
            Ok(reply) => Ok(Bytes::from(reply.into_inner().torrent)),
            Err(status) if status.code() == tonic::Code::NotFound => {
                Err(Error::not_found(format!("torrent {hash}")))
            }
            Err(status) => Err(Error::transient(format!(
                "torrent-store pull for {hash}: {status}"
            ))),
        }
    }
}

/// Composite provider of torrent metainfo.
pub struct MetaSource {
    file_store: Arc<FileStore>,
    remote: Option<Arc<dyn MetainfoStore>>,
    cache: Cache<InfoHash, Arc<TorrentDescriptor>>,
}

impl MetaSource {
    /// Combine the local file store with an optional remote supplier.
    #[must_use]
    pub fn new(file_store: Arc<FileStore>, remote: Option<Arc<dyn MetainfoStore>>) -> Self {
        Self {
            file_store,
            remote,
            cache: Cache::builder().max_capacity(CACHE_CAPACITY).build(),
        }
    }

    /// The local file store behind this source.
    #[must_use]
    pub fn file_store(&self) -> &Arc<FileStore> {
        &self.file_store
    }

    /// Resolve the descriptor for `hash`.
    ///
    /// Local files win; otherwise the remote store is consulted and the
    /// parsed descriptor cached. All misses surface as `NotFound`.
    pub async fn descriptor(&self, hash: InfoHash) -> Result<Arc<TorrentDescriptor>> {
        if let Some(descriptor) = self.file_store.get(hash) {
            return Ok(descriptor);
        }
        let Some(remote) = self.remote.clone() else {
            return Err(Error::not_found(format!("torrent {hash}")));
        };
        self.cache
            .try_get_with(hash, async move {
                let raw = remote.pull(hash).await?;
                TorrentDescriptor::from_metainfo(raw)
            })
            .await
            .map_err(|err: Arc<Error>| reclassify(&err))
    }
}

/// Rebuild an owned error of the same kind from a shared cache error.
fn reclassify(err: &Error) -> Error {
    match err {
        Error::NotFound(detail) => Error::NotFound(detail.clone()),
        Error::Timeout(detail) => Error::Timeout(detail.clone()),
        Error::Transient(detail) => Error::Transient(detail.clone()),
        Error::Integrity(detail) => Error::Integrity(detail.clone()),
        Error::Fatal(detail) => Error::Fatal(detail.clone()),
        Error::Io { operation, source } => Error::Io {
            operation,
            source: std::io::Error::new(source.kind(), source.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seedgate_test_support::{MemoryMetainfoStore, descriptor_with_files};
    use tempfile::TempDir;

    #[tokio::test]
    async fn file_store_wins_over_remote() {
        let descriptor = descriptor_with_files("demo", 16, &[("a.bin", 32)]);
        let tmp = TempDir::new().expect("tempdir");
        std::fs::write(tmp.path().join("demo.torrent"), descriptor.metainfo_bytes())
            .expect("write torrent");

        let file_store = Arc::new(
            FileStore::load(Some(&tmp.path().display().to_string())).expect("load"),
        );
        let remote = MemoryMetainfoStore::new();
        let source = MetaSource::new(file_store, Some(remote.clone()));

        let resolved = source
            .descriptor(descriptor.info_hash())
            .await
            .expect("resolve");
        assert_eq!(resolved.info_hash(), descriptor.info_hash());
        assert_eq!(remote.pulls(), 0, "remote must not be consulted");
    }

    #[tokio::test]
    async fn remote_pulls_are_cached() {
        let descriptor = descriptor_with_files("demo", 16, &[("a.bin", 32)]);
        let remote = MemoryMetainfoStore::new();
        let hash = remote.insert(descriptor.metainfo_bytes());

        let file_store = Arc::new(FileStore::load(None).expect("empty"));
        let source = MetaSource::new(file_store, Some(remote.clone()));

        source.descriptor(hash).await.expect("first");
        source.descriptor(hash).await.expect("second");
        assert_eq!(remote.pulls(), 1, "second hit comes from the cache");
    }

    #[tokio::test]
    async fn miss_without_remote_is_not_found() {
        let source = MetaSource::new(Arc::new(FileStore::load(None).expect("empty")), None);
        let err = source
            .descriptor(InfoHash::new([0x99; 20]))
            .await
            .expect_err("miss");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn broken_torrent_files_are_skipped_in_directories() {
        let good = descriptor_with_files("demo", 16, &[("a.bin", 32)]);
        let tmp = TempDir::new().expect("tempdir");
        std::fs::write(tmp.path().join("good.torrent"), good.metainfo_bytes())
            .expect("write");
        std::fs::write(tmp.path().join("bad.torrent"), b"not bencode").expect("write");
        std::fs::write(tmp.path().join("ignored.txt"), b"whatever").expect("write");

        let store =
            FileStore::load(Some(&tmp.path().display().to_string())).expect("load survives");
        assert_eq!(store.list(), vec![good.info_hash()]);
    }
}
