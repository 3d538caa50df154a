//! In-memory implementations of the storage and supplier ports.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use seedgate_core::{
    Error, InfoHash, MetainfoStore, ObjectStore, PieceStorage, Result, TorrentDescriptor,
};

/// Heap-backed [`PieceStorage`] for tests.
pub struct MemoryStorage {
    descriptor: Arc<TorrentDescriptor>,
    data: Mutex<Vec<u8>>,
    bitmap: Mutex<Vec<bool>>,
    closed: AtomicBool,
    dir: PathBuf,
}

impl MemoryStorage {
    /// Empty storage sized to the descriptor.
    #[must_use]
    pub fn new(descriptor: Arc<TorrentDescriptor>) -> Arc<Self> {
        let total = descriptor.total_length() as usize;
        let pieces = descriptor.num_pieces() as usize;
        Arc::new(Self {
            descriptor,
            data: Mutex::new(vec![0; total]),
            bitmap: Mutex::new(vec![false; pieces]),
            closed: AtomicBool::new(false),
            dir: PathBuf::from("/nonexistent"),
        })
    }

    /// Storage pre-filled with `payload` and every piece marked complete.
    #[must_use]
    pub fn seeded(descriptor: Arc<TorrentDescriptor>, payload: &[u8]) -> Arc<Self> {
        let storage = Self::new(descriptor);
        storage.data_fill(payload);
        for slot in storage.bitmap.lock().unwrap().iter_mut() {
            *slot = true;
        }
        storage
    }

    /// Fill the payload bytes without touching completion state.
    pub fn data_fill(&self, payload: &[u8]) {
        self.data.lock().unwrap()[..payload.len()].copy_from_slice(payload);
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl PieceStorage for MemoryStorage {
    fn descriptor(&self) -> &Arc<TorrentDescriptor> {
        &self.descriptor
    }

    fn read_piece(&self, index: u32, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let extent = self
            .descriptor
            .piece_extent(index)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no such piece"))?;
        if offset >= extent.length {
            return Ok(0);
        }
        let take = ((extent.length - offset) as usize).min(buf.len());
        let start = (extent.offset + offset) as usize;
        let data = self.data.lock().unwrap();
        buf[..take].copy_from_slice(&data[start..start + take]);
        Ok(take)
    }

    fn write_piece(&self, index: u32, offset: u64, data: &[u8]) -> io::Result<usize> {
        let extent = self
            .descriptor
            .piece_extent(index)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no such piece"))?;
        let take = ((extent.length - offset) as usize).min(data.len());
        let start = (extent.offset + offset) as usize;
        let mut stored = self.data.lock().unwrap();
        stored[start..start + take].copy_from_slice(&data[..take]);
        Ok(take)
    }

    fn piece_complete(&self, index: u32) -> bool {
        self.bitmap
            .lock()
            .unwrap()
            .get(index as usize)
            .copied()
            .unwrap_or(false)
    }

    fn mark_complete(&self, index: u32) -> Result<()> {
        if let Some(slot) = self.bitmap.lock().unwrap().get_mut(index as usize) {
            *slot = true;
        }
        Ok(())
    }

    fn mark_not_complete(&self, index: u32) -> Result<()> {
        if let Some(slot) = self.bitmap.lock().unwrap().get_mut(index as usize) {
            *slot = false;
        }
        Ok(())
    }

    fn completed_pieces(&self) -> u32 {
        self.bitmap.lock().unwrap().iter().filter(|&&b| b).count() as u32
    }

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn dir(&self) -> &Path {
        &self.dir
    }
}

/// In-memory [`MetainfoStore`].
#[derive(Default)]
pub struct MemoryMetainfoStore {
    entries: Mutex<HashMap<InfoHash, Bytes>>,
    pulls: AtomicU64,
}

impl MemoryMetainfoStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a metainfo document under its own info-hash.
    pub fn insert(&self, metainfo: impl Into<Bytes>) -> InfoHash {
        let metainfo = metainfo.into();
        let hash = seedgate_core::metainfo::info_hash(&metainfo).expect("fixture metainfo");
        self.entries.lock().unwrap().insert(hash, metainfo);
        hash
    }

    /// Number of pulls served so far.
    #[must_use]
    pub fn pulls(&self) -> u64 {
        self.pulls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MetainfoStore for MemoryMetainfoStore {
    async fn pull(&self, hash: InfoHash) -> Result<Bytes> {
        self.pulls.fetch_add(1, Ordering::Relaxed);
        self.entries
            .lock()
            .unwrap()
            .get(&hash)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("torrent {hash}")))
    }
}

/// In-memory [`ObjectStore`] with simple failure injection.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<(String, String), Bytes>>,
    buckets: Mutex<Vec<String>>,
    fail_puts: AtomicBool,
    fail_key_substring: Mutex<Option<String>>,
    puts: AtomicU64,
}

impl MemoryObjectStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every subsequent `put` fail transiently.
    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::Relaxed);
    }

    /// Make puts whose key contains `substring` fail transiently; `None`
    /// clears the injection.
    pub fn fail_puts_matching(&self, substring: Option<&str>) {
        *self.fail_key_substring.lock().unwrap() = substring.map(str::to_string);
    }

    /// Fetch an object directly, bypassing the port.
    #[must_use]
    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Keys currently stored in `bucket`.
    #[must_use]
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Buckets created via `ensure_bucket`.
    #[must_use]
    pub fn buckets(&self) -> Vec<String> {
        self.buckets.lock().unwrap().clone()
    }

    /// Total successful puts.
    #[must_use]
    pub fn puts(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Bytes>> {
        Ok(self.object(bucket, key))
    }

    async fn put(&self, bucket: &str, key: &str, body: Bytes) -> Result<()> {
        if self.fail_puts.load(Ordering::Relaxed) {
            return Err(Error::transient("injected put failure"));
        }
        if let Some(substring) = self.fail_key_substring.lock().unwrap().as_deref() {
            if key.contains(substring) {
                return Err(Error::transient("injected keyed put failure"));
            }
        }
        self.puts.fetch_add(1, Ordering::Relaxed);
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), body);
        Ok(())
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        Ok(self.object(bucket, key).is_some())
    }

    async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        let mut buckets = self.buckets.lock().unwrap();
        if !buckets.iter().any(|b| b == bucket) {
            buckets.push(bucket.to_string());
        }
        Ok(())
    }
}
