//! Memory-mapped torrent payload storage with durable piece completion.
//!
//! Every file of the torrent is opened read-write, truncated up to its
//! declared length (overmapping a short file would SIGBUS), and mapped
//! whole. The concatenation of all mapped regions forms a single virtual
//! address space for piece I/O; a piece spanning file boundaries is split
//! across the underlying maps. Zero-length files are created but never
//! mapped.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use memmap2::{MmapMut, MmapOptions};
use tokio::sync::Notify;
use tracing::{debug, warn};

use seedgate_core::{Error, PieceStorage, Result, TorrentDescriptor};

use crate::db::CompletionDb;
use crate::layout::content_rel_path;

/// Cadence of the background file-completion derivation.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

struct Segment {
    len: u64,
    map: Mutex<Option<MmapMut>>,
}

struct CompletionState {
    bitmap: Vec<bool>,
    completed: u32,
    completed_files: Vec<bool>,
}

/// Piece-granular storage for one torrent.
pub struct PieceStore {
    descriptor: Arc<TorrentDescriptor>,
    dir: PathBuf,
    segments: Vec<Segment>,
    db: CompletionDb,
    state: Mutex<CompletionState>,
    kick: Notify,
    closed: AtomicBool,
}

impl PieceStore {
    /// Open the torrent's payload files under `dir` and start the background
    /// file-completion sweep.
    ///
    /// A mapping failure on any file aborts the whole open; maps acquired so
    /// far are released on the error path. A completion-database failure is
    /// not fatal (see [`CompletionDb::open`]).
    pub async fn open(dir: PathBuf, descriptor: Arc<TorrentDescriptor>) -> Result<Arc<Self>> {
        let store = tokio::task::spawn_blocking(move || Self::open_blocking(dir, &descriptor))
            .await
            .map_err(|err| Error::fatal(format!("piece store open task failed: {err}")))??;
        let store = Arc::new(store);
        store.spawn_sweeper();
        Ok(store)
    }

    fn open_blocking(dir: PathBuf, descriptor: &Arc<TorrentDescriptor>) -> Result<Self> {
        std::fs::create_dir_all(&dir).map_err(|err| Error::io("create torrent dir", err))?;

        let mut segments = Vec::with_capacity(descriptor.files().len());
        for file in descriptor.files() {
            let path = dir.join(content_rel_path(&file.path));
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|err| Error::io("create content dir", err))?;
            }
            let handle = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .map_err(|err| Error::io("open payload file", err))?;
            let on_disk = handle
                .metadata()
                .map_err(|err| Error::io("stat payload file", err))?
                .len();
            if on_disk < file.length {
                handle
                    .set_len(file.length)
                    .map_err(|err| Error::io("truncate payload file", err))?;
            }

            if file.length == 0 {
                segments.push(Segment {
                    len: 0,
                    map: Mutex::new(None),
                });
                continue;
            }

            let map_len = usize::try_from(file.length)
                .ok()
                .filter(|&len| len <= isize::MAX as usize)
                .ok_or_else(|| {
                    Error::fatal(format!(
                        "file {} is too large to map on this platform",
                        file.path
                    ))
                })?;
            // SAFETY: the store exclusively owns the mapping for the life of
            // the torrent handle and unmaps before the files are closed.
            let map = unsafe { MmapOptions::new().len(map_len).map_mut(&handle) }
                .map_err(|err| Error::fatal(format!("mmap {}: {err}", file.path)))?;
            segments.push(Segment {
                len: file.length,
                map: Mutex::new(Some(map)),
            });
        }

        let db = CompletionDb::open(&dir);
        let bitmap = db.load_bitmap(descriptor.num_pieces())?;
        let completed = u32::try_from(bitmap.iter().filter(|&&b| b).count()).unwrap_or(u32::MAX);
        let completed_files = vec![false; descriptor.files().len()];

        Ok(Self {
            descriptor: Arc::clone(descriptor),
            dir,
            segments,
            db,
            state: Mutex::new(CompletionState {
                bitmap,
                completed,
                completed_files,
            }),
            kick: Notify::new(),
            closed: AtomicBool::new(false),
        })
    }

    fn spawn_sweeper(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let Some(store) = weak.upgrade() else {
                    return;
                };
                store.derive_completed_files();
                if store.all_pieces_complete() || store.is_closed() {
                    return;
                }
                tokio::select! {
                    () = tokio::time::sleep(SWEEP_INTERVAL) => {}
                    () = store.kick.notified() => {}
                }
            }
        });
    }

    /// Run one pass of the file-completion derivation: every file whose
    /// intersecting pieces are all complete gets a `file_completion` row,
    /// exactly once per store lifetime.
    ///
    /// Driven by the background sweep every few seconds and immediately after
    /// each piece-complete transition.
    pub fn derive_completed_files(&self) {
        if self.is_closed() {
            return;
        }
        let mut state = self.lock_state();
        for (index, file) in self.descriptor.files().iter().enumerate() {
            if state.completed_files[index] {
                continue;
            }
            let range = self.descriptor.file_piece_range(index);
            let whole = range
                .clone()
                .all(|piece| state.bitmap.get(piece as usize).copied().unwrap_or(false));
            if !whole {
                continue;
            }
            match self.db.insert_file(&file.path) {
                Ok(()) => {
                    state.completed_files[index] = true;
                    debug!(path = %file.path, "file completed");
                }
                Err(err) => {
                    warn!(path = %file.path, error = %err, "failed to record file completion");
                    return;
                }
            }
        }
    }

    fn all_pieces_complete(&self) -> bool {
        let state = self.lock_state();
        state.completed as usize == state.bitmap.len()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Read from the concatenated address space starting at `global`.
    fn read_at_global(&self, mut global: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut done = 0usize;
        for (segment, file) in self.segments.iter().zip(self.descriptor.files()) {
            if done == buf.len() {
                break;
            }
            if segment.len == 0 || global >= file.offset + segment.len {
                continue;
            }
            if global < file.offset {
                break;
            }
            let within = usize::try_from(global - file.offset)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset overflow"))?;
            let take = ((segment.len - (global - file.offset)) as usize).min(buf.len() - done);
            let guard = lock_map(&segment.map);
            let map = guard
                .as_ref()
                .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "piece store is closed"))?;
            buf[done..done + take].copy_from_slice(&map[within..within + take]);
            done += take;
            global += take as u64;
        }
        Ok(done)
    }

    /// Write into the concatenated address space starting at `global`.
    fn write_at_global(&self, mut global: u64, mut data: &[u8]) -> io::Result<usize> {
        let mut done = 0usize;
        for (segment, file) in self.segments.iter().zip(self.descriptor.files()) {
            if data.is_empty() {
                break;
            }
            if segment.len == 0 || global >= file.offset + segment.len {
                continue;
            }
            if global < file.offset {
                break;
            }
            let within = usize::try_from(global - file.offset)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset overflow"))?;
            let take = ((segment.len - (global - file.offset)) as usize).min(data.len());
            let mut guard = lock_map(&segment.map);
            let map = guard
                .as_mut()
                .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "piece store is closed"))?;
            map[within..within + take].copy_from_slice(&data[..take]);
            data = &data[take..];
            done += take;
            global += take as u64;
        }
        Ok(done)
    }

    fn piece_span(&self, index: u32, offset: u64, len: usize) -> io::Result<(u64, usize)> {
        let extent = self.descriptor.piece_extent(index).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("no piece {index}"))
        })?;
        if offset > extent.length {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "offset beyond piece extent",
            ));
        }
        let take = (extent.length - offset).min(len as u64) as usize;
        Ok((extent.offset + offset, take))
    }

    fn lock_state(&self) -> MutexGuard<'_, CompletionState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn lock_map(map: &Mutex<Option<MmapMut>>) -> MutexGuard<'_, Option<MmapMut>> {
    match map.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl PieceStorage for PieceStore {
    fn descriptor(&self) -> &Arc<TorrentDescriptor> {
        &self.descriptor
    }

    fn read_piece(&self, index: u32, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let (global, take) = self.piece_span(index, offset, buf.len())?;
        self.read_at_global(global, &mut buf[..take])
    }

    fn write_piece(&self, index: u32, offset: u64, data: &[u8]) -> io::Result<usize> {
        let (global, take) = self.piece_span(index, offset, data.len())?;
        self.write_at_global(global, &data[..take])
    }

    fn piece_complete(&self, index: u32) -> bool {
        let state = self.lock_state();
        state.bitmap.get(index as usize).copied().unwrap_or(false)
    }

    fn mark_complete(&self, index: u32) -> Result<()> {
        self.db.set_piece(index, true)?;
        {
            let mut state = self.lock_state();
            if let Some(slot) = state.bitmap.get_mut(index as usize) {
                if !*slot {
                    *slot = true;
                    state.completed += 1;
                }
            }
        }
        self.kick.notify_one();
        Ok(())
    }

    fn mark_not_complete(&self, index: u32) -> Result<()> {
        self.db.set_piece(index, false)?;
        let mut state = self.lock_state();
        if let Some(slot) = state.bitmap.get_mut(index as usize) {
            if *slot {
                *slot = false;
                state.completed -= 1;
            }
        }
        Ok(())
    }

    fn completed_pieces(&self) -> u32 {
        self.lock_state().completed
    }

    fn flush(&self) -> io::Result<()> {
        for segment in &self.segments {
            let guard = lock_map(&segment.map);
            if let Some(map) = guard.as_ref() {
                map.flush()?;
            }
        }
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(err) = self.flush() {
            warn!(dir = %self.dir.display(), error = %err, "flush on close failed");
        }
        for segment in &self.segments {
            let mut guard = lock_map(&segment.map);
            *guard = None;
        }
        self.db.close();
        self.kick.notify_one();
    }

    fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Drop for PieceStore {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seedgate_test_support::descriptor_with_files;

    #[tokio::test]
    async fn piece_io_spans_file_boundaries() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        // 24 + 40 bytes over 16-byte pieces; piece 1 covers both files.
        let descriptor = descriptor_with_files("demo", 16, &[("a.bin", 24), ("b.bin", 40)]);
        let store = PieceStore::open(tmp.path().join("t"), Arc::clone(&descriptor))
            .await
            .expect("open");

        let payload: Vec<u8> = (0u8..16).collect();
        assert_eq!(store.write_piece(1, 0, &payload).expect("write"), 16);

        let mut back = vec![0u8; 16];
        assert_eq!(store.read_piece(1, 0, &mut back).expect("read"), 16);
        assert_eq!(back, payload);

        // Bytes 16..24 land in the first file, 24..32 in the second.
        let first = std::fs::read(
            tmp.path()
                .join("t")
                .join(content_rel_path("demo/a.bin")),
        )
        .expect("first file");
        assert_eq!(&first[16..24], &payload[..8]);
        let second = std::fs::read(
            tmp.path()
                .join("t")
                .join(content_rel_path("demo/b.bin")),
        )
        .expect("second file");
        assert_eq!(&second[..8], &payload[8..]);
    }

    #[tokio::test]
    async fn completion_survives_reopen() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let descriptor = descriptor_with_files("demo", 16, &[("a.bin", 64)]);
        let dir = tmp.path().join("t");
        {
            let store = PieceStore::open(dir.clone(), Arc::clone(&descriptor))
                .await
                .expect("open");
            store.mark_complete(0).expect("mark");
            store.mark_complete(2).expect("mark");
            assert!(store.piece_complete(0));
            store.close();
        }
        let store = PieceStore::open(dir, descriptor).await.expect("reopen");
        assert!(store.piece_complete(0));
        assert!(!store.piece_complete(1));
        assert!(store.piece_complete(2));
        assert_eq!(store.completed_pieces(), 2);
    }

    #[tokio::test]
    async fn zero_length_files_skip_mapping_but_complete() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let descriptor =
            descriptor_with_files("demo", 16, &[("a.bin", 16), ("empty.bin", 0)]);
        let store = PieceStore::open(tmp.path().join("t"), Arc::clone(&descriptor))
            .await
            .expect("open");

        store.derive_completed_files();
        let db_path = store.dir().join(crate::layout::DB_FILE);
        assert!(
            crate::db::read_file_completion(&db_path, "demo/empty.bin").expect("query"),
            "empty file should be recorded complete immediately"
        );
        assert!(
            !crate::db::read_file_completion(&db_path, "demo/a.bin").expect("query"),
            "non-empty file is incomplete until its pieces are"
        );

        store.mark_complete(0).expect("mark");
        store.derive_completed_files();
        assert!(crate::db::read_file_completion(&db_path, "demo/a.bin").expect("query"));
    }

    #[tokio::test]
    async fn file_completion_rows_are_written_once() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let descriptor = descriptor_with_files("demo", 16, &[("a.bin", 16)]);
        let store = PieceStore::open(tmp.path().join("t"), Arc::clone(&descriptor))
            .await
            .expect("open");
        store.mark_complete(0).expect("mark");
        store.derive_completed_files();
        store.derive_completed_files();
        let state = store.lock_state();
        assert!(state.completed_files[0]);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_stops_io() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let descriptor = descriptor_with_files("demo", 16, &[("a.bin", 32)]);
        let store = PieceStore::open(tmp.path().join("t"), descriptor)
            .await
            .expect("open");
        store.close();
        store.close();
        let mut buf = [0u8; 4];
        assert!(store.read_piece(0, 0, &mut buf).is_err());
        assert!(store.mark_complete(0).is_err());
    }
}
