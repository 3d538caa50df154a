//! On-disk storage for torrent payloads: directory resolution, the
//! memory-mapped piece store with its completion database, the cached
//! file-completion lookup, touch sentinels, and the free-space cleaner.

pub mod cleaner;
pub mod db;
pub mod file_cache;
pub mod layout;
pub mod piece_store;
pub mod touch;

pub use cleaner::{Cleaner, FreeSpaceProbe, StatvfsProbe};
pub use db::CompletionDb;
pub use file_cache::FileCacheMap;
pub use layout::{DB_FILE, content_rel_path, resolve_dir, safe_name, touch_path};
pub use piece_store::PieceStore;
pub use touch::TouchMap;
