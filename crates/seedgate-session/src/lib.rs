#![forbid(unsafe_code)]

//! Torrent session management: the lazy-activating torrent map with idle
//! expiry and activation probes, the composite metainfo source, the vault
//! webseed lookup, per-session token buckets, and the stat aggregator.

pub mod bucket_pool;
pub mod meta;
pub mod stat;
mod store_pb;
pub mod torrent_map;
pub mod vault;

pub use bucket_pool::BucketPool;
pub use meta::{FileStore, GrpcMetainfoStore, MetaSource};
pub use stat::{PieceStat, StatAggregator, StatFrame, StatStatus};
pub use torrent_map::{DiskStorageFactory, StorageFactory, TorrentMap, TorrentMapConfig};
pub use vault::Vault;
