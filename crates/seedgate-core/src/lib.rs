#![forbid(unsafe_code)]

//! Engine-agnostic torrent types and ports shared across the workspace.
//!
//! The gateway consumes the BitTorrent protocol engine, the metainfo
//! suppliers, and the object store through the narrow traits defined here;
//! everything else in the workspace is keyed by [`InfoHash`] and described by
//! a [`TorrentDescriptor`].

pub mod descriptor;
pub mod error;
pub mod hash;
pub mod metainfo;
pub mod ports;

pub use descriptor::{FileSpec, PieceExtent, TorrentDescriptor};
pub use error::{Error, Result};
pub use hash::{InfoHash, PieceHash};
pub use ports::{
    FileReader, MetainfoStore, ObjectStore, PieceState, PiecePriority, PieceStorage,
    ReaderOptions, ReadaheadFn, SwarmStats, TorrentDropper, TorrentEngine, TorrentHandle,
};
