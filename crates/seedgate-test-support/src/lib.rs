#![forbid(unsafe_code)]

//! Shared test fixtures: synthetic torrent descriptors, an in-memory piece
//! storage, a scriptable stub engine, and in-memory implementations of the
//! metainfo and object-store ports.

mod engine;
mod fixtures;
mod stores;

pub use engine::{StubEngine, StubHandle};
pub use fixtures::{build_torrent, descriptor_with_files, single_file_torrent};
pub use stores::{MemoryMetainfoStore, MemoryObjectStore, MemoryStorage};
