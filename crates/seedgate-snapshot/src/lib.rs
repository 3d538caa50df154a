//! Threshold-driven mirroring of completed pieces to an object store, with
//! resumption state so a future process can re-seed without re-downloading.

pub mod engine;
pub mod map;
pub mod s3;

pub use engine::SnapshotEngine;
pub use map::SnapshotMap;
pub use s3::S3Store;
