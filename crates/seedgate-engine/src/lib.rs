#![forbid(unsafe_code)]

//! Webseed-only implementation of the torrent engine port.
//!
//! The peer-wire protocol engine is an external capability; this crate
//! satisfies the same port by fetching pieces over plain HTTP range requests
//! from a webseed URL, verifying them against the declared piece hashes, and
//! recording completion in the torrent's piece storage. Readers pend until
//! the covering piece has been verified, and their positions drive the fetch
//! order together with the dynamic read-ahead policy supplied by the HTTP
//! layer.

mod engine;
mod fetch;
mod reader;

pub use engine::{WebseedEngine, WebseedHandle};
