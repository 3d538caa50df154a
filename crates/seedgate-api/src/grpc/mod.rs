//! gRPC stat surface.

pub mod pb;
pub mod service;

pub use pb::torrent_web_seeder_server::TorrentWebSeederServer;
pub use service::StatService;
