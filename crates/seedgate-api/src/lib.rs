//! HTTP and gRPC surfaces: the range-aware streaming adapter with dynamic
//! read-ahead and throttling, directory listings, stat SSE, and the stat
//! gRPC service.

pub mod error;
pub mod grpc;
pub mod http;
pub mod listener;
pub mod state;
pub mod throttle;

pub use error::ApiError;
pub use http::build_router;
pub use listener::BlockedListener;
pub use state::ApiState;
