pub mod graceful_shutdown;
pub mod request_tracker;

pub use graceful_shutdown::{GracefulShutdown, ShutdownReason};
pub use request_tracker::{RequestGuard, RequestTracker};
