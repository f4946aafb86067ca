pub mod control_api;
pub mod control_channel;
pub mod file_system;
pub mod static_server;

/// Re-export commonly used types from adapters
pub use control_channel::{ControlChannel, ControlHandle};
pub use file_system::FileSystemAdapter;
pub use static_server::{ServerOptions, ServerState, StaticServer};
