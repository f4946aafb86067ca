pub mod file_system;
pub mod managed_server;
pub mod server_control;

pub use file_system::{FileSystem, FileSystemError, FileSystemResult};
pub use managed_server::{ManagedServer, ServerInfo};
pub use server_control::{ServerControl, ServerSummary};
