pub mod error;
pub mod interception;
pub mod manager;
pub mod paths;
pub mod provider;
pub mod registry;

pub use error::{PreviewError, PreviewResult};
pub use interception::{
    FilterOutcome, InterceptionPipeline, InterceptionTimeout, PendingResponse, RequestEvent,
    RequestLocation, RequestStream, ResponseOverride, ResponseState, Subscription,
};
pub use manager::ServerManager;
pub use paths::ServerRoot;
pub use provider::StaticServerProvider;
pub use registry::PathRegistry;
