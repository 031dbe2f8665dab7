pub mod connection;
pub mod dispatcher;
pub mod middleware;
pub mod orchestrator;
pub mod push;
pub mod response;
pub mod server;

pub use connection::{ConnectionRecord, ConnectionRegistry, MemoryConnectionRegistry};
pub use dispatcher::{BroadcastDispatcher, PublishReport};
pub use orchestrator::{OrchestratorConfig, SessionOrchestrator};
pub use push::{DeliveryError, LocalPushEndpoint, PushEndpoint};
pub use response::{CoreResponse, SessionSnapshot};
pub use server::{spawn_sweeper, GatewayServer};
