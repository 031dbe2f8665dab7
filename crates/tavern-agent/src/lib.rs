pub mod backends;
pub mod bios;
pub mod config;
pub mod gateway;
pub mod sse;
pub mod stream;

pub use backends::ConversationBackend;
pub use bios::{BioResponse, CharacterBio};
pub use config::{GeneratorProvider, ModelConfig};
pub use gateway::GenerationGateway;
pub use stream::StreamEvent;
