pub mod cleanup;
pub mod client;
pub mod messages;
pub mod orchestrator;
pub mod prompt;

pub use cleanup::clean_reply;
pub use client::{AnthropicClient, MessagesApi};
pub use orchestrator::{DispatchLevel, OrchestratorSettings, ReferenceLookup, ReplyOrchestrator};
pub use prompt::TranscriptEntry;
