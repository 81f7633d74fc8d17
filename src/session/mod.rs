// Session lifecycle and orchestration

mod orchestrator;
mod state;
mod transcript;

pub use orchestrator::{Orchestrator, OrchestratorError};
pub use state::{SessionState, StateError};
pub use transcript::TranscriptLog;
