// Wake-word gated streaming transcription core.
//
// One Orchestrator owns a microphone source, a wake word engine, and a
// duplex transcription session, and enforces when transcript text may
// reach the consumer: text flows only between a spoken wake word and the
// matching sleep word.

// Enable coverage attribute on nightly for explicit exclusions
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod audio;
pub mod config;
pub mod events;
pub mod session;
pub mod transcription;
pub mod wake;

// Re-export log macros for use throughout the crate
pub use log::{debug, error, info, trace, warn};

pub use config::{ConfigError, SessionConfig, WakeEngineKind};
pub use events::{EmitterRegistry, SpeechObserver};
pub use session::{Orchestrator, OrchestratorError, SessionState};
pub use transcription::{ConnectionError, TranscriptEvent};
pub use wake::{EngineInitError, TextMatcher};
