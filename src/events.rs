// Outward events for session consumers
// Defines event payloads, emission traits for testability, and the
// observer registry that fans events out to registered subscribers

use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Event names as constants for consistency
pub mod event_names {
    pub const STATE_CHANGED: &str = "speech_state_changed";
    pub const TRANSCRIPT_UPDATE: &str = "transcript_update";
    pub const SESSION_ERROR: &str = "speech_session_error";
    pub const ENGINE_FALLBACK: &str = "wake_engine_fallback";
}

/// Payload for speech_state_changed event
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StateChangedPayload {
    /// Whether a session is running (armed or active)
    pub is_listening: bool,
    /// Whether transcripts are currently surfaced to the consumer
    pub is_active: bool,
    /// ISO 8601 timestamp of the change
    pub timestamp: String,
}

/// Payload for transcript_update event
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptUpdatePayload {
    /// The transcript text segment
    pub text: String,
    /// True for a final segment, false for an interim revision
    pub is_final: bool,
    /// ISO 8601 timestamp of delivery
    pub timestamp: String,
}

/// Payload for speech_session_error event
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionErrorPayload {
    /// Stable reason code (e.g. "session_ended", "connection_network")
    pub code: String,
    /// Descriptive error message
    pub message: String,
    /// Id of the session the error belongs to
    pub session_id: String,
    /// ISO 8601 timestamp when the error surfaced
    pub timestamp: String,
}

/// Payload for wake_engine_fallback event
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngineFallbackPayload {
    /// Stable reason code from the engine failure
    pub code: String,
    /// Why the keyword spotter was abandoned for this session
    pub reason: String,
    /// ISO 8601 timestamp of the fallback decision
    pub timestamp: String,
}

/// Trait for emitting session lifecycle events
/// Allows mocking in tests while using a real observer registry in production
pub trait SessionEventEmitter: Send + Sync {
    /// Emit speech_state_changed event
    fn emit_state_changed(&self, payload: StateChangedPayload);

    /// Emit speech_session_error event
    fn emit_session_error(&self, payload: SessionErrorPayload);

    /// Emit wake_engine_fallback event
    fn emit_engine_fallback(&self, payload: EngineFallbackPayload);
}

/// Trait for emitting gated transcript events
/// Allows mocking in tests while using a real observer registry in production
pub trait TranscriptEventEmitter: Send + Sync {
    /// Emit transcript_update event
    fn emit_transcript_update(&self, payload: TranscriptUpdatePayload);
}

/// Consumer-facing observer over everything a session reports outward.
///
/// All methods default to no-ops so observers implement only what they
/// care about.
pub trait SpeechObserver: Send + Sync {
    fn on_state_changed(&self, _payload: &StateChangedPayload) {}
    fn on_transcript_update(&self, _payload: &TranscriptUpdatePayload) {}
    fn on_session_error(&self, _payload: &SessionErrorPayload) {}
    fn on_engine_fallback(&self, _payload: &EngineFallbackPayload) {}
}

/// Fan-out registry over registered observers.
///
/// Observers are notified synchronously, in registration order, on the
/// session's event-loop task. A slow observer therefore delays transcript
/// gating for the whole session. Register everything before `start()`;
/// late registrations only see events that follow them.
#[derive(Default)]
pub struct EmitterRegistry {
    observers: Mutex<Vec<Arc<dyn SpeechObserver>>>,
}

impl EmitterRegistry {
    pub fn new() -> Self {
        Self {
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Register an observer. Returns the observer count after registration.
    pub fn register(&self, observer: Arc<dyn SpeechObserver>) -> usize {
        match self.observers.lock() {
            Ok(mut obs) => {
                obs.push(observer);
                obs.len()
            }
            Err(_) => {
                crate::error!("Observer registry lock poisoned, registration dropped");
                0
            }
        }
    }

    /// Number of registered observers
    pub fn observer_count(&self) -> usize {
        self.observers.lock().map(|o| o.len()).unwrap_or(0)
    }

    fn for_each(&self, f: impl Fn(&Arc<dyn SpeechObserver>)) {
        if let Ok(obs) = self.observers.lock() {
            for observer in obs.iter() {
                f(observer);
            }
        }
    }
}

impl std::fmt::Debug for EmitterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmitterRegistry")
            .field("observers", &self.observer_count())
            .finish()
    }
}

impl SessionEventEmitter for EmitterRegistry {
    fn emit_state_changed(&self, payload: StateChangedPayload) {
        self.for_each(|o| o.on_state_changed(&payload));
    }

    fn emit_session_error(&self, payload: SessionErrorPayload) {
        self.for_each(|o| o.on_session_error(&payload));
    }

    fn emit_engine_fallback(&self, payload: EngineFallbackPayload) {
        self.for_each(|o| o.on_engine_fallback(&payload));
    }
}

impl TranscriptEventEmitter for EmitterRegistry {
    fn emit_transcript_update(&self, payload: TranscriptUpdatePayload) {
        self.for_each(|o| o.on_transcript_update(&payload));
    }
}

/// Get the current timestamp in ISO 8601 format
pub fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
#[path = "events_test.rs"]
pub(crate) mod tests;
