use super::*;
use std::sync::{Arc, Mutex};

/// Mock emitter that records all emitted events for testing
#[derive(Default, Clone)]
pub struct MockEventEmitter {
    pub state_events: Arc<Mutex<Vec<StateChangedPayload>>>,
    pub transcript_events: Arc<Mutex<Vec<TranscriptUpdatePayload>>>,
    pub error_events: Arc<Mutex<Vec<SessionErrorPayload>>>,
    pub fallback_events: Arc<Mutex<Vec<EngineFallbackPayload>>>,
}

impl MockEventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the (is_listening, is_active) pairs seen so far
    pub fn state_trace(&self) -> Vec<(bool, bool)> {
        self.state_events
            .lock()
            .unwrap()
            .iter()
            .map(|p| (p.is_listening, p.is_active))
            .collect()
    }

    /// Snapshot of delivered transcript texts
    pub fn transcript_texts(&self) -> Vec<String> {
        self.transcript_events
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.text.clone())
            .collect()
    }
}

impl SessionEventEmitter for MockEventEmitter {
    fn emit_state_changed(&self, payload: StateChangedPayload) {
        self.state_events.lock().unwrap().push(payload);
    }

    fn emit_session_error(&self, payload: SessionErrorPayload) {
        self.error_events.lock().unwrap().push(payload);
    }

    fn emit_engine_fallback(&self, payload: EngineFallbackPayload) {
        self.fallback_events.lock().unwrap().push(payload);
    }
}

impl TranscriptEventEmitter for MockEventEmitter {
    fn emit_transcript_update(&self, payload: TranscriptUpdatePayload) {
        self.transcript_events.lock().unwrap().push(payload);
    }
}

#[test]
fn test_current_timestamp_is_iso8601() {
    let timestamp = current_timestamp();
    assert!(timestamp.contains("T"));
    assert!(timestamp.contains("-"));
    assert!(chrono::DateTime::parse_from_rfc3339(&timestamp).is_ok());
}

// Verify serde camelCase rename works (smoke test for all payloads)
#[test]
fn test_serde_camel_case_rename() {
    let payload = StateChangedPayload {
        is_listening: true,
        is_active: false,
        timestamp: current_timestamp(),
    };
    let json = serde_json::to_string(&payload).unwrap();
    assert!(json.contains("\"isListening\":true"));
    assert!(json.contains("\"isActive\":false"));
    assert!(!json.contains("is_listening"));

    let payload = TranscriptUpdatePayload {
        text: "hello".to_string(),
        is_final: true,
        timestamp: current_timestamp(),
    };
    let json = serde_json::to_string(&payload).unwrap();
    assert!(json.contains("\"isFinal\":true"));

    let payload = SessionErrorPayload {
        code: "session_ended".to_string(),
        message: "connection closed".to_string(),
        session_id: "abc".to_string(),
        timestamp: current_timestamp(),
    };
    let json = serde_json::to_string(&payload).unwrap();
    assert!(json.contains("\"sessionId\":\"abc\""));
}

#[test]
fn test_mock_emitter_records_events() {
    let emitter = MockEventEmitter::new();

    emitter.emit_state_changed(StateChangedPayload {
        is_listening: true,
        is_active: false,
        timestamp: current_timestamp(),
    });
    emitter.emit_transcript_update(TranscriptUpdatePayload {
        text: "hello there".to_string(),
        is_final: true,
        timestamp: current_timestamp(),
    });

    assert_eq!(emitter.state_trace(), vec![(true, false)]);
    assert_eq!(emitter.transcript_texts(), vec!["hello there".to_string()]);
    assert!(emitter.error_events.lock().unwrap().is_empty());
    assert!(emitter.fallback_events.lock().unwrap().is_empty());
}

/// Observer that appends its tag to a shared order log on every event
struct TaggedObserver {
    tag: &'static str,
    order: Arc<Mutex<Vec<&'static str>>>,
}

impl SpeechObserver for TaggedObserver {
    fn on_state_changed(&self, _payload: &StateChangedPayload) {
        self.order.lock().unwrap().push(self.tag);
    }
}

#[test]
fn test_registry_notifies_in_registration_order() {
    let registry = EmitterRegistry::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    registry.register(Arc::new(TaggedObserver {
        tag: "first",
        order: order.clone(),
    }));
    registry.register(Arc::new(TaggedObserver {
        tag: "second",
        order: order.clone(),
    }));
    assert_eq!(registry.observer_count(), 2);

    registry.emit_state_changed(StateChangedPayload {
        is_listening: true,
        is_active: true,
        timestamp: current_timestamp(),
    });
    registry.emit_state_changed(StateChangedPayload {
        is_listening: false,
        is_active: false,
        timestamp: current_timestamp(),
    });

    assert_eq!(
        *order.lock().unwrap(),
        vec!["first", "second", "first", "second"]
    );
}

#[test]
fn test_registry_default_observer_methods_are_noops() {
    // TaggedObserver only implements on_state_changed; the rest must not panic
    let registry = EmitterRegistry::new();
    let order = Arc::new(Mutex::new(Vec::new()));
    registry.register(Arc::new(TaggedObserver {
        tag: "only",
        order: order.clone(),
    }));

    registry.emit_transcript_update(TranscriptUpdatePayload {
        text: "ignored".to_string(),
        is_final: false,
        timestamp: current_timestamp(),
    });
    registry.emit_session_error(SessionErrorPayload {
        code: "session_ended".to_string(),
        message: "ignored".to_string(),
        session_id: "s".to_string(),
        timestamp: current_timestamp(),
    });
    registry.emit_engine_fallback(EngineFallbackPayload {
        code: "missing_model".to_string(),
        reason: "ignored".to_string(),
        timestamp: current_timestamp(),
    });

    assert!(order.lock().unwrap().is_empty());
}

#[test]
fn test_event_name_constants() {
    assert_eq!(event_names::STATE_CHANGED, "speech_state_changed");
    assert_eq!(event_names::TRANSCRIPT_UPDATE, "transcript_update");
    assert_eq!(event_names::SESSION_ERROR, "speech_session_error");
    assert_eq!(event_names::ENGINE_FALLBACK, "wake_engine_fallback");
}
