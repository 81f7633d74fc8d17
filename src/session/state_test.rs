use super::*;

#[test]
fn test_default_state_is_stopped() {
    assert_eq!(SessionState::default(), SessionState::Stopped);
}

#[test]
fn test_full_lifecycle_walk() {
    let state = SessionState::Stopped;
    let state = state.transition_to(SessionState::Initializing).unwrap();
    let state = state.transition_to(SessionState::Armed).unwrap();
    let state = state.transition_to(SessionState::Active).unwrap();
    let state = state.transition_to(SessionState::Armed).unwrap();
    let state = state.transition_to(SessionState::Stopped).unwrap();
    assert_eq!(state, SessionState::Stopped);
}

#[test]
fn test_active_toggles_back_and_forth() {
    let mut state = SessionState::Armed;
    for _ in 0..3 {
        state = state.transition_to(SessionState::Active).unwrap();
        state = state.transition_to(SessionState::Armed).unwrap();
    }
    assert_eq!(state, SessionState::Armed);
}

#[test]
fn test_initialization_failure_returns_to_stopped() {
    let state = SessionState::Stopped
        .transition_to(SessionState::Initializing)
        .unwrap();
    let state = state.transition_to(SessionState::Stopped).unwrap();
    assert_eq!(state, SessionState::Stopped);
}

#[test]
fn test_every_running_state_can_stop() {
    for state in [
        SessionState::Initializing,
        SessionState::Armed,
        SessionState::Active,
    ] {
        assert_eq!(
            state.transition_to(SessionState::Stopped).unwrap(),
            SessionState::Stopped
        );
    }
}

#[test]
fn test_stopped_cannot_stop_again() {
    let err = SessionState::Stopped
        .transition_to(SessionState::Stopped)
        .unwrap_err();
    assert!(matches!(
        err,
        StateError::InvalidTransition {
            from: SessionState::Stopped,
            to: SessionState::Stopped,
        }
    ));
}

#[test]
fn test_cannot_skip_initialization() {
    assert!(SessionState::Stopped
        .transition_to(SessionState::Armed)
        .is_err());
    assert!(SessionState::Stopped
        .transition_to(SessionState::Active)
        .is_err());
}

#[test]
fn test_cannot_activate_from_initializing() {
    let err = SessionState::Initializing
        .transition_to(SessionState::Active)
        .unwrap_err();
    assert!(matches!(
        err,
        StateError::InvalidTransition {
            from: SessionState::Initializing,
            to: SessionState::Active,
        }
    ));
}

#[test]
fn test_cannot_reenter_initializing_while_running() {
    assert!(SessionState::Armed
        .transition_to(SessionState::Initializing)
        .is_err());
    assert!(SessionState::Active
        .transition_to(SessionState::Initializing)
        .is_err());
}

#[test]
fn test_listening_flag_per_state() {
    assert!(!SessionState::Stopped.is_listening());
    assert!(!SessionState::Initializing.is_listening());
    assert!(SessionState::Armed.is_listening());
    assert!(SessionState::Active.is_listening());
}

#[test]
fn test_active_flag_per_state() {
    assert!(!SessionState::Stopped.is_active());
    assert!(!SessionState::Initializing.is_active());
    assert!(!SessionState::Armed.is_active());
    assert!(SessionState::Active.is_active());
}

#[test]
fn test_display_names() {
    assert_eq!(SessionState::Stopped.to_string(), "Stopped");
    assert_eq!(SessionState::Initializing.to_string(), "Initializing");
    assert_eq!(SessionState::Armed.to_string(), "Armed");
    assert_eq!(SessionState::Active.to_string(), "Active");
}

#[test]
fn test_error_display_names_both_states() {
    let err = SessionState::Armed
        .transition_to(SessionState::Initializing)
        .unwrap_err();
    let text = err.to_string();
    assert!(text.contains("Armed"));
    assert!(text.contains("Initializing"));
}

#[test]
fn test_state_serializes_as_name() {
    let json = serde_json::to_string(&SessionState::Armed).unwrap();
    assert_eq!(json, "\"Armed\"");
}
