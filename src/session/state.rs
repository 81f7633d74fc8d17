// Session lifecycle state machine

use serde::Serialize;

/// Lifecycle states of a speech session.
///
/// `Armed` means the session is capturing and watching for the wake word
/// but suppressing transcripts. `Active` means transcripts flow to
/// consumers until the sleep word or a stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// No resources held
    Stopped,
    /// Resources being acquired, not yet listening
    Initializing,
    /// Capturing and wake-word watching, transcripts suppressed
    Armed,
    /// Capturing and forwarding transcripts
    Active,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Stopped
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Stopped => "Stopped",
            SessionState::Initializing => "Initializing",
            SessionState::Armed => "Armed",
            SessionState::Active => "Active",
        };
        write!(f, "{}", name)
    }
}

impl SessionState {
    /// True while the session holds the microphone (Armed or Active).
    pub fn is_listening(self) -> bool {
        matches!(self, SessionState::Armed | SessionState::Active)
    }

    /// True only while transcripts are being forwarded.
    pub fn is_active(self) -> bool {
        self == SessionState::Active
    }

    /// Validate and perform a transition, returning the new state.
    ///
    /// Every state may fall back to `Stopped` except `Stopped` itself;
    /// the forward path is Stopped -> Initializing -> Armed <-> Active.
    #[must_use = "this returns a Result that should be handled"]
    pub fn transition_to(self, next: SessionState) -> Result<SessionState, StateError> {
        let valid = matches!(
            (self, next),
            (SessionState::Stopped, SessionState::Initializing)
                | (SessionState::Initializing, SessionState::Armed)
                | (SessionState::Initializing, SessionState::Stopped)
                | (SessionState::Armed, SessionState::Active)
                | (SessionState::Armed, SessionState::Stopped)
                | (SessionState::Active, SessionState::Armed)
                | (SessionState::Active, SessionState::Stopped)
        );

        if valid {
            Ok(next)
        } else {
            Err(StateError::InvalidTransition { from: self, to: next })
        }
    }
}

/// Errors from session state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },
}

impl std::fmt::Display for StateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateError::InvalidTransition { from, to } => {
                write!(f, "Invalid state transition from {:?} to {:?}", from, to)
            }
        }
    }
}

impl std::error::Error for StateError {}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
