// Per-session transcript accumulation

/// Accumulated transcript text for the current active span.
///
/// Final segments append; interim segments overwrite each other and are
/// discarded once the final form of the same utterance arrives. The log
/// is cleared on every wake so consumers only ever see text spoken after
/// the most recent activation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscriptLog {
    finals: Vec<String>,
    interim: Option<String>,
}

impl TranscriptLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the pending interim hypothesis.
    pub fn set_interim(&mut self, text: &str) {
        self.interim = Some(text.to_string());
    }

    /// Append a finalized segment, discarding any pending interim.
    pub fn push_final(&mut self, text: &str) {
        self.interim = None;
        self.finals.push(text.to_string());
    }

    pub fn clear(&mut self) {
        self.finals.clear();
        self.interim = None;
    }

    pub fn finals(&self) -> &[String] {
        &self.finals
    }

    pub fn interim(&self) -> Option<&str> {
        self.interim.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.finals.is_empty() && self.interim.is_none()
    }

    /// Finalized segments plus the pending interim, in arrival order.
    pub fn snapshot(&self) -> Vec<String> {
        let mut entries = self.finals.clone();
        if let Some(interim) = &self.interim {
            entries.push(interim.clone());
        }
        entries
    }

    /// All finalized text joined into one utterance string.
    pub fn combined(&self) -> String {
        self.finals.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_log_is_empty() {
        let log = TranscriptLog::new();
        assert!(log.is_empty());
        assert!(log.finals().is_empty());
        assert_eq!(log.interim(), None);
    }

    #[test]
    fn test_finals_append_in_order() {
        let mut log = TranscriptLog::new();
        log.push_final("turn on the lights");
        log.push_final("set a timer");
        assert_eq!(log.finals(), ["turn on the lights", "set a timer"]);
        assert_eq!(log.combined(), "turn on the lights set a timer");
    }

    #[test]
    fn test_interim_overwrites_previous_interim() {
        let mut log = TranscriptLog::new();
        log.set_interim("turn");
        log.set_interim("turn on");
        assert_eq!(log.interim(), Some("turn on"));
        assert!(log.finals().is_empty());
    }

    #[test]
    fn test_final_discards_pending_interim() {
        let mut log = TranscriptLog::new();
        log.set_interim("hel");
        log.set_interim("hello there");
        log.push_final("hello there");
        assert_eq!(log.finals(), ["hello there"]);
        assert_eq!(log.interim(), None);
        assert_eq!(log.snapshot(), ["hello there"]);
    }

    #[test]
    fn test_snapshot_includes_interim_tail() {
        let mut log = TranscriptLog::new();
        log.push_final("hello there");
        log.set_interim("how are");
        assert_eq!(log.snapshot(), ["hello there", "how are"]);
    }

    #[test]
    fn test_clear_drops_everything() {
        let mut log = TranscriptLog::new();
        log.push_final("old utterance");
        log.set_interim("pending");
        log.clear();
        assert!(log.is_empty());
        assert!(log.snapshot().is_empty());
    }
}
