// Wake and sleep word detection

use std::sync::Arc;

mod text;
pub use text::{normalize, TextMatcher};

mod spotter;
pub use spotter::{EngineInitError, KeywordHit, KeywordSpotter, SpotterConfig, SpotterEngine};

/// The wake detection capability for one session.
///
/// Two variants, fixed at session start: text matching over transcripts,
/// or audio-native keyword spotting. Sleep detection always rides on
/// transcript text regardless of variant, because keyword models are
/// provisioned for a single wake phrase only.
pub enum WakeWordEngine {
    /// Wake and sleep both matched on transcript text
    Text {
        wake: TextMatcher,
        sleep: TextMatcher,
    },
    /// Wake spotted on raw audio frames; sleep still matched on text
    Spotter {
        spotter: Arc<KeywordSpotter>,
        sleep: TextMatcher,
    },
}

impl WakeWordEngine {
    /// Text-matching engine for the given trigger words
    pub fn text(wake_word: Option<&str>, sleep_word: Option<&str>) -> Self {
        Self::Text {
            wake: TextMatcher::new(wake_word),
            sleep: TextMatcher::new(sleep_word),
        }
    }

    /// Audio-native engine wrapping an initialized keyword spotter
    pub fn spotter(spotter: Arc<KeywordSpotter>, sleep_word: Option<&str>) -> Self {
        Self::Spotter {
            spotter,
            sleep: TextMatcher::new(sleep_word),
        }
    }

    /// Check transcript text for the wake word.
    ///
    /// Always false for the audio variant: its detections arrive
    /// asynchronously through the spotter's hit channel, never from text.
    pub fn detect_wake(&self, text: &str) -> bool {
        match self {
            Self::Text { wake, .. } => wake.matches(text),
            Self::Spotter { .. } => false,
        }
    }

    /// Check transcript text for the sleep word
    pub fn detect_sleep(&self, text: &str) -> bool {
        match self {
            Self::Text { sleep, .. } | Self::Spotter { sleep, .. } => sleep.matches(text),
        }
    }

    /// Whether this is the audio-native variant
    pub fn is_audio(&self) -> bool {
        matches!(self, Self::Spotter { .. })
    }

    /// The keyword spotter, when the audio variant is in use
    pub fn spotter_handle(&self) -> Option<&Arc<KeywordSpotter>> {
        match self {
            Self::Spotter { spotter, .. } => Some(spotter),
            Self::Text { .. } => None,
        }
    }
}

impl std::fmt::Debug for WakeWordEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text { wake, sleep } => f
                .debug_struct("WakeWordEngine::Text")
                .field("wake", &wake.word())
                .field("sleep", &sleep.word())
                .finish(),
            Self::Spotter { spotter, sleep } => f
                .debug_struct("WakeWordEngine::Spotter")
                .field("keyword_label", &spotter.keyword_label())
                .field("sleep", &sleep.word())
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct IdleEngine;

    impl SpotterEngine for IdleEngine {
        fn load(&mut self, _config: &SpotterConfig) -> Result<(), EngineInitError> {
            Ok(())
        }
        fn start(&mut self) -> Result<(), EngineInitError> {
            Ok(())
        }
        fn process(&mut self, _samples: &[i16]) -> Option<String> {
            None
        }
        fn release(&mut self) {}
    }

    fn audio_engine(sleep_word: Option<&str>) -> WakeWordEngine {
        let config = SpotterConfig {
            access_key: "pv-key".to_string(),
            model_path: std::env::temp_dir(),
            keyword_label: "wake".to_string(),
            sensitivity: 0.5,
            sample_rate: 16000,
        };
        let spotter = Arc::new(KeywordSpotter::new(config, Box::new(IdleEngine)));
        WakeWordEngine::spotter(spotter, sleep_word)
    }

    #[test]
    fn test_text_variant_detects_wake_and_sleep() {
        let engine = WakeWordEngine::text(Some("hello"), Some("bye"));
        assert!(!engine.is_audio());
        assert!(engine.detect_wake("well hello there"));
        assert!(!engine.detect_wake("bye now"));
        assert!(engine.detect_sleep("bye now"));
        assert!(!engine.detect_sleep("hello there"));
    }

    #[test]
    fn test_spotter_variant_never_matches_wake_on_text() {
        let engine = audio_engine(Some("bye"));
        assert!(engine.is_audio());
        assert!(engine.spotter_handle().is_some());
        // Even text containing the keyword label is not a text wake
        assert!(!engine.detect_wake("wake"));
    }

    #[test]
    fn test_sleep_rides_text_in_both_variants() {
        let engine = audio_engine(Some("bye"));
        assert!(engine.detect_sleep("ok bye then"));

        let engine = audio_engine(None);
        assert!(!engine.detect_sleep("ok bye then"));
    }

    #[test]
    fn test_absent_words_disable_detection() {
        let engine = WakeWordEngine::text(None, None);
        assert!(!engine.detect_wake("anything"));
        assert!(!engine.detect_sleep("anything"));
    }
}
