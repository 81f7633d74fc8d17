// Session configuration
// Every recognized option is an explicit field with a default; validation
// runs once when an orchestrator is constructed, never during the session.

use crate::audio::CaptureConfig;
use crate::transcription::{StreamConfig, DEFAULT_LISTEN_ENDPOINT};
use crate::wake::SpotterConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Which wake word engine a session will run with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeEngineKind {
    /// Wake detection on raw audio frames via the keyword spotter
    AudioSpotter,
    /// Wake detection on transcript text only
    TextOnly,
}

/// Errors from session configuration validation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("transcription API key must not be empty")]
    MissingApiKey,
    #[error("sensitivity must be within [0.0, 1.0], got {0}")]
    SensitivityOutOfRange(f32),
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
    #[error("capture channel count must be non-zero")]
    InvalidChannelCount,
    #[error("capture sample rate must be non-zero")]
    InvalidSampleRate,
}

/// Configuration for one listening session.
///
/// `wake_word` and `sleep_word` may each be absent, which permanently
/// disables that trigger for the session (never an error).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Phrase that activates transcript delivery
    pub wake_word: Option<String>,
    /// Phrase that deactivates transcript delivery
    pub sleep_word: Option<String>,
    /// Language tag for the transcription session
    pub language: String,
    /// Transcription model identifier
    pub model: String,
    /// Ask the service to punctuate transcripts
    pub punctuate: bool,
    /// Ask the service for interim (provisional) results
    pub interim_results: bool,
    /// Prefer the audio-native keyword spotter for wake detection
    pub use_audio_wake_engine: bool,
    /// Credential for the transcription service
    pub transcription_api_key: String,
    /// Transcription service endpoint
    pub transcription_endpoint: String,
    /// Credential for the keyword-spotting engine
    pub spotter_access_key: Option<String>,
    /// Keyword model file for the spotter
    pub spotter_model_path: Option<PathBuf>,
    /// Label the spotter reports for the wake keyword
    pub spotter_keyword_label: String,
    /// Spotter sensitivity in [0.0, 1.0]
    pub sensitivity: f32,
    /// Timeout for the transcription connection handshake
    pub connect_timeout: Duration,
    /// Microphone capture settings
    pub capture: CaptureConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            wake_word: None,
            sleep_word: None,
            language: "en-US".to_string(),
            model: "nova-2".to_string(),
            punctuate: true,
            interim_results: true,
            use_audio_wake_engine: false,
            transcription_api_key: String::new(),
            transcription_endpoint: DEFAULT_LISTEN_ENDPOINT.to_string(),
            spotter_access_key: None,
            spotter_model_path: None,
            spotter_keyword_label: "wake".to_string(),
            sensitivity: 0.5,
            connect_timeout: Duration::from_secs(10),
            capture: CaptureConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Validate the configuration. Called once at orchestrator construction.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transcription_api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        if !(0.0..=1.0).contains(&self.sensitivity) {
            return Err(ConfigError::SensitivityOutOfRange(self.sensitivity));
        }
        if self.language.trim().is_empty() {
            return Err(ConfigError::EmptyField("language"));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::EmptyField("model"));
        }
        if self.transcription_endpoint.trim().is_empty() {
            return Err(ConfigError::EmptyField("transcription_endpoint"));
        }
        if self.capture.channels == 0 {
            return Err(ConfigError::InvalidChannelCount);
        }
        if self.capture.sample_rate == 0 {
            return Err(ConfigError::InvalidSampleRate);
        }
        Ok(())
    }

    /// Effective wake engine for this configuration.
    ///
    /// The audio spotter is engaged only when the flag is set and both the
    /// access key and the model path are present; anything less quietly
    /// selects text matching at construction (distinct from the runtime
    /// fallback, which reacts to an engine that fails to come up).
    pub fn wake_engine_kind(&self) -> WakeEngineKind {
        let has_key = self
            .spotter_access_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty());
        if self.use_audio_wake_engine && has_key && self.spotter_model_path.is_some() {
            WakeEngineKind::AudioSpotter
        } else {
            WakeEngineKind::TextOnly
        }
    }

    /// Parameters for the transcription session derived from this config
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            endpoint: self.transcription_endpoint.clone(),
            api_key: self.transcription_api_key.clone(),
            model: self.model.clone(),
            language: self.language.clone(),
            punctuate: self.punctuate,
            interim_results: self.interim_results,
            encoding: "linear16".to_string(),
            sample_rate: self.capture.sample_rate,
            connect_timeout: self.connect_timeout,
        }
    }

    /// Spotter configuration, if the audio engine is effectively selected
    pub fn spotter_config(&self) -> Option<SpotterConfig> {
        if self.wake_engine_kind() != WakeEngineKind::AudioSpotter {
            return None;
        }
        Some(SpotterConfig {
            access_key: self.spotter_access_key.clone().unwrap_or_default(),
            model_path: self.spotter_model_path.clone().unwrap_or_default(),
            keyword_label: self.spotter_keyword_label.clone(),
            sensitivity: self.sensitivity,
            sample_rate: self.capture.sample_rate,
        })
    }
}
