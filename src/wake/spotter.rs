// Audio-native keyword spotting
//
// The external engine sits behind the SpotterEngine trait; KeywordSpotter
// wraps it with lifecycle management and an async hit channel so the
// session event loop can select on detections alongside transcript events.

use crate::audio::{i16_le_to_samples, AudioFrame};
use crate::events::current_timestamp;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc as tokio_mpsc;

/// Hits are rare; a tiny buffer is plenty
const HIT_CHANNEL_CAPACITY: usize = 4;

/// Configuration for the keyword-spotting engine
#[derive(Debug, Clone, PartialEq)]
pub struct SpotterConfig {
    /// Access credential for the engine
    pub access_key: String,
    /// Keyword model file
    pub model_path: PathBuf,
    /// Label the model reports for the wake keyword
    pub keyword_label: String,
    /// Detection sensitivity in [0.0, 1.0]
    pub sensitivity: f32,
    /// Sample rate of the frames that will be fed
    pub sample_rate: u32,
}

impl SpotterConfig {
    /// Check credential and model file before handing the config to the
    /// engine. Engines apply their own deeper validation during load.
    pub fn validate(&self) -> Result<(), EngineInitError> {
        if self.access_key.trim().is_empty() {
            return Err(EngineInitError::InvalidCredential);
        }
        if !self.model_path.exists() {
            return Err(EngineInitError::MissingModel(
                self.model_path.display().to_string(),
            ));
        }
        Ok(())
    }
}

/// Errors from keyword engine initialization
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineInitError {
    #[error("keyword model not found: {0}")]
    MissingModel(String),
    #[error("keyword engine rejected the access credential")]
    InvalidCredential,
    #[error("keyword model is incompatible with this engine: {0}")]
    IncompatibleModel(String),
    #[error("keyword engine failure: {0}")]
    EngineFailure(String),
}

impl EngineInitError {
    /// Stable machine-readable code for error payloads
    pub fn reason_code(&self) -> &'static str {
        match self {
            EngineInitError::MissingModel(_) => "missing_model",
            EngineInitError::InvalidCredential => "invalid_credential",
            EngineInitError::IncompatibleModel(_) => "incompatible_model",
            EngineInitError::EngineFailure(_) => "engine_failure",
        }
    }
}

/// A keyword detection reported by the spotter
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordHit {
    /// Label the engine matched
    pub label: String,
    /// When the hit was observed (RFC 3339)
    pub timestamp: String,
}

/// The external keyword-spotting engine behind the spotter.
///
/// Implementations wrap a concrete acoustic engine. `process` is called
/// on the frame path and must be cheap; detection work heavier than a
/// model step belongs inside the engine's own threading.
pub trait SpotterEngine: Send {
    /// Load the model. Called once, before `start`.
    fn load(&mut self, config: &SpotterConfig) -> Result<(), EngineInitError>;

    /// Begin detection. Called once per session after a successful load.
    fn start(&mut self) -> Result<(), EngineInitError>;

    /// Feed one frame of samples; returns the matched label, if any
    fn process(&mut self, samples: &[i16]) -> Option<String>;

    /// Free engine resources. Further calls must be no-ops.
    fn release(&mut self);
}

/// Lifecycle wrapper around a keyword-spotting engine.
///
/// All methods take `&self`; the spotter is shared between the session's
/// frame path and its control path. Hits surface through the channel
/// returned by `subscribe_hits`, which must be claimed before `start`.
pub struct KeywordSpotter {
    config: SpotterConfig,
    engine: Mutex<Box<dyn SpotterEngine>>,
    listening: AtomicBool,
    released: AtomicBool,
    hit_tx: tokio_mpsc::Sender<KeywordHit>,
    hit_rx: Mutex<Option<tokio_mpsc::Receiver<KeywordHit>>>,
}

impl KeywordSpotter {
    /// Wrap an engine. Nothing is loaded until `initialize`.
    pub fn new(config: SpotterConfig, engine: Box<dyn SpotterEngine>) -> Self {
        let (hit_tx, hit_rx) = tokio_mpsc::channel(HIT_CHANNEL_CAPACITY);
        Self {
            config,
            engine: Mutex::new(engine),
            listening: AtomicBool::new(false),
            released: AtomicBool::new(false),
            hit_tx,
            hit_rx: Mutex::new(Some(hit_rx)),
        }
    }

    /// Label this spotter's model reports for the wake keyword
    pub fn keyword_label(&self) -> &str {
        &self.config.keyword_label
    }

    /// Validate the config and load the engine
    pub fn initialize(&self) -> Result<(), EngineInitError> {
        self.config.validate()?;
        let mut engine = self.lock_engine()?;
        engine.load(&self.config)?;
        crate::debug!(
            "Keyword engine loaded (model: {}, sensitivity: {})",
            self.config.model_path.display(),
            self.config.sensitivity
        );
        Ok(())
    }

    /// Claim the hit receiver. Returns None after the first call.
    pub fn subscribe_hits(&self) -> Option<tokio_mpsc::Receiver<KeywordHit>> {
        self.hit_rx.lock().ok().and_then(|mut rx| rx.take())
    }

    /// Begin listening for the keyword.
    ///
    /// Idempotent: calling while already listening logs a warning and
    /// succeeds without touching the engine again.
    pub fn start(&self) -> Result<(), EngineInitError> {
        if self.released.load(Ordering::Acquire) {
            return Err(EngineInitError::EngineFailure(
                "keyword spotter already released".to_string(),
            ));
        }
        if self.listening.swap(true, Ordering::AcqRel) {
            crate::warn!("Keyword spotter already listening, ignoring start");
            return Ok(());
        }
        let mut engine = self.lock_engine()?;
        if let Err(e) = engine.start() {
            self.listening.store(false, Ordering::Release);
            return Err(e);
        }
        crate::info!("Keyword spotter listening for '{}'", self.config.keyword_label);
        Ok(())
    }

    /// Feed one audio frame to the engine. Silently ignored unless the
    /// spotter is listening.
    pub fn feed(&self, frame: &AudioFrame) {
        if !self.listening.load(Ordering::Acquire) {
            return;
        }
        let samples = i16_le_to_samples(&frame.data);
        let label = match self.engine.lock() {
            Ok(mut engine) => engine.process(&samples),
            Err(_) => None,
        };
        if let Some(label) = label {
            crate::debug!("Keyword hit: '{}' (frame seq {})", label, frame.seq);
            let hit = KeywordHit {
                label,
                timestamp: current_timestamp(),
            };
            if self.hit_tx.try_send(hit).is_err() {
                crate::warn!("Keyword hit dropped, consumer not keeping up");
            }
        }
    }

    /// Stop listening. Safe to call in any state.
    pub fn stop(&self) {
        if self.listening.swap(false, Ordering::AcqRel) {
            crate::debug!("Keyword spotter stopped");
        }
    }

    /// Stop and permanently free the engine. Safe to call multiple times.
    pub fn release(&self) {
        self.stop();
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Ok(mut engine) = self.engine.lock() {
            engine.release();
        }
        crate::debug!("Keyword spotter released");
    }

    /// Whether the spotter is currently listening
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    fn lock_engine(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, Box<dyn SpotterEngine>>, EngineInitError> {
        self.engine
            .lock()
            .map_err(|_| EngineInitError::EngineFailure("engine lock poisoned".to_string()))
    }
}

impl std::fmt::Debug for KeywordSpotter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeywordSpotter")
            .field("keyword_label", &self.config.keyword_label)
            .field("listening", &self.is_listening())
            .finish()
    }
}

#[cfg(test)]
#[path = "spotter_test.rs"]
mod tests;
