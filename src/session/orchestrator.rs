// Session orchestration: microphone capture, wake word detection and
// streaming transcription wired into one gated pipeline.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::audio::{AudioSource, CaptureBackend, CaptureError, CpalBackend};
use crate::config::{ConfigError, SessionConfig, WakeEngineKind};
use crate::events::{
    current_timestamp, EmitterRegistry, EngineFallbackPayload, SessionErrorPayload,
    SessionEventEmitter, SpeechObserver, StateChangedPayload, TranscriptEventEmitter,
    TranscriptUpdatePayload,
};
use crate::session::state::{SessionState, StateError};
use crate::session::transcript::TranscriptLog;
use crate::transcription::{
    ClientEvent, ConnectionError, StreamConfig, TranscriptEvent, TranscriptTransport,
    TranscriptionClient,
};
use crate::wake::{EngineInitError, KeywordHit, KeywordSpotter, SpotterEngine, WakeWordEngine};

type TransportFactory = Box<dyn Fn(StreamConfig) -> Arc<dyn TranscriptTransport> + Send + Sync>;
type EngineFactory = Box<dyn Fn() -> Box<dyn SpotterEngine> + Send + Sync>;

/// Errors surfaced by [`Orchestrator::start`]
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

impl OrchestratorError {
    /// Stable machine-readable code for error reporting
    pub fn reason_code(&self) -> &'static str {
        match self {
            OrchestratorError::Config(_) => "config_invalid",
            OrchestratorError::State(_) => "invalid_state",
            OrchestratorError::Capture(err) => err.reason_code(),
            OrchestratorError::Connection(err) => match err {
                ConnectionError::Auth => "connection_auth",
                ConnectionError::Timeout => "connection_timeout",
                ConnectionError::Network(_) => "connection_network",
                ConnectionError::Protocol(_) => "connection_protocol",
            },
        }
    }
}

/// State shared between the public API and the session event loop.
///
/// Guarded by a plain mutex and never held across an await, so wake and
/// sleep evaluation is atomic with respect to the transition it causes.
struct SessionCore {
    state: SessionState,
    log: TranscriptLog,
    engine: Option<WakeWordEngine>,
    session_id: Uuid,
}

/// Collaborators owned for the duration of one session
#[derive(Default)]
struct SessionResources {
    transport: Option<Arc<dyn TranscriptTransport>>,
    spotter: Option<Arc<KeywordSpotter>>,
    pump_tasks: Vec<JoinHandle<()>>,
    event_task: Option<JoinHandle<()>>,
}

/// Wake-word gated speech session.
///
/// `start()` acquires the microphone, brings up the wake engine and opens
/// the transcription stream, then arms the session. Transcripts are
/// evaluated against the wake and sleep words and forwarded to the
/// registered emitter only while the session is active. `stop()` releases
/// everything in the reverse order and may be called at any time.
///
/// All methods take `&self`; the orchestrator is intended to live behind
/// an `Arc` shared between the UI layer and background tasks.
pub struct Orchestrator<E = EmitterRegistry>
where
    E: SessionEventEmitter + TranscriptEventEmitter + 'static,
{
    config: SessionConfig,
    emitter: Arc<E>,
    audio: Arc<AudioSource>,
    core: Arc<StdMutex<SessionCore>>,
    resources: Arc<TokioMutex<SessionResources>>,
    transport_factory: TransportFactory,
    engine_factory: Option<EngineFactory>,
}

impl Orchestrator {
    /// Build an orchestrator with its own observer registry and the
    /// platform microphone backend.
    pub fn new(config: SessionConfig) -> Result<Self, ConfigError> {
        Self::with_emitter(config, EmitterRegistry::new())
    }

    /// Register an observer on the built-in registry, returning the
    /// total number registered.
    pub fn register_observer(&self, observer: Arc<dyn SpeechObserver>) -> usize {
        self.emitter.register(observer)
    }
}

impl<E> Orchestrator<E>
where
    E: SessionEventEmitter + TranscriptEventEmitter + 'static,
{
    /// Build an orchestrator that reports through the given emitter.
    ///
    /// The configuration is validated here, once; `start()` assumes it
    /// is well formed.
    pub fn with_emitter(config: SessionConfig, emitter: E) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            emitter: Arc::new(emitter),
            audio: Arc::new(AudioSource::new(|| {
                Box::new(CpalBackend::new()) as Box<dyn CaptureBackend>
            })),
            core: Arc::new(StdMutex::new(SessionCore {
                state: SessionState::default(),
                log: TranscriptLog::new(),
                engine: None,
                session_id: Uuid::new_v4(),
            })),
            resources: Arc::new(TokioMutex::new(SessionResources::default())),
            transport_factory: Box::new(|stream| {
                let client: Arc<dyn TranscriptTransport> =
                    Arc::new(TranscriptionClient::new(stream));
                client
            }),
            engine_factory: None,
        })
    }

    /// Replace the microphone backend, for tests and embedders.
    pub fn with_backend_factory<F>(mut self, factory: F) -> Self
    where
        F: FnOnce() -> Box<dyn CaptureBackend> + Send + 'static,
    {
        self.audio = Arc::new(AudioSource::new(factory));
        self
    }

    /// Replace the transcription transport, for tests and embedders.
    /// The factory is invoked once per `start()`.
    pub fn with_transport_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(StreamConfig) -> Arc<dyn TranscriptTransport> + Send + Sync + 'static,
    {
        self.transport_factory = Box::new(factory);
        self
    }

    /// Install a keyword-spotting engine implementation.
    ///
    /// Without one, a configuration that selects the audio wake engine
    /// falls back to transcript matching at start and reports it.
    pub fn with_spotter_engine_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn SpotterEngine> + Send + Sync + 'static,
    {
        self.engine_factory = Some(Box::new(factory));
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.lock_core().state
    }

    pub fn is_listening(&self) -> bool {
        self.state().is_listening()
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Identifier of the current (or most recent) session
    pub fn session_id(&self) -> Uuid {
        self.lock_core().session_id
    }

    /// Copy of the transcript accumulated since the last wake
    pub fn transcript_log(&self) -> TranscriptLog {
        self.lock_core().log.clone()
    }

    /// Start a session and arm it for the wake word.
    ///
    /// Acquires the microphone, brings up the wake engine (falling back
    /// to transcript matching if the keyword spotter cannot), opens the
    /// transcription stream and transitions to `Armed`. On any failure
    /// the partially acquired resources are released in reverse order
    /// and the session returns to `Stopped`.
    pub async fn start(&self) -> Result<(), OrchestratorError> {
        let session_id = {
            let mut core = self.lock_core();
            core.state = core.state.transition_to(SessionState::Initializing)?;
            core.session_id = Uuid::new_v4();
            core.log.clear();
            core.session_id
        };
        crate::info!("Starting speech session {}", session_id);

        let mut resources = self.resources.lock().await;
        if let Some(stale) = resources.event_task.take() {
            stale.abort();
        }
        // A session-ended teardown interrupted by this start may have left
        // collaborators behind; release them before acquiring fresh ones.
        release_resources(&self.audio, &mut resources).await;

        match self.bring_up(&mut resources).await {
            Ok((client_events, hits)) => {
                let armed = {
                    let mut core = self.lock_core();
                    if core.state == SessionState::Initializing {
                        core.state = SessionState::Armed;
                        true
                    } else {
                        false
                    }
                };
                if !armed {
                    // stop() won the race while we were bringing things up
                    self.tear_down(&mut resources).await;
                    crate::info!("Session {} stopped during startup", session_id);
                    return Ok(());
                }
                // Report Armed before the event loop runs so no trigger
                // can emit ahead of it; events queue in the channel.
                self.emit_state(true, false);
                let event_loop = EventLoop {
                    core: Arc::clone(&self.core),
                    resources: Arc::clone(&self.resources),
                    audio: Arc::clone(&self.audio),
                    emitter: Arc::clone(&self.emitter),
                    wake_label: self.config.spotter_keyword_label.clone(),
                    session_id,
                };
                resources.event_task = Some(tokio::spawn(event_loop.run(client_events, hits)));
                drop(resources);
                crate::info!("Session {} armed, watching for the wake word", session_id);
                Ok(())
            }
            Err(err) => {
                self.tear_down(&mut resources).await;
                {
                    let mut core = self.lock_core();
                    if core.state == SessionState::Initializing {
                        core.state = SessionState::Stopped;
                    }
                }
                drop(resources);
                crate::error!("Session {} failed to start: {}", session_id, err);
                self.emit_state(false, false);
                Err(err)
            }
        }
    }

    /// Stop the session and release every resource.
    ///
    /// Idempotent; stopping an already stopped orchestrator does nothing
    /// and emits nothing.
    pub async fn stop(&self) {
        let was_running = {
            let mut core = self.lock_core();
            if core.state == SessionState::Stopped {
                false
            } else {
                core.state = SessionState::Stopped;
                true
            }
        };

        let mut resources = self.resources.lock().await;
        release_resources(&self.audio, &mut resources).await;
        if let Some(task) = resources.event_task.take() {
            task.abort();
            let _ = task.await;
        }
        {
            let mut core = self.lock_core();
            core.engine = None;
        }
        drop(resources);

        if was_running {
            crate::info!("Speech session stopped");
            self.emit_state(false, false);
        } else {
            crate::debug!("stop() with no running session, nothing to release");
        }
    }

    /// Acquire collaborators in order: microphone, wake engine, transport.
    ///
    /// Returns the receivers the session event loop will consume.
    async fn bring_up(
        &self,
        resources: &mut SessionResources,
    ) -> Result<
        (
            mpsc::Receiver<ClientEvent>,
            Option<mpsc::Receiver<KeywordHit>>,
        ),
        OrchestratorError,
    > {
        let device_rate = self.audio.acquire(&self.config.capture)?;
        crate::debug!("Microphone capture running at {} Hz", device_rate);

        let mut hits = None;
        let engine = match self.config.wake_engine_kind() {
            WakeEngineKind::TextOnly => WakeWordEngine::text(
                self.config.wake_word.as_deref(),
                self.config.sleep_word.as_deref(),
            ),
            WakeEngineKind::AudioSpotter => match self.bring_up_spotter(resources) {
                Ok((spotter, hit_rx)) => {
                    hits = Some(hit_rx);
                    WakeWordEngine::spotter(spotter, self.config.sleep_word.as_deref())
                }
                Err(err) => {
                    self.report_engine_fallback(&err);
                    WakeWordEngine::text(
                        self.config.wake_word.as_deref(),
                        self.config.sleep_word.as_deref(),
                    )
                }
            },
        };

        let transport = (self.transport_factory)(self.config.stream_config());
        let Some(client_events) = transport.subscribe_events() else {
            return Err(OrchestratorError::Connection(ConnectionError::Protocol(
                "transport event channel already claimed".to_string(),
            )));
        };
        transport.connect().await?;
        resources.transport = Some(Arc::clone(&transport));

        let mut frames = self.audio.subscribe()?;
        let sender = Arc::clone(&transport);
        resources.pump_tasks.push(tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                sender.send_frame(&frame).await;
            }
        }));

        {
            let mut core = self.lock_core();
            core.engine = Some(engine);
        }

        Ok((client_events, hits))
    }

    /// Bring up the keyword spotter and its frame feed.
    ///
    /// Any failure here is non-fatal to the session; the caller falls
    /// back to transcript matching.
    fn bring_up_spotter(
        &self,
        resources: &mut SessionResources,
    ) -> Result<(Arc<KeywordSpotter>, mpsc::Receiver<KeywordHit>), EngineInitError> {
        let Some(factory) = self.engine_factory.as_ref() else {
            return Err(EngineInitError::EngineFailure(
                "no keyword-spotting engine installed".to_string(),
            ));
        };
        let Some(spotter_config) = self.config.spotter_config() else {
            return Err(EngineInitError::EngineFailure(
                "spotter configuration incomplete".to_string(),
            ));
        };

        let spotter = Arc::new(KeywordSpotter::new(spotter_config, factory()));
        if let Err(err) = spotter.initialize() {
            spotter.release();
            return Err(err);
        }
        if let Err(err) = spotter.start() {
            spotter.release();
            return Err(err);
        }
        let Some(hit_rx) = spotter.subscribe_hits() else {
            spotter.release();
            return Err(EngineInitError::EngineFailure(
                "keyword hit channel already claimed".to_string(),
            ));
        };
        let mut frames = match self.audio.subscribe() {
            Ok(frames) => frames,
            Err(err) => {
                spotter.release();
                return Err(EngineInitError::EngineFailure(err.to_string()));
            }
        };

        let feeder = Arc::clone(&spotter);
        resources.pump_tasks.push(tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                feeder.feed(&frame);
            }
        }));
        resources.spotter = Some(Arc::clone(&spotter));
        Ok((spotter, hit_rx))
    }

    /// Release everything and clear the wake engine, keeping whatever
    /// state the caller already settled.
    async fn tear_down(&self, resources: &mut SessionResources) {
        release_resources(&self.audio, resources).await;
        if let Some(task) = resources.event_task.take() {
            task.abort();
        }
        let mut core = self.lock_core();
        core.engine = None;
    }

    fn report_engine_fallback(&self, err: &EngineInitError) {
        crate::warn!(
            "Keyword spotter unavailable, falling back to transcript matching: {}",
            err
        );
        self.emitter.emit_engine_fallback(EngineFallbackPayload {
            code: err.reason_code().to_string(),
            reason: err.to_string(),
            timestamp: current_timestamp(),
        });
    }

    fn emit_state(&self, is_listening: bool, is_active: bool) {
        self.emitter.emit_state_changed(StateChangedPayload {
            is_listening,
            is_active,
            timestamp: current_timestamp(),
        });
    }

    fn lock_core(&self) -> std::sync::MutexGuard<'_, SessionCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E> std::fmt::Debug for Orchestrator<E>
where
    E: SessionEventEmitter + TranscriptEventEmitter + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.state())
            .field("session_id", &self.session_id())
            .finish()
    }
}

impl<E> Drop for Orchestrator<E>
where
    E: SessionEventEmitter + TranscriptEventEmitter + 'static,
{
    fn drop(&mut self) {
        // Best effort when the owner skipped stop(); the transport socket
        // closes when its last handle drops.
        if let Ok(mut resources) = self.resources.try_lock() {
            if let Some(task) = resources.event_task.take() {
                task.abort();
            }
            for task in resources.pump_tasks.drain(..) {
                task.abort();
            }
            if let Some(spotter) = resources.spotter.take() {
                spotter.release();
            }
            resources.transport.take();
        }
        self.audio.release();
    }
}

/// Release held collaborators in the reverse of acquisition order:
/// transport, spotter, microphone.
async fn release_resources(audio: &AudioSource, resources: &mut SessionResources) {
    for task in resources.pump_tasks.drain(..) {
        task.abort();
    }
    if let Some(transport) = resources.transport.take() {
        transport.disconnect().await;
    }
    if let Some(spotter) = resources.spotter.take() {
        spotter.release();
    }
    audio.release();
}

/// Per-session task that serializes every trigger source: transcription
/// events from the transport and keyword hits from the spotter.
struct EventLoop<E>
where
    E: SessionEventEmitter + TranscriptEventEmitter + 'static,
{
    core: Arc<StdMutex<SessionCore>>,
    resources: Arc<TokioMutex<SessionResources>>,
    audio: Arc<AudioSource>,
    emitter: Arc<E>,
    wake_label: String,
    session_id: Uuid,
}

impl<E> EventLoop<E>
where
    E: SessionEventEmitter + TranscriptEventEmitter + 'static,
{
    async fn run(
        self,
        mut client_events: mpsc::Receiver<ClientEvent>,
        mut hits: Option<mpsc::Receiver<KeywordHit>>,
    ) {
        loop {
            tokio::select! {
                event = client_events.recv() => match event {
                    Some(ClientEvent::Transcript(transcript)) => {
                        self.handle_transcript(transcript);
                    }
                    Some(ClientEvent::SessionEnded { reason }) => {
                        self.handle_session_ended(reason).await;
                        return;
                    }
                    None => {
                        crate::debug!("Transcription event channel closed");
                        return;
                    }
                },
                hit = recv_or_pending(&mut hits) => match hit {
                    Some(hit) => self.handle_hit(hit),
                    None => hits = None,
                },
            }
        }
    }

    /// Evaluate one transcript against the session gate.
    ///
    /// While armed only the wake word matters; an activating transcript
    /// falls through and is delivered, since the wake phrase is usually
    /// the start of the command. While active the sleep word is checked
    /// first so the closing phrase itself is never forwarded.
    fn handle_transcript(&self, event: TranscriptEvent) {
        let mut changes: Vec<(bool, bool)> = Vec::new();
        let mut deliver = false;
        {
            let mut core = self.lock_core();
            if core.state == SessionState::Armed {
                let woke = core
                    .engine
                    .as_ref()
                    .map(|engine| engine.detect_wake(&event.text))
                    .unwrap_or(false);
                if woke {
                    core.state = SessionState::Active;
                    core.log.clear();
                    changes.push((true, true));
                    crate::info!("Wake word detected, forwarding transcripts");
                }
            }
            if core.state == SessionState::Active {
                let slept = core
                    .engine
                    .as_ref()
                    .map(|engine| engine.detect_sleep(&event.text))
                    .unwrap_or(false);
                if slept {
                    core.state = SessionState::Armed;
                    changes.push((true, false));
                    crate::info!("Sleep word detected, suppressing transcripts");
                } else {
                    if event.is_final {
                        core.log.push_final(&event.text);
                    } else {
                        core.log.set_interim(&event.text);
                    }
                    deliver = true;
                }
            }
        }
        for (is_listening, is_active) in changes {
            self.emit_state(is_listening, is_active);
        }
        if deliver {
            self.emitter.emit_transcript_update(TranscriptUpdatePayload {
                text: event.text,
                is_final: event.is_final,
                timestamp: current_timestamp(),
            });
        }
    }

    /// An audio-native wake hit activates the session from `Armed` only.
    fn handle_hit(&self, hit: KeywordHit) {
        if hit.label != self.wake_label {
            crate::debug!("Ignoring keyword hit for label {:?}", hit.label);
            return;
        }
        let activated = {
            let mut core = self.lock_core();
            if core.state == SessionState::Armed {
                core.state = SessionState::Active;
                core.log.clear();
                true
            } else {
                crate::trace!("Keyword hit while {}, ignored", core.state);
                false
            }
        };
        if activated {
            crate::info!("Wake keyword spotted, forwarding transcripts");
            self.emit_state(true, true);
        }
    }

    /// The service closed the stream on its own. Stop everything and
    /// report; the session is not restarted automatically.
    async fn handle_session_ended(&self, reason: String) {
        let was_running = {
            let mut core = self.lock_core();
            if core.state == SessionState::Stopped {
                false
            } else {
                core.state = SessionState::Stopped;
                core.engine = None;
                true
            }
        };
        if !was_running {
            return;
        }
        crate::warn!(
            "Session {} ended by the transcription service: {}",
            self.session_id,
            reason
        );
        {
            let mut resources = self.resources.lock().await;
            release_resources(&self.audio, &mut resources).await;
        }
        self.emitter.emit_session_error(SessionErrorPayload {
            code: "session_ended".to_string(),
            message: reason,
            session_id: self.session_id.to_string(),
            timestamp: current_timestamp(),
        });
        self.emit_state(false, false);
    }

    fn emit_state(&self, is_listening: bool, is_active: bool) {
        self.emitter.emit_state_changed(StateChangedPayload {
            is_listening,
            is_active,
            timestamp: current_timestamp(),
        });
    }

    fn lock_core(&self) -> std::sync::MutexGuard<'_, SessionCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn recv_or_pending(hits: &mut Option<mpsc::Receiver<KeywordHit>>) -> Option<KeywordHit> {
    match hits {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "orchestrator_test.rs"]
mod tests;
