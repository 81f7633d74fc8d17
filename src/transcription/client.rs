// Streaming transcription client.
//
// One duplex WebSocket session per connect(). The credential is presented
// as a WebSocket subprotocol during the handshake and never appears in a
// message body or the query string. Outbound audio is fire-and-forget:
// frames offered while the session is not open are counted and dropped.

use super::protocol::parse_listen_message;
use super::{ClientEvent, ConnectionError, StreamConfig, TranscriptTransport};
use crate::audio::AudioFrame;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Inbound events buffered ahead of the orchestrator before send suspends
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Progress log cadence for sent frames
const SENT_LOG_INTERVAL: u64 = 20;

/// WebSocket transcription session.
///
/// Holds at most one open session at a time. A background task owns the
/// read half and feeds the event channel; the write half stays behind a
/// mutex so frame sends and ping replies interleave safely.
pub struct TranscriptionClient {
    config: StreamConfig,
    sink: Arc<Mutex<Option<WsSink>>>,
    connected: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    event_tx: mpsc::Sender<ClientEvent>,
    event_rx: StdMutex<Option<mpsc::Receiver<ClientEvent>>>,
    read_task: Mutex<Option<JoinHandle<()>>>,
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
}

impl TranscriptionClient {
    pub fn new(config: StreamConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            sink: Arc::new(Mutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
            closing: Arc::new(AtomicBool::new(false)),
            event_tx,
            event_rx: StdMutex::new(Some(event_rx)),
            read_task: Mutex::new(None),
            frames_sent: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }

    /// Whether the session is currently open
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Frames accepted by the socket so far
    pub fn sent_frames(&self) -> u64 {
        self.frames_sent.load(Ordering::SeqCst)
    }

    fn handshake_request(&self, url: &Url) -> Result<Request, ConnectionError> {
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|err| ConnectionError::Protocol(format!("endpoint rejected: {err}")))?;

        let subprotocol = format!("token, {}", self.config.api_key);
        let value = HeaderValue::from_str(&subprotocol).map_err(|_| {
            crate::warn!("Transcription credential cannot be carried in the handshake header");
            ConnectionError::Auth
        })?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", value);
        Ok(request)
    }

    fn count_dropped(&self) {
        let dropped = self.frames_dropped.fetch_add(1, Ordering::SeqCst) + 1;
        if dropped == 1 {
            crate::debug!("Dropping audio frames, transcription session is not open");
        }
    }
}

impl std::fmt::Debug for TranscriptionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscriptionClient")
            .field("endpoint", &self.config.endpoint)
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .field("frames_sent", &self.frames_sent.load(Ordering::SeqCst))
            .field("frames_dropped", &self.frames_dropped.load(Ordering::SeqCst))
            .finish()
    }
}

#[async_trait]
impl TranscriptTransport for TranscriptionClient {
    fn subscribe_events(&self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    async fn connect(&self) -> Result<(), ConnectionError> {
        if self.connected.load(Ordering::SeqCst) {
            crate::warn!("Transcription session already open, ignoring connect");
            return Ok(());
        }

        let url = self
            .config
            .url()
            .map_err(|err| ConnectionError::Protocol(format!("invalid endpoint URL: {err}")))?;
        let request = self.handshake_request(&url)?;

        crate::info!(
            "Connecting to transcription service at {}://{}{}",
            url.scheme(),
            url.host_str().unwrap_or("<unknown>"),
            url.path()
        );

        let ws_stream = match tokio::time::timeout(
            self.config.connect_timeout,
            connect_async(request),
        )
        .await
        {
            Ok(Ok((stream, response))) => {
                crate::debug!("Transcription handshake accepted (HTTP {})", response.status());
                stream
            }
            Ok(Err(err)) => return Err(classify_handshake_error(err)),
            Err(_) => {
                crate::error!(
                    "Transcription connection timed out after {:?}",
                    self.config.connect_timeout
                );
                return Err(ConnectionError::Timeout);
            }
        };

        let (sink, source) = ws_stream.split();
        *self.sink.lock().await = Some(sink);
        self.closing.store(false, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(read_loop(
            source,
            Arc::clone(&self.sink),
            Arc::clone(&self.connected),
            Arc::clone(&self.closing),
            self.event_tx.clone(),
        ));
        *self.read_task.lock().await = Some(handle);

        crate::info!("Transcription session open");
        Ok(())
    }

    async fn send_frame(&self, frame: &AudioFrame) {
        if !self.connected.load(Ordering::SeqCst) {
            self.count_dropped();
            return;
        }

        let mut guard = self.sink.lock().await;
        let Some(ws) = guard.as_mut() else {
            drop(guard);
            self.count_dropped();
            return;
        };
        match ws.send(Message::Binary(frame.data.clone().into())).await {
            Ok(()) => {
                let sent = self.frames_sent.fetch_add(1, Ordering::SeqCst) + 1;
                if sent % SENT_LOG_INTERVAL == 0 {
                    crate::debug!("Sent {} audio frames to the transcription service", sent);
                }
            }
            Err(err) => {
                drop(guard);
                self.count_dropped();
                crate::debug!("Audio frame not accepted by the socket: {}", err);
            }
        }
    }

    async fn disconnect(&self) {
        self.closing.store(true, Ordering::SeqCst);
        let was_connected = self.connected.swap(false, Ordering::SeqCst);

        if let Some(mut ws) = self.sink.lock().await.take() {
            if let Err(err) = ws.close().await {
                crate::debug!("Error closing transcription socket: {}", err);
            }
        }
        if let Some(handle) = self.read_task.lock().await.take() {
            handle.abort();
        }
        if was_connected {
            crate::info!("Transcription session closed");
        }
    }

    fn dropped_frames(&self) -> u64 {
        self.frames_dropped.load(Ordering::SeqCst)
    }
}

/// Read half of the session. Parses transcripts, answers pings, and turns
/// an unexpected close into a `SessionEnded` notification. A close that
/// followed a local `disconnect` stays quiet.
async fn read_loop(
    mut source: WsSource,
    sink: Arc<Mutex<Option<WsSink>>>,
    connected: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    event_tx: mpsc::Sender<ClientEvent>,
) {
    let mut reason = "transcription stream ended".to_string();

    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Text(text)) => match parse_listen_message(text.as_str()) {
                Ok(Some(event)) => {
                    if event_tx.send(ClientEvent::Transcript(event)).await.is_err() {
                        crate::debug!("Transcript receiver dropped, stopping read loop");
                        connected.store(false, Ordering::SeqCst);
                        return;
                    }
                }
                Ok(None) => {}
                Err(err) => crate::warn!("Skipping malformed transcription message: {}", err),
            },
            Ok(Message::Ping(payload)) => {
                let mut guard = sink.lock().await;
                if let Some(ws) = guard.as_mut() {
                    if let Err(err) = ws.send(Message::Pong(payload)).await {
                        crate::debug!("Failed to answer ping: {}", err);
                    }
                }
            }
            Ok(Message::Close(frame)) => {
                reason = match frame {
                    Some(frame) => format!("closed by service: {} ({})", frame.reason, frame.code),
                    None => "closed by service".to_string(),
                };
                break;
            }
            Ok(_) => {}
            Err(err) => {
                reason = format!("socket error: {err}");
                break;
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
    if closing.load(Ordering::SeqCst) {
        return;
    }

    crate::warn!("Transcription session ended unexpectedly: {}", reason);
    if event_tx
        .send(ClientEvent::SessionEnded { reason })
        .await
        .is_err()
    {
        crate::debug!("Session-ended notification had no receiver");
    }
}

fn classify_handshake_error(err: WsError) -> ConnectionError {
    match err {
        WsError::Http(response) => {
            let status = response.status();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                crate::error!(
                    "Transcription service rejected the credential (HTTP {})",
                    status
                );
                ConnectionError::Auth
            } else {
                crate::error!("Transcription handshake rejected with HTTP {}", status);
                ConnectionError::Network(format!("handshake rejected with HTTP {status}"))
            }
        }
        other => {
            crate::error!("Transcription connection failed: {}", other);
            ConnectionError::Network(other.to_string())
        }
    }
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
