// Transcription session wiring.
//
// The orchestrator drives the session through the TranscriptTransport
// contract; TranscriptionClient is the production implementation over a
// duplex WebSocket. Stream parameters ride the URL query string, the
// credential rides the handshake, and inbound messages arrive on one
// event channel in wire order.

mod client;
pub mod protocol;

pub use client::TranscriptionClient;
pub use protocol::ProtocolError;

use crate::audio::AudioFrame;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

/// Default streaming endpoint of the transcription service
pub const DEFAULT_LISTEN_ENDPOINT: &str = "wss://api.deepgram.com/v1/listen";

/// One transcript-bearing message from the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEvent {
    /// Recognized text for the current utterance
    pub text: String,
    /// Whether the service has locked this text in (never revised again)
    pub is_final: bool,
}

/// Notifications delivered over the client event channel.
///
/// Transcripts and the end-of-session notification share a single channel
/// so the consumer observes them in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A parsed transcript message
    Transcript(TranscriptEvent),
    /// The session closed without a local `disconnect`
    SessionEnded { reason: String },
}

/// Parameters for one streaming session
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub language: String,
    pub punctuate: bool,
    pub interim_results: bool,
    pub encoding: String,
    pub sample_rate: u32,
    pub connect_timeout: Duration,
}

impl StreamConfig {
    /// Session URL with every stream parameter in the query string.
    ///
    /// The credential never appears here; it is presented during the
    /// connection handshake instead.
    pub fn url(&self) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&self.endpoint)?;
        url.query_pairs_mut()
            .append_pair("model", &self.model)
            .append_pair("language", &self.language)
            .append_pair("punctuate", &self.punctuate.to_string())
            .append_pair("interim_results", &self.interim_results.to_string())
            .append_pair("encoding", &self.encoding)
            .append_pair("sample_rate", &self.sample_rate.to_string());
        Ok(url)
    }
}

/// Errors rejecting `connect`
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConnectionError {
    /// The service refused the credential during the handshake
    #[error("transcription service rejected the credential")]
    Auth,
    /// The handshake did not complete within the configured timeout
    #[error("transcription connection timed out")]
    Timeout,
    /// Transport-level failure before or during the handshake
    #[error("transcription network failure: {0}")]
    Network(String),
    /// The endpoint could not be turned into a session request
    #[error("transcription protocol failure: {0}")]
    Protocol(String),
}

impl ConnectionError {
    /// Stable machine-readable code for consumer-facing reports
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Timeout => "timeout",
            Self::Network(_) => "network",
            Self::Protocol(_) => "protocol",
        }
    }
}

/// Duplex transcription session as the orchestrator sees it.
///
/// `TranscriptionClient` is the production implementation; tests substitute
/// their own to script transcript arrival without a network.
#[async_trait]
pub trait TranscriptTransport: Send + Sync {
    /// Claim the inbound event channel. Yields `Some` exactly once.
    fn subscribe_events(&self) -> Option<mpsc::Receiver<ClientEvent>>;

    /// Open the session. Resolves once the handshake completes.
    async fn connect(&self) -> Result<(), ConnectionError>;

    /// Push one audio frame into the session.
    ///
    /// Fire-and-forget: frames offered while the session is not open are
    /// counted and discarded, never queued.
    async fn send_frame(&self, frame: &AudioFrame);

    /// Close the session. Safe to call repeatedly.
    async fn disconnect(&self);

    /// Frames discarded so far under the fire-and-forget policy
    fn dropped_frames(&self) -> u64;
}
