//! Streaming speech recognition.
//!
//! A [`RecognitionSession`] keeps one websocket to the recognizer alive while
//! the microphone streams into it, and turns the recognizer's messages into a
//! clean [`SpeechEvent`] stream for the turn controller. Echo of our own
//! playback is filtered by the [`EchoGate`], and utterances are stitched
//! together by the [`TurnAssembler`].

pub mod assembler;
pub mod backoff;
pub mod echo_gate;
pub mod protocol;
pub mod session;

pub use assembler::TurnAssembler;
pub use backoff::Backoff;
pub use echo_gate::{EchoGate, Suppression};
pub use protocol::RecognizerMessage;
pub use session::RecognitionSession;

use crate::error::VoiceError;
use crate::platform::EchoPolicy;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum STTError {
    #[error("WebSocket connection failed: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("Invalid header: {0}")]
    Header(#[from] http::header::InvalidHeaderValue),
    #[error("Connection attempt timed out after {0:?}")]
    Timeout(Duration),
    #[error("Response parsing error: {0}")]
    ParseError(String),
}

/// Events delivered to the turn controller, in socket order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    /// The connection dropped and a reconnect cycle started
    Reconnecting,
    /// A reconnect cycle succeeded
    Reconnected,
    /// Reconnect attempts are exhausted; the session has stopped
    Failed,
    /// Voice onset
    SpeechStarted,
    TranscriptPartial(String),
    TranscriptFinal(String),
    /// Utterance boundary with the accumulated final text
    SpeechFinal(String),
}

/// Receiving half of a session's event stream
pub type SpeechEvents = mpsc::UnboundedReceiver<SpeechEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Listening,
    Reconnecting,
    Error,
}

#[derive(Debug, Clone)]
pub struct STTConfig {
    pub base_url: String,
    pub model: String,
    pub language: Option<String>,
    pub sample_rate: u32,
    /// Silence after which the recognizer sends an utterance-end marker
    pub utterance_end_ms: u32,
    pub endpointing_ms: u32,
    pub connect_timeout: Duration,
    pub reconnect_base: Duration,
    pub reconnect_max_delay: Duration,
    pub reconnect_max_attempts: u32,
    /// A connection with no inbound frames for this long is considered dead
    pub stale_after: Duration,
    pub liveness_check_every: Duration,
    pub keepalive_every: Duration,
    /// Bound on the CloseStream handshake when a session stops
    pub close_timeout: Duration,
    pub echo: EchoPolicy,
}

impl Default for STTConfig {
    fn default() -> Self {
        Self {
            base_url: "wss://api.deepgram.com/v1/listen".to_string(),
            model: "nova-2".to_string(),
            language: None,
            sample_rate: 16000,
            utterance_end_ms: 1000,
            endpointing_ms: 300,
            connect_timeout: Duration::from_secs(10),
            reconnect_base: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(16),
            reconnect_max_attempts: 6,
            stale_after: Duration::from_secs(12),
            liveness_check_every: Duration::from_secs(1),
            keepalive_every: Duration::from_secs(5),
            close_timeout: Duration::from_secs(1),
            echo: EchoPolicy::default(),
        }
    }
}

/// The recognition side of a conversation, as seen by the turn controller
#[async_trait::async_trait]
pub trait SpeechSession: Send + Sync {
    /// Acquire the microphone and connect. Idempotent while active.
    async fn start(&self) -> Result<(), VoiceError>;

    /// Tear down capture and transport and return to idle
    async fn stop(&self);

    /// Stop delivering recognized turns (capture keeps running)
    fn mute_mic(&self);

    /// Resume delivery after the grace window
    fn unmute_mic(&self);

    /// The user is talking over playback: drop all suppression now
    fn barge_in(&self);

    /// Release everything; later calls are no-ops
    async fn dispose(&self);
}
