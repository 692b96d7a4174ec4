use super::assembler::TurnAssembler;
use super::backoff::Backoff;
use super::echo_gate::EchoGate;
use super::protocol::{self, RecognizerMessage};
use super::{ConnectionState, STTConfig, STTError, SpeechEvent, SpeechEvents, SpeechSession};
use crate::audio_capture::{MicStream, Microphone};
use crate::error::VoiceError;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Frames waiting for the socket writer; audio beyond this is dropped
const OUTBOUND_QUEUE: usize = 32;

/// State shared between the public handle and the connection supervisor
struct Shared {
    config: STTConfig,
    api_key: String,
    gate: Mutex<EchoGate>,
    state: Mutex<ConnectionState>,
    events: mpsc::UnboundedSender<SpeechEvent>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.lock();
        if *current != state {
            log::debug!("STT: Connection {} -> {}", *current, state);
            *current = state;
        }
    }

    /// Events from a cancelled supervisor are dropped
    fn emit(&self, cancel: &CancellationToken, event: SpeechEvent) {
        if cancel.is_cancelled() {
            return;
        }
        if self.events.send(event).is_err() {
            log::debug!("STT: Event receiver dropped");
        }
    }
}

struct Active {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Streaming recognition session with reconnect and echo suppression
pub struct RecognitionSession {
    shared: Arc<Shared>,
    microphone: Arc<dyn Microphone>,
    active: tokio::sync::Mutex<Option<Active>>,
    disposed: AtomicBool,
}

impl RecognitionSession {
    pub fn new(
        config: STTConfig,
        api_key: String,
        microphone: Arc<dyn Microphone>,
    ) -> (Self, SpeechEvents) {
        let (events, rx) = mpsc::unbounded_channel();
        let gate = EchoGate::new(config.echo);
        let session = Self {
            shared: Arc::new(Shared {
                config,
                api_key,
                gate: Mutex::new(gate),
                state: Mutex::new(ConnectionState::Idle),
                events,
            }),
            microphone,
            active: tokio::sync::Mutex::new(None),
            disposed: AtomicBool::new(false),
        };
        (session, rx)
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    async fn shutdown_active(&self) {
        let active = self.active.lock().await.take();
        if let Some(active) = active {
            active.cancel.cancel();
            if let Err(e) = active.task.await {
                if !e.is_cancelled() {
                    log::error!("STT: Supervisor task failed: {}", e);
                }
            }
        }
        self.shared.gate.lock().reset();
        self.shared.set_state(ConnectionState::Idle);
    }
}

#[async_trait::async_trait]
impl SpeechSession for RecognitionSession {
    async fn start(&self) -> Result<(), VoiceError> {
        if self.disposed.load(Ordering::Acquire) {
            return Ok(());
        }

        let mut active = self.active.lock().await;
        if active.as_ref().is_some_and(|a| !a.task.is_finished()) {
            log::debug!("STT: Session already running");
            return Ok(());
        }

        let mic = self
            .microphone
            .open()
            .map_err(|e| VoiceError::MicrophoneUnavailable(e.to_string()))?;

        self.shared.gate.lock().reset();
        self.shared.set_state(ConnectionState::Connecting);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervise(
            Arc::clone(&self.shared),
            mic,
            cancel.clone(),
        ));
        *active = Some(Active { cancel, task });
        log::info!("👂 Speech session started");
        Ok(())
    }

    async fn stop(&self) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        self.shutdown_active().await;
        log::info!("🛑 Speech session stopped");
    }

    fn mute_mic(&self) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        self.shared.gate.lock().mute(Instant::now());
        log::debug!("STT: Mic muted");
    }

    fn unmute_mic(&self) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        self.shared.gate.lock().unmute(Instant::now());
        log::debug!("STT: Mic unmute requested");
    }

    fn barge_in(&self) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        self.shared.gate.lock().barge_in();
        log::info!("🗣️ Barge-in: suppression cleared");
    }

    async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown_active().await;
        log::debug!("STT: Session disposed");
    }
}

/// Why a live connection ended
#[derive(Debug)]
enum ConnectionEnd {
    Cancelled,
    Lost(String),
    MicClosed,
}

/// Reconnect bookkeeping shared by every connection of one supervisor
struct ReconnectCycle {
    backoff: Backoff,
    reconnecting: bool,
}

impl ReconnectCycle {
    /// The recognizer is answering again. Only now does the attempt budget
    /// refill, so a server that accepts and immediately drops still runs out.
    fn recovered(&mut self, shared: &Shared, cancel: &CancellationToken) {
        self.backoff.reset();
        if self.reconnecting {
            self.reconnecting = false;
            log::info!("🔌 STT: Reconnected");
            shared.emit(cancel, SpeechEvent::Reconnected);
        }
    }
}

/// Owns the one connection of a session and runs every reconnect cycle.
///
/// Being a single sequential loop is what guarantees there is never more than
/// one connection attempt or reconnect cycle in flight.
async fn supervise(shared: Arc<Shared>, mut mic: MicStream, cancel: CancellationToken) {
    let mut cycle = ReconnectCycle {
        backoff: Backoff::from_config(&shared.config),
        reconnecting: false,
    };
    let mut assembler = TurnAssembler::new();

    loop {
        let attempt = tokio::select! {
            _ = cancel.cancelled() => return,
            result = time::timeout(shared.config.connect_timeout, connect(&shared)) => {
                result.unwrap_or(Err(STTError::Timeout(shared.config.connect_timeout)))
            }
        };

        match attempt {
            Ok(socket) => {
                assembler.clear();
                shared.set_state(ConnectionState::Listening);
                log::info!("🔌 STT: Connected");

                let end = run_connection(&shared, socket, &mut mic, &mut assembler, &mut cycle, &cancel)
                    .await;
                match end {
                    ConnectionEnd::Cancelled => return,
                    ConnectionEnd::MicClosed => {
                        log::error!("STT: Microphone stream ended");
                        shared.set_state(ConnectionState::Error);
                        shared.emit(&cancel, SpeechEvent::Failed);
                        return;
                    }
                    ConnectionEnd::Lost(reason) => {
                        log::warn!("STT: Connection lost: {}", reason);
                    }
                }
            }
            Err(e) => log::warn!("STT: Connection attempt failed: {}", e),
        }

        if cancel.is_cancelled() {
            return;
        }
        if !cycle.reconnecting {
            cycle.reconnecting = true;
            shared.set_state(ConnectionState::Reconnecting);
            shared.emit(&cancel, SpeechEvent::Reconnecting);
        }

        match cycle.backoff.next_delay() {
            Some(delay) => {
                log::info!(
                    "🔄 STT: Reconnect attempt {} in {:?}",
                    cycle.backoff.attempts(),
                    delay
                );
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = time::sleep(delay) => {}
                }
            }
            None => {
                log::error!(
                    "STT: Giving up after {} reconnect attempts",
                    cycle.backoff.attempts()
                );
                shared.set_state(ConnectionState::Error);
                shared.emit(&cancel, SpeechEvent::Failed);
                return;
            }
        }
    }
}

async fn connect(shared: &Shared) -> Result<Socket, STTError> {
    let url = protocol::listen_url(&shared.config)?;
    let mut request = url.as_str().into_client_request()?;
    request.headers_mut().insert(
        http::header::AUTHORIZATION,
        http::HeaderValue::from_str(&format!("Token {}", shared.api_key))?,
    );

    log::debug!("STT: Connecting to {}", shared.config.base_url);
    let (socket, _) = connect_async(request).await?;
    Ok(socket)
}

/// Drains queued frames into the socket so a stalled peer never blocks the
/// read side or the liveness checks
async fn write_frames(
    mut write: SplitSink<Socket, Message>,
    mut frames: mpsc::Receiver<Message>,
) -> Result<(), WsError> {
    while let Some(frame) = frames.recv().await {
        write.send(frame).await?;
    }
    write.close().await
}

async fn run_connection(
    shared: &Shared,
    socket: Socket,
    mic: &mut MicStream,
    assembler: &mut TurnAssembler,
    cycle: &mut ReconnectCycle,
    cancel: &CancellationToken,
) -> ConnectionEnd {
    let (write, mut read) = socket.split();
    let (outbound, frames) = mpsc::channel::<Message>(OUTBOUND_QUEUE);
    let mut writer = tokio::spawn(write_frames(write, frames));

    let mut liveness = time::interval(shared.config.liveness_check_every);
    let mut last_inbound = Instant::now();
    let mut last_outbound = Instant::now();
    let mut answered = false;
    let mut chunk_count: u64 = 0;
    let mut dropped: u64 = 0;

    let end = loop {
        tokio::select! {
            _ = cancel.cancelled() => break ConnectionEnd::Cancelled,

            result = &mut writer => {
                break ConnectionEnd::Lost(match result {
                    Ok(Ok(())) => "writer closed".to_string(),
                    Ok(Err(e)) => format!("send failed: {}", e),
                    Err(e) => format!("writer task failed: {}", e),
                });
            }

            chunk = mic.next() => {
                let Some(chunk) = chunk else {
                    break ConnectionEnd::MicClosed;
                };
                chunk_count += 1;
                match outbound.try_send(Message::Binary(chunk.to_pcm_bytes().into())) {
                    Ok(()) => last_outbound = Instant::now(),
                    Err(TrySendError::Full(_)) => {
                        dropped += 1;
                        log::trace!("STT: Socket backed up, dropped chunk {} ({} total)", chunk_count, dropped);
                    }
                    Err(TrySendError::Closed(_)) => {
                        break ConnectionEnd::Lost("writer gone".to_string());
                    }
                }
            }

            msg = read.next() => {
                last_inbound = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if !answered {
                            answered = true;
                            cycle.recovered(shared, cancel);
                        }
                        handle_text(shared, text.as_str(), assembler, cancel);
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break ConnectionEnd::Lost(format!("server closed connection: {:?}", frame));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break ConnectionEnd::Lost(e.to_string()),
                    None => break ConnectionEnd::Lost("stream ended".to_string()),
                }
            }

            _ = liveness.tick() => {
                if last_inbound.elapsed() > shared.config.stale_after {
                    break ConnectionEnd::Lost(format!(
                        "no messages for {:?}",
                        last_inbound.elapsed()
                    ));
                }
                if last_outbound.elapsed() >= shared.config.keepalive_every {
                    match outbound.try_send(Message::Text(protocol::keepalive().into())) {
                        Ok(()) => last_outbound = Instant::now(),
                        Err(TrySendError::Full(_)) => {}
                        Err(TrySendError::Closed(_)) => {
                            break ConnectionEnd::Lost("writer gone".to_string());
                        }
                    }
                }
            }
        }
    };

    if let ConnectionEnd::Cancelled = end {
        // Best effort: ask the recognizer to finish, then let the writer close
        let _ = outbound.try_send(Message::Text(protocol::close_stream().into()));
        drop(outbound);
        if time::timeout(shared.config.close_timeout, &mut writer).await.is_err() {
            log::warn!("STT: Close did not complete within {:?}", shared.config.close_timeout);
        }
    }
    writer.abort();
    end
}

fn handle_text(
    shared: &Shared,
    text: &str,
    assembler: &mut TurnAssembler,
    cancel: &CancellationToken,
) {
    let message = match protocol::parse_message(text) {
        Ok(message) => message,
        Err(e) => {
            log::warn!("STT: Failed to parse message: {}", e);
            return;
        }
    };
    if let RecognizerMessage::Transcript { text, is_final, .. } = &message {
        if !text.is_empty() {
            log::debug!("STT: {} '{}'", if *is_final { "final" } else { "partial" }, text);
        }
    }

    let events = {
        let gate = shared.gate.lock();
        assembler.handle(message, &gate, Instant::now())
    };
    for event in events {
        shared.emit(cancel, event);
    }
}
