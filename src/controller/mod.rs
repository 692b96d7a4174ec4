//! Turn state machine.
//!
//! One serialized loop owns all controller state. Speech events, user
//! commands and pipeline completions are the only inputs; the reply stream
//! and playback run in spawned tasks that report back through an internal
//! channel tagged with their turn id, so a completion from a turn that was
//! interrupted or stopped is recognised and dropped.

pub mod state;

pub use state::{ErrorInfo, TurnState, VoiceViewState};

use crate::error::VoiceError;
use crate::llm::{Conversation, ReplyStream, INTERRUPTION_MARKER};
use crate::stt::{SpeechEvent, SpeechEvents, SpeechSession};
use crate::tts::SpeechSynthesis;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Toast side channel: `(message, is_error)`
pub type ToastCallback = Arc<dyn Fn(&str, bool) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Command {
    Start,
    Stop,
    Toggle,
    Retry,
    ClearHistory,
    Shutdown,
}

/// Cloneable front door to a running [`TurnController`]
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<VoiceViewState>,
}

impl ControllerHandle {
    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            log::warn!("Controller: {} ignored, controller is gone", command);
        }
    }

    pub fn start(&self) {
        self.send(Command::Start);
    }

    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    pub fn toggle(&self) {
        self.send(Command::Toggle);
    }

    /// Restart after a fatal error
    pub fn retry(&self) {
        self.send(Command::Retry);
    }

    pub fn clear_history(&self) {
        self.send(Command::ClearHistory);
    }

    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    pub fn subscribe(&self) -> watch::Receiver<VoiceViewState> {
        self.state.clone()
    }

    pub fn current(&self) -> VoiceViewState {
        self.state.borrow().clone()
    }
}

enum PipelineEvent {
    ReplyFinished {
        turn: u64,
        result: Result<String, VoiceError>,
    },
    PlaybackFinished {
        turn: u64,
        result: Result<(), VoiceError>,
    },
}

pub struct TurnController {
    session: Arc<dyn SpeechSession>,
    events: SpeechEvents,
    conversation: Box<dyn Conversation>,
    player: Arc<dyn SpeechSynthesis>,
    commands: mpsc::UnboundedReceiver<Command>,
    pipeline_tx: mpsc::UnboundedSender<PipelineEvent>,
    pipeline_rx: mpsc::UnboundedReceiver<PipelineEvent>,
    state_tx: watch::Sender<VoiceViewState>,
    view: VoiceViewState,
    toast: Option<ToastCallback>,
    next_turn: u64,
    /// Turn currently thinking or speaking
    in_flight: Option<u64>,
    /// Turn whose playback holds the mic mute
    muted_turn: Option<u64>,
    reply_task: Option<JoinHandle<()>>,
    /// Fade started by the last barge-in; the next reply waits for it
    fade_task: Option<JoinHandle<()>>,
    recognition_online: bool,
}

impl TurnController {
    pub fn new(
        session: Arc<dyn SpeechSession>,
        events: SpeechEvents,
        conversation: Box<dyn Conversation>,
        player: Arc<dyn SpeechSynthesis>,
    ) -> (Self, ControllerHandle) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (pipeline_tx, pipeline_rx) = mpsc::unbounded_channel();
        let view = VoiceViewState::default();
        let (state_tx, state_rx) = watch::channel(view.clone());

        let controller = Self {
            session,
            events,
            conversation,
            player,
            commands,
            pipeline_tx,
            pipeline_rx,
            state_tx,
            view,
            toast: None,
            next_turn: 0,
            in_flight: None,
            muted_turn: None,
            reply_task: None,
            fade_task: None,
            recognition_online: false,
        };
        let handle = ControllerHandle {
            commands: commands_tx,
            state: state_rx,
        };
        (controller, handle)
    }

    pub fn on_toast(&mut self, callback: ToastCallback) {
        self.toast = Some(callback);
    }

    /// Run until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        log::info!("🎛️ Turn controller running");
        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },

                Some(event) = self.pipeline_rx.recv() => self.handle_pipeline(event).await,

                Some(event) = self.events.recv() => self.handle_speech(event).await,
            }
        }
        self.shutdown().await;
        log::info!("🎛️ Turn controller stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        log::debug!("Controller: Command {} in {}", command, self.view.turn_state);
        match command {
            Command::Start => self.start().await,
            Command::Stop => self.stop().await,
            Command::Toggle => match self.view.turn_state {
                TurnState::Idle => self.start().await,
                TurnState::Error => self.retry().await,
                _ => self.stop().await,
            },
            Command::Retry => self.retry().await,
            Command::ClearHistory => self.conversation.clear_history(),
            Command::Shutdown => {}
        }
    }

    async fn start(&mut self) {
        if self.view.turn_state != TurnState::Idle {
            log::debug!("Controller: Already started ({})", self.view.turn_state);
            return;
        }
        match self.session.start().await {
            Ok(()) => {
                self.recognition_online = true;
                self.view.transcript.clear();
                self.view.error_info = None;
                self.publish(TurnState::Listening);
            }
            Err(e) => {
                log::error!("Controller: Failed to start speech session: {}", e);
                self.enter_error(e).await;
            }
        }
    }

    async fn stop(&mut self) {
        if self.view.turn_state == TurnState::Idle {
            return;
        }
        self.abandon_turn();
        self.player.stop().await;
        self.session.stop().await;
        self.discard_pending_speech();
        self.recognition_online = false;
        self.conversation.clear_history();
        self.view.transcript.clear();
        self.view.error_info = None;
        self.publish(TurnState::Idle);
    }

    async fn retry(&mut self) {
        if self.view.turn_state != TurnState::Error {
            return;
        }
        log::info!("🔁 Retrying after error");
        self.view.error_info = None;
        self.publish(TurnState::Idle);
        self.start().await;
    }

    async fn shutdown(&mut self) {
        self.abandon_turn();
        self.player.dispose().await;
        self.session.dispose().await;
        self.recognition_online = false;
        self.publish(TurnState::Idle);
    }

    /// Forget the current turn so its completions are treated as stale
    fn abandon_turn(&mut self) {
        self.in_flight = None;
        self.muted_turn = None;
        if let Some(task) = self.reply_task.take() {
            task.abort();
        }
        if let Some(fade) = self.fade_task.take() {
            fade.abort();
        }
    }

    /// Events queued by a session that has since stopped belong to no turn
    fn discard_pending_speech(&mut self) {
        let mut discarded = 0;
        while self.events.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            log::debug!("Controller: Discarded {} queued speech events", discarded);
        }
    }

    async fn handle_speech(&mut self, event: SpeechEvent) {
        let state = self.view.turn_state;
        if matches!(state, TurnState::Idle | TurnState::Error) {
            log::debug!("Controller: Ignoring {:?} in {}", event, state);
            return;
        }

        match event {
            SpeechEvent::Reconnecting => {
                self.recognition_online = false;
                if state == TurnState::Listening {
                    self.publish(TurnState::Reconnecting);
                }
            }
            SpeechEvent::Reconnected => {
                if !self.recognition_online {
                    self.recognition_online = true;
                    self.notify("Back online", false);
                }
                if state == TurnState::Reconnecting {
                    self.publish(TurnState::Listening);
                }
            }
            SpeechEvent::Failed => self.enter_error(VoiceError::RecognitionExhausted).await,
            SpeechEvent::SpeechStarted => {
                if state == TurnState::Speaking && self.in_flight.is_some() {
                    self.barge_in();
                }
            }
            SpeechEvent::TranscriptPartial(text) | SpeechEvent::TranscriptFinal(text) => {
                if state == TurnState::Listening {
                    self.view.transcript = text;
                    self.publish(TurnState::Listening);
                }
            }
            SpeechEvent::SpeechFinal(text) => {
                if state == TurnState::Listening && self.in_flight.is_none() {
                    self.begin_turn(text);
                } else {
                    log::debug!("Controller: Dropping utterance in {}: '{}'", state, text);
                }
            }
        }
    }

    fn begin_turn(&mut self, text: String) {
        self.next_turn += 1;
        let turn = self.next_turn;
        self.in_flight = Some(turn);
        log::info!("💬 Turn {}: '{}'", turn, text);

        let stream = self.conversation.submit_turn(&text);
        self.view.transcript = text;
        self.publish(TurnState::Thinking);

        let tx = self.pipeline_tx.clone();
        self.reply_task = Some(tokio::spawn(async move {
            let result = collect_reply(stream).await;
            let _ = tx.send(PipelineEvent::ReplyFinished { turn, result });
        }));
    }

    async fn handle_pipeline(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::ReplyFinished { turn, result } => {
                if self.in_flight != Some(turn) {
                    log::debug!("Controller: Dropping stale reply for turn {}", turn);
                    return;
                }
                self.reply_task = None;
                match result {
                    Ok(reply) if reply.is_empty() => {
                        log::info!("Controller: Empty reply for turn {}, not speaking", turn);
                        self.in_flight = None;
                        self.resume_listening();
                    }
                    Ok(reply) => self.begin_speaking(turn, reply).await,
                    Err(e) => {
                        self.in_flight = None;
                        self.handle_error(e).await;
                    }
                }
            }
            PipelineEvent::PlaybackFinished { turn, result } => {
                // The mute pairs with this playback unless a newer turn owns it
                match self.muted_turn {
                    Some(owner) if owner != turn => {}
                    _ => {
                        self.muted_turn = None;
                        self.session.unmute_mic();
                    }
                }
                if self.in_flight != Some(turn) {
                    log::debug!("Controller: Dropping stale playback for turn {}", turn);
                    return;
                }
                self.in_flight = None;
                match result {
                    Ok(()) => self.resume_listening(),
                    Err(e) => self.handle_error(e).await,
                }
            }
        }
    }

    async fn begin_speaking(&mut self, turn: u64, reply: String) {
        // Let an interrupted reply finish fading before the sink is reused
        if let Some(fade) = self.fade_task.take() {
            if let Err(e) = fade.await {
                log::warn!("Controller: Fade task failed: {}", e);
            }
        }
        self.conversation.complete_turn(&reply);
        self.view.last_response = reply.clone();

        self.session.mute_mic();
        self.muted_turn = Some(turn);
        self.publish(TurnState::Speaking);

        let player = Arc::clone(&self.player);
        let tx = self.pipeline_tx.clone();
        tokio::spawn(async move {
            let result = player.speak(&reply).await;
            let _ = tx.send(PipelineEvent::PlaybackFinished { turn, result });
        });
    }

    /// Cut the reply short and go straight back to listening
    fn barge_in(&mut self) {
        log::info!("🗣️ Barge-in during turn {:?}", self.in_flight);
        let interrupted = format!("{}{}", self.view.last_response, INTERRUPTION_MARKER);
        self.conversation.patch_last_assistant_message(&interrupted);

        let player = Arc::clone(&self.player);
        self.fade_task = Some(tokio::spawn(async move { player.fade_and_stop().await }));
        self.session.barge_in();

        self.in_flight = None;
        self.muted_turn = None;
        self.resume_listening();
    }

    fn resume_listening(&mut self) {
        self.view.transcript.clear();
        if self.recognition_online {
            self.publish(TurnState::Listening);
        } else {
            self.publish(TurnState::Reconnecting);
        }
    }

    async fn handle_error(&mut self, err: VoiceError) {
        if err.is_fatal() {
            self.enter_error(err).await;
        } else {
            log::warn!("Controller: Recoverable error: {}", err);
            self.notify(&err.user_message(), true);
            self.resume_listening();
        }
    }

    /// Stop everything and wait for an explicit retry
    async fn enter_error(&mut self, err: VoiceError) {
        log::error!("❌ {}", err);
        self.abandon_turn();
        self.player.stop().await;
        self.session.stop().await;
        self.discard_pending_speech();
        self.recognition_online = false;

        let info = ErrorInfo::from(&err);
        self.view.status_text = info.message.clone();
        self.view.error_info = Some(info);
        self.view.turn_state = TurnState::Error;
        self.state_tx.send_replace(self.view.clone());
    }

    fn publish(&mut self, state: TurnState) {
        if self.view.turn_state != state {
            log::info!("🔄 {} -> {}", self.view.turn_state, state);
        }
        self.view.turn_state = state;
        self.view.status_text = state.status_text().to_string();
        self.state_tx.send_replace(self.view.clone());
    }

    fn notify(&self, message: &str, is_error: bool) {
        log::info!("📣 Toast: {}", message);
        if let Some(toast) = &self.toast {
            toast(message, is_error);
        }
    }
}

async fn collect_reply(mut stream: ReplyStream) -> Result<String, VoiceError> {
    let mut reply = String::new();
    while let Some(fragment) = stream.next().await {
        reply.push_str(&fragment?);
    }
    Ok(reply.trim().to_string())
}
