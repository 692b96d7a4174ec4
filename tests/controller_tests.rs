//! # Turn Controller Scenario Tests
//!
//! Drives the controller with scripted speech events, a scripted chat backend
//! and a gated player, and checks the published view state and the order of
//! calls into the session and player.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use voice_duplex::{
    controller::{ControllerHandle, TurnController, TurnState, VoiceViewState},
    error::{ErrorKind, Service, VoiceError},
    llm::{
        ChatBackend, ConversationContext, ConversationWindow, LLMError, Message, ReplyStream,
        Role, INTERRUPTION_MARKER,
    },
    stt::{SpeechEvent, SpeechSession},
    tts::SpeechSynthesis,
};

type CallLog = Arc<Mutex<Vec<String>>>;

struct FakeSession {
    log: CallLog,
    start_error: Mutex<Option<VoiceError>>,
}

#[async_trait::async_trait]
impl SpeechSession for FakeSession {
    async fn start(&self) -> Result<(), VoiceError> {
        self.log.lock().push("start".into());
        match self.start_error.lock().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn stop(&self) {
        self.log.lock().push("session_stop".into());
    }

    fn mute_mic(&self) {
        self.log.lock().push("mute".into());
    }

    fn unmute_mic(&self) {
        self.log.lock().push("unmute".into());
    }

    fn barge_in(&self) {
        self.log.lock().push("barge_in".into());
    }

    async fn dispose(&self) {
        self.log.lock().push("dispose".into());
    }
}

/// Replies are handed out in order; each one waits for a permit
#[derive(Clone)]
struct FakeBackend {
    requests: Arc<Mutex<Vec<Vec<Message>>>>,
    replies: Arc<Mutex<VecDeque<Vec<Result<String, LLMError>>>>>,
    gate: Arc<Semaphore>,
}

impl FakeBackend {
    fn new(replies: Vec<Vec<Result<String, LLMError>>>) -> Self {
        Self {
            requests: Arc::default(),
            replies: Arc::new(Mutex::new(replies.into())),
            gate: Arc::new(Semaphore::new(0)),
        }
    }

    fn release(&self) {
        self.gate.add_permits(1);
    }
}

impl ChatBackend for FakeBackend {
    fn stream_completion(&self, messages: Vec<Message>) -> ReplyStream {
        self.requests.lock().push(messages);
        let reply = self.replies.lock().pop_front().unwrap_or_default();
        let gate = Arc::clone(&self.gate);
        Box::pin(async_stream::stream! {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
            for fragment in reply {
                yield fragment;
            }
        })
    }
}

/// `speak` blocks until finished, faded or stopped
struct FakePlayer {
    log: CallLog,
    gate: Semaphore,
    fail: Mutex<Option<VoiceError>>,
    fade_time: Mutex<Duration>,
}

impl FakePlayer {
    fn finish(&self) {
        self.gate.add_permits(1);
    }
}

#[async_trait::async_trait]
impl SpeechSynthesis for FakePlayer {
    async fn speak(&self, text: &str) -> Result<(), VoiceError> {
        self.log.lock().push(format!("speak:{}", text));
        let failure = self.fail.lock().take();
        if let Some(e) = failure {
            return Err(e);
        }
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
        Ok(())
    }

    async fn stop(&self) {
        self.log.lock().push("player_stop".into());
        self.gate.add_permits(1);
    }

    async fn fade_and_stop(&self) {
        self.log.lock().push("fade".into());
        let fade_time = *self.fade_time.lock();
        tokio::time::sleep(fade_time).await;
        self.log.lock().push("fade_done".into());
        self.gate.add_permits(1);
    }

    async fn dispose(&self) {
        self.log.lock().push("player_dispose".into());
    }
}

struct Harness {
    handle: ControllerHandle,
    view: watch::Receiver<VoiceViewState>,
    speech: mpsc::UnboundedSender<SpeechEvent>,
    log: CallLog,
    backend: FakeBackend,
    player: Arc<FakePlayer>,
    toasts: Arc<Mutex<Vec<(String, bool)>>>,
    task: JoinHandle<()>,
}

impl Harness {
    fn new(replies: Vec<Vec<Result<String, LLMError>>>) -> Self {
        Self::build(replies, None, None)
    }

    fn build(
        replies: Vec<Vec<Result<String, LLMError>>>,
        start_error: Option<VoiceError>,
        speak_error: Option<VoiceError>,
    ) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let log: CallLog = Arc::default();
        let session = Arc::new(FakeSession {
            log: Arc::clone(&log),
            start_error: Mutex::new(start_error),
        });
        let backend = FakeBackend::new(replies);
        let conversation =
            ConversationContext::new(backend.clone(), ConversationWindow::new(20, 2));
        let player = Arc::new(FakePlayer {
            log: Arc::clone(&log),
            gate: Semaphore::new(0),
            fail: Mutex::new(speak_error),
            fade_time: Mutex::new(Duration::ZERO),
        });
        let (speech, events) = mpsc::unbounded_channel();

        let (mut controller, handle) =
            TurnController::new(session, events, Box::new(conversation), player.clone());
        let toasts: Arc<Mutex<Vec<(String, bool)>>> = Arc::default();
        let sink = Arc::clone(&toasts);
        controller.on_toast(Arc::new(move |message: &str, is_error: bool| {
            sink.lock().push((message.to_string(), is_error));
        }));
        let task = tokio::spawn(controller.run());

        Self {
            view: handle.subscribe(),
            handle,
            speech,
            log,
            backend,
            player,
            toasts,
            task,
        }
    }

    fn say(&self, event: SpeechEvent) {
        self.speech.send(event).unwrap();
    }

    async fn wait_for(&mut self, mut pred: impl FnMut(&VoiceViewState) -> bool) -> VoiceViewState {
        let state = timeout(Duration::from_secs(2), self.view.wait_for(|v| pred(v)))
            .await
            .expect("timed out waiting for view state")
            .expect("controller dropped the view");
        state.clone()
    }

    async fn wait_for_state(&mut self, turn_state: TurnState) -> VoiceViewState {
        self.wait_for(|v| v.turn_state == turn_state).await
    }

    async fn wait_for_log(&self, entry: &str) {
        timeout(Duration::from_secs(2), async {
            while !self.log.lock().iter().any(|e| e == entry) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for call");
    }

    /// Round-trip a partial to make sure earlier events were handled
    async fn sync(&mut self, marker: &str) {
        self.say(SpeechEvent::TranscriptPartial(marker.to_string()));
        self.wait_for(|v| v.transcript == marker).await;
    }

    fn calls(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    async fn shutdown(self) {
        self.handle.shutdown();
        timeout(Duration::from_secs(2), self.task)
            .await
            .expect("controller did not shut down")
            .unwrap();
    }
}

fn reply(fragments: &[&str]) -> Vec<Result<String, LLMError>> {
    fragments.iter().map(|f| Ok(f.to_string())).collect()
}

#[tokio::test]
async fn test_happy_path_turn() {
    let mut h = Harness::new(vec![reply(&["It's ", "noon."]), reply(&["Sunny."])]);

    h.handle.start();
    h.wait_for_state(TurnState::Listening).await;

    h.say(SpeechEvent::TranscriptPartial("what ti".into()));
    h.wait_for(|v| v.transcript == "what ti").await;

    h.say(SpeechEvent::SpeechFinal("what time is it".into()));
    let thinking = h.wait_for_state(TurnState::Thinking).await;
    assert_eq!(thinking.transcript, "what time is it");

    h.backend.release();
    let speaking = h.wait_for_state(TurnState::Speaking).await;
    assert_eq!(speaking.last_response, "It's noon.");
    assert!(h.calls().contains(&"mute".to_string()));

    h.player.finish();
    h.wait_for_state(TurnState::Listening).await;
    h.wait_for_log("unmute").await;
    assert_eq!(
        h.calls(),
        vec!["start", "mute", "speak:It's noon.", "unmute"]
    );

    // Second turn sees the first exchange
    h.say(SpeechEvent::SpeechFinal("and tomorrow?".into()));
    h.backend.release();
    h.wait_for_state(TurnState::Speaking).await;
    {
        let requests = h.backend.requests.lock();
        let second = &requests[1];
        assert_eq!(second[0].role, Role::System);
        assert_eq!(
            &second[1..],
            &[
                Message::user("what time is it"),
                Message::assistant("It's noon."),
                Message::user("and tomorrow?"),
            ]
        );
    }

    h.player.finish();
    h.wait_for_state(TurnState::Listening).await;
    h.shutdown().await;
}

#[tokio::test]
async fn test_partials_only_shown_while_listening() {
    let mut h = Harness::new(vec![reply(&["Sure."])]);
    h.handle.start();
    h.wait_for_state(TurnState::Listening).await;

    h.say(SpeechEvent::SpeechFinal("hello".into()));
    h.wait_for_state(TurnState::Thinking).await;
    h.say(SpeechEvent::TranscriptPartial("echo".into()));
    // A second utterance while thinking is not a new turn
    h.say(SpeechEvent::SpeechFinal("ignored".into()));

    h.backend.release();
    let speaking = h.wait_for_state(TurnState::Speaking).await;
    assert_eq!(speaking.transcript, "hello");
    assert_eq!(h.backend.requests.lock().len(), 1);

    h.player.finish();
    h.wait_for_state(TurnState::Listening).await;
    h.shutdown().await;
}

#[tokio::test]
async fn test_barge_in_interrupts_and_patches_history() {
    let mut h = Harness::new(vec![
        reply(&["Once upon ", "a time"]),
        reply(&["Dragons!"]),
    ]);
    h.handle.start();
    h.wait_for_state(TurnState::Listening).await;

    h.say(SpeechEvent::SpeechFinal("tell me a story".into()));
    h.backend.release();
    h.wait_for_state(TurnState::Speaking).await;

    h.say(SpeechEvent::SpeechStarted);
    let listening = h.wait_for_state(TurnState::Listening).await;
    assert_eq!(listening.last_response, "Once upon a time");
    h.wait_for_log("fade").await;
    assert!(h.calls().contains(&"barge_in".to_string()));

    h.say(SpeechEvent::SpeechFinal("about dragons".into()));
    h.backend.release();
    h.wait_for_state(TurnState::Speaking).await;
    {
        let requests = h.backend.requests.lock();
        let patched = format!("Once upon a time{}", INTERRUPTION_MARKER);
        assert!(requests[1].contains(&Message::assistant(patched)));
        assert_eq!(requests[1].last(), Some(&Message::user("about dragons")));
    }

    h.player.finish();
    h.wait_for_state(TurnState::Listening).await;
    h.shutdown().await;
}

#[tokio::test]
async fn test_next_reply_waits_for_fade_to_finish() {
    let mut h = Harness::new(vec![reply(&["First answer."]), reply(&["Second answer."])]);
    *h.player.fade_time.lock() = Duration::from_millis(200);
    h.handle.start();
    h.wait_for_state(TurnState::Listening).await;

    h.say(SpeechEvent::SpeechFinal("first".into()));
    h.backend.release();
    h.wait_for_state(TurnState::Speaking).await;

    h.say(SpeechEvent::SpeechStarted);
    h.wait_for_state(TurnState::Listening).await;
    h.say(SpeechEvent::SpeechFinal("second".into()));
    h.backend.release();
    h.wait_for_log("speak:Second answer.").await;

    let calls = h.calls();
    let position = |entry: &str| calls.iter().position(|c| c == entry).unwrap();
    assert!(position("fade_done") < position("speak:Second answer."));

    h.player.finish();
    h.wait_for_state(TurnState::Listening).await;
    h.shutdown().await;
}

#[tokio::test]
async fn test_voice_onset_outside_speaking_is_ignored() {
    let mut h = Harness::new(vec![]);
    h.handle.start();
    h.wait_for_state(TurnState::Listening).await;

    h.say(SpeechEvent::SpeechStarted);
    h.sync("still here").await;
    assert!(!h.calls().contains(&"barge_in".to_string()));
    h.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_toasts_back_online_once() {
    let mut h = Harness::new(vec![]);
    h.handle.start();
    h.wait_for_state(TurnState::Listening).await;

    h.say(SpeechEvent::Reconnecting);
    h.wait_for_state(TurnState::Reconnecting).await;

    h.say(SpeechEvent::Reconnected);
    h.wait_for_state(TurnState::Listening).await;
    h.say(SpeechEvent::Reconnected);
    h.sync("after").await;

    assert_eq!(
        h.toasts.lock().clone(),
        vec![("Back online".to_string(), false)]
    );
    h.shutdown().await;
}

#[tokio::test]
async fn test_recognition_exhausted_is_fatal_until_retry() {
    let mut h = Harness::new(vec![]);
    h.handle.start();
    h.wait_for_state(TurnState::Listening).await;

    h.say(SpeechEvent::Failed);
    let error = h.wait_for_state(TurnState::Error).await;
    let info = error.error_info.expect("error info");
    assert!(info.fatal);
    assert_eq!(info.kind, ErrorKind::RecognitionExhausted);
    assert!(info.hint.unwrap().contains("settings"));
    assert!(h.calls().contains(&"session_stop".to_string()));

    // Nothing reaches the conversation while in error
    h.say(SpeechEvent::SpeechFinal("hello?".into()));
    tokio::time::sleep(Duration::from_millis(50)).await;

    h.handle.retry();
    let listening = h.wait_for_state(TurnState::Listening).await;
    assert!(listening.error_info.is_none());
    assert_eq!(h.calls().iter().filter(|c| *c == "start").count(), 2);
    assert!(h.backend.requests.lock().is_empty());
    h.shutdown().await;
}

#[tokio::test]
async fn test_synthesis_auth_failure_stops_session() {
    let mut h = Harness::build(
        vec![reply(&["Hello there."])],
        None,
        Some(VoiceError::AuthRejected {
            service: Service::Synthesis,
        }),
    );
    h.handle.start();
    h.wait_for_state(TurnState::Listening).await;

    h.say(SpeechEvent::SpeechFinal("hi".into()));
    h.backend.release();
    let error = h.wait_for_state(TurnState::Error).await;

    let info = error.error_info.expect("error info");
    assert!(info.fatal);
    assert_eq!(info.kind, ErrorKind::AuthRejected);
    assert!(info.hint.unwrap().contains("API keys"));

    let calls = h.calls();
    let unmute = calls.iter().position(|c| c == "unmute").expect("unmute");
    let stop = calls.iter().position(|c| c == "session_stop").expect("stop");
    assert!(unmute < stop);
    h.shutdown().await;
}

#[tokio::test]
async fn test_empty_reply_is_not_spoken() {
    let mut h = Harness::new(vec![reply(&["  ", ""])]);
    h.handle.start();
    h.wait_for_state(TurnState::Listening).await;

    h.say(SpeechEvent::SpeechFinal("hmm".into()));
    h.wait_for_state(TurnState::Thinking).await;
    h.backend.release();
    let listening = h.wait_for_state(TurnState::Listening).await;

    assert_eq!(listening.last_response, "");
    assert!(!h.calls().iter().any(|c| c == "mute" || c.starts_with("speak:")));
    h.shutdown().await;
}

#[tokio::test]
async fn test_transient_reply_error_toasts_and_recovers() {
    let mut h = Harness::new(vec![vec![Err(LLMError::ApiError {
        status: 503,
        message: "over capacity".into(),
    })]]);
    h.handle.start();
    h.wait_for_state(TurnState::Listening).await;

    h.say(SpeechEvent::SpeechFinal("hello".into()));
    h.wait_for_state(TurnState::Thinking).await;
    h.backend.release();
    let listening = h.wait_for_state(TurnState::Listening).await;

    assert!(listening.error_info.is_none());
    let toasts = h.toasts.lock().clone();
    assert_eq!(toasts.len(), 1);
    assert!(toasts[0].1);
    h.shutdown().await;
}

#[tokio::test]
async fn test_microphone_failure_on_start() {
    let mut h = Harness::build(
        vec![],
        Some(VoiceError::MicrophoneUnavailable("permission denied".into())),
        None,
    );
    h.handle.start();
    let error = h.wait_for_state(TurnState::Error).await;

    let info = error.error_info.expect("error info");
    assert_eq!(info.kind, ErrorKind::MicrophoneUnavailable);
    assert!(info.hint.unwrap().contains("microphone"));
    h.shutdown().await;
}

#[tokio::test]
async fn test_stop_while_speaking_returns_to_idle() {
    let mut h = Harness::new(vec![reply(&["A long answer."])]);
    h.handle.start();
    h.wait_for_state(TurnState::Listening).await;

    h.say(SpeechEvent::SpeechFinal("explain".into()));
    h.backend.release();
    h.wait_for_state(TurnState::Speaking).await;

    h.handle.toggle();
    h.wait_for_state(TurnState::Idle).await;
    let calls = h.calls();
    assert!(calls.contains(&"player_stop".to_string()));
    assert!(calls.contains(&"session_stop".to_string()));

    // Speech after stopping is ignored
    h.say(SpeechEvent::SpeechFinal("anyone?".into()));
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.handle.start();
    h.wait_for_state(TurnState::Listening).await;
    h.sync("back").await;
    assert_eq!(h.backend.requests.lock().len(), 1);
    h.shutdown().await;
}

#[tokio::test]
async fn test_utterance_queued_before_stop_is_discarded() {
    let mut h = Harness::new(vec![reply(&["Should not be asked."])]);
    h.handle.start();
    h.wait_for_state(TurnState::Listening).await;

    // The utterance is still queued when stop and start are handled
    h.say(SpeechEvent::SpeechFinal("said before stop".into()));
    h.handle.stop();
    h.handle.start();
    h.wait_for_state(TurnState::Listening).await;
    h.sync("fresh session").await;

    assert!(h.backend.requests.lock().is_empty());
    assert_eq!(h.calls().iter().filter(|c| *c == "start").count(), 2);
    h.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_disposes_collaborators() {
    let mut h = Harness::new(vec![]);
    h.handle.start();
    h.wait_for_state(TurnState::Listening).await;

    let log = Arc::clone(&h.log);
    h.shutdown().await;
    let calls = log.lock().clone();
    assert!(calls.contains(&"dispose".to_string()));
    assert!(calls.contains(&"player_dispose".to_string()));
}
