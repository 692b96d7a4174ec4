use super::echo_gate::EchoGate;
use super::protocol::RecognizerMessage;
use super::SpeechEvent;
use tokio::time::Instant;

/// Stitches final transcript fragments into one utterance per boundary.
///
/// At most one `SpeechFinal` is produced per utterance: the buffer is cleared
/// at every boundary, so a `speech_final` followed by an `UtteranceEnd` for the
/// same speech finds nothing left to emit.
#[derive(Debug, Default)]
pub struct TurnAssembler {
    finals: Vec<String>,
}

impl TurnAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_final(&mut self, text: &str) {
        let text = text.trim();
        if !text.is_empty() {
            self.finals.push(text.to_string());
        }
    }

    /// Close the current utterance and return its text, if any
    pub fn boundary(&mut self) -> Option<String> {
        let joined = self.finals.join(" ").trim().to_string();
        self.finals.clear();
        (!joined.is_empty()).then_some(joined)
    }

    pub fn clear(&mut self) {
        self.finals.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.finals.is_empty()
    }

    /// Route one recognizer message through the echo gate
    pub fn handle(
        &mut self,
        message: RecognizerMessage,
        gate: &EchoGate,
        now: Instant,
    ) -> Vec<SpeechEvent> {
        let suppressed = gate.is_suppressed(now);
        let mut events = Vec::new();

        match message {
            RecognizerMessage::Transcript {
                text,
                is_final,
                speech_final,
            } => {
                if !suppressed && !text.trim().is_empty() {
                    if is_final {
                        self.push_final(&text);
                        events.push(SpeechEvent::TranscriptFinal(text));
                    } else {
                        events.push(SpeechEvent::TranscriptPartial(text));
                    }
                }
                if speech_final {
                    self.close_utterance(suppressed, &mut events);
                }
            }
            RecognizerMessage::UtteranceEnd => self.close_utterance(suppressed, &mut events),
            RecognizerMessage::SpeechStarted => {
                if !suppressed || gate.accepts_barge_in(now) {
                    events.push(SpeechEvent::SpeechStarted);
                } else {
                    log::debug!("STT: Ignoring voice onset while suppressed (likely echo)");
                }
            }
            RecognizerMessage::Ignored => {}
        }

        events
    }

    fn close_utterance(&mut self, suppressed: bool, events: &mut Vec<SpeechEvent>) {
        match self.boundary() {
            Some(text) if !suppressed => events.push(SpeechEvent::SpeechFinal(text)),
            Some(text) => log::debug!("STT: Dropping suppressed utterance '{}'", text),
            None => {}
        }
    }
}
