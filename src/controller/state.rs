use crate::error::{ErrorKind, VoiceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum TurnState {
    Idle,
    Listening,
    Thinking,
    Speaking,
    Reconnecting,
    Error,
}

impl TurnState {
    pub fn status_text(self) -> &'static str {
        match self {
            TurnState::Idle => "Tap to talk",
            TurnState::Listening => "Listening",
            TurnState::Thinking => "Thinking",
            TurnState::Speaking => "Speaking",
            TurnState::Reconnecting => "Reconnecting",
            TurnState::Error => "Something went wrong",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub fatal: bool,
    pub message: String,
    pub hint: Option<String>,
    pub kind: ErrorKind,
}

impl From<&VoiceError> for ErrorInfo {
    fn from(err: &VoiceError) -> Self {
        Self {
            fatal: err.is_fatal(),
            message: err.user_message(),
            hint: err.remediation_hint().map(str::to_string),
            kind: err.kind(),
        }
    }
}

/// Snapshot published after every transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceViewState {
    pub turn_state: TurnState,
    pub status_text: String,
    /// Live transcript while listening, then the submitted utterance
    pub transcript: String,
    pub last_response: String,
    pub error_info: Option<ErrorInfo>,
}

impl Default for VoiceViewState {
    fn default() -> Self {
        Self {
            turn_state: TurnState::Idle,
            status_text: TurnState::Idle.status_text().to_string(),
            transcript: String::new(),
            last_response: String::new(),
            error_info: None,
        }
    }
}
