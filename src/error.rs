use strum::{Display, EnumDiscriminants};
use thiserror::Error;

/// Remote services the engine talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Service {
    #[strum(serialize = "speech recognition")]
    Recognition,
    #[strum(serialize = "text generation")]
    TextGeneration,
    #[strum(serialize = "speech synthesis")]
    Synthesis,
}

/// Errors that reach the turn controller.
///
/// Every module error converts into one of these so the controller can decide
/// between stopping the session (fatal) and toasting (recoverable).
#[derive(Error, Debug, EnumDiscriminants)]
#[strum_discriminants(name(ErrorKind), derive(Display))]
pub enum VoiceError {
    #[error("Microphone unavailable: {0}")]
    MicrophoneUnavailable(String),

    #[error("{service} rejected the credentials")]
    AuthRejected { service: Service },

    #[error("{service} is unreachable")]
    ServiceUnreachable { service: Service },

    #[error("Speech synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error("Speech recognition gave up reconnecting")]
    RecognitionExhausted,

    #[error("Network error: {0}")]
    NetworkTransient(String),

    #[error("Unexpected error: {0}")]
    Unknown(String),
}

impl VoiceError {
    /// Fatal errors stop the session and wait for an explicit retry.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VoiceError::MicrophoneUnavailable(_)
                | VoiceError::AuthRejected { .. }
                | VoiceError::RecognitionExhausted
        )
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::from(self)
    }

    /// Short user-facing message
    pub fn user_message(&self) -> String {
        match self {
            VoiceError::MicrophoneUnavailable(_) => "Can't access the microphone".to_string(),
            VoiceError::AuthRejected { service } => format!("The {} key was rejected", service),
            VoiceError::ServiceUnreachable { service } => {
                format!("Can't reach {} right now", service)
            }
            VoiceError::SynthesisFailed(_) => "Couldn't speak the reply".to_string(),
            VoiceError::RecognitionExhausted => {
                "Lost connection to speech recognition".to_string()
            }
            VoiceError::NetworkTransient(_) => "Network hiccup, try again".to_string(),
            VoiceError::Unknown(_) => "Something went wrong".to_string(),
        }
    }

    /// What the user can do about a fatal error
    pub fn remediation_hint(&self) -> Option<&'static str> {
        match self {
            VoiceError::MicrophoneUnavailable(_) => {
                Some("Check microphone permissions and the input device")
            }
            VoiceError::AuthRejected { .. } => Some("Check your API keys in settings"),
            VoiceError::RecognitionExhausted => {
                Some("Check your network connection and speech settings, then retry")
            }
            _ => None,
        }
    }

    /// Classify an HTTP status returned by `service`
    pub fn from_status(service: Service, status: u16, body: &str) -> Self {
        match status {
            401 | 403 => VoiceError::AuthRejected { service },
            408 | 429 | 500..=599 => VoiceError::ServiceUnreachable { service },
            _ if service == Service::Synthesis => {
                VoiceError::SynthesisFailed(format!("HTTP {}: {}", status, body))
            }
            _ => VoiceError::Unknown(format!("{} returned HTTP {}: {}", service, status, body)),
        }
    }

    /// Classify a transport-level HTTP failure
    pub fn from_request(service: Service, err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(service, status.as_u16(), &err.to_string());
        }
        if err.is_connect() || err.is_timeout() {
            VoiceError::ServiceUnreachable { service }
        } else {
            VoiceError::NetworkTransient(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(VoiceError::AuthRejected {
            service: Service::Synthesis
        }
        .is_fatal());
        assert!(VoiceError::RecognitionExhausted.is_fatal());
        assert!(VoiceError::MicrophoneUnavailable("no device".into()).is_fatal());

        assert!(!VoiceError::ServiceUnreachable {
            service: Service::TextGeneration
        }
        .is_fatal());
        assert!(!VoiceError::NetworkTransient("reset".into()).is_fatal());
        assert!(!VoiceError::SynthesisFailed("bad audio".into()).is_fatal());
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            VoiceError::from_status(Service::TextGeneration, 401, ""),
            VoiceError::AuthRejected {
                service: Service::TextGeneration
            }
        ));
        assert!(matches!(
            VoiceError::from_status(Service::Synthesis, 403, ""),
            VoiceError::AuthRejected { .. }
        ));
        assert!(matches!(
            VoiceError::from_status(Service::TextGeneration, 503, ""),
            VoiceError::ServiceUnreachable { .. }
        ));
        assert!(matches!(
            VoiceError::from_status(Service::TextGeneration, 429, ""),
            VoiceError::ServiceUnreachable { .. }
        ));
        assert!(matches!(
            VoiceError::from_status(Service::Synthesis, 422, "bad voice"),
            VoiceError::SynthesisFailed(_)
        ));
        assert!(matches!(
            VoiceError::from_status(Service::TextGeneration, 400, "bad request"),
            VoiceError::Unknown(_)
        ));
    }

    #[test]
    fn test_hints_only_for_actionable_errors() {
        let auth = VoiceError::AuthRejected {
            service: Service::Recognition,
        };
        assert!(auth.remediation_hint().unwrap().contains("settings"));
        assert!(VoiceError::NetworkTransient("x".into())
            .remediation_hint()
            .is_none());
        assert_eq!(auth.kind(), ErrorKind::AuthRejected);
        assert_eq!(auth.to_string(), "speech recognition rejected the credentials");
    }
}
