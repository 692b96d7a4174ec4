//! Recognizer wire format: listen URL, inbound JSON, control frames.

use super::{STTConfig, STTError};
use serde::Deserialize;
use serde_json::json;
use url::Url;

/// Inbound recognizer message reduced to what the session acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerMessage {
    Transcript {
        text: String,
        is_final: bool,
        speech_final: bool,
    },
    SpeechStarted,
    UtteranceEnd,
    Ignored,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum Inbound {
    Results {
        channel: Channel,
        #[serde(default)]
        is_final: bool,
        #[serde(default)]
        speech_final: bool,
    },
    SpeechStarted,
    UtteranceEnd,
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    #[serde(default)]
    transcript: String,
}

pub fn parse_message(text: &str) -> Result<RecognizerMessage, STTError> {
    let inbound: Inbound =
        serde_json::from_str(text).map_err(|e| STTError::ParseError(e.to_string()))?;

    Ok(match inbound {
        Inbound::Results {
            channel,
            is_final,
            speech_final,
        } => RecognizerMessage::Transcript {
            text: channel
                .alternatives
                .into_iter()
                .next()
                .map(|alt| alt.transcript)
                .unwrap_or_default(),
            is_final,
            speech_final,
        },
        Inbound::SpeechStarted => RecognizerMessage::SpeechStarted,
        Inbound::UtteranceEnd => RecognizerMessage::UtteranceEnd,
        Inbound::Other => RecognizerMessage::Ignored,
    })
}

/// Listen URL with streaming parameters
pub fn listen_url(config: &STTConfig) -> Result<Url, STTError> {
    let mut url = Url::parse(&config.base_url)?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("model", &config.model)
            .append_pair("encoding", "linear16")
            .append_pair("sample_rate", &config.sample_rate.to_string())
            .append_pair("channels", "1")
            .append_pair("interim_results", "true")
            .append_pair("vad_events", "true")
            .append_pair("smart_format", "true")
            .append_pair("utterance_end_ms", &config.utterance_end_ms.to_string())
            .append_pair("endpointing", &config.endpointing_ms.to_string());

        if let Some(language) = &config.language {
            query.append_pair("language", language);
        }
    }
    Ok(url)
}

pub fn keepalive() -> String {
    json!({"type": "KeepAlive"}).to_string()
}

pub fn close_stream() -> String {
    json!({"type": "CloseStream"}).to_string()
}
