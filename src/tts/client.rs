use crate::error::{Service, VoiceError};
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TTSError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Audio processing error: {0}")]
    AudioProcessing(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<TTSError> for VoiceError {
    fn from(err: TTSError) -> Self {
        match err {
            TTSError::Request(e) => VoiceError::from_request(Service::Synthesis, &e),
            TTSError::ApiError { status, message } => {
                VoiceError::from_status(Service::Synthesis, status, &message)
            }
            TTSError::AudioProcessing(msg) | TTSError::Config(msg) => {
                VoiceError::SynthesisFailed(msg)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct TTSConfig {
    pub base_url: String,
    pub voice_id: String,
    pub model: String,
    /// Rate of the raw PCM requested from the service
    pub sample_rate: u32,
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
    pub use_speaker_boost: bool,
    pub request_timeout: Duration,
}

impl Default for TTSConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.elevenlabs.io/v1".to_string(),
            voice_id: "21m00Tcm4TlvDq8ikWAM".to_string(), // Rachel voice
            model: "eleven_multilingual_v2".to_string(),
            sample_rate: 16000,
            stability: 0.5,
            similarity_boost: 0.75,
            style: 0.0,
            use_speaker_boost: true,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Text to complete audio
#[async_trait::async_trait]
pub trait Synthesizer: Send + Sync {
    /// Returns 16-bit little-endian mono PCM
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, TTSError>;
}

pub struct ElevenLabsTTS {
    client: Client,
    api_key: String,
    config: TTSConfig,
}

impl ElevenLabsTTS {
    pub fn new(api_key: String, config: TTSConfig) -> Result<Self, TTSError> {
        if api_key.trim().is_empty() {
            return Err(TTSError::Config("API key is empty".to_string()));
        }
        let client = Client::builder().timeout(config.request_timeout).build()?;

        Ok(Self {
            client,
            api_key,
            config,
        })
    }

    pub fn config(&self) -> &TTSConfig {
        &self.config
    }

    fn url(&self) -> String {
        format!(
            "{}/text-to-speech/{}?output_format=pcm_{}",
            self.config.base_url, self.config.voice_id, self.config.sample_rate
        )
    }

    fn payload(&self, text: &str) -> serde_json::Value {
        json!({
            "text": text,
            "model_id": self.config.model,
            "voice_settings": {
                "stability": self.config.stability,
                "similarity_boost": self.config.similarity_boost,
                "style": self.config.style,
                "use_speaker_boost": self.config.use_speaker_boost
            }
        })
    }
}

#[async_trait::async_trait]
impl Synthesizer for ElevenLabsTTS {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, TTSError> {
        log::debug!("TTS: Synthesizing {} chars", text.len());

        let response = self
            .client
            .post(self.url())
            .header("xi-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&self.payload(text))
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TTSError::ApiError {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let audio_data = response.bytes().await?.to_vec();
        if audio_data.len() % 2 != 0 {
            return Err(TTSError::AudioProcessing(format!(
                "PCM payload has odd length {}",
                audio_data.len()
            )));
        }
        log::debug!("TTS: Received {} bytes of audio", audio_data.len());
        Ok(audio_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = TTSConfig::default();
        assert_eq!(config.voice_id, "21m00Tcm4TlvDq8ikWAM");
        assert_eq!(config.model, "eleven_multilingual_v2");
        assert_eq!(config.sample_rate, 16000);
        assert_eq!(config.stability, 0.5);
        assert_eq!(config.similarity_boost, 0.75);
        assert!(config.use_speaker_boost);
    }

    #[test]
    fn test_requests_raw_pcm() {
        let config = TTSConfig {
            voice_id: "voice123".to_string(),
            ..TTSConfig::default()
        };
        let tts = ElevenLabsTTS::new("test_key".to_string(), config).unwrap();

        assert_eq!(
            tts.url(),
            "https://api.elevenlabs.io/v1/text-to-speech/voice123?output_format=pcm_16000"
        );
        assert_eq!(tts.payload("hello")["model_id"], "eleven_multilingual_v2");
    }

    #[test]
    fn test_error_classification() {
        let rejected: VoiceError = TTSError::ApiError {
            status: 401,
            message: "invalid_api_key".into(),
        }
        .into();
        assert!(matches!(
            rejected,
            VoiceError::AuthRejected {
                service: Service::Synthesis
            }
        ));
        assert!(rejected.is_fatal());

        let bad_text: VoiceError = TTSError::ApiError {
            status: 422,
            message: "text too long".into(),
        }
        .into();
        assert!(!bad_text.is_fatal());
    }
}
