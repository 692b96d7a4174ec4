use crate::audio_capture::AudioCaptureConfig;
use crate::audio_sink::CpalConfig;
use crate::llm::LLMConfig;
use crate::platform::AudioPlatform;
use crate::stt::STTConfig;
use crate::tts::{PlayerConfig, TTSConfig};
use secrecy::{ExposeSecret, SecretBox};
use std::env;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid API key format for {service}: {reason}")]
    InvalidKeyFormat { service: String, reason: String },
    #[error("Environment error: {0}")]
    EnvError(#[from] env::VarError),
}

/// Configuration for API services
#[derive(Debug)]
pub struct ApiConfig {
    pub deepgram_key: SecretBox<String>,
    pub groq_key: SecretBox<String>,
    pub elevenlabs_key: SecretBox<String>,
}

impl ApiConfig {
    /// Load API configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok(); // Don't error if .env doesn't exist

        let deepgram_key = Self::load_api_key("DEEPGRAM_API_KEY", "Deepgram")?;
        let groq_key = Self::load_api_key("GROQ_API_KEY", "Groq")?;
        let elevenlabs_key = Self::load_api_key("ELEVENLABS_API_KEY", "ElevenLabs")?;

        Ok(Self {
            deepgram_key,
            groq_key,
            elevenlabs_key,
        })
    }

    /// Load and validate a single API key from environment
    fn load_api_key(env_var: &str, service_name: &str) -> Result<SecretBox<String>, ConfigError> {
        let key = env::var(env_var).map_err(|_| ConfigError::MissingEnvVar(env_var.to_string()))?;

        if key.trim().is_empty() {
            return Err(ConfigError::InvalidKeyFormat {
                service: service_name.to_string(),
                reason: "API key cannot be empty".to_string(),
            });
        }

        Self::validate_key_format(&key, service_name)?;

        Ok(SecretBox::new(Box::new(key)))
    }

    /// Validate API key format for each service
    fn validate_key_format(key: &str, service: &str) -> Result<(), ConfigError> {
        match service {
            "Groq" => {
                if !key.starts_with("gsk_") {
                    return Err(ConfigError::InvalidKeyFormat {
                        service: service.to_string(),
                        reason: "Groq keys should start with 'gsk_'".to_string(),
                    });
                }
            }
            "Deepgram" | "ElevenLabs" => {
                // Both issue hex strings
                if key.len() < 10 {
                    return Err(ConfigError::InvalidKeyFormat {
                        service: service.to_string(),
                        reason: format!("{} keys should be at least 10 characters", service),
                    });
                }
            }
            _ => {} // No validation for unknown services
        }
        Ok(())
    }

    /// Get Deepgram API key (use only when making API calls)
    pub fn deepgram_key(&self) -> &str {
        self.deepgram_key.expose_secret()
    }

    /// Get Groq API key (use only when making API calls)
    pub fn groq_key(&self) -> &str {
        self.groq_key.expose_secret()
    }

    /// Get ElevenLabs API key (use only when making API calls)
    pub fn elevenlabs_key(&self) -> &str {
        self.elevenlabs_key.expose_secret()
    }
}

/// Load configuration with helpful error messages for development
pub fn load_config() -> Result<ApiConfig, ConfigError> {
    match ApiConfig::load() {
        Ok(config) => {
            log::info!("Successfully loaded API configuration");
            Ok(config)
        }
        Err(ConfigError::MissingEnvVar(var)) => {
            log::error!("Missing required environment variable: {}", var);
            log::error!("Create a .env file in the project root with:");
            log::error!("{}=your_api_key_here", var);
            Err(ConfigError::MissingEnvVar(var))
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Tunables for every component, resolved once for a platform
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub platform: AudioPlatform,
    pub capture: AudioCaptureConfig,
    pub stt: STTConfig,
    pub llm: LLMConfig,
    pub max_messages: usize,
    pub anchor_messages: usize,
    pub tts: TTSConfig,
    pub output: CpalConfig,
    pub player: PlayerConfig,
}

impl EngineConfig {
    pub fn for_platform(platform: AudioPlatform) -> Self {
        let sample_rate = platform.speech_sample_rate();
        Self {
            platform,
            capture: AudioCaptureConfig {
                sample_rate,
                ..AudioCaptureConfig::default()
            },
            stt: STTConfig {
                sample_rate,
                echo: platform.echo_policy(),
                ..STTConfig::default()
            },
            llm: LLMConfig::default(),
            max_messages: 20,
            anchor_messages: 2,
            tts: TTSConfig {
                sample_rate,
                ..TTSConfig::default()
            },
            output: CpalConfig {
                input_sample_rate: sample_rate,
                ..CpalConfig::default()
            },
            player: PlayerConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::for_platform(AudioPlatform::detect())
    }
}
