pub mod audio_capture;
pub mod audio_sink;
pub mod config;
pub mod controller;
pub mod error;
pub mod llm;
pub mod platform;
pub mod resampler;
pub mod stt;
pub mod tts;

pub use error::VoiceError;
