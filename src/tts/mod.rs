//! Reply synthesis and interruptible playback.

pub mod client;
pub mod player;

pub use client::{ElevenLabsTTS, Synthesizer, TTSConfig, TTSError};
pub use player::{PlayerConfig, SpeechSynthesis, SynthesisPlayer};
