//! Microphone capture feeding the recognition socket.

mod imp_cpal;

pub use imp_cpal::CpalMicrophone;

use futures_util::Stream;
use std::{
    pin::Pin,
    task::{Context, Poll},
};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum AudioCaptureError {
    #[error("Audio device error: {0}")]
    Device(String),
    #[error("Audio stream error: {0}")]
    Stream(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Audio capture configuration
#[derive(Debug, Clone)]
pub struct AudioCaptureConfig {
    /// Device name to capture from (None = default device)
    pub device_name: Option<String>,
    /// Channel to capture (0-based index)
    pub channel: u32,
    /// Rate delivered to the recognizer
    pub sample_rate: u32,
    /// Samples per delivered chunk
    pub chunk_size: usize,
}

impl Default for AudioCaptureConfig {
    fn default() -> Self {
        Self {
            device_name: None,
            channel: 0,
            sample_rate: 16000,
            chunk_size: 1280, // 80ms at 16kHz
        }
    }
}

/// A chunk of mono 16-bit samples
#[derive(Clone, Debug)]
pub struct AudioChunk {
    pub samples: Vec<i16>,
}

impl AudioChunk {
    /// Linear PCM, 16-bit little-endian
    pub fn to_pcm_bytes(&self) -> Vec<u8> {
        let mut pcm = Vec::with_capacity(self.samples.len() * 2);
        for sample in &self.samples {
            pcm.extend_from_slice(&sample.to_le_bytes());
        }
        pcm
    }
}

/// Keeps a capture alive; dropping it stops the device
pub trait CaptureGuard: Send {}

/// Live microphone feed. Ends when the device goes away.
pub struct MicStream {
    rx: mpsc::Receiver<AudioChunk>,
    _guard: Option<Box<dyn CaptureGuard>>,
}

impl MicStream {
    pub fn new(rx: mpsc::Receiver<AudioChunk>, guard: Option<Box<dyn CaptureGuard>>) -> Self {
        Self { rx, _guard: guard }
    }
}

impl Stream for MicStream {
    type Item = AudioChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Source of microphone audio. Opening fails synchronously when the device
/// or the permission is missing.
pub trait Microphone: Send + Sync {
    fn open(&self) -> Result<MicStream, AudioCaptureError>;
}
