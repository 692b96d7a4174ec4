use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crate::resampler::resample_clip;
use cpal::{FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Error, Debug, Clone)]
pub enum AudioError {
    #[error("Audio device error: {0}")]
    DeviceError(String),

    /// The output session died underneath us; the sink must be rebuilt
    #[error("Audio session fault: {0}")]
    SessionFault(String),
}

/// Core trait for audio output handling
#[async_trait::async_trait]
pub trait AudioSink: Send + Sync {
    /// Play 16-bit mono PCM. Resolves once the audio has drained or playback
    /// was stopped; a sink that goes quiet without signalling also resolves.
    async fn play(&self, pcm: &[u8]) -> Result<(), AudioError>;

    /// Output gain in `0.0..=1.0`, applied immediately
    fn set_volume(&self, volume: f32);

    /// Stop audio playback and clear any buffered data
    async fn stop(&self) -> Result<(), AudioError>;

    fn is_playing(&self) -> bool;
}

/// Builds output sinks; used to replace a sink after a session fault
pub trait SinkFactory: Send + Sync {
    fn create(&self) -> Result<Arc<dyn AudioSink>, AudioError>;
}

#[derive(Debug, Clone)]
pub struct CpalConfig {
    /// Output device name (None = default device)
    pub device_name: Option<String>,
    /// Rate of the PCM handed to `play`
    pub input_sample_rate: u32,
    /// Extra wait beyond the clip length before a silent sink counts as done
    pub drain_slack: Duration,
}

impl Default for CpalConfig {
    fn default() -> Self {
        Self {
            device_name: None,
            input_sample_rate: 16000,
            drain_slack: Duration::from_secs(2),
        }
    }
}

/// Samples waiting for the device, already at the device rate
#[derive(Default)]
struct PlaybackQueue {
    samples: VecDeque<f32>,
    done: Option<oneshot::Sender<()>>,
}

impl PlaybackQueue {
    fn load(&mut self, samples: impl IntoIterator<Item = f32>, done: oneshot::Sender<()>) {
        self.samples.clear();
        self.samples.extend(samples);
        // A pending clip is superseded; its waiter resolves as stopped
        self.done = Some(done);
    }

    fn next_sample(&mut self) -> Option<f32> {
        let sample = self.samples.pop_front()?;
        if self.samples.is_empty() {
            self.finish();
        }
        Some(sample)
    }

    fn finish(&mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }

    fn clear(&mut self) {
        self.samples.clear();
        self.finish();
    }

    fn is_active(&self) -> bool {
        !self.samples.is_empty() || self.done.is_some()
    }
}

struct SinkShared {
    queue: Mutex<PlaybackQueue>,
    volume: AtomicU32,
    faulted: AtomicBool,
}

impl SinkShared {
    fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }
}

/// Speaker output through CPAL.
///
/// The stream lives on its own thread because CPAL streams are not `Send`.
pub struct CpalSink {
    shared: Arc<SinkShared>,
    config: CpalConfig,
    device_rate: u32,
    stop_tx: Sender<()>,
    audio_thread: Option<thread::JoinHandle<()>>,
}

impl CpalSink {
    pub fn new(config: CpalConfig) -> Result<Self, AudioError> {
        log::debug!("AudioSink: Creating new CpalSink");
        let shared = Arc::new(SinkShared {
            queue: Mutex::new(PlaybackQueue::default()),
            volume: AtomicU32::new(1.0f32.to_bits()),
            faulted: AtomicBool::new(false),
        });
        let (stop_tx, stop_rx) = channel::<()>();
        let (ready_tx, ready_rx) = channel();

        let thread_shared = Arc::clone(&shared);
        let thread_config = config.clone();
        let audio_thread = thread::Builder::new()
            .name("audio-sink".to_string())
            .spawn(move || {
                log::debug!("AudioSink: Audio thread started");
                let (stream, device_rate) = match open_stream(&thread_config, thread_shared) {
                    Ok(opened) => opened,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::DeviceError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(device_rate));

                // Hold the stream until the sink is dropped
                let _ = stop_rx.recv();
                log::debug!("AudioSink: Audio thread exiting");
            })
            .map_err(|e| AudioError::DeviceError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(device_rate)) => {
                log::debug!("AudioSink: Successfully created CpalSink at {}Hz", device_rate);
                Ok(Self {
                    shared,
                    config,
                    device_rate,
                    stop_tx,
                    audio_thread: Some(audio_thread),
                })
            }
            Ok(Err(e)) => {
                let _ = audio_thread.join();
                Err(e)
            }
            Err(_) => Err(AudioError::DeviceError(
                "Audio thread exited during startup".to_string(),
            )),
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.shared.queue.lock().clear();
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.audio_thread.take() {
            if let Err(e) = thread.join() {
                log::error!("Failed to join audio thread: {:?}", e);
            }
        }
    }
}

fn open_stream(config: &CpalConfig, shared: Arc<SinkShared>) -> Result<(Stream, u32), AudioError> {
    let host = cpal::default_host();
    log::debug!("AudioSink: Using audio host: {:?}", host.id());

    let device = match &config.device_name {
        Some(name) => host
            .output_devices()
            .map_err(|e| AudioError::DeviceError(e.to_string()))?
            .find(|dev| dev.name().map(|n| n == *name).unwrap_or(false))
            .ok_or_else(|| AudioError::DeviceError(format!("Device '{}' not found", name)))?,
        None => host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceError("No output device found".to_string()))?,
    };
    log::debug!("AudioSink: Using output device: {:?}", device.name());

    let supported = device
        .default_output_config()
        .map_err(|e| AudioError::DeviceError(e.to_string()))?;
    log::debug!("AudioSink: Using output config: {:?}", supported);

    let stream_config: StreamConfig = supported.config();
    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, shared),
        SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, shared),
        SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, shared),
        format => Err(AudioError::DeviceError(format!(
            "Unsupported sample format: {:?}",
            format
        ))),
    }?;
    Ok((stream, stream_config.sample_rate.0))
}

fn build_stream<T>(
    device: &cpal::Device,
    stream_config: &StreamConfig,
    shared: Arc<SinkShared>,
) -> Result<Stream, AudioError>
where
    T: Sample + SizedSample + FromSample<f32> + Send + 'static,
{
    let channels = stream_config.channels as usize;
    let error_shared = Arc::clone(&shared);

    device
        .build_output_stream(
            stream_config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let volume = shared.volume();
                let mut queue = shared.queue.lock();
                for frame in data.chunks_mut(channels) {
                    let sample = queue.next_sample().unwrap_or(0.0) * volume;
                    let value = T::from_sample(sample);
                    for channel in frame.iter_mut() {
                        *channel = value;
                    }
                }
            },
            move |err| {
                log::error!("AudioSink: Stream error: {}", err);
                error_shared.faulted.store(true, Ordering::Release);
                error_shared.queue.lock().clear();
            },
            None,
        )
        .map_err(|e| AudioError::DeviceError(e.to_string()))
}

fn pcm_to_f32(pcm: &[u8]) -> Vec<f32> {
    pcm.chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / i16::MAX as f32)
        .collect()
}

#[async_trait::async_trait]
impl AudioSink for CpalSink {
    async fn play(&self, pcm: &[u8]) -> Result<(), AudioError> {
        if self.shared.faulted.load(Ordering::Acquire) {
            return Err(AudioError::SessionFault(
                "output stream reported an error".to_string(),
            ));
        }

        let samples = pcm_to_f32(pcm);
        if samples.is_empty() {
            return Ok(());
        }
        let clip = Duration::from_secs_f64(samples.len() as f64 / self.config.input_sample_rate as f64);
        let samples = resample_clip(&samples, self.config.input_sample_rate, self.device_rate)
            .map_err(|e| AudioError::DeviceError(e.to_string()))?;
        log::debug!("AudioSink: Playing {} samples ({:?})", samples.len(), clip);

        let (done_tx, done_rx) = oneshot::channel();
        self.shared.queue.lock().load(samples, done_tx);

        match tokio::time::timeout(clip + self.config.drain_slack, done_rx).await {
            Ok(_) => log::debug!("AudioSink: Playback finished"),
            Err(_) => {
                log::warn!("AudioSink: Output went quiet without draining, treating as done");
                self.shared.queue.lock().clear();
            }
        }
        Ok(())
    }

    fn set_volume(&self, volume: f32) {
        self.shared
            .volume
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    async fn stop(&self) -> Result<(), AudioError> {
        log::debug!("AudioSink: Stopping sink");
        self.shared.queue.lock().clear();
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.shared.queue.lock().is_active()
    }
}

/// Creates a fresh [`CpalSink`] per request
pub struct CpalSinkFactory {
    config: CpalConfig,
}

impl CpalSinkFactory {
    pub fn new(config: CpalConfig) -> Self {
        Self { config }
    }
}

impl SinkFactory for CpalSinkFactory {
    fn create(&self) -> Result<Arc<dyn AudioSink>, AudioError> {
        Ok(Arc::new(CpalSink::new(self.config.clone())?))
    }
}
