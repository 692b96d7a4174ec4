use super::{AudioCaptureConfig, AudioCaptureError, AudioChunk, CaptureGuard, MicStream, Microphone};
use crate::resampler::StreamResampler;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;

/// Microphone backed by the default CPAL host.
///
/// CPAL streams are not `Send`, so each open capture lives on its own thread
/// and is torn down when the returned [`MicStream`] is dropped.
pub struct CpalMicrophone {
    config: AudioCaptureConfig,
}

impl CpalMicrophone {
    pub fn new(config: AudioCaptureConfig) -> Self {
        Self { config }
    }
}

struct CpalCapture {
    stop_tx: std_mpsc::Sender<()>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CaptureGuard for CpalCapture {}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            if let Err(e) = thread.join() {
                log::error!("Mic: Failed to join capture thread: {:?}", e);
            }
        }
    }
}

impl Microphone for CpalMicrophone {
    fn open(&self) -> Result<MicStream, AudioCaptureError> {
        let (tx, rx) = mpsc::channel(32);
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let config = self.config.clone();

        let thread = thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                let failed = Arc::new(AtomicBool::new(false));
                let stream = match open_stream(&config, tx, Arc::clone(&failed)) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioCaptureError::Stream(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Hold the stream until the guard is dropped or the device dies
                loop {
                    match stop_rx.recv_timeout(Duration::from_millis(250)) {
                        Err(std_mpsc::RecvTimeoutError::Timeout) => {
                            if failed.load(Ordering::Acquire) {
                                log::error!("Mic: Input device failed, ending capture");
                                break;
                            }
                        }
                        _ => break,
                    }
                }
                log::debug!("Mic: Capture thread exiting");
            })
            .map_err(|e| AudioCaptureError::Device(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                log::info!("🎤 Microphone capture started");
                Ok(MicStream::new(
                    rx,
                    Some(Box::new(CpalCapture {
                        stop_tx,
                        thread: Some(thread),
                    })),
                ))
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(AudioCaptureError::Device(
                "Capture thread exited during startup".to_string(),
            )),
        }
    }
}

fn find_device(config: &AudioCaptureConfig) -> Result<Device, AudioCaptureError> {
    let host = cpal::default_host();
    if let Some(name) = &config.device_name {
        host.input_devices()
            .map_err(|e| AudioCaptureError::Device(format!("Failed to enumerate devices: {}", e)))?
            .find(|dev| dev.name().map(|n| n == *name).unwrap_or(false))
            .ok_or_else(|| AudioCaptureError::Device(format!("Device '{}' not found", name)))
    } else {
        host.default_input_device()
            .ok_or_else(|| AudioCaptureError::Device("No default input device available".into()))
    }
}

fn open_stream(
    config: &AudioCaptureConfig,
    tx: mpsc::Sender<AudioChunk>,
    failed: Arc<AtomicBool>,
) -> Result<Stream, AudioCaptureError> {
    let device = find_device(config)?;
    let wanted_rate = cpal::SampleRate(config.sample_rate);

    // Prefer a config that runs natively at the recognizer rate
    let supported = device
        .supported_input_configs()
        .map_err(|e| AudioCaptureError::Config(e.to_string()))?
        .find(|c| c.min_sample_rate() <= wanted_rate && c.max_sample_rate() >= wanted_rate)
        .map(|c| c.with_sample_rate(wanted_rate));
    let supported = match supported {
        Some(supported) => supported,
        None => device
            .default_input_config()
            .map_err(|e| AudioCaptureError::Config(e.to_string()))?,
    };

    if config.channel >= u32::from(supported.channels()) {
        return Err(AudioCaptureError::Config(format!(
            "Selected channel {} is not available (device has {} channels)",
            config.channel,
            supported.channels()
        )));
    }

    let stream_config: StreamConfig = supported.config();
    log::info!(
        "Mic: {} channels @ {}Hz ({:?}), delivering {}Hz mono",
        stream_config.channels,
        stream_config.sample_rate.0,
        supported.sample_format(),
        config.sample_rate
    );

    // 20ms of device audio per resampler chunk
    let device_rate = stream_config.sample_rate.0;
    let resampler = StreamResampler::new(device_rate, config.sample_rate, (device_rate / 50) as usize)
        .map_err(|e| AudioCaptureError::Config(e.to_string()))?;
    match supported.sample_format() {
        SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, config, resampler, tx, failed),
        SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, config, resampler, tx, failed),
        SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, config, resampler, tx, failed),
        format => Err(AudioCaptureError::Config(format!(
            "Unsupported sample format: {:?}",
            format
        ))),
    }
}

fn build_stream<T>(
    device: &Device,
    stream_config: &StreamConfig,
    config: &AudioCaptureConfig,
    mut resampler: StreamResampler,
    tx: mpsc::Sender<AudioChunk>,
    failed: Arc<AtomicBool>,
) -> Result<Stream, AudioCaptureError>
where
    T: Sample + SizedSample + Send + Sync + 'static,
    f32: FromSample<T>,
{
    let channels = stream_config.channels as usize;
    let channel = config.channel as usize;
    let chunk_size = config.chunk_size;
    let mut buffer: Vec<i16> = Vec::with_capacity(chunk_size);
    let mut mono: Vec<f32> = Vec::new();
    let mut resampled: Vec<f32> = Vec::new();

    device
        .build_input_stream(
            stream_config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                mono.clear();
                mono.extend(
                    data.chunks(channels)
                        .filter_map(|frame| frame.get(channel))
                        .map(|sample| f32::from_sample(*sample)),
                );
                resampled.clear();
                if let Err(e) = resampler.push(&mono, &mut resampled) {
                    log::error!("Mic: {}", e);
                    return;
                }

                for out in &resampled {
                    buffer.push((out.clamp(-1.0, 1.0) * i16::MAX as f32) as i16);
                    if buffer.len() >= chunk_size {
                        let chunk = AudioChunk {
                            samples: std::mem::replace(&mut buffer, Vec::with_capacity(chunk_size)),
                        };
                        // Fire-and-forget: a full queue drops the chunk
                        if tx.try_send(chunk).is_err() {
                            log::trace!("Mic: Dropped chunk, consumer is behind");
                        }
                    }
                }
            },
            move |err| {
                log::error!("Mic: Stream error: {}", err);
                failed.store(true, Ordering::Release);
            },
            None,
        )
        .map_err(|e| AudioCaptureError::Stream(e.to_string()))
}
