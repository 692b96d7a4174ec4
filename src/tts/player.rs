use super::client::Synthesizer;
use crate::audio_sink::{AudioError, AudioSink, SinkFactory};
use crate::error::VoiceError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Reply playback as seen by the turn controller
#[async_trait::async_trait]
pub trait SpeechSynthesis: Send + Sync {
    /// Synthesize and play `text`, resolving when playback ends or is stopped
    async fn speak(&self, text: &str) -> Result<(), VoiceError>;
    /// Halt immediately
    async fn stop(&self);
    /// Ramp the volume down, then halt
    async fn fade_and_stop(&self);
    async fn dispose(&self);
}

#[derive(Debug, Clone)]
pub struct PlayerConfig {
    pub fade_duration: Duration,
    pub fade_steps: u32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            fade_duration: Duration::from_millis(60),
            fade_steps: 6,
        }
    }
}

/// Tracks one in-progress `speak` call
struct SpeakGuard<'a>(&'a AtomicUsize);

impl<'a> SpeakGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for SpeakGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Synthesizes complete replies and plays them on an exclusively owned sink.
///
/// Every stop bumps the epoch; audio fetched under an older epoch is dropped
/// instead of played.
pub struct SynthesisPlayer {
    synthesizer: Arc<dyn Synthesizer>,
    factory: Arc<dyn SinkFactory>,
    sink: Mutex<Option<Arc<dyn AudioSink>>>,
    epoch: AtomicU64,
    speaking: AtomicUsize,
    config: PlayerConfig,
}

impl SynthesisPlayer {
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        factory: Arc<dyn SinkFactory>,
        config: PlayerConfig,
    ) -> Self {
        Self {
            synthesizer,
            factory,
            sink: Mutex::new(None),
            epoch: AtomicU64::new(0),
            speaking: AtomicUsize::new(0),
            config,
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::Acquire) > 0
            || self.sink.lock().as_ref().is_some_and(|s| s.is_playing())
    }

    fn current_sink(&self) -> Option<Arc<dyn AudioSink>> {
        self.sink.lock().clone()
    }

    fn sink_or_create(&self) -> Result<Arc<dyn AudioSink>, AudioError> {
        let mut slot = self.sink.lock();
        if let Some(sink) = slot.as_ref() {
            return Ok(Arc::clone(sink));
        }
        let sink = self.factory.create()?;
        *slot = Some(Arc::clone(&sink));
        Ok(sink)
    }

    /// Drop the faulted sink and build a fresh one
    fn replace_sink(&self) -> Result<Arc<dyn AudioSink>, AudioError> {
        let mut slot = self.sink.lock();
        slot.take();
        let sink = self.factory.create()?;
        *slot = Some(Arc::clone(&sink));
        Ok(sink)
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::Acquire) == epoch
    }

    async fn play(&self, audio: &[u8], epoch: u64) -> Result<(), AudioError> {
        let sink = self.sink_or_create()?;
        match sink.play(audio).await {
            Err(AudioError::SessionFault(reason)) => {
                log::warn!("TTS: Output session faulted ({}), rebuilding sink", reason);
                let sink = self.replace_sink()?;
                if !self.is_current(epoch) {
                    return Ok(());
                }
                sink.play(audio).await
            }
            other => other,
        }
    }

    async fn halt(&self) {
        if let Some(sink) = self.current_sink() {
            if let Err(e) = sink.stop().await {
                log::warn!("TTS: Failed to stop sink: {}", e);
            }
            sink.set_volume(1.0);
        }
    }
}

#[async_trait::async_trait]
impl SpeechSynthesis for SynthesisPlayer {
    async fn speak(&self, text: &str) -> Result<(), VoiceError> {
        if text.trim().is_empty() {
            return Ok(());
        }
        let _guard = SpeakGuard::enter(&self.speaking);
        let epoch = self.epoch.load(Ordering::Acquire);

        let audio = self.synthesizer.synthesize(text).await?;
        if !self.is_current(epoch) {
            log::debug!("TTS: Discarding audio fetched before a stop");
            return Ok(());
        }

        log::info!("🔊 Speaking {} chars", text.len());
        self.play(&audio, epoch)
            .await
            .map_err(|e| VoiceError::SynthesisFailed(e.to_string()))
    }

    async fn stop(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.halt().await;
    }

    async fn fade_and_stop(&self) {
        if !self.is_speaking() {
            return;
        }
        self.epoch.fetch_add(1, Ordering::AcqRel);

        if let Some(sink) = self.current_sink().filter(|s| s.is_playing()) {
            let steps = self.config.fade_steps.max(1);
            let step_delay = self.config.fade_duration / steps;
            for step in 1..=steps {
                sink.set_volume(1.0 - step as f32 / steps as f32);
                tokio::time::sleep(step_delay).await;
            }
            log::debug!("TTS: Faded out over {:?}", self.config.fade_duration);
        }
        self.halt().await;
    }

    async fn dispose(&self) {
        self.stop().await;
        self.sink.lock().take();
        log::debug!("TTS: Player disposed");
    }
}
