use clap::ValueEnum;
use std::time::Duration;

/// Supported audio platforms with different echo characteristics
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AudioPlatform {
    /// macOS with voice-processing I/O (hardware echo cancellation)
    #[value(name = "macos")]
    MacOS,
    /// Generic Linux desktop, no reliable echo cancellation
    #[value(name = "linux")]
    Linux,
    /// Raspberry Pi with a USB mic array and I2S DAC speaker
    #[value(name = "raspberry-pi")]
    RaspberryPi,
}

impl AudioPlatform {
    /// Platform this binary was built for
    pub fn detect() -> Self {
        if cfg!(target_os = "macos") {
            AudioPlatform::MacOS
        } else if cfg!(all(target_os = "linux", target_arch = "aarch64")) {
            AudioPlatform::RaspberryPi
        } else {
            AudioPlatform::Linux
        }
    }

    pub fn has_hardware_aec(self) -> bool {
        matches!(self, AudioPlatform::MacOS)
    }

    /// Echo suppression policy for this platform.
    ///
    /// Without hardware echo cancellation the speaker bleeds into the mic for
    /// the whole reply, so barge-in is off and the grace window is longer.
    pub fn echo_policy(self) -> EchoPolicy {
        match self {
            AudioPlatform::MacOS => EchoPolicy {
                barge_in_enabled: true,
                grace_window: Duration::from_millis(300),
                barge_in_min_elapsed: Duration::from_millis(600),
            },
            AudioPlatform::Linux => EchoPolicy {
                barge_in_enabled: false,
                grace_window: Duration::from_millis(1200),
                barge_in_min_elapsed: Duration::from_millis(600),
            },
            AudioPlatform::RaspberryPi => EchoPolicy {
                barge_in_enabled: false,
                grace_window: Duration::from_millis(1500),
                barge_in_min_elapsed: Duration::from_millis(800),
            },
        }
    }

    /// Mic and TTS sample rate (mono, 16-bit)
    pub fn speech_sample_rate(self) -> u32 {
        16000
    }
}

/// How the speech session tells the user's voice apart from our own playback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoPolicy {
    /// Voice onset during playback interrupts the reply
    pub barge_in_enabled: bool,
    /// Suppression kept after unmute to swallow in-flight echo
    pub grace_window: Duration,
    /// Onsets earlier than this after mute are treated as echo
    pub barge_in_min_elapsed: Duration,
}

impl Default for EchoPolicy {
    fn default() -> Self {
        AudioPlatform::detect().echo_policy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_barge_in_only_with_hardware_aec() {
        for platform in [
            AudioPlatform::MacOS,
            AudioPlatform::Linux,
            AudioPlatform::RaspberryPi,
        ] {
            assert_eq!(
                platform.echo_policy().barge_in_enabled,
                platform.has_hardware_aec()
            );
        }
    }

    #[test]
    fn test_grace_window_longer_without_aec() {
        let mac = AudioPlatform::MacOS.echo_policy();
        let linux = AudioPlatform::Linux.echo_policy();
        assert!(linux.grace_window > mac.grace_window);
    }
}
