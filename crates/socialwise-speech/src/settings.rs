use std::time::Duration;

use socialwise_core::config::{AsrConfig, LimitsConfig, SessionConfig, SpeechConfig, TtsConfig};

/// Non-secret speech settings, built once at startup and shared by `Arc`.
#[derive(Debug, Clone, Default)]
pub struct SpeechSettings {
    pub asr: AsrConfig,
    pub tts: TtsConfig,
    pub session: SessionConfig,
    pub limits: LimitsConfig,
}

impl SpeechSettings {
    pub fn from_config(config: &SpeechConfig) -> Self {
        Self {
            asr: config.asr.clone(),
            tts: config.tts.clone(),
            session: config.session.clone(),
            limits: config.limits.clone(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.session.connect_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.session.idle_timeout_ms.max(1))
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session.session_timeout_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.asr.frame_interval_ms)
    }
}
