//! High-level recognition and synthesis entry points.
//!
//! [`SpeechService`] validates input, opens one session per call through its
//! [`SpeechProvider`] and folds the session's updates into a final result.
//! Failures are returned as typed [`SpeechError`]s; nothing is swallowed into
//! an empty success value.

use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, info};

use socialwise_core::config::SpeechConfig;

use crate::aggregator::Transcript;
use crate::auth::{AuthSigner, Credential};
use crate::chunker;
use crate::error::{Result, SpeechError};
use crate::protocol::SynthesisOptions;
use crate::provider::{
    IflytekProvider, OwnedResultStream, RequestFrame, ResultStream, SessionUpdate, SpeechProvider,
    SpeechStream,
};
use crate::settings::SpeechSettings;
use crate::wav;

/// A selectable synthesis voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VoiceInfo {
    pub name: &'static str,
    pub description: &'static str,
}

pub const VOICES: &[VoiceInfo] = &[
    VoiceInfo {
        name: "xiaoyan",
        description: "小燕 - 温柔女声 (gentle female)",
    },
    VoiceInfo {
        name: "xiaoyu",
        description: "小宇 - 清新男声 (fresh male)",
    },
    VoiceInfo {
        name: "xiaoxin",
        description: "小欣 - 甜美女声 (sweet female)",
    },
    VoiceInfo {
        name: "xiaofeng",
        description: "小峰 - 成熟男声 (mature male)",
    },
];

/// Accepted range for [`SynthesisOptions::with_speed_factor`].
pub const SPEED_FACTOR_RANGE: (f32, f32) = (0.5, 2.0);

/// Voice catalogue returned by [`SpeechService::voices`].
#[derive(Debug, Clone, Serialize)]
pub struct VoiceCatalogue {
    pub voices: &'static [VoiceInfo],
    pub default_voice: String,
    pub speed_range: (f32, f32),
    pub default_speed: u8,
}

/// Configuration-only readiness check. No network traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub config: bool,
    pub asr_available: bool,
    pub tts_available: bool,
}

pub struct SpeechService {
    provider: Arc<dyn SpeechProvider>,
    settings: Arc<SpeechSettings>,
}

impl SpeechService {
    pub fn new(provider: Arc<dyn SpeechProvider>, settings: Arc<SpeechSettings>) -> Self {
        Self { provider, settings }
    }

    /// Build an iFlytek-backed service. Fails fast when credentials are missing.
    pub fn from_config(config: &SpeechConfig) -> Result<Self> {
        let provider = IflytekProvider::from_config(config)?;
        let settings = provider.settings().clone();
        Ok(Self::new(Arc::new(provider), settings))
    }

    pub fn settings(&self) -> &SpeechSettings {
        &self.settings
    }

    pub fn provider_id(&self) -> &str {
        self.provider.id()
    }

    /// Reject empty audio and audio longer than the configured limit.
    ///
    /// Duration is estimated for 16-bit mono PCM at the ASR sample rate.
    pub fn validate_audio(&self, audio: &[u8]) -> Result<()> {
        if audio.is_empty() {
            return Err(SpeechError::InvalidInput("audio is empty".into()));
        }
        let bytes_per_second = f64::from(self.settings.asr.sample_rate) * 2.0;
        let seconds = audio.len() as f64 / bytes_per_second;
        let max = self.settings.limits.max_audio_seconds;
        if seconds > f64::from(max) {
            return Err(SpeechError::InvalidInput(format!(
                "audio duration {seconds:.1}s exceeds the {max}s limit"
            )));
        }
        Ok(())
    }

    /// Reject blank text and text longer than the configured character limit.
    pub fn validate_text(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Err(SpeechError::InvalidInput("text is empty".into()));
        }
        let chars = text.chars().count();
        let max = self.settings.limits.max_text_chars;
        if chars > max {
            return Err(SpeechError::InvalidInput(format!(
                "text length {chars} exceeds the {max} character limit"
            )));
        }
        Ok(())
    }

    /// Default synthesis options from config.
    pub fn default_options(&self) -> SynthesisOptions {
        SynthesisOptions::from_config(&self.settings.tts)
    }

    pub fn voices(&self) -> VoiceCatalogue {
        VoiceCatalogue {
            voices: VOICES,
            default_voice: self.settings.tts.voice.clone(),
            speed_range: SPEED_FACTOR_RANGE,
            default_speed: self.settings.tts.speed,
        }
    }

    /// Readiness derived from configuration alone.
    pub fn health(config: &SpeechConfig) -> HealthReport {
        let credential_ok = Credential::from_config(config).is_ok();
        HealthReport {
            config: credential_ok,
            asr_available: credential_ok && AuthSigner::new(&config.asr.url).is_ok(),
            tts_available: credential_ok && AuthSigner::new(&config.tts.url).is_ok(),
        }
    }

    /// Recognize a complete raw PCM buffer (16-bit mono).
    pub async fn recognize(&self, audio: &[u8]) -> Result<Transcript> {
        self.validate_audio(audio)?;
        let mut session = self.provider.recognition_session()?;
        let mut results = session.receive_results()?;
        session.open().await?;
        debug!(session_id = session.id(), bytes = audio.len(), "Recognizing audio");

        let queued = queue_audio(session.as_mut(), audio, self.settings.asr.frame_bytes).await;
        // A refused send on a terminal session still leaves its outcome in the stream.
        let outcome = match queued {
            Err(e) if !session.state().is_terminal() => Err(e),
            _ => final_transcript(&mut results).await,
        };
        session.close().await?;

        let transcript = outcome?;
        info!(
            chars = transcript.text.chars().count(),
            confidence = transcript.confidence,
            "Recognition finished"
        );
        Ok(transcript)
    }

    /// Recognize incrementally. The returned stream owns its session.
    pub async fn recognize_stream(&self, audio: &[u8]) -> Result<ResultStream> {
        self.validate_audio(audio)?;
        let mut session = self.provider.recognition_session()?;
        session.open().await?;
        queue_audio(session.as_mut(), audio, self.settings.asr.frame_bytes).await?;
        Ok(Box::pin(OwnedResultStream::new(session)?))
    }

    /// Synthesize `text` into raw 16-bit mono PCM.
    pub async fn synthesize(&self, text: &str, options: &SynthesisOptions) -> Result<Vec<u8>> {
        self.validate_text(text)?;
        let mut session = self.provider.synthesis_session(options)?;
        let mut results = session.receive_results()?;
        session.open().await?;
        debug!(
            session_id = session.id(),
            voice = %options.voice,
            chars = text.chars().count(),
            "Synthesizing text"
        );

        let sent = session.send_frame(RequestFrame::Text(text.to_string())).await;
        let outcome = match sent {
            Err(e) if !session.state().is_terminal() => Err(e),
            _ => collect_audio(&mut results).await,
        };
        session.close().await?;

        let audio = outcome?;
        info!(bytes = audio.len(), "Synthesis finished");
        Ok(audio)
    }

    /// Synthesize and wrap the PCM in a WAV container.
    pub async fn synthesize_wav(&self, text: &str, options: &SynthesisOptions) -> Result<Vec<u8>> {
        let pcm = self.synthesize(text, options).await?;
        wav::wrap_l16_mono(&pcm, self.settings.tts.sample_rate)
    }

    /// Synthesize incrementally. The returned stream owns its session.
    pub async fn synthesize_stream(
        &self,
        text: &str,
        options: &SynthesisOptions,
    ) -> Result<ResultStream> {
        self.validate_text(text)?;
        let mut session = self.provider.synthesis_session(options)?;
        session.open().await?;
        session
            .send_frame(RequestFrame::Text(text.to_string()))
            .await?;
        Ok(Box::pin(OwnedResultStream::new(session)?))
    }
}

async fn queue_audio(session: &mut dyn SpeechStream, audio: &[u8], frame_bytes: usize) -> Result<()> {
    let mut frames = 0usize;
    for frame in chunker::frames(audio, frame_bytes)? {
        session.send_frame(RequestFrame::Audio(frame)).await?;
        frames += 1;
    }
    debug!(frames, "Queued audio frames");
    Ok(())
}

async fn final_transcript(results: &mut ResultStream) -> Result<Transcript> {
    while let Some(update) = results.next().await {
        if let SessionUpdate::Recognition(update) = update? {
            if update.is_final {
                return Ok(Transcript {
                    text: update.text,
                    confidence: update.confidence,
                });
            }
        }
    }
    Err(SpeechError::Connection(
        "result stream ended before the final result".into(),
    ))
}

async fn collect_audio(results: &mut ResultStream) -> Result<Vec<u8>> {
    let mut audio = Vec::new();
    while let Some(update) = results.next().await {
        if let SessionUpdate::Synthesis(update) = update? {
            audio.extend_from_slice(&update.audio);
            if update.is_final {
                return Ok(audio);
            }
        }
    }
    Err(SpeechError::Connection(
        "result stream ended before synthesis completed".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{RecognitionUpdate, SynthesisUpdate};
    use crate::testing::ScriptedProvider;

    fn rec(text: &str, total: &str, confidence: f32, is_final: bool) -> Result<SessionUpdate> {
        Ok(SessionUpdate::Recognition(RecognitionUpdate {
            fragment: text.into(),
            text: total.into(),
            confidence,
            is_final,
        }))
    }

    fn service(provider: Arc<ScriptedProvider>) -> SpeechService {
        SpeechService::new(provider, Arc::new(SpeechSettings::default()))
    }

    #[tokio::test]
    async fn test_recognize_returns_final_transcript() {
        let provider = ScriptedProvider::single(vec![
            rec("你好", "你好", 0.8, false),
            rec("世界", "你好世界", 0.95, true),
        ]);
        let svc = service(provider.clone());
        let transcript = svc.recognize(&[0u8; 3000]).await.unwrap();
        assert_eq!(transcript.text, "你好世界");
        assert!((transcript.confidence - 0.95).abs() < f32::EPSILON);

        let sent = provider.sent.lock().unwrap();
        assert_eq!(sent.len(), 3);
    }

    #[tokio::test]
    async fn test_recognize_surfaces_protocol_error() {
        let provider = ScriptedProvider::single(vec![Err(SpeechError::Protocol {
            code: 10000,
            message: "invalid parameter".into(),
        })]);
        let err = service(provider).recognize(&[1u8; 100]).await.unwrap_err();
        assert!(matches!(err, SpeechError::Protocol { code: 10000, .. }));
    }

    #[tokio::test]
    async fn test_recognize_without_final_is_error() {
        let provider = ScriptedProvider::single(vec![rec("a", "a", 0.5, false)]);
        let err = service(provider).recognize(&[1u8; 100]).await.unwrap_err();
        assert!(matches!(err, SpeechError::Connection(_)));
    }

    #[tokio::test]
    async fn test_synthesize_concatenates_audio() {
        let provider = ScriptedProvider::single(vec![
            Ok(SessionUpdate::Synthesis(SynthesisUpdate {
                audio: vec![1, 0],
                total_bytes: 2,
                is_final: false,
            })),
            Ok(SessionUpdate::Synthesis(SynthesisUpdate {
                audio: vec![2, 0],
                total_bytes: 4,
                is_final: true,
            })),
        ]);
        let svc = service(provider.clone());
        let options = svc.default_options();
        let wav_bytes = svc.synthesize_wav("你好", &options).await.unwrap();
        let (spec, pcm) = wav::read_wav(&wav_bytes).unwrap();
        assert_eq!(spec.sample_rate, 16_000);
        assert_eq!(pcm, vec![1, 0, 2, 0]);

        let sent = provider.sent.lock().unwrap();
        assert_eq!(sent.as_slice(), &[RequestFrame::Text("你好".into())]);
    }

    #[tokio::test]
    async fn test_recognize_stream_yields_updates() {
        let provider = ScriptedProvider::single(vec![
            rec("a", "a", 0.5, false),
            rec("b", "ab", 0.6, true),
        ]);
        let svc = service(provider);
        let updates: Vec<_> = svc
            .recognize_stream(&[0u8; 10])
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(updates.len(), 2);
        assert!(updates[1].as_ref().unwrap().is_final());
    }

    #[test]
    fn test_validate_audio_limits() {
        let svc = service(ScriptedProvider::single(vec![]));
        assert!(matches!(svc.validate_audio(&[]), Err(SpeechError::InvalidInput(_))));
        // 60s at 16kHz 16-bit mono is exactly the limit.
        assert!(svc.validate_audio(&vec![0u8; 16_000 * 2 * 60]).is_ok());
        assert!(svc.validate_audio(&vec![0u8; 16_000 * 2 * 60 + 2]).is_err());
    }

    #[test]
    fn test_validate_text_limits() {
        let svc = service(ScriptedProvider::single(vec![]));
        assert!(svc.validate_text("   ").is_err());
        assert!(svc.validate_text(&"字".repeat(1000)).is_ok());
        assert!(svc.validate_text(&"字".repeat(1001)).is_err());
    }

    #[tokio::test]
    async fn test_invalid_input_never_opens_session() {
        let provider = ScriptedProvider::single(vec![]);
        let svc = service(provider.clone());
        assert!(svc.synthesize("", &SynthesisOptions::default()).await.is_err());
        assert!(provider.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_voice_catalogue() {
        let svc = service(ScriptedProvider::single(vec![]));
        let catalogue = svc.voices();
        assert_eq!(catalogue.default_voice, "xiaoyan");
        let names: Vec<_> = catalogue.voices.iter().map(|v| v.name).collect();
        assert_eq!(names, vec!["xiaoyan", "xiaoyu", "xiaoxin", "xiaofeng"]);
    }

    #[test]
    fn test_health_reflects_config() {
        let config = SpeechConfig {
            app_id: Some("app".into()),
            api_key: Some("key".into()),
            api_secret: Some("secret".into()),
            ..Default::default()
        };
        assert_eq!(
            SpeechService::health(&config),
            HealthReport {
                config: true,
                asr_available: true,
                tts_available: true,
            }
        );

        let mut broken = config.clone();
        broken.tts.url = "not a url".into();
        assert!(!SpeechService::health(&broken).tts_available);
    }
}
