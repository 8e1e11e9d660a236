//! Voice turn pipeline: recognize, answer, speak.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::aggregator::Transcript;
use crate::error::SpeechError;
use crate::protocol::SynthesisOptions;
use crate::service::SpeechService;

/// Reply used when nothing intelligible was recognized.
pub const DEFAULT_FALLBACK_REPLY: &str = "抱歉，我没有听清楚，请再说一遍。";

/// Produces answer text for a recognized question.
#[async_trait]
pub trait QuestionAnswerer: Send + Sync {
    async fn answer(&self, question: &str) -> anyhow::Result<String>;
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Speech(#[from] SpeechError),

    #[error("Answer generation failed: {0:#}")]
    Answer(anyhow::Error),
}

/// Result of one spoken exchange.
#[derive(Debug, Clone, Serialize)]
pub struct VoiceReply {
    pub transcript: Transcript,
    pub answer: String,
    /// WAV audio of `answer`. `None` when synthesis failed.
    #[serde(skip)]
    pub audio_wav: Option<Vec<u8>>,
}

pub struct VoiceAssistant {
    speech: Arc<SpeechService>,
    answerer: Arc<dyn QuestionAnswerer>,
    options: SynthesisOptions,
    fallback_reply: String,
}

impl VoiceAssistant {
    pub fn new(speech: Arc<SpeechService>, answerer: Arc<dyn QuestionAnswerer>) -> Self {
        let options = speech.default_options();
        Self {
            speech,
            answerer,
            options,
            fallback_reply: DEFAULT_FALLBACK_REPLY.to_string(),
        }
    }

    pub fn with_options(mut self, options: SynthesisOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_fallback_reply(mut self, reply: impl Into<String>) -> Self {
        self.fallback_reply = reply.into();
        self
    }

    /// Run one turn on raw 16-bit mono PCM.
    ///
    /// Recognition errors propagate. An empty transcript skips the answerer and
    /// speaks the fallback reply. A synthesis failure after a successful answer
    /// still returns the text answer.
    pub async fn handle_turn(&self, audio: &[u8]) -> Result<VoiceReply, TurnError> {
        let transcript = self.speech.recognize(audio).await?;
        let question = transcript.text.trim();

        let answer = if question.is_empty() {
            debug!("Empty transcript, using fallback reply");
            self.fallback_reply.clone()
        } else {
            self.answerer
                .answer(question)
                .await
                .map_err(TurnError::Answer)?
        };

        let audio_wav = match self.speech.synthesize_wav(&answer, &self.options).await {
            Ok(wav) => Some(wav),
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "Answer synthesis failed, returning text only");
                None
            }
        };

        Ok(VoiceReply {
            transcript,
            answer,
            audio_wav,
        })
    }
}
