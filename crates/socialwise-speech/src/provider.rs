//! Speech provider abstraction.
//!
//! Callers drive sessions through [`SpeechStream`] and obtain them from a
//! [`SpeechProvider`], so an alternate backend can be substituted without
//! touching the service layer.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use pin_project_lite::pin_project;

use socialwise_core::config::SpeechConfig;

use crate::aggregator::{RecognitionUpdate, SynthesisUpdate};
use crate::auth::Credential;
use crate::chunker::AudioFrame;
use crate::error::Result;
use crate::protocol::SynthesisOptions;
use crate::session::StreamSession;
use crate::settings::SpeechSettings;
use crate::state::StreamState;

/// One outbound unit of work for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestFrame {
    /// Recognition input. Sequence indices must start at 0 and increase by one.
    Audio(AudioFrame),
    /// The single synthesis request.
    Text(String),
}

/// One inbound update, produced per data-bearing server message.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Recognition(RecognitionUpdate),
    Synthesis(SynthesisUpdate),
}

impl SessionUpdate {
    pub fn is_final(&self) -> bool {
        match self {
            Self::Recognition(u) => u.is_final,
            Self::Synthesis(u) => u.is_final,
        }
    }
}

/// Single-pass, forward-only sequence of session updates.
pub type ResultStream = Pin<Box<dyn Stream<Item = Result<SessionUpdate>> + Send>>;

/// Capability interface for one duplex speech exchange.
#[async_trait]
pub trait SpeechStream: Send {
    /// Session identifier used in logs.
    fn id(&self) -> &str;

    /// Sign, connect and start the send/receive loops.
    async fn open(&mut self) -> Result<()>;

    /// Queue one frame for the send loop.
    async fn send_frame(&mut self, frame: RequestFrame) -> Result<()>;

    /// Take the result sequence. Can be called once per session.
    fn receive_results(&mut self) -> Result<ResultStream>;

    /// Close the connection. Before completion this fails the session.
    async fn close(&mut self) -> Result<()>;

    fn state(&self) -> StreamState;
}

pin_project! {
    /// Result stream that owns its session. Dropping it closes the connection.
    pub struct OwnedResultStream {
        session: Box<dyn SpeechStream>,
        #[pin]
        inner: ResultStream,
    }
}

impl OwnedResultStream {
    /// Take the session's results and bind them to the session's lifetime.
    pub fn new(mut session: Box<dyn SpeechStream>) -> Result<Self> {
        let inner = session.receive_results()?;
        Ok(Self { session, inner })
    }

    pub fn session_id(&self) -> &str {
        self.session.id()
    }

    pub fn state(&self) -> StreamState {
        self.session.state()
    }
}

impl Stream for OwnedResultStream {
    type Item = Result<SessionUpdate>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}

/// Factory for speech sessions.
pub trait SpeechProvider: Send + Sync {
    /// Provider identifier (e.g., "iflytek").
    fn id(&self) -> &str;

    fn recognition_session(&self) -> Result<Box<dyn SpeechStream>>;

    fn synthesis_session(&self, options: &SynthesisOptions) -> Result<Box<dyn SpeechStream>>;
}

/// iFlytek streaming ASR/TTS over signed WebSocket connections.
#[derive(Debug, Clone)]
pub struct IflytekProvider {
    credential: Arc<Credential>,
    settings: Arc<SpeechSettings>,
}

impl IflytekProvider {
    pub fn new(credential: Arc<Credential>, settings: Arc<SpeechSettings>) -> Self {
        Self {
            credential,
            settings,
        }
    }

    /// Resolve credentials and settings from config. Fails fast on missing credentials.
    pub fn from_config(config: &SpeechConfig) -> Result<Self> {
        Ok(Self::new(
            Arc::new(Credential::from_config(config)?),
            Arc::new(SpeechSettings::from_config(config)),
        ))
    }

    pub fn settings(&self) -> &Arc<SpeechSettings> {
        &self.settings
    }
}

impl SpeechProvider for IflytekProvider {
    fn id(&self) -> &str {
        "iflytek"
    }

    fn recognition_session(&self) -> Result<Box<dyn SpeechStream>> {
        Ok(Box::new(StreamSession::recognition(
            self.credential.clone(),
            self.settings.clone(),
        )))
    }

    fn synthesis_session(&self, options: &SynthesisOptions) -> Result<Box<dyn SpeechStream>> {
        Ok(Box::new(StreamSession::synthesis(
            self.credential.clone(),
            self.settings.clone(),
            options.clone(),
        )))
    }
}
