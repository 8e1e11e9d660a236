//! One duplex exchange with the remote speech endpoint.
//!
//! `open()` signs a fresh URL, performs the WebSocket handshake and spawns
//! two tasks over the split connection: a send loop draining the outbound
//! queue in order, and a receive loop feeding the aggregator and forwarding
//! one update per server message. The tasks share only the session state and
//! a cancellation token; the receive loop cancels on any terminal outcome,
//! which stops the send loop and closes the connection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, trace, warn};
use uuid::Uuid;

use crate::aggregator::{RecognitionAggregator, SynthesisAggregator};
use crate::auth::{AuthSigner, Credential};
use crate::error::{Result, SpeechError};
use crate::protocol::{self, SynthesisOptions};
use crate::provider::{RequestFrame, ResultStream, SessionUpdate, SpeechStream};
use crate::settings::SpeechSettings;
use crate::state::{StateCell, StreamState};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;
type UpdateSender = mpsc::UnboundedSender<Result<SessionUpdate>>;

/// Which endpoint a session talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    Recognition,
    Synthesis,
}

impl SessionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Recognition => "asr",
            Self::Synthesis => "tts",
        }
    }
}

struct Outbound {
    text: String,
    sequence: u64,
    is_end: bool,
    paced: bool,
}

/// A single ASR or TTS exchange over one WebSocket connection.
///
/// Not restartable: once the session is terminal a new one must be created.
/// Dropping the session cancels it and closes its connection.
pub struct StreamSession {
    id: String,
    kind: SessionKind,
    credential: Arc<Credential>,
    settings: Arc<SpeechSettings>,
    options: SynthesisOptions,
    state: StateCell,
    cancel: CancellationToken,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    updates_tx: Option<UpdateSender>,
    updates_rx: Option<mpsc::UnboundedReceiver<Result<SessionUpdate>>>,
    next_sequence: u64,
    request_queued: bool,
    tasks: Vec<JoinHandle<()>>,
}

impl StreamSession {
    pub fn recognition(credential: Arc<Credential>, settings: Arc<SpeechSettings>) -> Self {
        Self::new(
            SessionKind::Recognition,
            credential,
            settings,
            SynthesisOptions::default(),
        )
    }

    pub fn synthesis(
        credential: Arc<Credential>,
        settings: Arc<SpeechSettings>,
        options: SynthesisOptions,
    ) -> Self {
        Self::new(SessionKind::Synthesis, credential, settings, options)
    }

    fn new(
        kind: SessionKind,
        credential: Arc<Credential>,
        settings: Arc<SpeechSettings>,
        options: SynthesisOptions,
    ) -> Self {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            credential,
            settings,
            options,
            state: StateCell::new(),
            cancel: CancellationToken::new(),
            outbound: None,
            updates_tx: Some(updates_tx),
            updates_rx: Some(updates_rx),
            next_sequence: 0,
            request_queued: false,
            tasks: Vec::new(),
        }
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    /// Watch the current state. Receivers see the latest value only.
    pub fn subscribe_state(&self) -> watch::Receiver<StreamState> {
        self.state.subscribe()
    }

    /// Every state this session has entered, in order, starting with `Init`.
    pub fn state_history(&self) -> Vec<StreamState> {
        self.state.history()
    }

    fn endpoint_url(&self) -> &str {
        match self.kind {
            SessionKind::Recognition => &self.settings.asr.url,
            SessionKind::Synthesis => &self.settings.tts.url,
        }
    }

    async fn connect(&self) -> Result<WsStream> {
        let signer = AuthSigner::new(self.endpoint_url())?;
        let endpoint = signer.sign(&self.credential, Utc::now())?;
        debug!(
            session_id = %self.id,
            kind = self.kind.as_str(),
            host = endpoint.host(),
            "Connecting to speech endpoint"
        );

        let timeout = self.settings.connect_timeout();
        match tokio::time::timeout(timeout, connect_async(endpoint.into_url())).await {
            Err(_) => Err(SpeechError::Timeout(timeout)),
            Ok(Err(e)) => Err(handshake_error(e)),
            Ok(Ok((ws, _response))) => Ok(ws),
        }
    }
}

fn handshake_error(error: tungstenite::Error) -> SpeechError {
    match error {
        tungstenite::Error::Http(response) => {
            let status = response.status();
            let body = response
                .body()
                .as_ref()
                .map(|b| String::from_utf8_lossy(&b[..]).into_owned())
                .unwrap_or_default();
            if matches!(status.as_u16(), 401 | 403) {
                SpeechError::Auth(format!("handshake rejected with HTTP {status}: {body}"))
            } else {
                SpeechError::Connection(format!("handshake failed with HTTP {status}: {body}"))
            }
        }
        other => SpeechError::Connection(other.to_string()),
    }
}

#[async_trait]
impl SpeechStream for StreamSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn open(&mut self) -> Result<()> {
        self.state.advance(StreamState::Connecting)?;
        let started = Instant::now();
        let deadline = started + self.settings.session_timeout();

        let ws = match self.connect().await {
            Ok(ws) => ws,
            Err(e) => {
                warn!(session_id = %self.id, kind = e.kind(), error = %e, "Speech handshake failed");
                self.state.fail();
                self.updates_tx = None;
                #[cfg(feature = "metrics")]
                crate::metrics::record_outcome(self.kind, e.kind());
                return Err(e);
            }
        };
        self.state.advance(StreamState::Open)?;
        info!(session_id = %self.id, kind = self.kind.as_str(), "Speech session open");

        #[cfg(feature = "metrics")]
        crate::metrics::record_session_start(self.kind);

        let Some(updates) = self.updates_tx.take() else {
            return Err(SpeechError::InvalidState("session has no result channel".into()));
        };
        let (sink, source) = ws.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        self.outbound = Some(outbound_tx);

        let span = info_span!("speech_session", session_id = %self.id, kind = self.kind.as_str());
        let ctx = LoopContext {
            kind: self.kind,
            state: self.state.clone(),
            cancel: self.cancel.clone(),
        };

        let writer = SendLoop {
            ctx: ctx.clone(),
            frame_interval: self.settings.frame_interval(),
            close_timeout: self.settings.connect_timeout(),
            updates: updates.clone(),
        };
        self.tasks.push(tokio::spawn(
            writer.run(sink, outbound_rx).instrument(span.clone()),
        ));

        let reader = ReceiveLoop {
            ctx,
            idle_timeout: self.settings.idle_timeout(),
            budget: self.settings.session_timeout(),
            deadline,
            started,
            updates,
        };
        self.tasks.push(tokio::spawn(reader.run(source).instrument(span)));
        Ok(())
    }

    async fn send_frame(&mut self, frame: RequestFrame) -> Result<()> {
        let state = self.state.get();
        if state.is_terminal() {
            return Err(SpeechError::InvalidState(format!(
                "session {} is {state}",
                self.id
            )));
        }
        if self.request_queued {
            return Err(SpeechError::InvalidState(
                "final frame already queued for this session".into(),
            ));
        }

        let app_id = self.credential.app_id();
        let outbound = match (self.kind, frame) {
            (SessionKind::Recognition, RequestFrame::Audio(frame)) => {
                if frame.sequence_index != self.next_sequence {
                    return Err(SpeechError::InvalidState(format!(
                        "expected frame {} but got {}",
                        self.next_sequence, frame.sequence_index
                    )));
                }
                Outbound {
                    text: protocol::recognition_frame(&frame, app_id, &self.settings.asr)?,
                    sequence: frame.sequence_index,
                    is_end: frame.is_end(),
                    paced: frame.sequence_index > 0,
                }
            }
            (SessionKind::Synthesis, RequestFrame::Text(text)) => Outbound {
                text: protocol::synthesis_request(&text, app_id, &self.settings.tts, &self.options)?,
                sequence: 0,
                is_end: true,
                paced: false,
            },
            (SessionKind::Recognition, RequestFrame::Text(_)) => {
                return Err(SpeechError::InvalidState(
                    "recognition sessions accept audio frames only".into(),
                ));
            }
            (SessionKind::Synthesis, RequestFrame::Audio(_)) => {
                return Err(SpeechError::InvalidState(
                    "synthesis sessions accept a single text request".into(),
                ));
            }
        };

        let Some(tx) = self.outbound.as_ref() else {
            return Err(SpeechError::InvalidState(format!(
                "session {} is not open",
                self.id
            )));
        };
        let is_end = outbound.is_end;
        tx.send(outbound)
            .map_err(|_| SpeechError::Connection("send loop has stopped".into()))?;

        self.next_sequence += 1;
        if is_end {
            self.request_queued = true;
            self.outbound = None;
        }
        Ok(())
    }

    fn receive_results(&mut self) -> Result<ResultStream> {
        let rx = self.updates_rx.take().ok_or_else(|| {
            SpeechError::InvalidState("results already taken for this session".into())
        })?;
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn close(&mut self) -> Result<()> {
        if self.state.get() == StreamState::Init {
            self.state.fail();
        }
        self.outbound = None;
        self.updates_tx = None;
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(session_id = %self.id, error = %e, "Session task ended abnormally");
            }
        }
        debug!(session_id = %self.id, state = %self.state.get(), "Speech session closed");
        Ok(())
    }

    fn state(&self) -> StreamState {
        self.state.get()
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[derive(Clone)]
struct LoopContext {
    kind: SessionKind,
    state: StateCell,
    cancel: CancellationToken,
}

struct SendLoop {
    ctx: LoopContext,
    frame_interval: Duration,
    close_timeout: Duration,
    updates: UpdateSender,
}

impl SendLoop {
    async fn run(self, mut sink: WsSink, mut outbound: mpsc::UnboundedReceiver<Outbound>) {
        let cancel = self.ctx.cancel.clone();
        let mut sent = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = outbound.recv() => next,
            };
            let Some(frame) = next else {
                // Request fully queued; hold the connection until the session ends.
                cancel.cancelled().await;
                break;
            };

            if frame.paced && !self.frame_interval.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.frame_interval) => {}
                }
            }

            let target = if frame.is_end {
                StreamState::AwaitingFinal
            } else {
                StreamState::Exchanging
            };
            if cancel.is_cancelled() || self.ctx.state.advance_to(target).is_err() {
                break;
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = sink.send(Message::Text(frame.text.into())) => result,
            };
            if let Err(e) = result {
                warn!(sequence = frame.sequence, error = %e, "Failed to send frame");
                cancel.cancel();
                if self.ctx.state.fail() {
                    let _ = self.updates.send(Err(SpeechError::Connection(format!(
                        "failed to send frame {}: {e}",
                        frame.sequence
                    ))));
                }
                break;
            }
            sent += 1;
            trace!(sequence = frame.sequence, end = frame.is_end, "Sent frame");
        }

        // A peer that stopped reading must not stall close().
        match tokio::time::timeout(self.close_timeout, sink.send(Message::Close(None))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => trace!(error = %e, "Close frame not delivered"),
            Err(_) => debug!("Close frame timed out"),
        }
        debug!(frames = sent, kind = self.ctx.kind.as_str(), "Send loop finished");
    }
}

enum Aggregator {
    Recognition(RecognitionAggregator),
    Synthesis(SynthesisAggregator),
}

impl Aggregator {
    fn for_kind(kind: SessionKind) -> Self {
        match kind {
            SessionKind::Recognition => Self::Recognition(RecognitionAggregator::new()),
            SessionKind::Synthesis => Self::Synthesis(SynthesisAggregator::new()),
        }
    }

    fn handle(&mut self, message: &str) -> Result<SessionUpdate> {
        match self {
            Self::Recognition(agg) => {
                let fragment = protocol::parse_recognition(message)?;
                Ok(SessionUpdate::Recognition(agg.push(fragment)?))
            }
            Self::Synthesis(agg) => {
                let fragment = protocol::parse_synthesis(message)?;
                Ok(SessionUpdate::Synthesis(agg.push(fragment)?))
            }
        }
    }
}

struct ReceiveLoop {
    ctx: LoopContext,
    idle_timeout: Duration,
    budget: Duration,
    deadline: Instant,
    started: Instant,
    updates: UpdateSender,
}

impl ReceiveLoop {
    async fn run(self, mut source: WsSource) {
        let cancel = self.ctx.cancel.clone();
        let mut aggregator = Aggregator::for_kind(self.ctx.kind);
        let mut messages = 0u64;

        let outcome: Result<()> = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    break Err(SpeechError::Connection("session cancelled".into()));
                }
                _ = tokio::time::sleep_until(self.deadline) => {
                    break Err(SpeechError::Timeout(self.budget));
                }
                next = tokio::time::timeout(self.idle_timeout, source.next()) => next,
            };

            let message = match next {
                Err(_) => {
                    trace!("Idle receive tick");
                    continue;
                }
                Ok(None) => {
                    break Err(SpeechError::Connection(
                        "connection closed before completion".into(),
                    ));
                }
                Ok(Some(Err(e))) => break Err(SpeechError::Connection(e.to_string())),
                Ok(Some(Ok(message))) => message,
            };

            let handled = match message {
                Message::Text(text) => aggregator.handle(text.as_str()),
                Message::Binary(data) => match std::str::from_utf8(&data) {
                    Ok(text) => aggregator.handle(text),
                    Err(_) => Err(SpeechError::Decoding(format!(
                        "unexpected binary frame of {} bytes",
                        data.len()
                    ))),
                },
                Message::Close(frame) => {
                    break Err(SpeechError::Connection(format!(
                        "server closed the connection before completion: {frame:?}"
                    )));
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            };
            messages += 1;

            let update = match handled {
                Ok(update) => update,
                Err(e) => break Err(e),
            };
            if update.is_final() {
                // Server-side completion may arrive while the sender is still
                // exchanging; walk through AwaitingFinal before completing.
                if let Err(e) = self.ctx.state.advance_to(StreamState::Completed) {
                    break Err(e);
                }
                let _ = self.updates.send(Ok(update));
                break Ok(());
            }
            let _ = self.updates.send(Ok(update));
        };

        let outcome_label = match outcome {
            Ok(()) => {
                info!(messages, "Speech session completed");
                "completed"
            }
            Err(e) => {
                let label = e.kind();
                // Stop the sender before publishing Failed so no frame follows it.
                cancel.cancel();
                if self.ctx.state.fail() {
                    warn!(messages, kind = label, error = %e, "Speech session failed");
                    let _ = self.updates.send(Err(e));
                }
                label
            }
        };
        cancel.cancel();
        debug!(
            outcome = outcome_label,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Receive loop finished"
        );

        #[cfg(feature = "metrics")]
        crate::metrics::record_session_end(
            self.ctx.kind,
            outcome_label,
            self.started.elapsed().as_secs_f64(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::chunk;

    fn session() -> StreamSession {
        StreamSession::recognition(
            Arc::new(Credential::new("app", "key", "secret").unwrap()),
            Arc::new(SpeechSettings::default()),
        )
    }

    #[tokio::test]
    async fn test_send_before_open_is_rejected() {
        let mut s = session();
        let frame = chunk(&[0u8; 10], 1280).unwrap().remove(0);
        let err = s.send_frame(RequestFrame::Audio(frame)).await.unwrap_err();
        assert!(matches!(err, SpeechError::InvalidState(_)));
        assert_eq!(s.state(), StreamState::Init);
    }

    #[tokio::test]
    async fn test_text_rejected_on_recognition_session() {
        let mut s = session();
        let err = s.send_frame(RequestFrame::Text("hi".into())).await.unwrap_err();
        assert!(matches!(err, SpeechError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_results_can_be_taken_once() {
        let mut s = session();
        assert!(s.receive_results().is_ok());
        assert!(matches!(s.receive_results(), Err(SpeechError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_close_before_open_fails_session() {
        let mut s = session();
        let mut results = s.receive_results().unwrap();
        s.close().await.unwrap();
        assert_eq!(s.state(), StreamState::Failed);
        assert!(results.next().await.is_none());
        assert!(s.open().await.is_err());
    }

    #[tokio::test]
    async fn test_refused_connection_fails_session() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut settings = SpeechSettings::default();
        settings.asr.url = format!("ws://127.0.0.1:{port}/v2/iat");
        let mut s = StreamSession::recognition(
            Arc::new(Credential::new("app", "key", "secret").unwrap()),
            Arc::new(settings),
        );
        let err = s.open().await.unwrap_err();
        assert!(matches!(err, SpeechError::Connection(_)), "got {err:?}");
        assert_eq!(s.state(), StreamState::Failed);
    }

    #[tokio::test]
    async fn test_invalid_endpoint_is_configuration_error() {
        let mut settings = SpeechSettings::default();
        settings.asr.url = "http://not-a-websocket".into();
        let mut s = StreamSession::recognition(
            Arc::new(Credential::new("app", "key", "secret").unwrap()),
            Arc::new(settings),
        );
        let err = s.open().await.unwrap_err();
        assert!(matches!(err, SpeechError::Configuration(_)));
        assert_eq!(s.state(), StreamState::Failed);
    }
}
