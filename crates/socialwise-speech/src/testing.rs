//! In-memory provider for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::Result;
use crate::protocol::SynthesisOptions;
use crate::provider::{RequestFrame, ResultStream, SessionUpdate, SpeechProvider, SpeechStream};
use crate::state::StreamState;

type Script = Vec<Result<SessionUpdate>>;

/// Session that replays its script once the request is fully sent.
pub(crate) struct ScriptedStream {
    script: Script,
    tx: Option<mpsc::UnboundedSender<Result<SessionUpdate>>>,
    rx: Option<mpsc::UnboundedReceiver<Result<SessionUpdate>>>,
    sent: Arc<Mutex<Vec<RequestFrame>>>,
    state: StreamState,
}

#[async_trait]
impl SpeechStream for ScriptedStream {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn open(&mut self) -> Result<()> {
        self.state = StreamState::Open;
        Ok(())
    }

    async fn send_frame(&mut self, frame: RequestFrame) -> Result<()> {
        let done = match &frame {
            RequestFrame::Audio(f) => f.is_end(),
            RequestFrame::Text(_) => true,
        };
        self.sent.lock().unwrap().push(frame);
        if done {
            if let Some(tx) = self.tx.take() {
                for item in self.script.drain(..) {
                    let _ = tx.send(item);
                }
            }
            self.state = StreamState::Completed;
        }
        Ok(())
    }

    fn receive_results(&mut self) -> Result<ResultStream> {
        Ok(Box::pin(UnboundedReceiverStream::new(
            self.rx.take().unwrap(),
        )))
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }

    fn state(&self) -> StreamState {
        self.state
    }
}

/// Hands out one scripted session per call, in order.
pub(crate) struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    pub(crate) sent: Arc<Mutex<Vec<RequestFrame>>>,
}

impl ScriptedProvider {
    pub(crate) fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            sent: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub(crate) fn single(script: Script) -> Arc<Self> {
        Self::new(vec![script])
    }

    fn session(&self) -> Box<dyn SpeechStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        Box::new(ScriptedStream {
            script: self.scripts.lock().unwrap().pop_front().unwrap_or_default(),
            tx: Some(tx),
            rx: Some(rx),
            sent: self.sent.clone(),
            state: StreamState::Init,
        })
    }
}

impl SpeechProvider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }

    fn recognition_session(&self) -> Result<Box<dyn SpeechStream>> {
        Ok(self.session())
    }

    fn synthesis_session(&self, _options: &SynthesisOptions) -> Result<Box<dyn SpeechStream>> {
        Ok(self.session())
    }
}
