//! Speech streaming gateway: signed WebSocket sessions for iFlytek-style
//! streaming ASR and TTS, audio framing, result aggregation and WAV packaging.

pub mod aggregator;
pub mod assistant;
pub mod auth;
pub mod chunker;
pub mod error;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod protocol;
pub mod provider;
pub mod service;
pub mod session;
pub mod settings;
pub mod state;
pub mod wav;

#[cfg(test)]
mod testing;

pub use aggregator::{RecognitionUpdate, SynthesisUpdate, Transcript};
pub use auth::{AuthSigner, Credential, SignedEndpoint};
pub use chunker::{AudioFrame, FrameStatus};
pub use error::{Result, SpeechError};
pub use protocol::SynthesisOptions;
pub use provider::{
    IflytekProvider, RequestFrame, ResultStream, SessionUpdate, SpeechProvider, SpeechStream,
};
pub use service::SpeechService;
pub use session::{SessionKind, StreamSession};
pub use settings::SpeechSettings;
pub use state::StreamState;
