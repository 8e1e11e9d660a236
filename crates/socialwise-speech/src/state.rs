//! Session lifecycle.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::watch;

use crate::error::{Result, SpeechError};

/// Lifecycle of one [`StreamSession`](crate::session::StreamSession).
///
/// Moves forward one step at a time along
/// `Init -> Connecting -> Open -> Exchanging -> AwaitingFinal -> Completed`.
/// `Failed` is reachable from any non-terminal state. Both `Completed` and
/// `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Init,
    Connecting,
    Open,
    Exchanging,
    AwaitingFinal,
    Completed,
    Failed,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Successor on the success path.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Init => Some(Self::Connecting),
            Self::Connecting => Some(Self::Open),
            Self::Open => Some(Self::Exchanging),
            Self::Exchanging => Some(Self::AwaitingFinal),
            Self::AwaitingFinal => Some(Self::Completed),
            Self::Completed | Self::Failed => None,
        }
    }

    fn rank(self) -> u8 {
        match self {
            Self::Init => 0,
            Self::Connecting => 1,
            Self::Open => 2,
            Self::Exchanging => 3,
            Self::AwaitingFinal => 4,
            Self::Completed => 5,
            Self::Failed => 6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Exchanging => "exchanging",
            Self::AwaitingFinal => "awaiting_final",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared state cell for one session. Clones observe and drive the same state.
///
/// Watch subscribers only see the latest state; every step taken is also
/// appended to a history so the full path stays inspectable.
#[derive(Debug, Clone)]
pub(crate) struct StateCell {
    tx: Arc<watch::Sender<StreamState>>,
    history: Arc<Mutex<Vec<StreamState>>>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(StreamState::Init);
        Self {
            tx: Arc::new(tx),
            history: Arc::new(Mutex::new(vec![StreamState::Init])),
        }
    }

    pub(crate) fn get(&self) -> StreamState {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<StreamState> {
        self.tx.subscribe()
    }

    /// Every state entered so far, starting with `Init`.
    pub(crate) fn history(&self) -> Vec<StreamState> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // Only called under the watch write lock, so history order matches state order.
    fn record(&self, state: StreamState) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(state);
    }

    /// Take exactly one step forward to `to`.
    pub(crate) fn advance(&self, to: StreamState) -> Result<()> {
        let mut from = StreamState::Init;
        let moved = self.tx.send_if_modified(|state| {
            from = *state;
            if state.next() == Some(to) {
                *state = to;
                self.record(to);
                true
            } else {
                false
            }
        });
        if moved {
            tracing::debug!(from = %from, to = %to, "Session state transition");
            Ok(())
        } else {
            Err(SpeechError::InvalidState(format!(
                "cannot move from {from} to {to}"
            )))
        }
    }

    /// Step forward through every intermediate state until `target` is reached.
    ///
    /// The whole walk happens under one lock and publishes a single change.
    /// No-op when already at or past `target`. Fails when the session is terminal.
    pub(crate) fn advance_to(&self, target: StreamState) -> Result<()> {
        let mut from = StreamState::Init;
        let mut refused = false;
        let moved = self.tx.send_if_modified(|state| {
            from = *state;
            if *state == target || (!state.is_terminal() && state.rank() > target.rank()) {
                return false;
            }
            if state.is_terminal() || target == StreamState::Failed {
                refused = true;
                return false;
            }
            let mut current = *state;
            while current != target {
                let Some(next) = current.next() else { break };
                self.record(next);
                current = next;
            }
            *state = current;
            true
        });
        if refused {
            return Err(SpeechError::InvalidState(format!(
                "cannot move from {from} to {target}"
            )));
        }
        if moved {
            tracing::debug!(from = %from, to = %target, "Session state transition");
        }
        Ok(())
    }

    /// Enter `Failed`. Returns false when the session was already terminal.
    pub(crate) fn fail(&self) -> bool {
        let mut from = StreamState::Init;
        let moved = self.tx.send_if_modified(|state| {
            from = *state;
            if state.is_terminal() {
                false
            } else {
                *state = StreamState::Failed;
                self.record(StreamState::Failed);
                true
            }
        });
        if moved {
            tracing::debug!(from = %from, to = "failed", "Session state transition");
        }
        moved
    }
}
