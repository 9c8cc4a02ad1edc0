//! Per-call turn-taking state shared by both pumps.
//!
//! The whole record sits behind one async mutex. Barge-in needs the check of
//! `responding`, the `response.cancel` send and the clear to happen as one step
//! relative to the AI pump, so [`TurnState::try_interrupt`] holds the lock
//! across the send.

use std::future::Future;

use tokio::sync::Mutex;

/// Turn-taking phase of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnPhase {
    /// The caller holds the floor
    #[default]
    Idle,
    /// The assistant is generating a response
    Responding,
}

#[derive(Debug, Default)]
struct TurnInner {
    stream_sid: Option<String>,
    responding: bool,
}

/// Shared turn state for one call.
#[derive(Debug, Default)]
pub struct TurnState {
    inner: Mutex<TurnInner>,
}

impl TurnState {
    /// Fresh state: no stream identifier, not responding.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the stream identifier from a telephony `start` event.
    ///
    /// Returns the identifier it replaced, if any.
    pub async fn set_stream_sid(&self, stream_sid: String) -> Option<String> {
        self.inner.lock().await.stream_sid.replace(stream_sid)
    }

    /// Current stream identifier, empty when no `start` has been received.
    pub async fn stream_sid(&self) -> String {
        self.inner
            .lock()
            .await
            .stream_sid
            .clone()
            .unwrap_or_default()
    }

    /// Current phase.
    pub async fn phase(&self) -> TurnPhase {
        if self.inner.lock().await.responding {
            TurnPhase::Responding
        } else {
            TurnPhase::Idle
        }
    }

    /// `Idle → Responding`. Returns `false` if a response was already active.
    pub async fn begin_response(&self) -> bool {
        let mut turn = self.inner.lock().await;
        let changed = !turn.responding;
        turn.responding = true;
        changed
    }

    /// `Responding → Idle`. Returns `false` if no response was active.
    pub async fn end_response(&self) -> bool {
        let mut turn = self.inner.lock().await;
        let changed = turn.responding;
        turn.responding = false;
        changed
    }

    /// Interrupt an active response.
    ///
    /// If a response is active, `cancel` runs while the lock is held and the
    /// state is cleared whether or not it succeeds. Returns `Ok(true)` when an
    /// interruption happened, `Ok(false)` when the assistant was idle and
    /// `cancel` was not called.
    pub async fn try_interrupt<F, Fut, E>(&self, cancel: F) -> Result<bool, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let mut turn = self.inner.lock().await;
        if !turn.responding {
            return Ok(false);
        }
        turn.responding = false;
        cancel().await?;
        Ok(true)
    }
}
