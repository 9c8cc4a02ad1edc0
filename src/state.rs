//! Shared application state.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::ServerConfig;

/// State shared by every route.
#[derive(Debug)]
pub struct AppState {
    pub config: ServerConfig,
    active_calls: AtomicUsize,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            active_calls: AtomicUsize::new(0),
        })
    }

    /// Number of calls currently being relayed.
    pub fn active_calls(&self) -> usize {
        self.active_calls.load(Ordering::Relaxed)
    }

    /// Count a call as active until the returned guard is dropped.
    pub fn track_call(self: &Arc<Self>) -> CallGuard {
        self.active_calls.fetch_add(1, Ordering::Relaxed);
        CallGuard {
            state: self.clone(),
        }
    }
}

/// Keeps a call counted in [`AppState::active_calls`].
pub struct CallGuard {
    state: Arc<AppState>,
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.state.active_calls.fetch_sub(1, Ordering::Relaxed);
    }
}
