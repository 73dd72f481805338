//! Connectivity detection and state management.
//!
//! The monitor is an injectable state holder: the host environment reports
//! network changes through [`ConnectivityMonitor::handle_online`] and
//! [`ConnectivityMonitor::handle_offline`], and everything else observes the
//! state through a `watch` channel.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;

pub use crate::types::ConnectivityState;

/// Something that can tell whether the API is reachable right now.
#[async_trait::async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OfflineError {
    #[error("client is offline; operation requires network connection")]
    Offline,
}

/// Current connectivity plus change notifications.
pub struct ConnectivityMonitor {
    state: watch::Sender<ConnectivityState>,
    probe: Option<Arc<dyn ReachabilityProbe>>,
}

impl fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("state", &*self.state.borrow())
            .field("has_probe", &self.probe.is_some())
            .finish()
    }
}

impl ConnectivityMonitor {
    pub fn new(initial: ConnectivityState) -> Self {
        let (state, _) = watch::channel(initial);
        Self { state, probe: None }
    }

    /// Initialize from the environment by asking `probe` once.
    pub async fn detect(probe: Arc<dyn ReachabilityProbe>) -> Self {
        let initial = ConnectivityState::from_online(probe.is_reachable().await);
        tracing::info!(state = ?initial, "initial connectivity detected");
        Self {
            state: watch::channel(initial).0,
            probe: Some(probe),
        }
    }

    pub fn state(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.state().is_online()
    }

    /// Receive every subsequent state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state.subscribe()
    }

    /// The environment reported the network as reachable.
    ///
    /// Returns `true` when this was an Offline → Online transition.
    pub fn handle_online(&self) -> bool {
        self.transition(ConnectivityState::Online)
    }

    /// The environment reported the network as unreachable.
    ///
    /// Returns `true` when this was an Online → Offline transition.
    pub fn handle_offline(&self) -> bool {
        self.transition(ConnectivityState::Offline)
    }

    /// Ask the probe (if any) whether the API answers right now.
    ///
    /// Does not change the recorded state.
    pub async fn check_connectivity(&self) -> bool {
        match &self.probe {
            Some(probe) => probe.is_reachable().await,
            None => self.is_online(),
        }
    }

    /// Ensure the client is online; return error if offline.
    pub fn require_online(&self) -> Result<(), OfflineError> {
        if self.is_online() {
            Ok(())
        } else {
            Err(OfflineError::Offline)
        }
    }

    fn transition(&self, next: ConnectivityState) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
        if changed {
            tracing::info!(state = ?next, "connectivity changed");
        }
        changed
    }
}
