//! Background worker that reacts to connectivity changes.
//!
//! On every Offline → Online transition, including one that happened while a
//! previous reconcile was still running, it drains the queue and then runs a
//! full resync. Outcomes are published as [`SyncEvent`]s; nothing the
//! worker does changes the connectivity state.

use std::sync::Arc;

use tokio::sync::{Notify, broadcast};

use crate::sync::SyncManager;
use crate::types::{ConnectivityState, SyncEvent};

const EVENT_CAPACITY: usize = 32;

pub struct ReconnectWorker {
    sync: Arc<SyncManager>,
    events: broadcast::Sender<SyncEvent>,
    shutdown: Arc<Notify>,
}

impl ReconnectWorker {
    pub fn new(sync: Arc<SyncManager>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            sync,
            events,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Receive events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Spawn the worker task.
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let sync = self.sync.clone();
        let events = self.events.clone();
        let shutdown = self.shutdown.clone();
        let mut rx = sync.monitor().subscribe();
        // Captured before spawning so a transition racing the spawn is seen.
        let mut last = *rx.borrow_and_update();

        tokio::spawn(async move {
            tracing::info!("reconnect worker started");

            if last.is_online() && sync.pending_count().await > 0 {
                tracing::info!("draining writes left over from a previous session");
                let event = match sync.drain().await {
                    Ok(report) => SyncEvent::StartupDrain { report },
                    Err(err) => SyncEvent::Failed {
                        error: err.to_string(),
                    },
                };
                let _ = events.send(event);
            }

            loop {
                tokio::select! {
                    _ = shutdown.notified() => {
                        tracing::info!("reconnect worker received shutdown signal");
                        break;
                    }
                    changed = rx.changed() => {
                        if changed.is_err() {
                            tracing::debug!("connectivity monitor dropped");
                            break;
                        }
                        // The monitor only publishes real transitions, so a
                        // repeat of the last state means a round trip was
                        // coalesced while a reconcile was running.
                        let state = *rx.borrow_and_update();
                        if state == last {
                            tracing::debug!(?state, "connectivity flapped during reconcile");
                        }
                        last = state;

                        match state {
                            ConnectivityState::Offline => {
                                let _ = events.send(SyncEvent::WentOffline);
                            }
                            ConnectivityState::Online => {
                                let report = sync.reconcile().await;
                                let _ = events.send(SyncEvent::Reconciled { report });
                            }
                        }
                    }
                }
            }

            tracing::info!("reconnect worker stopped");
        })
    }

    /// Request graceful shutdown of the worker.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}
