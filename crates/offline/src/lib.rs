//! `firespec-offline`
//!
//! **Responsibility:** offline support for the inspection client.
//!
//! This crate provides:
//! - Drafts of in-progress inspection forms
//! - A read-through cache of projects and inspections
//! - Connectivity tracking
//! - An ordered queue of writes made while offline
//! - Drain and resync once the server is reachable again
//!
//! The server stays the authority; everything stored here is advisory except
//! the write queue.

pub mod api;
pub mod app;
pub mod cache;
pub mod config;
pub mod connectivity;
pub mod drafts;
pub mod store;
pub mod sync;
pub mod types;
pub mod worker;
pub mod write_queue;

pub use api::{ApiError, HttpApiClient, RemoteApi, TokenRefresher};
pub use app::{AppState, WriteError};
pub use cache::LocalCache;
pub use config::OfflineConfig;
pub use connectivity::{ConnectivityMonitor, ConnectivityState, OfflineError, ReachabilityProbe};
pub use drafts::{DraftScope, DraftStore};
pub use store::{LocalStore, StoreLocation};
pub use sync::SyncManager;
pub use types::{
    DrainReport, FailedItem, ProjectFailure, QueueItem, ReconcileReport, ResyncReport, SyncEvent,
    WriteOperation, WriteOutcome, WriteRequest,
};
pub use worker::ReconnectWorker;
pub use write_queue::{QueueError, WriteQueue};
