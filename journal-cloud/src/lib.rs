//! Remote sync for the journal.
//!
//! Reconciles the local journal store with a remote, PostgREST-shaped store:
//! - Pull-then-push cycles with last-write-wins conflict resolution
//! - A conflict log for every overwrite decided by timestamps
//! - Per-record push isolation (one failure never sinks the batch)
//! - Periodic and event triggers behind a single-cycle guard
//! - A REST client plus an in-memory remote for embedding and tests
//! - An OpenAI-compatible enrichment client

pub mod api_client;
pub mod config;
pub mod enrichment;
pub mod error;
pub mod remote;
pub mod scheduler;
pub mod state;
pub mod sync_engine;
pub mod types;

pub use api_client::RestRemoteStore;
pub use config::{EnrichmentConfig, RemoteConfig, SyncConfig};
pub use enrichment::ChatEnricher;
pub use error::{CloudError, CloudResult};
pub use remote::{MemoryRemoteStore, RemoteStore};
pub use scheduler::{create_sync_scheduler, SyncHandle, SyncScheduler};
pub use state::{SyncSnapshot, SyncState};
pub use sync_engine::SyncEngine;
pub use types::*;
