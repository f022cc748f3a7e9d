//! Settings Sync - A settings synchronization engine
//!
//! Keeps one settings map consistent between an in-memory cache, a durable
//! local store, sibling contexts sharing that store, and an authoritative
//! remote. Local writes are sanitized, debounced into batches, retried with
//! exponential backoff and parked in an offline queue until connectivity
//! returns.

pub mod api;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod models;
pub mod network;
pub mod persistence;
pub mod queue;
pub mod remote;
pub mod sanitize;
pub mod schema;
pub mod sync;
pub mod tasks;

pub use api::{create_remote_store_router, create_router, AppState};
pub use config::{Config, TransportKind};
pub use engine::{
    EngineBuilder, EngineEvent, EngineState, EngineStatus, ExportFormat, SettingsEngine,
};
pub use error::{Result, SyncError};
pub use models::{ChangeSource, SaveOptions, SettingsMap};
pub use queue::SaveOutcome;
pub use schema::Schema;
