//! Queue Module
//!
//! Debounced batching of local mutations and their delivery to the remote.
//!
//! # Components
//! - `QueueBatch`: pending writes that travel as one unit
//! - `SaveQueue`: debounce window and merge-by-key
//! - `RetryManager`: backoff, offline queue demotion and replay

mod batch;
mod retry;
mod save_queue;

pub use batch::QueueBatch;
pub use retry::{ReplayReport, RetryManager, RetryPolicy, SaveOutcome};
pub use save_queue::SaveQueue;
