//! The `StateStore` trait -- durable per-thread state storage.
//!
//! The engine talks to storage exclusively through this trait. Any backend
//! that offers an atomic single-key replace and a key scan can implement
//! it; this crate ships a PostgreSQL-backed store and an in-memory store.

use async_trait::async_trait;
use thiserror::Error;

use crate::codec::CodecError;
use crate::models::WorkflowState;

/// Errors surfaced by a state store.
///
/// There is no retry at this layer: a failed save aborts the caller's
/// current transition and the prior durable state stays in place.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing service could not be reached or the operation failed.
    #[error("state store unavailable: {0:#}")]
    Unavailable(#[source] anyhow::Error),

    /// An entry exists but cannot be decoded. Never treated as "absent";
    /// the caller must refuse to overwrite it.
    #[error("stored state for thread {thread_id} is corrupt")]
    Corrupt {
        thread_id: String,
        #[source]
        source: CodecError,
    },
}

/// Durable mapping from thread id to [`WorkflowState`].
///
/// # Object Safety
///
/// The trait is object-safe so the engine can hold an `Arc<dyn StateStore>`
/// and swap backends (PostgreSQL in production, in-memory in tests).
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Atomically replace the entry for `thread_id`.
    ///
    /// Stamps `state.updated_at` with wall-clock now before persisting, so
    /// the caller's copy matches what was written. A concurrent reader sees
    /// either the prior state or the new one, never a partial merge.
    async fn save(&self, thread_id: &str, state: &mut WorkflowState) -> Result<(), StoreError>;

    /// Fetch the most recently saved state, or `None` for an unknown id.
    async fn get(&self, thread_id: &str) -> Result<Option<WorkflowState>, StoreError>;

    /// Remove the entry. Idempotent: deleting an absent id succeeds.
    async fn delete(&self, thread_id: &str) -> Result<(), StoreError>;

    /// List all stored thread ids, in key order.
    async fn scan(&self) -> Result<Vec<String>, StoreError>;
}

// Compile-time assertion: StateStore must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn StateStore) {}
};
