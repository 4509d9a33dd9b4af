//! In-memory state store.
//!
//! Backs tests and the server's ephemeral mode. Goes through the same
//! codec as the PostgreSQL store so serialization bugs surface in unit
//! tests too, not only against a live database.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::codec;
use crate::models::WorkflowState;
use crate::store::{StateStore, StoreError};

/// A [`StateStore`] holding encoded entries in process memory.
#[derive(Default)]
pub struct MemoryStateStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries. Test helper.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Overwrite an entry with raw bytes, bypassing the codec. Lets tests
    /// plant corrupt entries.
    pub async fn put_raw(&self, thread_id: &str, bytes: Vec<u8>) {
        self.entries.write().await.insert(thread_id.to_owned(), bytes);
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn save(&self, thread_id: &str, state: &mut WorkflowState) -> Result<(), StoreError> {
        state.updated_at = Utc::now();
        let bytes = codec::encode(state).map_err(|e| StoreError::Unavailable(e.into()))?;
        self.entries.write().await.insert(thread_id.to_owned(), bytes);
        Ok(())
    }

    async fn get(&self, thread_id: &str) -> Result<Option<WorkflowState>, StoreError> {
        let entries = self.entries.read().await;
        match entries.get(thread_id) {
            None => Ok(None),
            Some(bytes) => codec::decode(bytes)
                .map(Some)
                .map_err(|source| StoreError::Corrupt {
                    thread_id: thread_id.to_owned(),
                    source,
                }),
        }
    }

    async fn delete(&self, thread_id: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(thread_id);
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}
