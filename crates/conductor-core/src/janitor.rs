//! Expired-state janitor.
//!
//! Workflow state is retained after completion so status reads keep
//! working; this background sweep is what eventually removes it. Entries
//! older than `max_age` (by their `updated_at` stamp) are deleted.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use conductor_store::store::{StateStore, StoreError};

/// Janitor settings.
#[derive(Debug, Clone)]
pub struct JanitorConfig {
    /// How often to sweep.
    pub interval: Duration,
    /// Entries idle longer than this are removed.
    pub max_age: Duration,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
            max_age: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepStats {
    pub scanned: usize,
    pub deleted: usize,
    pub errors: usize,
}

/// Run a single sweep: scan all thread ids and delete expired entries.
///
/// Per-entry failures are counted and logged but do not abort the sweep;
/// only a failed scan does.
pub async fn sweep(store: &dyn StateStore, max_age: Duration) -> Result<SweepStats, StoreError> {
    let mut stats = SweepStats::default();

    for thread_id in store.scan().await? {
        stats.scanned += 1;

        let state = match store.get(&thread_id).await {
            Ok(Some(state)) => state,
            Ok(None) => continue,
            Err(e) => {
                // A corrupt or unreadable entry is not this sweep's problem
                // to fix; leave it for the operator.
                tracing::warn!(thread_id = %thread_id, error = %e, "janitor could not read entry");
                stats.errors += 1;
                continue;
            }
        };

        let age = (chrono::Utc::now() - state.updated_at)
            .to_std()
            .unwrap_or_default();
        if age <= max_age {
            continue;
        }

        match store.delete(&thread_id).await {
            Ok(()) => {
                tracing::info!(thread_id = %thread_id, age_secs = age.as_secs(), "removed expired workflow state");
                stats.deleted += 1;
            }
            Err(e) => {
                tracing::warn!(thread_id = %thread_id, error = %e, "janitor delete failed");
                stats.errors += 1;
            }
        }
    }

    Ok(stats)
}

/// Run the janitor loop until cancelled.
pub async fn run_janitor(
    store: Arc<dyn StateStore>,
    config: JanitorConfig,
    cancel: CancellationToken,
) {
    tracing::info!(
        interval_secs = config.interval.as_secs(),
        max_age_secs = config.max_age.as_secs(),
        "janitor started"
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("janitor stopped");
                return;
            }
            _ = tokio::time::sleep(config.interval) => {}
        }

        match sweep(store.as_ref(), config.max_age).await {
            Ok(stats) if stats.deleted > 0 || stats.errors > 0 => {
                tracing::info!(
                    scanned = stats.scanned,
                    deleted = stats.deleted,
                    errors = stats.errors,
                    "janitor sweep finished"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "janitor sweep failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use conductor_store::memory::MemoryStateStore;
    use conductor_store::models::WorkflowState;

    /// Save a state, then rewrite the stored bytes with a back-dated
    /// `updated_at` (the store stamps saves with "now").
    async fn plant_aged_state(store: &MemoryStateStore, thread_id: &str, age: Duration) {
        let mut state = WorkflowState::new("old request");
        state.updated_at = Utc::now() - chrono::Duration::from_std(age).unwrap();
        let bytes = serde_json::to_vec(&state).unwrap();
        store.put_raw(thread_id, bytes).await;
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_entries() {
        let store = MemoryStateStore::new();
        plant_aged_state(&store, "old", Duration::from_secs(7200)).await;

        let mut fresh = WorkflowState::new("new request");
        store.save("fresh", &mut fresh).await.unwrap();

        let stats = sweep(&store, Duration::from_secs(3600)).await.unwrap();
        assert_eq!(stats.scanned, 2);
        assert_eq!(stats.deleted, 1);
        assert_eq!(stats.errors, 0);

        assert!(store.get("old").await.unwrap().is_none());
        assert!(store.get("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sweep_counts_unreadable_entries_as_errors() {
        let store = MemoryStateStore::new();
        store.put_raw("corrupt", b"garbage".to_vec()).await;

        let stats = sweep(&store, Duration::from_secs(1)).await.unwrap();
        assert_eq!(stats.scanned, 1);
        assert_eq!(stats.deleted, 0);
        assert_eq!(stats.errors, 1);

        // The corrupt entry is left in place for the operator.
        assert!(matches!(
            store.get("corrupt").await,
            Err(conductor_store::store::StoreError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn empty_store_sweeps_cleanly() {
        let store = MemoryStateStore::new();
        let stats = sweep(&store, Duration::from_secs(1)).await.unwrap();
        assert_eq!(stats, SweepStats::default());
    }

    #[tokio::test]
    async fn janitor_loop_stops_on_cancel() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_janitor(
            store,
            JanitorConfig {
                interval: Duration::from_secs(3600),
                max_age: Duration::from_secs(3600),
            },
            cancel.clone(),
        ));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("janitor should stop promptly")
            .expect("janitor task should not panic");
    }
}
