//! The engine facade: process-wide entry point for starting, resuming,
//! and inspecting workflows.
//!
//! Owns a registry of live runner state keyed by thread id. The durable
//! store is the authority; the registry is an optimization that lets
//! status reads see an in-memory advance the background runner has made.
//! On process restart the registry is empty and runners are reconstructed
//! from durable state on demand.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use conductor_store::models::{ApprovalStatus, InvariantViolation, WorkflowState};
use conductor_store::store::{StateStore, StoreError};

use crate::planner::Planner;
use crate::runner::WorkflowRunner;
use crate::status::{self, StatusView};
use crate::worker::WorkerSet;

/// Maximum user-request length, in characters after trimming.
pub const MAX_REQUEST_CHARS: usize = 5000;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced to callers of the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("user request must not be empty")]
    EmptyRequest,

    #[error("user request exceeds {MAX_REQUEST_CHARS} characters (got {len})")]
    RequestTooLong { len: usize },

    #[error("feedback is required when rejecting a plan")]
    MissingFeedback,

    #[error("workflow {thread_id} not found")]
    NotFound { thread_id: String },

    #[error("workflow {thread_id} is not awaiting approval (approval status: {status})")]
    Conflict {
        thread_id: String,
        status: ApprovalStatus,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("workflow {thread_id} reached an inconsistent state: {source}")]
    Invariant {
        thread_id: String,
        source: InvariantViolation,
    },
}

// ---------------------------------------------------------------------------
// Directives and receipts
// ---------------------------------------------------------------------------

/// The human decision delivered to a suspended workflow.
///
/// Only these two directives exist; anything else is rejected at the API
/// boundary before it reaches the engine.
#[derive(Debug, Clone)]
pub enum ResumeDirective {
    Approved,
    Rejected { feedback: String },
}

/// Receipt from a successful `start`.
#[derive(Debug, Clone)]
pub struct StartedWorkflow {
    pub thread_id: String,
    pub created_at: DateTime<Utc>,
}

/// Receipt from a successful `resume`.
#[derive(Debug, Clone)]
pub struct ResumeReceipt {
    pub thread_id: String,
    pub approved: bool,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Live per-thread handles: the runner's shared working copy plus a gate
/// serializing approval decisions for the thread.
struct ThreadEntry {
    snapshot: Arc<RwLock<WorkflowState>>,
    gate: tokio::sync::Mutex<()>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Process-wide workflow engine.
pub struct Engine {
    store: Arc<dyn StateStore>,
    planner: Planner,
    workers: WorkerSet,
    /// Shared with background execution tasks, which drop their entry on
    /// termination.
    registry: Arc<Mutex<HashMap<String, Arc<ThreadEntry>>>>,
}

impl Engine {
    pub fn new(store: Arc<dyn StateStore>, planner: Planner, workers: WorkerSet) -> Self {
        Self {
            store,
            planner,
            workers,
            registry: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Validate the request, create a thread, and drive planning
    /// synchronously up to the approval gate. When this returns, the plan
    /// is durably visible.
    pub async fn start(&self, user_request: &str) -> Result<StartedWorkflow, EngineError> {
        let trimmed = user_request.trim();
        if trimmed.is_empty() {
            return Err(EngineError::EmptyRequest);
        }
        let len = trimmed.chars().count();
        if len > MAX_REQUEST_CHARS {
            return Err(EngineError::RequestTooLong { len });
        }

        let thread_id = Uuid::new_v4().to_string();

        // Persist the empty-plan state first so the thread exists durably
        // before planning begins.
        let mut state = WorkflowState::new(trimmed);
        self.store.save(&thread_id, &mut state).await?;
        let entry = self.register(&thread_id, state);

        tracing::info!(thread_id = %thread_id, "starting workflow");
        let runner = self.runner_for(&thread_id, &entry);
        if let Err(e) = runner.plan().await {
            self.deregister(&thread_id);
            return Err(e);
        }

        Ok(StartedWorkflow {
            thread_id,
            created_at: Utc::now(),
        })
    }

    /// Deliver an approval decision to a workflow suspended at the gate.
    ///
    /// Approved: the decision is persisted, then execution continues in a
    /// background task; callers observe progress through `status`.
    /// Rejected: replanning runs synchronously up to the next suspension,
    /// mirroring `start`.
    pub async fn resume(
        &self,
        thread_id: &str,
        directive: ResumeDirective,
    ) -> Result<ResumeReceipt, EngineError> {
        if let ResumeDirective::Rejected { feedback } = &directive {
            if feedback.trim().is_empty() {
                return Err(EngineError::MissingFeedback);
            }
        }

        let entry = self.entry(thread_id).await?;

        // One decision at a time per thread: the second of two racing
        // approvals sees the updated durable status and conflicts.
        let _gate = entry.gate.lock().await;

        let state = self
            .store
            .get(thread_id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                thread_id: thread_id.to_owned(),
            })?;

        if state.approval_status != ApprovalStatus::Pending {
            return Err(EngineError::Conflict {
                thread_id: thread_id.to_owned(),
                status: state.approval_status,
            });
        }

        // The durable copy is authoritative while the thread is suspended.
        *entry.snapshot.write().await = state;

        let approved = matches!(directive, ResumeDirective::Approved);
        let runner = self.runner_for(thread_id, &entry);
        match directive {
            ResumeDirective::Approved => {
                runner.approve().await?;
                tracing::info!(thread_id = %thread_id, "plan approved, dispatching in background");

                let registry = Arc::clone(&self.registry);
                let background_id = thread_id.to_owned();
                tokio::spawn(async move {
                    if let Err(e) = runner.run_to_completion().await {
                        tracing::error!(
                            thread_id = %background_id,
                            error = %e,
                            "background execution failed"
                        );
                        runner.record_background_failure(&e).await;
                    }
                    let mut registry = registry.lock().expect("registry lock poisoned");
                    registry.remove(&background_id);
                });
            }
            ResumeDirective::Rejected { feedback } => {
                runner.reject(&feedback).await?;
                tracing::info!(thread_id = %thread_id, "plan rejected, replanning");
                runner.plan().await?;
            }
        }

        Ok(ResumeReceipt {
            thread_id: thread_id.to_owned(),
            approved,
            updated_at: Utc::now(),
        })
    }

    /// Read the current status of a workflow.
    ///
    /// The durable state is read first and its errors surface as-is; a
    /// store outage is never papered over with in-memory data. When a live
    /// runner exists, the copy with the larger plan wins (ties go to the
    /// runner), which tolerates an in-memory advance that has not been
    /// persisted yet.
    pub async fn status(&self, thread_id: &str) -> Result<StatusView, EngineError> {
        let durable = self
            .store
            .get(thread_id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                thread_id: thread_id.to_owned(),
            })?;

        let live = {
            let registry = self.registry.lock().expect("registry lock poisoned");
            registry.get(thread_id).map(|e| Arc::clone(&e.snapshot))
        };

        let state = match live {
            Some(snapshot) => {
                let live_copy = snapshot.read().await.clone();
                if live_copy.plan.len() >= durable.plan.len() {
                    live_copy
                } else {
                    durable
                }
            }
            None => durable,
        };

        Ok(status::status_view(thread_id, &state))
    }

    // -----------------------------------------------------------------------
    // Registry plumbing
    // -----------------------------------------------------------------------

    fn runner_for(&self, thread_id: &str, entry: &Arc<ThreadEntry>) -> WorkflowRunner {
        WorkflowRunner::new(
            thread_id.to_owned(),
            Arc::clone(&self.store),
            self.planner.clone(),
            self.workers.clone(),
            Arc::clone(&entry.snapshot),
        )
    }

    /// Insert a fresh entry for a new thread.
    fn register(&self, thread_id: &str, state: WorkflowState) -> Arc<ThreadEntry> {
        let entry = Arc::new(ThreadEntry {
            snapshot: Arc::new(RwLock::new(state)),
            gate: tokio::sync::Mutex::new(()),
        });
        let mut registry = self.registry.lock().expect("registry lock poisoned");
        registry.insert(thread_id.to_owned(), Arc::clone(&entry));
        entry
    }

    fn deregister(&self, thread_id: &str) {
        let mut registry = self.registry.lock().expect("registry lock poisoned");
        registry.remove(thread_id);
    }

    /// Get the live entry for a thread, reconstructing it from durable
    /// state when the process has restarted since the workflow began.
    async fn entry(&self, thread_id: &str) -> Result<Arc<ThreadEntry>, EngineError> {
        {
            let registry = self.registry.lock().expect("registry lock poisoned");
            if let Some(entry) = registry.get(thread_id) {
                return Ok(Arc::clone(entry));
            }
        }

        let state = self
            .store
            .get(thread_id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                thread_id: thread_id.to_owned(),
            })?;

        // Lookup/create must be atomic: re-check under the lock so two
        // concurrent calls share one entry.
        let mut registry = self.registry.lock().expect("registry lock poisoned");
        let entry = registry
            .entry(thread_id.to_owned())
            .or_insert_with(|| {
                Arc::new(ThreadEntry {
                    snapshot: Arc::new(RwLock::new(state)),
                    gate: tokio::sync::Mutex::new(()),
                })
            });
        Ok(Arc::clone(entry))
    }
}
