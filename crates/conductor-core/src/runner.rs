//! The graph runner: drives one workflow through its state machine.
//!
//! ```text
//! PLANNING -> AWAITING_APPROVAL -> (DISPATCHING -> EXECUTING)* -> COMPILING -> TERMINATED
//!                 ^      |
//!                 +------+  (rejected: back to PLANNING)
//! ```
//!
//! Every transition mutates a working copy of the state and ends with a
//! save; durability is the suspension mechanism. `AWAITING_APPROVAL` is
//! realized by simply not calling the runner again until a resume
//! directive arrives, so a runner instance can be discarded after any
//! save and reconstructed from the durable state.

use std::sync::Arc;

use tokio::sync::RwLock;

use conductor_store::models::{ApprovalStatus, WorkflowState};
use conductor_store::store::StateStore;

use crate::engine::EngineError;
use crate::planner::Planner;
use crate::report;
use crate::resolver;
use crate::worker::{self, WorkerSet};

/// Advances a single workflow. Holds a working copy of the state behind a
/// lock shared with the engine facade, which snapshots it for status
/// reads while a background execution is underway.
pub struct WorkflowRunner {
    thread_id: String,
    store: Arc<dyn StateStore>,
    planner: Planner,
    workers: WorkerSet,
    shared: Arc<RwLock<WorkflowState>>,
}

impl WorkflowRunner {
    pub fn new(
        thread_id: String,
        store: Arc<dyn StateStore>,
        planner: Planner,
        workers: WorkerSet,
        shared: Arc<RwLock<WorkflowState>>,
    ) -> Self {
        Self {
            thread_id,
            store,
            planner,
            workers,
            shared,
        }
    }

    /// Snapshot the working copy.
    async fn working_copy(&self) -> WorkflowState {
        self.shared.read().await.clone()
    }

    /// End a transition: verify invariants, persist, then publish the
    /// saved copy as the new shared snapshot.
    ///
    /// A save failure aborts the transition; the shared snapshot keeps the
    /// prior durable state so no reader ever sees unsaved progress as
    /// authoritative.
    async fn checkpoint(&self, state: &mut WorkflowState) -> Result<(), EngineError> {
        state
            .check_invariants()
            .map_err(|source| EngineError::Invariant {
                thread_id: self.thread_id.clone(),
                source,
            })?;
        self.store.save(&self.thread_id, state).await?;
        *self.shared.write().await = state.clone();
        Ok(())
    }

    /// PLANNING: produce (or reproduce) the plan, reset per-plan state,
    /// and suspend at the approval gate.
    ///
    /// If the state arrives with a rejection and feedback, the previous
    /// plan and feedback flow into regeneration; the new plan is a full
    /// replacement.
    pub async fn plan(&self) -> Result<(), EngineError> {
        let mut working = self.working_copy().await;

        let rejected_feedback = match working.approval_status {
            ApprovalStatus::Rejected => working.user_feedback.clone(),
            _ => None,
        };

        let outcome = match &rejected_feedback {
            Some(feedback) => {
                tracing::info!(thread_id = %self.thread_id, "regenerating plan from feedback");
                self.planner
                    .regenerate(&working.user_request, &working.plan, feedback)
                    .await
            }
            None => {
                tracing::info!(thread_id = %self.thread_id, "generating initial plan");
                self.planner.generate(&working.user_request).await
            }
        };

        working.plan = outcome.tasks;
        working.task_results.clear();
        working.approval_status = ApprovalStatus::Pending;
        working.user_feedback = None;
        working.next_task_id = resolver::next_runnable(&working.plan);
        working.messages.extend(outcome.notes);
        working.messages.push(if rejected_feedback.is_some() {
            "Plan regenerated based on user feedback".to_owned()
        } else {
            "Initial plan generated".to_owned()
        });

        tracing::info!(
            thread_id = %self.thread_id,
            tasks = working.plan.len(),
            "plan ready, awaiting approval"
        );
        self.checkpoint(&mut working).await
    }

    /// Record an approval and leave the state ready for dispatch.
    pub async fn approve(&self) -> Result<(), EngineError> {
        let mut working = self.working_copy().await;
        working.approval_status = ApprovalStatus::Approved;
        working.user_feedback = None;
        working.messages.push("Plan approved".to_owned());
        self.checkpoint(&mut working).await
    }

    /// Record a rejection with feedback. The caller re-enters [`plan`]
    /// afterwards; this intermediate state is saved so the rejection is
    /// durable even if replanning is interrupted.
    pub async fn reject(&self, feedback: &str) -> Result<(), EngineError> {
        let mut working = self.working_copy().await;
        working.approval_status = ApprovalStatus::Rejected;
        working.user_feedback = Some(feedback.to_owned());
        working.messages.push("Plan rejected".to_owned());
        self.checkpoint(&mut working).await
    }

    /// Drive the approved workflow from DISPATCHING through TERMINATED.
    ///
    /// Tasks run serially in resolver order. A worker failure marks the
    /// task failed and execution continues; only store failures abort.
    pub async fn run_to_completion(&self) -> Result<(), EngineError> {
        loop {
            // DISPATCHING: select the next runnable task, or move on to
            // compilation when none remains.
            let mut working = self.working_copy().await;
            let Some(task_id) = resolver::next_runnable(&working.plan) else {
                break;
            };

            let (kind, description) = {
                let Some(task) = working.task_mut(task_id) else {
                    break;
                };
                task.mark_started();
                (task.kind, task.description.clone())
            };
            working.next_task_id = Some(task_id);
            self.checkpoint(&mut working).await?;

            tracing::info!(
                thread_id = %self.thread_id,
                task_id = task_id,
                task_type = %kind,
                "executing task"
            );

            // EXECUTING: the worker call holds no locks, so status reads
            // keep flowing while it runs.
            let context = worker::dependency_context(&working.plan, &working.task_results, task_id);
            let result = self
                .workers
                .worker(kind)
                .execute(&description, &context)
                .await;

            match result {
                Ok(text) => {
                    if let Some(task) = working.task_mut(task_id) {
                        task.mark_completed(text.as_str());
                    }
                    working.task_results.insert(task_id, text);
                    tracing::info!(thread_id = %self.thread_id, task_id, "task completed");
                }
                Err(e) => {
                    let error_text = format!("{e:#}");
                    if let Some(task) = working.task_mut(task_id) {
                        task.mark_failed(error_text.as_str());
                    }
                    tracing::warn!(
                        thread_id = %self.thread_id,
                        task_id,
                        error = %error_text,
                        "task failed"
                    );
                }
            }
            working.next_task_id = None;
            self.checkpoint(&mut working).await?;
        }

        // COMPILING: fold results into the final report.
        let mut working = self.working_copy().await;
        working.next_task_id = None;
        working.final_report = Some(report::compile_report(&working));
        working.messages.push("Final report compiled".to_owned());
        self.checkpoint(&mut working).await?;

        tracing::info!(thread_id = %self.thread_id, "workflow terminated");
        Ok(())
    }

    /// Best-effort failure note for a background execution that died after
    /// the caller already got its response. Save errors are logged, not
    /// propagated: the prior durable state stays authoritative.
    pub async fn record_background_failure(&self, error: &EngineError) {
        let mut working = self.working_copy().await;
        working
            .messages
            .push(format!("Workflow execution failed: {error}"));
        working.next_task_id = None;
        if let Err(save_err) = self.store.save(&self.thread_id, &mut working).await {
            tracing::error!(
                thread_id = %self.thread_id,
                error = %save_err,
                "could not record background failure"
            );
        } else {
            *self.shared.write().await = working;
        }
    }
}
