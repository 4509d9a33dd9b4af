//! Derived status views.
//!
//! Turns a raw [`WorkflowState`] into the external [`StatusView`]: a
//! top-level phase label, progress metrics, and per-task detail.

use chrono::{DateTime, Utc};
use serde::Serialize;

use conductor_store::models::{ApprovalStatus, Task, TaskStatus, WorkflowState};

use crate::resolver;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// The derived top-level status of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    Planning,
    PendingApproval,
    PlanRejected,
    ReadyForExecution,
    InProgress,
    Finalizing,
    Completed,
    Failed,
}

/// Derive the phase label from raw state.
///
/// Precedence: an empty plan is always `planning`; the approval gate
/// states come next; a compiled report wins over task-level detail; then
/// running > settled > ready. `failed` is reserved for states with no
/// path to further progress.
pub fn derive_phase(state: &WorkflowState) -> WorkflowPhase {
    if state.plan.is_empty() {
        return WorkflowPhase::Planning;
    }

    match state.approval_status {
        ApprovalStatus::Pending => return WorkflowPhase::PendingApproval,
        ApprovalStatus::Rejected => return WorkflowPhase::PlanRejected,
        ApprovalStatus::Approved => {}
    }

    if state.final_report.is_some() {
        return WorkflowPhase::Completed;
    }

    if state.count_status(TaskStatus::InProgress) > 0 {
        return WorkflowPhase::InProgress;
    }

    if state.all_tasks_terminal() {
        return if state.count_status(TaskStatus::Failed) > 0 {
            WorkflowPhase::Failed
        } else {
            WorkflowPhase::Finalizing
        };
    }

    // Approved with pending tasks and nothing running: either the next
    // task is runnable, or a failed dependency stranded the remainder.
    if resolver::next_runnable(&state.plan).is_some() {
        WorkflowPhase::ReadyForExecution
    } else if state.count_status(TaskStatus::Failed) > 0 {
        WorkflowPhase::Failed
    } else {
        WorkflowPhase::ReadyForExecution
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Task-count progress metrics.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressInfo {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub in_progress_tasks: usize,
    pub pending_tasks: usize,
    /// Completed over total, as a percentage rounded to one decimal.
    /// Zero for an empty plan.
    pub completion_percentage: f64,
}

/// Compute progress metrics for a plan.
///
/// Tasks stranded by a failed dependency count as `pending` until the
/// report is compiled.
pub fn progress(state: &WorkflowState) -> ProgressInfo {
    let total = state.plan.len();
    let completed = state.count_status(TaskStatus::Completed);
    let completion_percentage = if total == 0 {
        0.0
    } else {
        let raw = completed as f64 / total as f64 * 100.0;
        (raw * 10.0).round() / 10.0
    };

    ProgressInfo {
        total_tasks: total,
        completed_tasks: completed,
        failed_tasks: state.count_status(TaskStatus::Failed),
        in_progress_tasks: state.count_status(TaskStatus::InProgress),
        pending_tasks: state.count_status(TaskStatus::Pending),
        completion_percentage,
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// External view of one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    pub id: u32,
    #[serde(rename = "type")]
    pub kind: conductor_store::models::TaskType,
    pub description: String,
    pub status: TaskStatus,
    pub dependencies: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Task> for TaskView {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            kind: task.kind,
            description: task.description.clone(),
            status: task.status,
            dependencies: task.dependencies.clone(),
            result: task.result.clone(),
            started_at: task.started_at,
            completed_at: task.completed_at,
        }
    }
}

/// The full status answer for one thread.
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub thread_id: String,
    pub status: WorkflowPhase,
    pub progress: ProgressInfo,
    pub tasks: Vec<TaskView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task: Option<TaskView>,
    pub user_request: String,
    pub approval_status: ApprovalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_feedback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_report: Option<String>,
    pub messages: Vec<String>,
    pub last_updated: DateTime<Utc>,
}

/// Build the status view for a state.
pub fn status_view(thread_id: &str, state: &WorkflowState) -> StatusView {
    // The running task wins; otherwise the task selected for execution.
    let current_task = state
        .plan
        .iter()
        .find(|t| t.status == TaskStatus::InProgress)
        .or_else(|| state.next_task_id.and_then(|id| state.task(id)))
        .map(TaskView::from);

    StatusView {
        thread_id: thread_id.to_owned(),
        status: derive_phase(state),
        progress: progress(state),
        tasks: state.plan.iter().map(TaskView::from).collect(),
        current_task,
        user_request: state.user_request.clone(),
        approval_status: state.approval_status,
        user_feedback: state.user_feedback.clone(),
        final_report: state.final_report.clone(),
        messages: state.messages.clone(),
        last_updated: state.updated_at,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
