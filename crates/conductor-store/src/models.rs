//! Workflow state model: the durable entity and its task plan.
//!
//! One [`WorkflowState`] exists per thread id. It is a tree (the plan is a
//! DAG of integer ids, tasks are held by value) and is the only thing the
//! store persists.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// What kind of worker a task needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Research,
    Code,
    Analysis,
    Summary,
    Calculation,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Research => "research",
            Self::Code => "code",
            Self::Analysis => "analysis",
            Self::Summary => "summary",
            Self::Calculation => "calculation",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskType {
    type Err = TaskTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "research" => Ok(Self::Research),
            "code" => Ok(Self::Code),
            "analysis" => Ok(Self::Analysis),
            "summary" => Ok(Self::Summary),
            "calculation" => Ok(Self::Calculation),
            other => Err(TaskTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskType`] string.
#[derive(Debug, Clone)]
pub struct TaskTypeParseError(pub String);

impl fmt::Display for TaskTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task type: {:?}", self.0)
    }
}

impl std::error::Error for TaskTypeParseError {}

// ---------------------------------------------------------------------------

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Whether the task has reached a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------

/// Human decision on the current plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

impl FromStr for ApprovalStatus {
    type Err = ApprovalStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(ApprovalStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ApprovalStatus`] string.
#[derive(Debug, Clone)]
pub struct ApprovalStatusParseError(pub String);

impl fmt::Display for ApprovalStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid approval status: {:?}", self.0)
    }
}

impl std::error::Error for ApprovalStatusParseError {}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// One unit of work within a plan.
///
/// Ids are dense and sequential starting at 1; dependencies always point at
/// strictly smaller ids within the same plan, which keeps the graph acyclic
/// by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: u32,
    #[serde(rename = "type")]
    pub kind: TaskType,
    pub description: String,
    #[serde(default)]
    pub dependencies: Vec<u32>,
    pub status: TaskStatus,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Build a fresh pending task.
    pub fn new(id: u32, kind: TaskType, description: impl Into<String>, dependencies: Vec<u32>) -> Self {
        Self {
            id,
            kind,
            description: description.into(),
            dependencies,
            status: TaskStatus::Pending,
            result: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Transition `pending -> in_progress`, stamping `started_at`.
    pub fn mark_started(&mut self) {
        self.status = TaskStatus::InProgress;
        self.started_at = Some(Utc::now());
    }

    /// Transition into `completed`, stamping `completed_at` and recording
    /// the worker's result.
    pub fn mark_completed(&mut self, result: impl Into<String>) {
        self.status = TaskStatus::Completed;
        self.result = Some(result.into());
        self.completed_at = Some(Utc::now());
    }

    /// Transition into `failed`, stamping `completed_at` and recording the
    /// error text as the result.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.result = Some(error.into());
        self.completed_at = Some(Utc::now());
    }
}

// ---------------------------------------------------------------------------
// WorkflowState
// ---------------------------------------------------------------------------

/// The durable state of one workflow thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Original request text. Immutable after creation.
    pub user_request: String,
    /// Current plan. Replaced wholesale on re-plan.
    #[serde(default)]
    pub plan: Vec<Task>,
    /// Results of completed tasks, keyed by task id. Cleared on re-plan.
    #[serde(default)]
    pub task_results: BTreeMap<u32, String>,
    /// Task currently selected for execution, if any.
    #[serde(default)]
    pub next_task_id: Option<u32>,
    /// Append-only status lines for human display.
    #[serde(default)]
    pub messages: Vec<String>,
    pub approval_status: ApprovalStatus,
    /// Present exactly when `approval_status` is `rejected`.
    #[serde(default)]
    pub user_feedback: Option<String>,
    /// Set exactly once when the workflow compiles its report.
    #[serde(default)]
    pub final_report: Option<String>,
    /// Stamped by the store on every save; read by the janitor.
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    /// Initial state for a fresh thread: empty plan, approval pending.
    pub fn new(user_request: impl Into<String>) -> Self {
        Self {
            user_request: user_request.into(),
            plan: Vec::new(),
            task_results: BTreeMap::new(),
            next_task_id: None,
            messages: Vec::new(),
            approval_status: ApprovalStatus::Pending,
            user_feedback: None,
            final_report: None,
            updated_at: Utc::now(),
        }
    }

    /// Look up a task by id.
    pub fn task(&self, id: u32) -> Option<&Task> {
        self.plan.iter().find(|t| t.id == id)
    }

    /// Look up a task by id, mutably.
    pub fn task_mut(&mut self, id: u32) -> Option<&mut Task> {
        self.plan.iter_mut().find(|t| t.id == id)
    }

    /// Whether every task in the plan has reached a terminal status.
    pub fn all_tasks_terminal(&self) -> bool {
        !self.plan.is_empty() && self.plan.iter().all(|t| t.status.is_terminal())
    }

    /// Whether every task completed successfully.
    pub fn all_tasks_completed(&self) -> bool {
        !self.plan.is_empty() && self.plan.iter().all(|t| t.status == TaskStatus::Completed)
    }

    /// Count tasks with the given status.
    pub fn count_status(&self, status: TaskStatus) -> usize {
        self.plan.iter().filter(|t| t.status == status).count()
    }

    /// Validate the structural invariants that must hold after every save.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        // Ids are dense and sequential from 1.
        for (i, task) in self.plan.iter().enumerate() {
            let expected = (i + 1) as u32;
            if task.id != expected {
                return Err(InvariantViolation::NonSequentialIds {
                    position: i,
                    found: task.id,
                });
            }
        }

        // Dependencies reference existing, strictly earlier tasks. Because
        // every edge points backwards, the graph cannot contain a cycle.
        let count = self.plan.len() as u32;
        for task in &self.plan {
            for &dep in &task.dependencies {
                if dep == 0 || dep > count {
                    return Err(InvariantViolation::UnknownDependency {
                        task: task.id,
                        dependency: dep,
                    });
                }
                if dep >= task.id {
                    return Err(InvariantViolation::ForwardDependency {
                        task: task.id,
                        dependency: dep,
                    });
                }
            }
        }

        // A task may run only once all its dependencies are completed, and
        // at most one task runs at a time.
        let mut in_progress = 0usize;
        for task in &self.plan {
            if task.status == TaskStatus::InProgress {
                in_progress += 1;
                for &dep in &task.dependencies {
                    let dep_done = self
                        .task(dep)
                        .is_some_and(|d| d.status == TaskStatus::Completed);
                    if !dep_done {
                        return Err(InvariantViolation::UnmetDependencies { task: task.id });
                    }
                }
            }
        }
        if in_progress > 1 {
            return Err(InvariantViolation::MultipleInProgress);
        }

        // Result map keys are exactly the completed task ids.
        let completed: Vec<u32> = self
            .plan
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| t.id)
            .collect();
        let recorded: Vec<u32> = self.task_results.keys().copied().collect();
        if completed != recorded {
            return Err(InvariantViolation::ResultKeysMismatch {
                completed,
                recorded,
            });
        }

        // Rejection and feedback travel together.
        let has_feedback = self.user_feedback.as_deref().is_some_and(|f| !f.is_empty());
        if (self.approval_status == ApprovalStatus::Rejected) != has_feedback {
            return Err(InvariantViolation::FeedbackMismatch {
                approval_status: self.approval_status,
            });
        }

        // A final report is only written after the approval gate, once no
        // task is running. Tasks whose dependencies failed may legitimately
        // still be pending at compile time.
        if self.final_report.is_some()
            && (in_progress > 0 || self.approval_status != ApprovalStatus::Approved)
        {
            return Err(InvariantViolation::PrematureFinalReport);
        }

        // The selected task must exist in the plan.
        if let Some(next) = self.next_task_id {
            if self.task(next).is_none() {
                return Err(InvariantViolation::DanglingNextTask { id: next });
            }
        }

        Ok(())
    }
}

/// A structural invariant of [`WorkflowState`] does not hold.
#[derive(Debug, Error)]
pub enum InvariantViolation {
    #[error("task at position {position} has id {found}, ids must be dense from 1")]
    NonSequentialIds { position: usize, found: u32 },

    #[error("task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: u32, dependency: u32 },

    #[error("task {task} depends on task {dependency}, dependencies must point at earlier tasks")]
    ForwardDependency { task: u32, dependency: u32 },

    #[error("task {task} is in progress with incomplete dependencies")]
    UnmetDependencies { task: u32 },

    #[error("more than one task is in progress")]
    MultipleInProgress,

    #[error("result keys {recorded:?} do not match completed task ids {completed:?}")]
    ResultKeysMismatch { completed: Vec<u32>, recorded: Vec<u32> },

    #[error("user feedback must be present exactly when approval status is rejected (status: {approval_status})")]
    FeedbackMismatch { approval_status: ApprovalStatus },

    #[error("final report written while tasks are still outstanding")]
    PrematureFinalReport,

    #[error("next_task_id {id} does not exist in the plan")]
    DanglingNextTask { id: u32 },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
