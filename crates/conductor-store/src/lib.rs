//! Durable workflow state: model, serialization, and storage backends.

pub mod codec;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

pub use memory::MemoryStateStore;
pub use models::{ApprovalStatus, InvariantViolation, Task, TaskStatus, TaskType, WorkflowState};
pub use postgres::PgStateStore;
pub use store::{StateStore, StoreError};
