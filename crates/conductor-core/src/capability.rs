//! Capability traits the engine consumes but does not implement.
//!
//! Model wrappers, sandboxes, and search adapters live outside the engine;
//! it only ever sees these two interfaces. Both traits are object-safe so
//! implementations can be swapped behind `Arc<dyn ...>` (an HTTP model
//! provider in production, canned responders in tests).

use anyhow::Result;
use async_trait::async_trait;

/// A text-generation capability (an LLM behind some transport).
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a completion for the prompt.
    ///
    /// Implementations own their retries, caching, and cost accounting;
    /// an `Err` here is a hard provider failure.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// A sandboxed code-execution capability.
#[async_trait]
pub trait CodeRunner: Send + Sync {
    /// Execute a Python snippet and return its captured output.
    ///
    /// Implementations are expected to self-bound execution time and
    /// resources; the engine imposes no timeout of its own.
    async fn run(&self, code: &str) -> Result<String>;
}

// Compile-time assertions: both traits must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn TextGenerator, _: &dyn CodeRunner) {}
};
