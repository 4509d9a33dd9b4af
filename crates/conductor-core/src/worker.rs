//! Task workers and the dispatch routing table.
//!
//! Every task type maps to exactly one worker capability; the table is
//! fixed and not user-configurable. Workers receive the task description
//! plus a context map holding the results of every completed task the
//! current task depends on, transitively.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use conductor_store::models::{Task, TaskType};

use crate::capability::{CodeRunner, TextGenerator};

// ---------------------------------------------------------------------------
// Trait and routing
// ---------------------------------------------------------------------------

/// A type-specialized task executor.
///
/// An `Err` from a worker is recovered by the runner: the task is marked
/// failed with the error text as its result, and execution continues.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn execute(&self, description: &str, context: &BTreeMap<u32, String>) -> Result<String>;
}

/// Which worker a task type routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    Researcher,
    CodeWorker,
}

/// The fixed routing table.
pub fn worker_for(kind: TaskType) -> WorkerKind {
    match kind {
        TaskType::Research | TaskType::Analysis | TaskType::Summary => WorkerKind::Researcher,
        TaskType::Code | TaskType::Calculation => WorkerKind::CodeWorker,
    }
}

/// The pair of workers the runner dispatches to.
#[derive(Clone)]
pub struct WorkerSet {
    pub researcher: Arc<dyn Worker>,
    pub code: Arc<dyn Worker>,
}

impl WorkerSet {
    /// Resolve the worker for a task type.
    pub fn worker(&self, kind: TaskType) -> &dyn Worker {
        match worker_for(kind) {
            WorkerKind::Researcher => self.researcher.as_ref(),
            WorkerKind::CodeWorker => self.code.as_ref(),
        }
    }
}

// ---------------------------------------------------------------------------
// Dependency context
// ---------------------------------------------------------------------------

/// Collect the results of every completed task the given task depends on,
/// transitively closed over the dependency graph.
pub fn dependency_context(
    plan: &[Task],
    results: &BTreeMap<u32, String>,
    task_id: u32,
) -> BTreeMap<u32, String> {
    let mut context = BTreeMap::new();
    let Some(task) = plan.iter().find(|t| t.id == task_id) else {
        return context;
    };

    let mut frontier: Vec<u32> = task.dependencies.clone();
    while let Some(dep) = frontier.pop() {
        if context.contains_key(&dep) {
            continue;
        }
        if let Some(result) = results.get(&dep) {
            context.insert(dep, result.clone());
        }
        if let Some(dep_task) = plan.iter().find(|t| t.id == dep) {
            frontier.extend(dep_task.dependencies.iter().copied());
        }
    }

    context
}

/// Render a context map into a prompt section.
fn render_context(context: &BTreeMap<u32, String>) -> String {
    if context.is_empty() {
        return String::new();
    }
    let mut section = String::from("\n\nRESULTS FROM EARLIER TASKS:\n");
    for (id, result) in context {
        section.push_str(&format!("--- task {id} ---\n{result}\n"));
    }
    section
}

// ---------------------------------------------------------------------------
// Researcher
// ---------------------------------------------------------------------------

/// Handles research, analysis, and summary tasks by consulting the text
/// generator with the task description and upstream results.
pub struct Researcher {
    generator: Arc<dyn TextGenerator>,
}

impl Researcher {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl Worker for Researcher {
    async fn execute(&self, description: &str, context: &BTreeMap<u32, String>) -> Result<String> {
        let prompt = format!(
            "You are a research assistant. Complete the task below and answer \
             with your findings in plain prose.\n\nTASK: {description}{}",
            render_context(context)
        );
        let answer = self
            .generator
            .generate(&prompt)
            .await
            .context("research task failed")?;
        Ok(answer.trim().to_owned())
    }
}

// ---------------------------------------------------------------------------
// Code worker
// ---------------------------------------------------------------------------

/// Handles code and calculation tasks: asks the generator for a Python
/// solution, runs it through the sandboxed runner, and reports the output.
pub struct CodeWorker {
    generator: Arc<dyn TextGenerator>,
    runner: Arc<dyn CodeRunner>,
}

impl CodeWorker {
    pub fn new(generator: Arc<dyn TextGenerator>, runner: Arc<dyn CodeRunner>) -> Self {
        Self { generator, runner }
    }
}

#[async_trait]
impl Worker for CodeWorker {
    async fn execute(&self, description: &str, context: &BTreeMap<u32, String>) -> Result<String> {
        let prompt = format!(
            "You are a Python programmer. Write a complete, self-contained \
             Python script that solves the task below and prints its result. \
             Respond with only the code, in a single ```python block.\n\n\
             TASK: {description}{}",
            render_context(context)
        );
        let response = self
            .generator
            .generate(&prompt)
            .await
            .context("code generation failed")?;

        let code = extract_code_block(&response);
        let output = self
            .runner
            .run(code)
            .await
            .context("code execution failed")?;

        Ok(format!("Code:\n{}\n\nOutput:\n{}", code.trim(), output.trim()))
    }
}

/// Pull the contents of the first fenced code block out of a model
/// response, or return the whole response when there is no fence.
fn extract_code_block(response: &str) -> &str {
    let Some(open) = response.find("```") else {
        return response;
    };
    let after_fence = &response[open + 3..];
    // Skip the language tag on the fence line.
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
