//! Plan generation: prompt construction, tolerant response parsing, and the
//! mandatory fallback plan.
//!
//! The planner never fails. If the model is unreachable, returns garbage,
//! or produces a plan that violates the structural rules, the caller still
//! receives a valid single-task research plan, so the approval gate always
//! has something to gate.

use std::sync::Arc;

use thiserror::Error;

use conductor_store::models::{Task, TaskType};

use crate::capability::TextGenerator;

/// Longest request prefix echoed into the fallback task description.
const FALLBACK_DESCRIPTION_CHARS: usize = 100;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Result of a planning pass.
///
/// `notes` carries human-readable warnings (unknown task types, fallback
/// engagement) that the runner appends to the workflow's message log.
#[derive(Debug)]
pub struct PlanOutcome {
    pub tasks: Vec<Task>,
    pub notes: Vec<String>,
}

/// Errors from parsing a model response into a plan.
///
/// These never escape the planner; they decide whether the repair chain
/// continues or the fallback engages.
#[derive(Debug, Error)]
pub enum PlanParseError {
    #[error("no JSON array found in response")]
    NoJsonArray,

    #[error("response is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("plan must contain at least one task")]
    NoTasks,

    #[error("task entry {index} is not an object")]
    NotAnObject { index: usize },

    #[error("task entry {index} is missing required field {field:?}")]
    MissingField { index: usize, field: &'static str },

    #[error("task at position {position} has id {found}, ids must be sequential from 1")]
    NonSequentialIds { position: usize, found: u64 },

    #[error("task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: u32, dependency: u32 },

    #[error("task {task} depends on task {dependency}, dependencies must point at earlier tasks")]
    ForwardDependency { task: u32, dependency: u32 },
}

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

/// Decomposes a user request into a structured task plan via a
/// [`TextGenerator`].
#[derive(Clone)]
pub struct Planner {
    generator: Arc<dyn TextGenerator>,
}

impl Planner {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// First-time planning for a request.
    pub async fn generate(&self, request: &str) -> PlanOutcome {
        let prompt = planning_prompt(request);
        self.plan_from_prompt(request, &prompt).await
    }

    /// Post-rejection replanning. The previous plan and the user's feedback
    /// are embedded in the prompt; the output is a full replacement.
    pub async fn regenerate(&self, request: &str, previous: &[Task], feedback: &str) -> PlanOutcome {
        let prompt = regeneration_prompt(request, previous, feedback);
        self.plan_from_prompt(request, &prompt).await
    }

    async fn plan_from_prompt(&self, request: &str, prompt: &str) -> PlanOutcome {
        let response = match self.generator.generate(prompt).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "text generator failed, using fallback plan");
                return fallback_outcome(request, "model unavailable");
            }
        };

        match parse_plan_response(&response) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "could not parse plan response, using fallback plan");
                tracing::debug!(response = %response, "unparseable plan response");
                fallback_outcome(request, "plan response was unusable")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Prompt construction
// ---------------------------------------------------------------------------

/// Task-type vocabulary and structural rules shared by both prompts.
const PLAN_RULES: &str = r#"TASK TYPES:
- research: web search, information gathering, content analysis
- code: programming, data processing
- analysis: text analysis and interpretation
- summary: content summarization
- calculation: mathematical computation requiring code execution

RULES:
1. Respond with a JSON array of tasks, each with: id, type, description, dependencies.
2. Use sequential integer ids starting from 1.
3. Dependencies reference earlier task ids only; include only necessary ones.
4. Be specific in task descriptions.
5. Use code tasks only for work that genuinely needs execution.

FORMAT:
[
  {"id": 1, "type": "research", "description": "Specific task description", "dependencies": []}
]
"#;

/// Build the prompt for first-time planning.
fn planning_prompt(request: &str) -> String {
    format!(
        "You are an expert task planning agent. Decompose the user request \
         into structured, executable subtasks.\n\n{PLAN_RULES}\nUSER REQUEST: {request}\n\nJSON PLAN:"
    )
}

/// Build the prompt for post-rejection replanning.
fn regeneration_prompt(request: &str, previous: &[Task], feedback: &str) -> String {
    let previous_json = serde_json::to_string_pretty(previous).unwrap_or_else(|_| "[]".to_owned());
    format!(
        "You are an expert task planning agent. The user has rejected your \
         previous plan; produce a revised plan that addresses their feedback \
         directly.\n\nORIGINAL REQUEST: {request}\n\nPREVIOUS PLAN:\n{previous_json}\n\n\
         USER FEEDBACK: {feedback}\n\n{PLAN_RULES}\nREVISED JSON PLAN:"
    )
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

/// Parse a model response into a validated plan.
///
/// Tries the raw response first, then a repaired copy (code fences
/// stripped, smart quotes normalized, trailing commas removed).
pub fn parse_plan_response(response: &str) -> Result<PlanOutcome, PlanParseError> {
    match parse_once(response) {
        Ok(outcome) => Ok(outcome),
        Err(first_err) => {
            let repaired = repair_response(response);
            parse_once(&repaired).map_err(|_| first_err)
        }
    }
}

fn parse_once(response: &str) -> Result<PlanOutcome, PlanParseError> {
    let json = extract_json_array(response).ok_or(PlanParseError::NoJsonArray)?;
    let raw: Vec<serde_json::Value> = serde_json::from_str(json)?;
    if raw.is_empty() {
        return Err(PlanParseError::NoTasks);
    }

    let mut notes = Vec::new();
    let mut tasks = Vec::with_capacity(raw.len());

    for (index, entry) in raw.iter().enumerate() {
        let obj = entry
            .as_object()
            .ok_or(PlanParseError::NotAnObject { index })?;

        let id = obj
            .get("id")
            .and_then(value_as_u64)
            .ok_or(PlanParseError::MissingField { index, field: "id" })?;

        let description = obj
            .get("description")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .ok_or(PlanParseError::MissingField {
                index,
                field: "description",
            })?;

        let type_name = obj
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or(PlanParseError::MissingField {
                index,
                field: "type",
            })?;

        // Unknown types degrade to research instead of sinking the plan.
        let kind = match type_name.parse::<TaskType>() {
            Ok(kind) => kind,
            Err(_) => {
                notes.push(format!(
                    "Unknown task type {type_name:?} on task {id}, treating as research"
                ));
                TaskType::Research
            }
        };

        // Dependencies may arrive as numbers or numeric strings; anything
        // else is dropped with a note.
        let mut dependencies = Vec::new();
        if let Some(deps) = obj.get("dependencies").and_then(|v| v.as_array()) {
            for dep in deps {
                match value_as_u64(dep) {
                    Some(d) if u32::try_from(d).is_ok() => dependencies.push(d as u32),
                    _ => notes.push(format!("Dropped malformed dependency {dep} on task {id}")),
                }
            }
        }

        tasks.push(Task::new(
            u32::try_from(id).map_err(|_| PlanParseError::MissingField { index, field: "id" })?,
            kind,
            description,
            dependencies,
        ));
    }

    validate_plan(&tasks)?;
    Ok(PlanOutcome { tasks, notes })
}

/// Accept integers directly and numeric strings ("2") as ids.
fn value_as_u64(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Locate the outermost JSON array in a response that may carry prose
/// around it.
fn extract_json_array(response: &str) -> Option<&str> {
    let start = response.find('[')?;
    let end = response.rfind(']')?;
    (end > start).then(|| &response[start..=end])
}

/// Apply the repair chain for almost-JSON model output: strip code-fence
/// lines, normalize smart quotes, drop trailing commas.
fn repair_response(response: &str) -> String {
    let without_fences: String = response
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n");

    let requoted: String = without_fences
        .chars()
        .map(|c| match c {
            '\u{201c}' | '\u{201d}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            other => other,
        })
        .collect();

    strip_trailing_commas(&requoted)
}

/// Remove commas that directly precede a closing bracket or brace.
fn strip_trailing_commas(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, ']' | '}') {
            // Drop a comma left dangling before this close.
            while out.ends_with(|p: char| p.is_whitespace()) {
                out.pop();
            }
            if out.ends_with(',') {
                out.pop();
            }
        }
        out.push(c);
    }
    out
}

/// Check the structural plan rules: ids dense and sequential from 1,
/// dependencies pointing at existing, strictly earlier tasks (which makes
/// the graph acyclic by construction).
fn validate_plan(tasks: &[Task]) -> Result<(), PlanParseError> {
    for (position, task) in tasks.iter().enumerate() {
        let expected = (position + 1) as u32;
        if task.id != expected {
            return Err(PlanParseError::NonSequentialIds {
                position,
                found: task.id as u64,
            });
        }
    }

    let count = tasks.len() as u32;
    for task in tasks {
        for &dep in &task.dependencies {
            if dep == 0 || dep > count {
                return Err(PlanParseError::UnknownDependency {
                    task: task.id,
                    dependency: dep,
                });
            }
            if dep >= task.id {
                return Err(PlanParseError::ForwardDependency {
                    task: task.id,
                    dependency: dep,
                });
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Fallback
// ---------------------------------------------------------------------------

/// The plan of last resort: one research task over the (truncated) request.
pub fn fallback_plan(request: &str) -> Vec<Task> {
    let truncated: String = request.chars().take(FALLBACK_DESCRIPTION_CHARS).collect();
    vec![Task::new(
        1,
        TaskType::Research,
        format!("Research and gather information about: {truncated}"),
        vec![],
    )]
}

fn fallback_outcome(request: &str, reason: &str) -> PlanOutcome {
    PlanOutcome {
        tasks: fallback_plan(request),
        notes: vec![format!("Planning degraded to a fallback plan ({reason})")],
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use conductor_store::models::TaskStatus;

    struct CannedGenerator(String);

    #[async_trait]
    impl TextGenerator for CannedGenerator {
        async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
            Ok(self.0.clone())
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl TextGenerator for FailingGenerator {
        async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
            Err(anyhow!("provider is down"))
        }
    }

    const GOOD_PLAN: &str = r#"[
        {"id": 1, "type": "research", "description": "Find sources", "dependencies": []},
        {"id": 2, "type": "summary", "description": "Summarize them", "dependencies": [1]}
    ]"#;

    #[test]
    fn parses_clean_response() {
        let outcome = parse_plan_response(GOOD_PLAN).expect("should parse");
        assert_eq!(outcome.tasks.len(), 2);
        assert_eq!(outcome.tasks[0].kind, TaskType::Research);
        assert_eq!(outcome.tasks[1].dependencies, vec![1]);
        assert!(outcome.tasks.iter().all(|t| t.status == TaskStatus::Pending));
        assert!(outcome.notes.is_empty());
    }

    #[test]
    fn parses_response_with_surrounding_prose() {
        let response = format!("Here is your plan:\n{GOOD_PLAN}\nLet me know!");
        let outcome = parse_plan_response(&response).expect("should parse");
        assert_eq!(outcome.tasks.len(), 2);
    }

    #[test]
    fn repairs_code_fences() {
        let response = format!("```json\n{GOOD_PLAN}\n```");
        let outcome = parse_plan_response(&response).expect("should parse after repair");
        assert_eq!(outcome.tasks.len(), 2);
    }

    #[test]
    fn repairs_smart_quotes_and_trailing_commas() {
        let response = "[\n  {\u{201c}id\u{201d}: 1, \u{201c}type\u{201d}: \u{201c}research\u{201d}, \
                        \u{201c}description\u{201d}: \u{201c}Look things up\u{201d}, \
                        \u{201c}dependencies\u{201d}: [],},\n]";
        let outcome = parse_plan_response(response).expect("should parse after repair");
        assert_eq!(outcome.tasks.len(), 1);
        assert_eq!(outcome.tasks[0].description, "Look things up");
    }

    #[test]
    fn unknown_type_maps_to_research_with_note() {
        let response = r#"[{"id": 1, "type": "interpretive_dance", "description": "Do it", "dependencies": []}]"#;
        let outcome = parse_plan_response(response).expect("should parse");
        assert_eq!(outcome.tasks[0].kind, TaskType::Research);
        assert_eq!(outcome.notes.len(), 1);
        assert!(outcome.notes[0].contains("interpretive_dance"));
    }

    #[test]
    fn string_ids_and_dependencies_accepted() {
        let response = r#"[
            {"id": "1", "type": "research", "description": "A", "dependencies": []},
            {"id": "2", "type": "code", "description": "B", "dependencies": ["1"]}
        ]"#;
        let outcome = parse_plan_response(response).expect("should parse");
        assert_eq!(outcome.tasks[1].dependencies, vec![1]);
    }

    #[test]
    fn rejects_sparse_ids() {
        let response = r#"[
            {"id": 1, "type": "research", "description": "A", "dependencies": []},
            {"id": 5, "type": "research", "description": "B", "dependencies": []}
        ]"#;
        assert!(matches!(
            parse_plan_response(response),
            Err(PlanParseError::NonSequentialIds { .. })
        ));
    }

    #[test]
    fn rejects_forward_dependency() {
        let response = r#"[
            {"id": 1, "type": "research", "description": "A", "dependencies": [2]},
            {"id": 2, "type": "research", "description": "B", "dependencies": []}
        ]"#;
        assert!(matches!(
            parse_plan_response(response),
            Err(PlanParseError::ForwardDependency { .. })
        ));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let response =
            r#"[{"id": 1, "type": "research", "description": "A", "dependencies": [7]}]"#;
        assert!(matches!(
            parse_plan_response(response),
            Err(PlanParseError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn rejects_empty_array() {
        assert!(matches!(
            parse_plan_response("[]"),
            Err(PlanParseError::NoTasks)
        ));
    }

    #[test]
    fn fallback_plan_is_single_research_task() {
        let plan = fallback_plan("what is the airspeed velocity of an unladen swallow");
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].id, 1);
        assert_eq!(plan[0].kind, TaskType::Research);
        assert!(plan[0].dependencies.is_empty());
        assert!(plan[0].description.contains("unladen swallow"));
    }

    #[test]
    fn fallback_truncates_long_requests_on_char_boundary() {
        let request = "é".repeat(500);
        let plan = fallback_plan(&request);
        assert!(plan[0].description.chars().count() < 200);
    }

    #[tokio::test]
    async fn generator_failure_yields_fallback() {
        let planner = Planner::new(Arc::new(FailingGenerator));
        let outcome = planner.generate("research something").await;
        assert_eq!(outcome.tasks.len(), 1);
        assert_eq!(outcome.tasks[0].kind, TaskType::Research);
        assert!(!outcome.notes.is_empty());
    }

    #[tokio::test]
    async fn unusable_response_yields_fallback() {
        let planner = Planner::new(Arc::new(CannedGenerator(
            "I would rather talk about boats.".to_owned(),
        )));
        let outcome = planner.generate("research something").await;
        assert_eq!(outcome.tasks.len(), 1);
    }

    #[tokio::test]
    async fn good_response_passes_through() {
        let planner = Planner::new(Arc::new(CannedGenerator(GOOD_PLAN.to_owned())));
        let outcome = planner.generate("research and summarize").await;
        assert_eq!(outcome.tasks.len(), 2);
        assert!(outcome.notes.is_empty());
    }

    #[tokio::test]
    async fn regeneration_embeds_feedback_in_prompt() {
        struct PromptCapture(std::sync::Mutex<String>);

        #[async_trait]
        impl TextGenerator for PromptCapture {
            async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
                *self.0.lock().unwrap() = prompt.to_owned();
                Ok(GOOD_PLAN.to_owned())
            }
        }

        let capture = Arc::new(PromptCapture(std::sync::Mutex::new(String::new())));
        let planner = Planner::new(capture.clone());

        let previous = vec![Task::new(1, TaskType::Research, "old task", vec![])];
        planner
            .regenerate("the request", &previous, "add visualizations")
            .await;

        let prompt = capture.0.lock().unwrap().clone();
        assert!(prompt.contains("add visualizations"));
        assert!(prompt.contains("old task"));
    }
}
