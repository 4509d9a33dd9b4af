//! Final report compilation.
//!
//! A pure, deterministic fold over the terminal state: same state in, same
//! document out. Wall-clock time deliberately stays out of the body.

use conductor_store::models::{TaskStatus, WorkflowState};

/// Compile the final report for a settled workflow.
pub fn compile_report(state: &WorkflowState) -> String {
    let completed = state.count_status(TaskStatus::Completed);
    let failed = state.count_status(TaskStatus::Failed);

    let mut report = String::new();
    report.push_str("# Task Execution Report\n\n");
    report.push_str(&format!("**Original Request:** {}\n\n", state.user_request));

    report.push_str("## Summary\n");
    report.push_str(&format!("- **Total Tasks:** {}\n", state.plan.len()));
    report.push_str(&format!("- **Completed:** {completed}\n"));
    report.push_str(&format!("- **Failed:** {failed}\n\n"));

    report.push_str("## Detailed Results\n\n");
    for task in &state.plan {
        report.push_str(&format!("### Task {}: {}\n", task.id, task.description));
        report.push_str(&format!("**Type:** {}\n", task.kind));
        report.push_str(&format!("**Status:** {}\n", task.status));
        match &task.result {
            Some(result) => report.push_str(&format!("**Result:**\n{result}\n\n")),
            None => report.push_str("**Result:** No result available\n\n"),
        }
    }

    report.push_str("## Conclusion\n");
    if failed > 0 {
        report.push_str(&format!(
            "Workflow completed with {failed} failed task(s). Review the \
             failed tasks above and consider re-running them.\n"
        ));
    } else {
        report.push_str("All tasks completed successfully.\n");
    }

    report
}
