//! Dependency resolution: which task runs next.

use conductor_store::models::{Task, TaskStatus};

/// Return the id of the first pending task (in id order) whose
/// dependencies have all completed, or `None` if no task is runnable.
///
/// A pending task with a failed dependency is permanently unreachable and
/// is skipped; when only such tasks remain the execution phase is over and
/// the runner proceeds to compilation.
pub fn next_runnable(plan: &[Task]) -> Option<u32> {
    plan.iter()
        .filter(|t| t.status == TaskStatus::Pending)
        .find(|t| {
            t.dependencies.iter().all(|dep| {
                plan.iter()
                    .any(|other| other.id == *dep && other.status == TaskStatus::Completed)
            })
        })
        .map(|t| t.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_store::models::TaskType;

    fn task(id: u32, deps: Vec<u32>, status: TaskStatus) -> Task {
        let mut t = Task::new(id, TaskType::Research, format!("task {id}"), deps);
        t.status = status;
        t
    }

    #[test]
    fn empty_plan_has_no_runnable_task() {
        assert_eq!(next_runnable(&[]), None);
    }

    #[test]
    fn picks_first_task_without_dependencies() {
        let plan = vec![
            task(1, vec![], TaskStatus::Pending),
            task(2, vec![], TaskStatus::Pending),
        ];
        assert_eq!(next_runnable(&plan), Some(1));
    }

    #[test]
    fn skips_tasks_with_incomplete_dependencies() {
        let plan = vec![
            task(1, vec![], TaskStatus::InProgress),
            task(2, vec![1], TaskStatus::Pending),
        ];
        assert_eq!(next_runnable(&plan), None);
    }

    #[test]
    fn unlocks_once_dependency_completes() {
        let plan = vec![
            task(1, vec![], TaskStatus::Completed),
            task(2, vec![1], TaskStatus::Pending),
        ];
        assert_eq!(next_runnable(&plan), Some(2));
    }

    #[test]
    fn failed_dependency_makes_dependant_unreachable() {
        let plan = vec![
            task(1, vec![], TaskStatus::Failed),
            task(2, vec![1], TaskStatus::Pending),
            task(3, vec![], TaskStatus::Pending),
        ];
        // Task 2 is skipped forever; task 3 is still runnable.
        assert_eq!(next_runnable(&plan), Some(3));
    }

    #[test]
    fn none_when_only_unreachable_pending_tasks_remain() {
        let plan = vec![
            task(1, vec![], TaskStatus::Failed),
            task(2, vec![1], TaskStatus::Pending),
        ];
        assert_eq!(next_runnable(&plan), None);
    }

    #[test]
    fn diamond_resolves_in_id_order() {
        let plan = vec![
            task(1, vec![], TaskStatus::Completed),
            task(2, vec![1], TaskStatus::Pending),
            task(3, vec![1], TaskStatus::Pending),
            task(4, vec![2, 3], TaskStatus::Pending),
        ];
        assert_eq!(next_runnable(&plan), Some(2));
    }
}
