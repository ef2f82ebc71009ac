//! Invocation contract types.
//!
//! These are the shapes an adapter (HTTP, RPC, CLI) exchanges with the
//! orchestrator. The adapter itself lives outside this crate.

use serde::{Deserialize, Serialize};

use crate::task::{Step, StepStatus, Task, TaskError, TaskStatus};

/// One step of an incoming task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Incoming request to run a task.
///
/// When `steps` is omitted the caller kept decomposition to itself and the
/// whole description becomes a single step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<StepSpec>>,
}

impl TaskRequest {
    /// Build a runnable task from the request.
    ///
    /// # Errors
    /// Returns `Err` on an empty description, duplicate or unknown step
    /// references, or a cyclic dependency graph.
    pub fn into_task(self) -> Result<Task, TaskError> {
        let steps = match self.steps {
            Some(specs) if !specs.is_empty() => specs
                .into_iter()
                .map(|spec| {
                    Step::new(spec.id, spec.description).with_dependencies(spec.dependencies)
                })
                .collect(),
            _ => vec![Step::new("step_1", self.task_description.clone())],
        };
        Task::new(self.task_description, steps)
    }
}

/// Per-step slice of the outgoing report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub id: String,
    pub description: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outgoing report for a finished (or halted) task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    pub task_id: String,
    pub success: bool,
    /// Fraction of steps verified, within [0.0, 1.0]
    pub progress: f64,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub steps: Vec<StepReport>,
}

impl TaskReport {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id().to_string(),
            success: task.status() == TaskStatus::Completed,
            progress: task.progress(),
            completed_steps: task.verified_count(),
            failed_steps: task.failed_count(),
            steps: task
                .steps()
                .iter()
                .map(|step| StepReport {
                    id: step.id.clone(),
                    description: step.description.clone(),
                    status: step.status(),
                    confidence: step.confidence,
                    error: step.error.clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_without_steps_becomes_single_step_task() {
        let request = TaskRequest {
            task_description: "do the analysis".to_string(),
            steps: None,
        };
        let task = request.into_task().unwrap();
        assert_eq!(task.steps().len(), 1);
        assert_eq!(task.steps()[0].id, "step_1");
        assert_eq!(task.steps()[0].description, "do the analysis");
    }

    #[test]
    fn request_with_steps_preserves_order_and_dependencies() {
        let request = TaskRequest {
            task_description: "pipeline".to_string(),
            steps: Some(vec![
                StepSpec {
                    id: "a".to_string(),
                    description: "first".to_string(),
                    dependencies: vec![],
                },
                StepSpec {
                    id: "b".to_string(),
                    description: "second".to_string(),
                    dependencies: vec!["a".to_string()],
                },
            ]),
        };
        let task = request.into_task().unwrap();
        assert_eq!(task.steps().len(), 2);
        assert_eq!(task.steps()[1].dependencies, vec!["a".to_string()]);
    }

    #[test]
    fn request_with_cycle_is_rejected() {
        let request = TaskRequest {
            task_description: "pipeline".to_string(),
            steps: Some(vec![
                StepSpec {
                    id: "a".to_string(),
                    description: "first".to_string(),
                    dependencies: vec!["b".to_string()],
                },
                StepSpec {
                    id: "b".to_string(),
                    description: "second".to_string(),
                    dependencies: vec!["a".to_string()],
                },
            ]),
        };
        assert!(request.into_task().is_err());
    }

    #[test]
    fn report_serializes_with_contract_fields() {
        let request = TaskRequest {
            task_description: "do it".to_string(),
            steps: None,
        };
        let task = request.into_task().unwrap();
        let report = TaskReport::from_task(&task);
        let json = serde_json::to_value(&report).unwrap();

        assert!(json.get("task_id").is_some());
        assert_eq!(json["success"], false);
        assert_eq!(json["progress"], 0.0);
        assert_eq!(json["completed_steps"], 0);
        assert_eq!(json["failed_steps"], 0);
        assert_eq!(json["steps"][0]["status"], "pending");
    }
}
