//! Core Task type with resource budget and dependency validation.
//!
//! # Invariants
//! - Step ids are unique within a task
//! - Every declared dependency and fallback names an existing step
//! - The dependency graph is acyclic (rejected eagerly at construction)
//!
//! # Design for Provability
//! - All invariants are checked at construction time
//! - Status changes go through explicit validated transitions

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::step::{Step, StepStatus};

/// Status of a task in its lifecycle.
///
/// # State Machine
/// ```text
/// Pending -> Running -> Completed
///                   \-> Failed
///                   \-> Blocked
///                   \-> BudgetExceeded
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is waiting to be executed
    Pending,
    /// Task is currently being executed
    Running,
    /// Every step reached `Verified` (directly or through a fallback)
    Completed,
    /// A step failed and could not be recovered
    Failed,
    /// No step is ready but the task is incomplete (dependency deadlock)
    Blocked,
    /// The step or wall-clock budget ran out; partial results retained
    BudgetExceeded,
}

impl TaskStatus {
    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Blocked | Self::BudgetExceeded
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Blocked => write!(f, "blocked"),
            Self::BudgetExceeded => write!(f, "budget_exceeded"),
        }
    }
}

/// Resource budget for one task execution.
///
/// Both limits are checked at step boundaries only; a step in flight is
/// never pre-empted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskBudget {
    /// Maximum number of step executions (retries excluded)
    pub max_steps: usize,
    /// Maximum wall-clock duration for the whole run
    pub max_duration: Duration,
}

impl Default for TaskBudget {
    fn default() -> Self {
        Self {
            max_steps: 20,
            max_duration: Duration::from_secs(300),
        }
    }
}

/// Errors that can occur during task construction and state changes.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    #[error("Task description cannot be empty")]
    EmptyDescription,

    #[error("Task has no steps")]
    NoSteps,

    #[error("Step id cannot be empty")]
    EmptyStepId,

    #[error("Duplicate step id: {0}")]
    DuplicateStepId(String),

    #[error("Step {step} depends on unknown step {dependency}")]
    UnknownDependency { step: String, dependency: String },

    #[error("Step {step} declares unknown fallback {fallback}")]
    UnknownFallback { step: String, fallback: String },

    #[error("Cyclic dependencies detected at step {0}")]
    CyclicDependencies(String),

    #[error("Unknown step id: {0}")]
    UnknownStep(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

/// An ordered collection of steps executed as one unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    id: String,
    description: String,
    steps: Vec<Step>,
    status: TaskStatus,
    budget: TaskBudget,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new task.
    ///
    /// # Preconditions
    /// - `description` is non-empty
    /// - `steps` is non-empty, ids unique, dependencies/fallbacks known,
    ///   dependency graph acyclic
    ///
    /// # Postconditions
    /// - Returns a task with `status == Pending` and a fresh id
    ///
    /// # Errors
    /// Returns `Err` if any precondition is violated. Cycles are rejected
    /// here rather than discovered mid-run.
    pub fn new(description: impl Into<String>, steps: Vec<Step>) -> Result<Self, TaskError> {
        let description = description.into();
        if description.is_empty() {
            return Err(TaskError::EmptyDescription);
        }
        if steps.is_empty() {
            return Err(TaskError::NoSteps);
        }

        let mut ids = HashSet::new();
        for step in &steps {
            if step.id.is_empty() {
                return Err(TaskError::EmptyStepId);
            }
            if !ids.insert(step.id.as_str()) {
                return Err(TaskError::DuplicateStepId(step.id.clone()));
            }
        }

        for step in &steps {
            for dep in &step.dependencies {
                if !ids.contains(dep.as_str()) {
                    return Err(TaskError::UnknownDependency {
                        step: step.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
            if let Some(fallback) = &step.error_policy.fallback {
                if !ids.contains(fallback.as_str()) || fallback == &step.id {
                    return Err(TaskError::UnknownFallback {
                        step: step.id.clone(),
                        fallback: fallback.clone(),
                    });
                }
            }
        }

        detect_cycles(&steps)?;

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            description,
            steps,
            status: TaskStatus::Pending,
            budget: TaskBudget::default(),
            started_at: None,
            finished_at: None,
        })
    }

    pub fn with_budget(mut self, budget: TaskBudget) -> Self {
        self.budget = budget;
        self
    }

    // Getters

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn budget(&self) -> &TaskBudget {
        &self.budget
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step(&self, index: usize) -> &Step {
        &self.steps[index]
    }

    pub fn step_mut(&mut self, index: usize) -> &mut Step {
        &mut self.steps[index]
    }

    pub fn step_by_id(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }

    pub fn verified_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status() == StepStatus::Verified)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status() == StepStatus::Failed)
            .count()
    }

    /// Fraction of steps verified, within [0.0, 1.0].
    pub fn progress(&self) -> f64 {
        if self.steps.is_empty() {
            return 0.0;
        }
        self.verified_count() as f64 / self.steps.len() as f64
    }

    /// Snapshot of every step's status, in declared order.
    pub fn status_vector(&self) -> Vec<(String, StepStatus)> {
        self.steps
            .iter()
            .map(|s| (s.id.clone(), s.status()))
            .collect()
    }

    /// Overwrite step statuses from a snapshot.
    ///
    /// Used only when restoring from a checkpoint.
    ///
    /// # Errors
    /// Returns `Err` if the snapshot names a step this task does not have.
    pub fn apply_status_vector(
        &mut self,
        statuses: &[(String, StepStatus)],
    ) -> Result<(), TaskError> {
        let index: HashMap<String, usize> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();

        for (id, status) in statuses {
            let Some(&i) = index.get(id.as_str()) else {
                return Err(TaskError::UnknownStep(id.clone()));
            };
            self.steps[i].restore_status(*status);
        }
        Ok(())
    }

    // State transitions

    /// Transition the task to `Running`.
    ///
    /// # Precondition
    /// `self.status() == Pending`
    pub fn begin(&mut self) -> Result<(), TaskError> {
        match self.status {
            TaskStatus::Pending => {
                self.status = TaskStatus::Running;
                self.started_at = Some(Utc::now());
                Ok(())
            }
            other => Err(TaskError::InvalidTransition {
                from: other.to_string(),
                to: "running".to_string(),
            }),
        }
    }

    /// Transition the task to a terminal status.
    ///
    /// # Preconditions
    /// - `self.status() == Running`
    /// - `status.is_terminal()`
    pub fn finish(&mut self, status: TaskStatus) -> Result<(), TaskError> {
        if !status.is_terminal() {
            return Err(TaskError::InvalidTransition {
                from: self.status.to_string(),
                to: status.to_string(),
            });
        }
        match self.status {
            TaskStatus::Running => {
                self.status = status;
                self.finished_at = Some(Utc::now());
                Ok(())
            }
            other => Err(TaskError::InvalidTransition {
                from: other.to_string(),
                to: status.to_string(),
            }),
        }
    }
}

/// Depth-first cycle detection over the declared dependency edges.
fn detect_cycles(steps: &[Step]) -> Result<(), TaskError> {
    let index: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();

    // 0 = unvisited, 1 = on the current path, 2 = done
    let mut state = vec![0u8; steps.len()];

    fn visit(
        i: usize,
        steps: &[Step],
        index: &HashMap<&str, usize>,
        state: &mut [u8],
    ) -> Result<(), TaskError> {
        if state[i] == 1 {
            return Err(TaskError::CyclicDependencies(steps[i].id.clone()));
        }
        if state[i] == 2 {
            return Ok(());
        }
        state[i] = 1;
        for dep in &steps[i].dependencies {
            if let Some(&j) = index.get(dep.as_str()) {
                visit(j, steps, index, state)?;
            }
        }
        state[i] = 2;
        Ok(())
    }

    for i in 0..steps.len() {
        visit(i, steps, &index, &mut state)?;
    }
    Ok(())
}
