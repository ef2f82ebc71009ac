//! Step data model with an explicit status state machine.
//!
//! # State Machine
//! ```text
//! Pending -> Running -> Verified
//!                   \-> Failed
//!        \-> Failed   (blocked by safety validation, never started)
//!        \-> Skipped  (unused fallback)
//! ```
//!
//! # Invariants
//! - A step transitions to `Running` only when every declared dependency is
//!   `Verified`; the orchestrator enforces this before calling [`Step::start`].
//! - Terminal statuses (`Verified`, `Failed`, `Skipped`) are never left again
//!   except through checkpoint recovery.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TaskError;

/// Status of a step in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Waiting for dependencies or for its turn
    Pending,
    /// Currently executing
    Running,
    /// Executed and recorded
    Verified,
    /// Execution or validation failed
    Failed,
    /// Never executed (unused fallback)
    Skipped,
}

impl StepStatus {
    /// Check if the step can make no further progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Verified | Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Verified => write!(f, "verified"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl std::str::FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "verified" => Ok(Self::Verified),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            _ => Err(format!("Invalid step status: {}", s)),
        }
    }
}

/// How the orchestrator reacts when this step's execution fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPolicy {
    /// Retry ceiling for transient failures
    pub max_retries: u32,
    /// Step id to route to once retries are exhausted
    pub fallback: Option<String>,
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            fallback: None,
        }
    }
}

/// Bookkeeping attached to a step by the validation engine and orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepMetadata {
    /// Step text before course correction rewrote it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_description: Option<String>,
    /// Rule ids whose corrections were applied to the step text
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub corrections_applied: Vec<String>,
    /// Id of the failed primary step this step ran as a fallback for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_for: Option<String>,
    /// Free-form annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Result payload produced by executing a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Result text, possibly annotated by guardrails
    pub text: String,
    /// Result text before guardrails weakened it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_text: Option<String>,
    /// Rule ids whose guardrails were applied to the text
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub guardrails_applied: Vec<String>,
    /// Structured payload, if the executor produced one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl StepResult {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            original_text: None,
            guardrails_applied: Vec::new(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A single unit of work within a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Identifier, unique within the owning task
    pub id: String,
    /// What the step should do; rewritten in place by course correction
    pub description: String,
    /// Ids of steps that must be `Verified` before this step may run
    pub dependencies: Vec<String>,
    status: StepStatus,
    /// Combined validation confidence, within [0.0, 1.0]
    pub confidence: Option<f64>,
    /// Failure message, populated when the step fails
    pub error: Option<String>,
    result: Option<StepResult>,
    pub metadata: StepMetadata,
    pub error_policy: ErrorPolicy,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl Step {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            dependencies: Vec::new(),
            status: StepStatus::Pending,
            confidence: None,
            error: None,
            result: None,
            metadata: StepMetadata::default(),
            error_policy: ErrorPolicy::default(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.error_policy.max_retries = max_retries;
        self
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.error_policy.fallback = Some(fallback.into());
        self
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    pub fn result(&self) -> Option<&StepResult> {
        self.result.as_ref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Wall-clock duration of the executed step, if it ran to an end.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }

    // State transitions, explicit and validated

    /// Transition to `Running`.
    ///
    /// # Precondition
    /// `self.status() == Pending`, and the caller has checked that every
    /// dependency is `Verified`.
    pub fn start(&mut self) -> Result<(), TaskError> {
        match self.status {
            StepStatus::Pending => {
                self.status = StepStatus::Running;
                self.started_at = Some(Utc::now());
                Ok(())
            }
            other => Err(TaskError::InvalidTransition {
                from: other.to_string(),
                to: "running".to_string(),
            }),
        }
    }

    /// Transition to `Verified`, recording the result.
    ///
    /// # Precondition
    /// `self.status() == Running`
    pub fn verify(&mut self, result: StepResult) -> Result<(), TaskError> {
        match self.status {
            StepStatus::Running => {
                self.status = StepStatus::Verified;
                self.result = Some(result);
                self.finished_at = Some(Utc::now());
                Ok(())
            }
            other => Err(TaskError::InvalidTransition {
                from: other.to_string(),
                to: "verified".to_string(),
            }),
        }
    }

    /// Transition to `Failed`.
    ///
    /// Allowed from `Pending` as well as `Running`: a step blocked by safety
    /// validation fails without ever starting.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), TaskError> {
        match self.status {
            StepStatus::Pending | StepStatus::Running => {
                self.status = StepStatus::Failed;
                self.error = Some(reason.into());
                self.finished_at = Some(Utc::now());
                Ok(())
            }
            other => Err(TaskError::InvalidTransition {
                from: other.to_string(),
                to: "failed".to_string(),
            }),
        }
    }

    /// Transition to `Skipped` (unused fallback).
    ///
    /// # Precondition
    /// `self.status() == Pending`
    pub fn skip(&mut self) -> Result<(), TaskError> {
        match self.status {
            StepStatus::Pending => {
                self.status = StepStatus::Skipped;
                Ok(())
            }
            other => Err(TaskError::InvalidTransition {
                from: other.to_string(),
                to: "skipped".to_string(),
            }),
        }
    }

    /// Overwrite the status without transition checks.
    ///
    /// Used only when restoring from a checkpoint; normal forward progress
    /// goes through the validated transitions above.
    pub fn restore_status(&mut self, status: StepStatus) {
        self.status = status;
    }
}
