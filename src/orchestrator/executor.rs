//! Step execution boundary.
//!
//! The orchestrator delegates the actual work of a step (typically an LLM
//! invocation) to a [`StepExecutor`] collaborator. This is the only call in
//! the loop that may block for a non-trivial duration; the orchestrator
//! bounds it with a timeout and holds no lock across it.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::task::Step;

/// How a failed execution should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Worth retrying with backoff (timeouts, connection problems)
    Transient,
    /// Unrecoverable (resource exhaustion, explicit abort)
    Critical,
    /// The step's own output was unusable; retrying will not help
    NonCritical,
}

/// Errors raised by a step executor.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("step timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("execution aborted: {0}")]
    Aborted(String),

    #[error("unusable step output: {0}")]
    Output(String),

    #[error("{0}")]
    Other(String),
}

impl ExecutionError {
    /// Classify this error for the retry policy.
    ///
    /// Untyped errors are classified by keyword, the same way upstream
    /// provider failures surface in free-form messages.
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Timeout(_) | Self::Connection(_) => FailureClass::Transient,
            Self::ResourceExhausted(_) | Self::Aborted(_) => FailureClass::Critical,
            Self::Output(_) => FailureClass::NonCritical,
            Self::Other(message) => classify_message(message),
        }
    }
}

/// Keyword classification for free-form error messages.
pub fn classify_message(message: &str) -> FailureClass {
    let lowered = message.to_lowercase();

    let transient = [
        "timeout",
        "timed out",
        "connection",
        "rate limit",
        "429",
        "too many requests",
        "unavailable",
        "502",
        "503",
        "504",
    ];
    if transient.iter().any(|kw| lowered.contains(kw)) {
        return FailureClass::Transient;
    }

    let critical = ["out of memory", "resource exhausted", "abort", "budget"];
    if critical.iter().any(|kw| lowered.contains(kw)) {
        return FailureClass::Critical;
    }

    FailureClass::NonCritical
}

/// What an executor hands back for a completed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutput {
    /// Result text, scanned by post-execution validation
    pub text: String,
    /// Optional structured payload, stored alongside the text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl StepOutput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// External collaborator that performs a step's actual work.
///
/// # Invariants
/// - `execute()` never panics; all failures are returned as `Err`
/// - Implementations must tolerate being called again with the same step
///   after a transient failure (retries)
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Execute one step.
    ///
    /// `context` maps each of the step's declared dependencies to the value
    /// that dependency wrote into memory.
    async fn execute(
        &self,
        step: &Step,
        context: &BTreeMap<String, serde_json::Value>,
    ) -> Result<StepOutput, ExecutionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_errors_classify_directly() {
        let timeout = ExecutionError::Timeout(std::time::Duration::from_secs(5));
        assert_eq!(timeout.class(), FailureClass::Transient);

        let conn = ExecutionError::Connection("refused".to_string());
        assert_eq!(conn.class(), FailureClass::Transient);

        let oom = ExecutionError::ResourceExhausted("tokens".to_string());
        assert_eq!(oom.class(), FailureClass::Critical);

        let abort = ExecutionError::Aborted("operator".to_string());
        assert_eq!(abort.class(), FailureClass::Critical);

        let output = ExecutionError::Output("not json".to_string());
        assert_eq!(output.class(), FailureClass::NonCritical);
    }

    #[test]
    fn untyped_errors_classify_by_keyword() {
        let err = ExecutionError::Other("upstream returned 503".to_string());
        assert_eq!(err.class(), FailureClass::Transient);

        let err = ExecutionError::Other("model ran out of memory".to_string());
        assert_eq!(err.class(), FailureClass::Critical);

        let err = ExecutionError::Other("could not parse".to_string());
        assert_eq!(err.class(), FailureClass::NonCritical);
    }
}
