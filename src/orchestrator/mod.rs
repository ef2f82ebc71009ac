//! Orchestrator - dependency-aware execution loop with validation hooks.
//!
//! Steps run strictly one at a time in declared order, first ready one wins;
//! there is no parallel step execution and no dynamic reprioritization. The
//! only blocking call in the loop is the delegated executor invocation,
//! bounded by a timeout. Budget and cancellation are checked at step
//! boundaries only; a step in flight is never pre-empted.
//!
//! Per step:
//! 1. Checkpoint memory and step statuses (append-only)
//! 2. Validate the step text; course-correct a derailed step
//! 3. Execute through the [`StepExecutor`], retrying transient failures
//! 4. Validate the result; apply guardrails to a biased one
//! 5. Record the result in memory under the step id
//! 6. Rewrite the live-state artifact
//!
//! Nothing propagates past [`Orchestrator::run`] under normal operation;
//! outcomes are encoded on the task, its steps, and the returned report.

mod executor;
mod live_state;

pub use executor::{classify_message, ExecutionError, FailureClass, StepExecutor, StepOutput};
pub use live_state::{LiveState, ParsedLiveState, StepRecord};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use live_state::truncate_chars;

use crate::config::OrchestratorConfig;
use crate::contract::TaskReport;
use crate::memory::{Checkpoint, CheckpointStore, MemoryError, MemoryStore};
use crate::task::{Step, StepResult, StepStatus, Task, TaskError, TaskStatus};
use crate::validation::{AfterValidation, BeforeValidation, ValidationEngine};

/// Errors surfaced by the orchestrator on misuse or internal faults.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Memory(#[from] MemoryError),
}

/// Everything a run leaves behind besides the mutated task itself.
pub struct RunOutcome {
    pub report: TaskReport,
    /// Append-only checkpoint log, one entry per attempted step
    pub checkpoints: Vec<Checkpoint>,
    pub live_state: LiveState,
}

/// Drives a task to a terminal status.
///
/// The orchestrator owns no cross-task state: a fresh [`MemoryStore`] and
/// [`LiveState`] are constructed per run and torn down with the task, so
/// values never leak between task executions.
pub struct Orchestrator {
    executor: Arc<dyn StepExecutor>,
    engine: ValidationEngine,
    config: OrchestratorConfig,
    checkpoint_store: Option<CheckpointStore>,
    live_state_path: Option<PathBuf>,
}

impl Orchestrator {
    pub fn new(executor: Arc<dyn StepExecutor>, engine: ValidationEngine) -> Self {
        Self {
            executor,
            engine,
            config: OrchestratorConfig::default(),
            checkpoint_store: None,
            live_state_path: None,
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Persist checkpoints to a store in addition to the in-memory log.
    pub fn with_checkpoint_store(mut self, store: CheckpointStore) -> Self {
        self.checkpoint_store = Some(store);
        self
    }

    /// Mirror the live-state artifact to a file after every step.
    pub fn with_live_state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.live_state_path = Some(path.into());
        self
    }

    /// Execute a task to a terminal status.
    ///
    /// # Preconditions
    /// - `task.status() == Pending`
    ///
    /// # Postconditions
    /// - `task.status().is_terminal()`
    /// - Completed steps keep their results and confidences even when the
    ///   run halts early (budget, failure)
    pub async fn run(&self, task: &mut Task) -> Result<RunOutcome, OrchestratorError> {
        task.begin()?;
        tracing::info!(task = %task.id(), steps = task.steps().len(), "task started");

        let mut store = MemoryStore::new();
        let mut checkpoints: Vec<Checkpoint> = Vec::new();
        let mut live = LiveState::new(task);
        self.write_live(&live).await;

        let fallback_primaries = fallback_primaries(task);
        let started = Instant::now();
        let mut executed = 0usize;

        loop {
            let Some(idx) = next_ready(task, &fallback_primaries) else {
                finish_unused_fallbacks(task, &fallback_primaries);
                let status = resolve_terminal(task);
                task.finish(status)?;
                break;
            };

            if executed >= task.budget().max_steps
                || started.elapsed() >= task.budget().max_duration
            {
                tracing::warn!(task = %task.id(), executed, "budget exceeded, halting");
                task.finish(TaskStatus::BudgetExceeded)?;
                break;
            }

            let checkpoint = store.create_checkpoint(task.id(), idx, task.status_vector());
            if let Some(cs) = &self.checkpoint_store {
                if let Err(e) = cs.save(&checkpoint).await {
                    tracing::warn!(error = %e, "failed to persist checkpoint");
                }
            }
            checkpoints.push(checkpoint);

            let mut before = self.engine.validate_before(task.step(idx));
            if before.derailed {
                self.engine.correct_course(task.step_mut(idx));
                before = self.engine.validate_before(task.step(idx));
            }
            if before.derailed {
                // Correction could not bring the step below critical
                let step = task.step_mut(idx);
                step.fail("blocked by safety validation")?;
                tracing::warn!(step = %step.id, "step blocked by safety validation");
                live.push_record(blocked_record(task.step(idx), &before, &self.config));
                live.sync_checklist(task);
                self.write_live(&live).await;
                continue;
            }

            task.step_mut(idx).start()?;
            let snapshot = task.step(idx).clone();
            let context = store.build_context(&snapshot);
            executed += 1;

            match self.execute_with_retries(&snapshot, &context).await {
                Ok(output) => {
                    let mut result = StepResult::new(output.text);
                    result.data = output.data;

                    let after = self.engine.validate_after(&snapshot, &result.text);
                    let final_result = if !after.valid || after.bias_detected {
                        self.engine.apply_guardrails(&result)
                    } else {
                        result
                    };

                    let value = serde_json::Value::String(final_result.text.clone());
                    store.set(snapshot.id.clone(), value.clone(), snapshot.id.clone())?;

                    // A verified fallback also satisfies its failed
                    // primary's memory key, so dependents see a value
                    // under the id they declared.
                    if let Some(primaries) = fallback_primaries.get(&snapshot.id) {
                        for primary in primaries {
                            let primary_failed = task
                                .step_by_id(primary)
                                .map(|s| s.status() == StepStatus::Failed)
                                .unwrap_or(false);
                            if primary_failed {
                                store.set(primary.clone(), value.clone(), snapshot.id.clone())?;
                                task.step_mut(idx).metadata.fallback_for =
                                    Some(primary.clone());
                            }
                        }
                    }

                    let confidence = before.confidence.min(after.confidence);
                    {
                        let step = task.step_mut(idx);
                        step.confidence = Some(confidence);
                        step.verify(final_result)?;
                    }

                    tracing::info!(step = %snapshot.id, confidence, "step verified");
                    live.push_record(step_record(task.step(idx), &before, &after, &self.config));
                }
                Err(err) => {
                    let class = err.class();
                    let message = err.to_string();
                    task.step_mut(idx).fail(message.clone())?;
                    live.push_record(failed_record(task.step(idx), &before, &self.config));

                    if snapshot.error_policy.fallback.is_some() {
                        tracing::warn!(
                            step = %snapshot.id,
                            %message,
                            "step failed, routing to fallback"
                        );
                        live.sync_checklist(task);
                        self.write_live(&live).await;
                        continue;
                    }

                    tracing::error!(
                        step = %snapshot.id,
                        ?class,
                        %message,
                        "unrecoverable step failure"
                    );
                    live.sync_checklist(task);
                    self.write_live(&live).await;
                    task.finish(TaskStatus::Failed)?;
                    break;
                }
            }

            live.sync_checklist(task);
            self.write_live(&live).await;
        }

        live.sync_checklist(task);
        self.write_live(&live).await;
        tracing::info!(task = %task.id(), status = %task.status(), "task finished");

        Ok(RunOutcome {
            report: TaskReport::from_task(task),
            checkpoints,
            live_state: live,
        })
    }

    /// Run the executor, retrying transient failures with exponential
    /// backoff up to the step's retry ceiling.
    async fn execute_with_retries(
        &self,
        step: &Step,
        context: &std::collections::BTreeMap<String, serde_json::Value>,
    ) -> Result<StepOutput, ExecutionError> {
        let max_retries = step.error_policy.max_retries;
        let mut attempt = 0u32;

        loop {
            let outcome =
                match tokio::time::timeout(self.config.step_timeout, self.executor.execute(step, context))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ExecutionError::Timeout(self.config.step_timeout)),
                };

            match outcome {
                Ok(output) => return Ok(output),
                Err(err) if err.class() == FailureClass::Transient && attempt < max_retries => {
                    let delay = backoff_delay(
                        self.config.retry_base_delay,
                        self.config.retry_max_delay,
                        attempt,
                    );
                    attempt += 1;
                    tracing::warn!(
                        step = %step.id,
                        attempt,
                        max_retries,
                        ?delay,
                        error = %err,
                        "transient step failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn write_live(&self, live: &LiveState) {
        if let Some(path) = &self.live_state_path {
            if let Err(e) = live.write_to(path).await {
                tracing::warn!(error = %e, "failed to write live state artifact");
            }
        }
    }
}

/// Exponential backoff: `base * 2^attempt`, capped.
fn backoff_delay(
    base: std::time::Duration,
    max: std::time::Duration,
    attempt: u32,
) -> std::time::Duration {
    base.saturating_mul(2u32.saturating_pow(attempt)).min(max)
}

/// Map each fallback step id to the primaries that declared it.
fn fallback_primaries(task: &Task) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for step in task.steps() {
        if let Some(fallback) = &step.error_policy.fallback {
            map.entry(fallback.clone()).or_default().push(step.id.clone());
        }
    }
    map
}

/// First pending step, in declared order, whose dependencies are satisfied.
///
/// A fallback step stays dormant until one of its primaries fails.
fn next_ready(task: &Task, fallback_primaries: &HashMap<String, Vec<String>>) -> Option<usize> {
    task.steps().iter().position(|step| {
        if step.status() != StepStatus::Pending {
            return false;
        }
        if let Some(primaries) = fallback_primaries.get(&step.id) {
            let activated = primaries.iter().any(|p| {
                task.step_by_id(p)
                    .map(|s| s.status() == StepStatus::Failed)
                    .unwrap_or(false)
            });
            if !activated {
                return false;
            }
        }
        step.dependencies.iter().all(|dep| dep_satisfied(task, dep))
    })
}

/// A dependency is satisfied by its own verification or by a verified
/// fallback standing in for it after failure.
fn dep_satisfied(task: &Task, dep_id: &str) -> bool {
    let Some(dep) = task.step_by_id(dep_id) else {
        return false;
    };
    match dep.status() {
        StepStatus::Verified => true,
        StepStatus::Failed => dep
            .error_policy
            .fallback
            .as_deref()
            .and_then(|f| task.step_by_id(f))
            .map(|s| s.status() == StepStatus::Verified)
            .unwrap_or(false),
        _ => false,
    }
}

/// Mark fallback steps whose primaries all succeeded as skipped.
fn finish_unused_fallbacks(task: &mut Task, fallback_primaries: &HashMap<String, Vec<String>>) {
    for i in 0..task.steps().len() {
        if task.step(i).status() != StepStatus::Pending {
            continue;
        }
        let id = task.step(i).id.clone();
        let Some(primaries) = fallback_primaries.get(&id) else {
            continue;
        };
        let unused = primaries.iter().all(|p| {
            task.step_by_id(p)
                .map(|s| matches!(s.status(), StepStatus::Verified | StepStatus::Skipped))
                .unwrap_or(true)
        });
        if unused {
            let _ = task.step_mut(i).skip();
        }
    }
}

/// Terminal status once no step is ready.
fn resolve_terminal(task: &Task) -> TaskStatus {
    let recovered = |step: &Step| {
        step.status() == StepStatus::Failed
            && step
                .error_policy
                .fallback
                .as_deref()
                .and_then(|f| task.step_by_id(f))
                .map(|s| s.status() == StepStatus::Verified)
                .unwrap_or(false)
    };

    let all_done = task.steps().iter().all(|s| {
        matches!(s.status(), StepStatus::Verified | StepStatus::Skipped) || recovered(s)
    });
    if all_done {
        return TaskStatus::Completed;
    }
    if task
        .steps()
        .iter()
        .any(|s| s.status() == StepStatus::Failed && !recovered(s))
    {
        return TaskStatus::Failed;
    }
    // No failure, nothing ready, task incomplete: dependency deadlock
    TaskStatus::Blocked
}

fn after_summary(after: &AfterValidation) -> String {
    if after.valid && !after.bias_detected {
        "clean".to_string()
    } else {
        format!(
            "valid={} bias_detected={} graph_valid={} corrections={}",
            after.valid,
            after.bias_detected,
            after.graph_valid,
            after.corrections_needed.len()
        )
    }
}

fn step_record(
    step: &Step,
    before: &BeforeValidation,
    after: &AfterValidation,
    config: &OrchestratorConfig,
) -> StepRecord {
    StepRecord {
        step_id: step.id.clone(),
        status: step.status(),
        started_at: step.started_at(),
        finished_at: step.finished_at(),
        duration_ms: step.duration_ms(),
        before_summary: before.reasoning.clone(),
        after_summary: after_summary(after),
        confidence: step.confidence,
        input_preview: truncate_chars(&step.description, config.live_preview_chars),
        output_preview: truncate_chars(
            step.result().map(|r| r.text.as_str()).unwrap_or(""),
            config.live_preview_chars,
        ),
    }
}

fn failed_record(step: &Step, before: &BeforeValidation, config: &OrchestratorConfig) -> StepRecord {
    StepRecord {
        step_id: step.id.clone(),
        status: step.status(),
        started_at: step.started_at(),
        finished_at: step.finished_at(),
        duration_ms: step.duration_ms(),
        before_summary: before.reasoning.clone(),
        after_summary: format!("failed: {}", step.error.as_deref().unwrap_or("unknown")),
        confidence: step.confidence,
        input_preview: truncate_chars(&step.description, config.live_preview_chars),
        output_preview: String::new(),
    }
}

fn blocked_record(step: &Step, before: &BeforeValidation, config: &OrchestratorConfig) -> StepRecord {
    StepRecord {
        step_id: step.id.clone(),
        status: step.status(),
        started_at: None,
        finished_at: step.finished_at(),
        duration_ms: None,
        before_summary: before.reasoning.clone(),
        after_summary: "not executed".to_string(),
        confidence: None,
        input_preview: truncate_chars(&step.description, config.live_preview_chars),
        output_preview: String::new(),
    }
}
