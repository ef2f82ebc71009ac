//! Live-state artifact for a running task.
//!
//! A human-and-machine-readable progress record, rewritten after every step
//! rather than only at task end. A context-limited caller can re-read it to
//! reconstruct what happened so far without replaying the full history;
//! [`LiveState::parse`] recovers the task id and step statuses from the
//! rendered text.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::{StepStatus, Task};

/// Completion record for one executed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_id: String,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    /// One-line summary of pre-execution validation
    pub before_summary: String,
    /// One-line summary of post-execution validation
    pub after_summary: String,
    pub confidence: Option<f64>,
    /// Truncated step input
    pub input_preview: String,
    /// Truncated step output (empty for failed steps)
    pub output_preview: String,
}

/// Parsed view of a rendered live state.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLiveState {
    pub task_id: String,
    pub step_statuses: Vec<(String, StepStatus)>,
}

/// Progress record for one task execution.
///
/// Constructed fresh by the orchestrator for every run; never shared across
/// task executions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveState {
    task_id: String,
    description: String,
    started_at: DateTime<Utc>,
    checklist: Vec<(String, StepStatus)>,
    records: Vec<StepRecord>,
}

impl LiveState {
    pub fn new(task: &Task) -> Self {
        Self {
            task_id: task.id().to_string(),
            description: task.description().to_string(),
            started_at: Utc::now(),
            checklist: task.status_vector(),
            records: Vec::new(),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    /// Refresh the checklist from the task's current statuses.
    pub fn sync_checklist(&mut self, task: &Task) {
        self.checklist = task.status_vector();
    }

    /// Append a completion record for an executed step.
    pub fn push_record(&mut self, record: StepRecord) {
        self.records.push(record);
    }

    /// Render the artifact.
    ///
    /// The format is stable: [`LiveState::parse`] reads it back.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("# Live task state\n");
        out.push_str(&format!("Task: {}\n", self.task_id));
        out.push_str(&format!("Description: {}\n", self.description));
        out.push_str(&format!("Started: {}\n", self.started_at.to_rfc3339()));

        out.push_str("\n## Checklist\n");
        for (id, status) in &self.checklist {
            let mark = if *status == StepStatus::Verified {
                'x'
            } else {
                ' '
            };
            out.push_str(&format!("- [{}] {} ({})\n", mark, id, status));
        }

        for record in &self.records {
            out.push_str(&format!("\n## Step {}\n", record.step_id));
            out.push_str(&format!("- status: {}\n", record.status));
            if let Some(start) = record.started_at {
                out.push_str(&format!("- started: {}\n", start.to_rfc3339()));
            }
            if let Some(end) = record.finished_at {
                out.push_str(&format!("- finished: {}\n", end.to_rfc3339()));
            }
            if let Some(ms) = record.duration_ms {
                out.push_str(&format!("- duration_ms: {}\n", ms));
            }
            out.push_str(&format!("- validation_before: {}\n", record.before_summary));
            out.push_str(&format!("- validation_after: {}\n", record.after_summary));
            if let Some(confidence) = record.confidence {
                out.push_str(&format!("- confidence: {:.2}\n", confidence));
            }
            out.push_str(&format!("- input: {}\n", record.input_preview));
            out.push_str(&format!("- output: {}\n", record.output_preview));
        }

        out
    }

    /// Write the rendered artifact to disk, replacing the previous version.
    pub async fn write_to(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::write(path, self.render()).await
    }

    /// Recover the task id and step statuses from a rendered artifact.
    ///
    /// Returns `None` if the text is not a live-state record.
    pub fn parse(text: &str) -> Option<ParsedLiveState> {
        let mut lines = text.lines();
        if lines.next()?.trim() != "# Live task state" {
            return None;
        }

        let mut task_id = None;
        let mut step_statuses = Vec::new();
        let mut in_checklist = false;

        for line in lines {
            let line = line.trim_end();
            if let Some(rest) = line.strip_prefix("Task: ") {
                task_id = Some(rest.to_string());
            } else if line == "## Checklist" {
                in_checklist = true;
            } else if line.starts_with("## ") {
                in_checklist = false;
            } else if in_checklist {
                if let Some(parsed) = parse_checklist_line(line) {
                    step_statuses.push(parsed);
                }
            }
        }

        Some(ParsedLiveState {
            task_id: task_id?,
            step_statuses,
        })
    }
}

/// Parse a `- [x] id (status)` checklist line.
fn parse_checklist_line(line: &str) -> Option<(String, StepStatus)> {
    let rest = line.strip_prefix("- [")?;
    // Skip the mark character and the closing bracket
    let rest = rest.get(1..)?.strip_prefix("] ")?;
    let (id, status) = rest.rsplit_once(" (")?;
    let status = status.strip_suffix(')')?;
    Some((id.to_string(), status.parse().ok()?))
}

/// Truncate a text for preview display, marking elision.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let truncated: String = flat.chars().take(max_chars).collect();
    format!("{}...", truncated.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Step, StepResult};

    fn sample_task() -> Task {
        Task::new(
            "analyze the sales data",
            vec![
                Step::new("load", "load the data"),
                Step::new("analyze", "analyze it")
                    .with_dependencies(vec!["load".to_string()]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn render_lists_every_step() {
        let task = sample_task();
        let live = LiveState::new(&task);
        let text = live.render();

        assert!(text.contains("# Live task state"));
        assert!(text.contains("analyze the sales data"));
        assert!(text.contains("- [ ] load (pending)"));
        assert!(text.contains("- [ ] analyze (pending)"));
    }

    #[test]
    fn render_parse_round_trip() {
        let mut task = sample_task();
        task.step_mut(0).start().unwrap();
        task.step_mut(0).verify(StepResult::new("rows: 10")).unwrap();

        let mut live = LiveState::new(&task);
        live.sync_checklist(&task);
        live.push_record(StepRecord {
            step_id: "load".to_string(),
            status: StepStatus::Verified,
            started_at: task.step(0).started_at(),
            finished_at: task.step(0).finished_at(),
            duration_ms: task.step(0).duration_ms(),
            before_summary: "clean".to_string(),
            after_summary: "valid".to_string(),
            confidence: Some(1.0),
            input_preview: "load the data".to_string(),
            output_preview: "rows: 10".to_string(),
        });

        let parsed = LiveState::parse(&live.render()).unwrap();
        assert_eq!(parsed.task_id, task.id());
        assert_eq!(
            parsed.step_statuses,
            vec![
                ("load".to_string(), StepStatus::Verified),
                ("analyze".to_string(), StepStatus::Pending),
            ]
        );
    }

    #[test]
    fn parse_rejects_unrelated_text() {
        assert!(LiveState::parse("just some notes").is_none());
    }

    #[tokio::test]
    async fn artifact_is_overwritten_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.md");

        let mut task = sample_task();
        let mut live = LiveState::new(&task);
        live.write_to(&path).await.unwrap();
        let first = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(first.contains("- [ ] load (pending)"));

        task.step_mut(0).start().unwrap();
        task.step_mut(0).verify(StepResult::new("ok")).unwrap();
        live.sync_checklist(&task);
        live.write_to(&path).await.unwrap();
        let second = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(second.contains("- [x] load (verified)"));
    }

    #[test]
    fn truncation_marks_elision() {
        assert_eq!(truncate_chars("short", 10), "short");
        let long = "a".repeat(20);
        let out = truncate_chars(&long, 10);
        assert!(out.ends_with("..."));
        assert!(out.chars().count() <= 13);
    }

    #[test]
    fn step_ids_with_spaces_still_parse() {
        let line = "- [x] fetch raw data (verified)";
        let parsed = parse_checklist_line(line).unwrap();
        assert_eq!(parsed.0, "fetch raw data");
        assert_eq!(parsed.1, StepStatus::Verified);
    }
}
