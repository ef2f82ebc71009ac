//! Tunable constants for validation and orchestration.
//!
//! The severity-to-confidence tables and the retry/budget defaults come from
//! the narrative rule sources and are not tuned for real-world accuracy.
//! They are gathered here as configuration structs instead of magic numbers
//! so callers can override them per deployment.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Constants consumed by the validation engine.
///
/// # Invariants
/// - Every confidence value is within [0.0, 1.0]
/// - `max_correction_notes` and `max_caveat_lines` are small (the rewrite is
///   an annotation pass, not a rewrite of the whole text)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Pre-execution confidence when no issues are detected
    pub confidence_clean: f64,
    /// Pre-execution confidence when the worst issue is critical
    pub confidence_critical: f64,
    /// Pre-execution confidence when the worst issue is high
    pub confidence_high: f64,
    /// Pre-execution confidence when the worst issue is medium
    pub confidence_medium: f64,
    /// Pre-execution confidence when only low-severity issues are present
    pub confidence_low_only: f64,

    /// Post-execution confidence for a clean result
    pub after_confidence_clean: f64,
    /// Post-execution confidence when a critical issue is present or the
    /// causal graph failed validation
    pub after_confidence_critical: f64,
    /// Post-execution confidence when the worst issue is high
    pub after_confidence_high: f64,
    /// Post-execution confidence for medium/low issues
    pub after_confidence_minor: f64,

    /// Maximum number of correction notes appended by course correction
    pub max_correction_notes: usize,
    /// Maximum number of caveat lines appended by guardrails
    pub max_caveat_lines: usize,
    /// Number of characters of surrounding context captured per snippet
    pub snippet_context_chars: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            confidence_clean: 1.0,
            confidence_critical: 0.95,
            confidence_high: 0.85,
            confidence_medium: 0.75,
            confidence_low_only: 0.9,
            after_confidence_clean: 1.0,
            after_confidence_critical: 0.6,
            after_confidence_high: 0.75,
            after_confidence_minor: 0.85,
            max_correction_notes: 3,
            max_caveat_lines: 3,
            snippet_context_chars: 40,
        }
    }
}

/// Constants consumed by the orchestrator execution loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Upper bound on a single delegated executor call
    pub step_timeout: Duration,
    /// First retry delay; doubled on each subsequent attempt
    pub retry_base_delay: Duration,
    /// Ceiling for the exponential backoff delay
    pub retry_max_delay: Duration,
    /// Retry ceiling used when a step does not declare its own
    pub default_max_retries: u32,
    /// Number of characters of step input/output kept in the live state
    pub live_preview_chars: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(60),
            retry_base_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_secs(5),
            default_max_retries: 2,
            live_preview_chars: 160,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_confidences_are_probabilities() {
        let cfg = ValidationConfig::default();
        for value in [
            cfg.confidence_clean,
            cfg.confidence_critical,
            cfg.confidence_high,
            cfg.confidence_medium,
            cfg.confidence_low_only,
            cfg.after_confidence_clean,
            cfg.after_confidence_critical,
            cfg.after_confidence_high,
            cfg.after_confidence_minor,
        ] {
            assert!((0.0..=1.0).contains(&value));
        }
    }

    #[test]
    fn default_backoff_is_bounded() {
        let cfg = OrchestratorConfig::default();
        assert!(cfg.retry_base_delay < cfg.retry_max_delay);
        assert!(cfg.default_max_retries > 0);
    }
}
