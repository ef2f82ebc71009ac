//! The validation engine.
//!
//! # Contract
//! - `validate_before` and `validate_after` are pure functions of the text
//!   and the catalog state; no side effects beyond tracing
//! - Scans are in-memory keyword matching and run in well under a
//!   millisecond for catalogs of a few hundred rules
//! - `correct_course` and `apply_guardrails` never error on missing or
//!   empty text, and re-running either on its own output changes nothing

use std::sync::Arc;

use regex::Regex;

use crate::config::ValidationConfig;
use crate::knowledge::KnowledgeBase;
use crate::task::{Step, StepResult};

use super::types::{
    AfterValidation, BeforeValidation, DetectedIssue, IssueCategory, IssueSource,
    RecommendedAction, Severity,
};

/// Marker introducing the correction block appended to a derailed step.
pub const CORRECTION_MARKER: &str = "\n\nIMPORTANT:";

/// Marker introducing the caveat block appended to a biased result.
pub const CAVEAT_MARKER: &str = "\n\nIMPORTANT CAVEATS:";

/// Causal-conclusion connectives neutralized by correction and guardrails.
///
/// Multi-word phrases come first so the alternation prefers them.
const CONNECTIVE_PATTERN: &str = r"(?i)(?:,\s*)?\b(?:it follows that|as a result|which proves that|which means|consequently|accordingly|therefore|thus|hence|so)\b,?\s*";

/// Phrases that make a text an assertive causal/definitive claim. A prior is
/// violated when its trigger fires while one of these is present.
const ASSERTIVE_PATTERN: &str = r"(?i)\b(?:therefore|thus|hence|consequently|it follows that|proves?(?:\s+that)?|causes|caused|must be|definitely|certainly|clearly)\b";

/// Optional structural check over a result text.
pub type GraphCheck = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Before/after validation and correction logic.
///
/// Holds only immutable state (catalog, config, compiled patterns) and can be
/// shared freely.
pub struct ValidationEngine {
    knowledge: Arc<KnowledgeBase>,
    config: ValidationConfig,
    graph_check: Option<GraphCheck>,
    connectives: Regex,
    assertive: Regex,
}

impl ValidationEngine {
    /// Create an engine over a knowledge base with default constants.
    pub fn new(knowledge: Arc<KnowledgeBase>) -> anyhow::Result<Self> {
        Self::with_config(knowledge, ValidationConfig::default())
    }

    /// Create an engine with explicit constants.
    ///
    /// # Errors
    /// Returns an error if the built-in patterns fail to compile (should
    /// never happen with the hardcoded patterns).
    pub fn with_config(
        knowledge: Arc<KnowledgeBase>,
        config: ValidationConfig,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            knowledge,
            config,
            graph_check: None,
            connectives: Regex::new(CONNECTIVE_PATTERN)?,
            assertive: Regex::new(ASSERTIVE_PATTERN)?,
        })
    }

    /// Install a structural check consulted by `validate_after`.
    ///
    /// Without one, `graph_valid` is always true.
    pub fn with_graph_check(mut self, check: GraphCheck) -> Self {
        self.graph_check = Some(check);
        self
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Validate a step before execution.
    ///
    /// Issues already addressed by an applied correction are reported at low
    /// severity: the step text no longer asserts the conclusion unannotated,
    /// so they must not re-block execution.
    pub fn validate_before(&self, step: &Step) -> BeforeValidation {
        let (head, _) = split_at_marker(&step.description, CORRECTION_MARKER);
        let mut issues = self.scan(head);

        for issue in &mut issues {
            if step
                .metadata
                .corrections_applied
                .iter()
                .any(|id| id == &issue.rule_id)
            {
                issue.severity = Severity::Low;
            }
        }

        if issues.is_empty() {
            return BeforeValidation::clean(self.config.confidence_clean);
        }

        let worst = issues.iter().map(|i| i.severity).max();
        let derailed = worst == Some(Severity::Critical);
        let anti = issues
            .iter()
            .filter(|i| i.source == IssueSource::AntiPattern)
            .count();
        let priors = issues.len() - anti;

        if derailed {
            tracing::warn!(
                step = %step.id,
                issues = issues.len(),
                "step derailed by critical reasoning issue"
            );
        }

        BeforeValidation {
            safe: !derailed,
            derailed,
            confidence: self.before_confidence(worst),
            reasoning: format!(
                "{} anti-pattern(s), {} prior violation(s); worst severity {}",
                anti,
                priors,
                worst.map(|s| s.to_string()).unwrap_or_default()
            ),
            action: RecommendedAction::for_severity(worst),
            issues,
        }
    }

    /// Rewrite a derailed step in place.
    ///
    /// Neutralizes causal-conclusion connectives, appends up to
    /// `max_correction_notes` correction notes, and records the original
    /// text plus the applied rule ids in the step metadata. A step with no
    /// detected issues is returned untouched.
    pub fn correct_course(&self, step: &mut Step) {
        let text = step.description.clone();
        let (head, had_marker) = split_at_marker(&text, CORRECTION_MARKER);
        let issues = self.scan(head);
        if issues.is_empty() {
            return;
        }

        let neutralized = self.neutralize_connectives(head);
        if had_marker && neutralized == head {
            // Already corrected; the note block is deterministic from the
            // unchanged head, so there is nothing left to do.
            return;
        }

        let mut notes: Vec<&str> = Vec::new();
        for issue in &issues {
            if notes.len() >= self.config.max_correction_notes {
                break;
            }
            if !notes.contains(&issue.correction.as_str()) {
                notes.push(&issue.correction);
            }
        }

        let mut rewritten = neutralized.trim_end().to_string();
        rewritten.push_str(CORRECTION_MARKER);
        for note in &notes {
            rewritten.push_str("\n- ");
            rewritten.push_str(note);
        }

        if step.metadata.original_description.is_none() {
            step.metadata.original_description = Some(text);
        }
        // Only issues whose note made it into the block count as addressed;
        // anything beyond the cap keeps its original severity on re-validation.
        for issue in &issues {
            if notes.contains(&issue.correction.as_str())
                && !step.metadata.corrections_applied.contains(&issue.rule_id)
            {
                step.metadata.corrections_applied.push(issue.rule_id.clone());
            }
        }

        tracing::info!(
            step = %step.id,
            corrections = step.metadata.corrections_applied.len(),
            "course-corrected step text"
        );
        step.description = rewritten;
    }

    /// Validate a step's result after execution.
    pub fn validate_after(&self, step: &Step, result_text: &str) -> AfterValidation {
        let (head, _) = split_at_marker(result_text, CAVEAT_MARKER);
        let issues = self.scan(head);
        let graph_valid = self.check_graph(head);
        let worst = issues.iter().map(|i| i.severity).max();

        let bias_detected = !issues.is_empty();
        let valid = worst != Some(Severity::Critical) && graph_valid;

        let confidence = if !graph_valid || worst == Some(Severity::Critical) {
            self.config.after_confidence_critical
        } else if worst == Some(Severity::High) {
            self.config.after_confidence_high
        } else if worst.is_some() {
            self.config.after_confidence_minor
        } else {
            self.config.after_confidence_clean
        };

        if bias_detected {
            tracing::debug!(
                step = %step.id,
                issues = issues.len(),
                graph_valid,
                "bias detected in step result"
            );
        }

        AfterValidation {
            valid,
            bias_detected,
            corrections_needed: issues.iter().map(|i| i.rule_id.clone()).collect(),
            graph_valid,
            confidence,
        }
    }

    /// Weaken unsupported causal claims in a result and annotate it.
    ///
    /// Appends at most `max_caveat_lines` category caveats. Clean input is
    /// returned byte-identical; empty text is always clean.
    pub fn apply_guardrails(&self, result: &StepResult) -> StepResult {
        let (head, had_marker) = split_at_marker(&result.text, CAVEAT_MARKER);
        let issues = self.scan(head);
        let graph_valid = self.check_graph(head);
        if issues.is_empty() && graph_valid {
            return result.clone();
        }

        let weakened = self.neutralize_connectives(head);

        let mut categories: Vec<IssueCategory> = Vec::new();
        for issue in &issues {
            if let Some(category) = IssueCategory::for_rule(&issue.rule_id) {
                if !categories.contains(&category) {
                    categories.push(category);
                }
            }
        }
        if !graph_valid && !categories.contains(&IssueCategory::GraphInvalid) {
            categories.push(IssueCategory::GraphInvalid);
        }
        categories.truncate(self.config.max_caveat_lines);

        if weakened == head && (categories.is_empty() || had_marker) {
            return result.clone();
        }

        let mut annotated = weakened.trim_end().to_string();
        if !categories.is_empty() {
            annotated.push_str(CAVEAT_MARKER);
            for category in &categories {
                annotated.push_str("\n- ");
                annotated.push_str(category.caveat_line());
            }
        }

        let mut guardrails_applied = result.guardrails_applied.clone();
        for issue in &issues {
            if !guardrails_applied.contains(&issue.rule_id) {
                guardrails_applied.push(issue.rule_id.clone());
            }
        }

        StepResult {
            text: annotated,
            original_text: result
                .original_text
                .clone()
                .or_else(|| Some(result.text.clone())),
            guardrails_applied,
            data: result.data.clone(),
        }
    }

    /// Scan a text against both rule families.
    fn scan(&self, text: &str) -> Vec<DetectedIssue> {
        if text.is_empty() {
            return Vec::new();
        }

        let mut issues: Vec<DetectedIssue> = self
            .knowledge
            .find_anti_patterns(text)
            .into_iter()
            .map(|m| DetectedIssue {
                snippet: snippet_around(
                    text,
                    m.position,
                    m.matched_trigger.len(),
                    self.config.snippet_context_chars,
                ),
                rule_id: m.rule_id,
                name: m.name,
                source: IssueSource::AntiPattern,
                severity: m.severity,
                correction: m.correction,
            })
            .collect();

        // A prior is violated only when the text also asserts a
        // causal/definitive claim.
        if self.assertive.is_match(text) {
            for m in self.knowledge.find_priors(text) {
                issues.push(DetectedIssue {
                    snippet: snippet_around(
                        text,
                        m.position,
                        m.matched_trigger.len(),
                        self.config.snippet_context_chars,
                    ),
                    rule_id: m.rule_id,
                    name: "Cognitive prior violation".to_string(),
                    source: IssueSource::Prior,
                    severity: Severity::High,
                    correction: m.statement,
                });
            }
        }

        issues
    }

    fn before_confidence(&self, worst: Option<Severity>) -> f64 {
        match worst {
            None => self.config.confidence_clean,
            Some(Severity::Critical) => self.config.confidence_critical,
            Some(Severity::High) => self.config.confidence_high,
            Some(Severity::Medium) => self.config.confidence_medium,
            Some(Severity::Low) => self.config.confidence_low_only,
        }
    }

    fn check_graph(&self, text: &str) -> bool {
        match &self.graph_check {
            Some(check) => check(text),
            None => true,
        }
    }

    /// Replace causal-conclusion connectives with sentence-terminating
    /// punctuation. Text without connectives is returned verbatim.
    fn neutralize_connectives(&self, text: &str) -> String {
        if !self.connectives.is_match(text) {
            return text.to_string();
        }
        let replaced = self.connectives.replace_all(text, ". ");
        tidy(&replaced)
    }
}

/// Split `text` at the first occurrence of `marker`.
///
/// Returns the text ahead of the marker and whether the marker was present.
fn split_at_marker<'a>(text: &'a str, marker: &str) -> (&'a str, bool) {
    match text.find(marker) {
        Some(pos) => (&text[..pos], true),
        None => (text, false),
    }
}

/// Cleanup pass after connective replacement.
fn tidy(text: &str) -> String {
    let mut out = text.to_string();
    while out.contains("  ") {
        out = out.replace("  ", " ");
    }
    while out.contains(". .") {
        out = out.replace(". .", ".");
    }
    while out.starts_with(". ") {
        out = out[2..].trim_start().to_string();
    }
    out.trim().to_string()
}

/// Slice of the original text around a match, clamped to char boundaries.
fn snippet_around(text: &str, position: usize, match_len: usize, context: usize) -> String {
    let mut start = position.saturating_sub(context);
    let mut end = (position + match_len + context).min(text.len());
    while start > 0 && !text.is_char_boundary(start) {
        start -= 1;
    }
    while end < text.len() && !text.is_char_boundary(end) {
        end += 1;
    }
    text[start..end].trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Step;

    fn engine() -> ValidationEngine {
        ValidationEngine::new(Arc::new(KnowledgeBase::builtin())).unwrap()
    }

    #[test]
    fn clean_step_validates_clean() {
        let eng = engine();
        let step = Step::new("s1", "summarize the quarterly report");
        let outcome = eng.validate_before(&step);
        assert!(outcome.safe);
        assert!(!outcome.derailed);
        assert!(outcome.issues.is_empty());
        assert_eq!(outcome.confidence, 1.0);
        assert_eq!(outcome.action, RecommendedAction::Proceed);
    }

    #[test]
    fn correlation_claim_detects_multiple_issues_and_derails() {
        let eng = engine();
        let step = Step::new("s1", "X and Y correlate, so X causes Y");
        let outcome = eng.validate_before(&step);

        assert!(outcome.issues.len() >= 2);
        assert!(outcome
            .issues
            .iter()
            .any(|i| i.source == IssueSource::AntiPattern));
        assert!(outcome.issues.iter().any(|i| i.source == IssueSource::Prior));
        assert!(outcome.derailed);
        assert!(!outcome.safe);
        assert_eq!(outcome.action, RecommendedAction::Correct);
        assert_eq!(outcome.confidence, 0.95);
    }

    #[test]
    fn confidence_is_always_a_probability() {
        let eng = engine();
        let texts = [
            "plain text",
            "X and Y correlate, so X causes Y",
            "sales increased after ads, therefore ads caused sales",
            "it happened only because of the weather",
            "only look at the best examples",
        ];
        for text in texts {
            let step = Step::new("s", text);
            let before = eng.validate_before(&step);
            assert!((0.0..=1.0).contains(&before.confidence), "{}", text);
            let after = eng.validate_after(&step, text);
            assert!((0.0..=1.0).contains(&after.confidence), "{}", text);
        }
    }

    #[test]
    fn correct_course_removes_therefore_and_notes_temporal_precedence() {
        let eng = engine();
        let mut step = Step::new(
            "s1",
            "Sales increased after ads, therefore ads caused sales increase",
        );
        eng.correct_course(&mut step);

        let text = &step.description;
        assert!(!text.to_lowercase().contains("therefore"), "{}", text);
        assert!(text.contains("IMPORTANT:"));
        assert!(text.to_lowercase().contains("temporal precedence"));
        assert_eq!(
            step.metadata.original_description.as_deref(),
            Some("Sales increased after ads, therefore ads caused sales increase")
        );
        assert!(step
            .metadata
            .corrections_applied
            .iter()
            .any(|id| id == "post_hoc"));
    }

    #[test]
    fn correct_course_is_noop_on_clean_text() {
        let eng = engine();
        let original = "It rains, therefore the ground is wet";
        let mut step = Step::new("s1", original);
        eng.correct_course(&mut step);
        // No catalog trigger fires, so even an assertive text stays untouched
        assert_eq!(step.description, original);
        assert!(step.metadata.original_description.is_none());
        assert!(step.metadata.corrections_applied.is_empty());
    }

    #[test]
    fn correct_course_is_idempotent() {
        let eng = engine();
        let mut step = Step::new(
            "s1",
            "Sales increased after ads, therefore ads caused sales increase",
        );
        eng.correct_course(&mut step);
        let first = step.description.clone();
        eng.correct_course(&mut step);
        assert_eq!(step.description, first);
    }

    #[test]
    fn corrected_step_is_no_longer_derailed() {
        let eng = engine();
        let mut step = Step::new("s1", "X and Y correlate, so X causes Y");
        assert!(eng.validate_before(&step).derailed);

        eng.correct_course(&mut step);
        let rechecked = eng.validate_before(&step);
        assert!(!rechecked.derailed, "{:?}", rechecked);
        assert!(rechecked.safe);
    }

    #[test]
    fn validate_after_flags_bias_in_result() {
        let eng = engine();
        let step = Step::new("s1", "analyze the data");
        let outcome = eng.validate_after(&step, "revenue is correlated with hiring, so hiring causes revenue");
        assert!(outcome.bias_detected);
        assert!(!outcome.valid);
        assert!(!outcome.corrections_needed.is_empty());
        assert!(outcome.graph_valid);
        assert_eq!(outcome.confidence, 0.6);
    }

    #[test]
    fn validate_after_clean_result() {
        let eng = engine();
        let step = Step::new("s1", "analyze the data");
        let outcome = eng.validate_after(&step, "the dataset has 1200 rows");
        assert!(outcome.valid);
        assert!(!outcome.bias_detected);
        assert!(outcome.graph_valid);
        assert_eq!(outcome.confidence, 1.0);
    }

    #[test]
    fn graph_check_feeds_validity_and_confidence() {
        let eng = ValidationEngine::new(Arc::new(KnowledgeBase::builtin()))
            .unwrap()
            .with_graph_check(Box::new(|_| false));
        let step = Step::new("s1", "analyze the data");
        let outcome = eng.validate_after(&step, "the dataset has 1200 rows");
        assert!(!outcome.graph_valid);
        assert!(!outcome.valid);
        assert_eq!(outcome.confidence, 0.6);
    }

    #[test]
    fn guardrails_are_noop_on_clean_result() {
        let eng = engine();
        let result = StepResult::new("the dataset has 1200 rows");
        let out = eng.apply_guardrails(&result);
        assert_eq!(out.text, result.text);
        assert!(out.original_text.is_none());
        assert!(out.guardrails_applied.is_empty());
    }

    #[test]
    fn guardrails_never_error_on_empty_text() {
        let eng = engine();
        let result = StepResult::new("");
        let out = eng.apply_guardrails(&result);
        assert_eq!(out.text, "");
    }

    #[test]
    fn guardrails_weaken_and_annotate() {
        let eng = engine();
        let result = StepResult::new("X and Y correlate, so X causes Y");
        let out = eng.apply_guardrails(&result);

        assert!(!out.text.contains(", so "));
        assert!(out.text.contains("IMPORTANT CAVEATS:"));
        assert!(out
            .text
            .contains("Correlations in this result may not reflect causal relationships."));
        assert_eq!(
            out.original_text.as_deref(),
            Some("X and Y correlate, so X causes Y")
        );
        assert!(out
            .guardrails_applied
            .iter()
            .any(|id| id == "correlation_causation"));
    }

    #[test]
    fn guardrails_are_idempotent() {
        let eng = engine();
        let result = StepResult::new("X and Y correlate, so X causes Y");
        let once = eng.apply_guardrails(&result);
        let twice = eng.apply_guardrails(&once);
        assert_eq!(once.text, twice.text);
        assert_eq!(once.guardrails_applied, twice.guardrails_applied);
    }

    #[test]
    fn caveat_lines_are_capped() {
        let eng = engine();
        let result = StepResult::new(
            "sales rose after the launch and correlate with ads, which clearly causes growth, \
             so there must cause a link",
        );
        let out = eng.apply_guardrails(&result);
        let caveats = out
            .text
            .split("IMPORTANT CAVEATS:")
            .nth(1)
            .unwrap_or_default()
            .lines()
            .filter(|l| l.starts_with("- "))
            .count();
        assert!(caveats <= 3);
    }

    #[test]
    fn empty_catalog_degrades_to_always_safe() {
        let eng = ValidationEngine::new(Arc::new(KnowledgeBase::empty())).unwrap();
        let step = Step::new("s1", "X and Y correlate, so X causes Y");
        let outcome = eng.validate_before(&step);
        assert!(outcome.safe);
        assert!(outcome.issues.is_empty());
    }

    #[test]
    fn connective_matching_respects_word_boundaries() {
        let eng = engine();
        // "also" must not lose its "so"
        let text = "the figures also correlate with tenure";
        let neutralized = eng.neutralize_connectives(text);
        assert_eq!(neutralized, text);
    }
}
