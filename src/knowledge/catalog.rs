//! Built-in rule catalog.
//!
//! The tables below are the default rule set shipped with the engine. They
//! are intentionally small and keyword-based; deployments with curated
//! catalogs load them via `KnowledgeBase::from_json_file` instead.

use crate::validation::Severity;

use super::{AntiPatternRule, PriorRule};

fn rule(
    id: &str,
    name: &str,
    triggers: &[&str],
    severity: Severity,
    correction: &str,
) -> AntiPatternRule {
    AntiPatternRule {
        id: id.to_string(),
        name: name.to_string(),
        triggers: triggers.iter().map(|t| t.to_string()).collect(),
        severity,
        correction: correction.to_string(),
    }
}

fn prior(id: &str, statement: &str, triggers: &[&str]) -> PriorRule {
    PriorRule {
        id: id.to_string(),
        statement: statement.to_string(),
        triggers: triggers.iter().map(|t| t.to_string()).collect(),
    }
}

pub(super) fn builtin_anti_patterns() -> Vec<AntiPatternRule> {
    vec![
        rule(
            "post_hoc",
            "Post hoc ergo propter hoc",
            &[
                "increased after",
                "decreased after",
                "rose after",
                "fell after",
                "dropped after",
                "improved after",
                "happened after",
                "right after",
                "soon after",
                "immediately after",
                "ever since",
            ],
            Severity::High,
            "Temporal precedence alone is not sufficient to establish causation; \
             an event that follows another is not thereby caused by it. Consider \
             coincidence, seasonality, and confounding factors.",
        ),
        rule(
            "correlation_causation",
            "Correlation-causation conflation",
            &[
                "correlate",
                "correlated",
                "correlation",
                "associated with",
                "linked to",
                "goes hand in hand",
            ],
            Severity::Critical,
            "Correlation does not establish causation; test for confounders, \
             selection effects, and reverse causation before drawing a causal \
             conclusion.",
        ),
        rule(
            "reverse_causation",
            "Reverse causation neglect",
            &[
                "must be causing",
                "clearly causes",
                "obviously causes",
                "definitely causes",
                "can only be caused",
            ],
            Severity::High,
            "The causal arrow may point the other way; check whether the \
             supposed effect could be driving the supposed cause.",
        ),
        rule(
            "single_cause",
            "Single-cause fallacy",
            &[
                "the only reason",
                "the sole cause",
                "only because",
                "entirely due to",
                "solely due to",
            ],
            Severity::Medium,
            "Outcomes usually have multiple interacting causes; enumerate \
             alternative and contributing causes instead of a single one.",
        ),
        rule(
            "missing_mechanism",
            "Missing causal mechanism",
            &["somehow causes", "must cause", "has to cause", "no doubt causes"],
            Severity::Medium,
            "A causal claim needs a plausible mechanism; state how the cause \
             is supposed to produce the effect.",
        ),
        rule(
            "cherry_picking",
            "Cherry-picked evidence",
            &[
                "only look at",
                "only the successful",
                "ignoring the failures",
                "handpicked",
                "best examples",
            ],
            Severity::Low,
            "Conclusions drawn from a selected subset of cases do not \
             generalize; include the full sample.",
        ),
    ]
}

pub(super) fn builtin_priors() -> Vec<PriorRule> {
    vec![
        prior(
            "prior_correlation",
            "Correlation does not imply causation.",
            &["correlate", "correlated", "correlation", "associated with", "linked to"],
        ),
        prior(
            "prior_temporal",
            "Temporal precedence is necessary but not sufficient for causation.",
            &["after", "followed by", "subsequent to", "ever since"],
        ),
        prior(
            "prior_confounder",
            "An observed association may be produced by a common cause; rule out confounders first.",
            &["correlation", "correlate", "associated with", "linked to"],
        ),
        prior(
            "prior_mechanism",
            "A causal claim requires a plausible generating mechanism.",
            &["causes", "caused", "cause of"],
        ),
    ]
}
