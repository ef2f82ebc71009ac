//! Before/after validation and correction of step text.
//!
//! The engine consults the knowledge base on every step: before execution it
//! scores the step text against the anti-pattern and prior catalogs and can
//! rewrite a derailed step; after execution it scores the result text and can
//! weaken unsupported causal claims. Both rewrites are textual annotation
//! passes, deterministic, and idempotent on already-clean input.

mod engine;
mod types;

pub use engine::{GraphCheck, ValidationEngine, CAVEAT_MARKER, CORRECTION_MARKER};
pub use types::{
    AfterValidation, BeforeValidation, DetectedIssue, IssueCategory, IssueSource,
    RecommendedAction, Severity,
};
