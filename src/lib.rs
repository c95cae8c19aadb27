//! Vulnerability–issue synchronization engine.
//!
//! Groups scanner vulnerabilities into tracker issues, computes issue
//! field content from templated expressions, submits new issues or updates
//! existing ones, and keeps issue open/closed state aligned with
//! vulnerability state across independent stateless runs. The engine keeps
//! no store of its own; everything it needs to remember is recovered from
//! data already written to the source or target system through the link
//! codec.

pub mod collaborators;
pub mod config;
pub mod errors;
pub mod expr;
pub mod models;
pub mod services;

use collaborators::{NewIssueHook, SourceCollaborator, TargetCollaborator};
use expr::Evaluator;

/// Per-run collaborator handles.
///
/// Built once by the composition root and passed down explicitly; the
/// engine never looks collaborators up from ambient state.
#[derive(Clone, Copy)]
pub struct RunContext<'a> {
    pub source: &'a dyn SourceCollaborator,
    pub target: &'a dyn TargetCollaborator,
    pub hook: Option<&'a dyn NewIssueHook>,
    pub evaluator: &'a dyn Evaluator,
}
