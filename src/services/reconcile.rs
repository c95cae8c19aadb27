//! Issue state reconciliation.
//!
//! Compares a group's aggregate vulnerability state with the tracked
//! issue's current state and drives the configured transition sequence.
//! Terminal per run: nothing is persisted between runs, and a failure is
//! scoped to its group.

use serde::Serialize;
use serde_json::Value;

use crate::collaborators::TargetCollaborator;
use crate::config::UpdateConfig;
use crate::errors::SyncError;
use crate::expr::{EvalContext, Evaluator, ExprError};
use crate::models::issue::{IssueStateSnapshot, TransitionRule};
use crate::models::vulnerability::VulnerabilityRecord;
use crate::services::field_cache::IssueFieldCache;
use crate::services::grouping::record_context;

/// Context binding under which predicates see the issue state snapshot.
pub const ISSUE_STATE_BINDING: &str = "issueState";

/// Result of reconciling one existing issue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ReconcileOutcome {
    /// Vulnerabilities are open again; the issue was reopened.
    Opened,
    /// All vulnerabilities are closed; the issue was closed.
    Closed,
    /// Issue state already matches the vulnerability state, or no
    /// transition is eligible for the current snapshot.
    NoActionNeeded,
    /// The tracker rejected a step; remaining steps were skipped.
    ActionFailed { step: String },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Direction {
    Open,
    Close,
}

pub struct StateReconciler<'a> {
    evaluator: &'a dyn Evaluator,
    config: &'a UpdateConfig,
    tracker_name: &'a str,
}

impl<'a> StateReconciler<'a> {
    pub fn new(
        evaluator: &'a dyn Evaluator,
        config: &'a UpdateConfig,
        tracker_name: &'a str,
    ) -> Self {
        Self {
            evaluator,
            config,
            tracker_name,
        }
    }

    /// Aggregate vulnerability state: the group is open when any member
    /// satisfies the configured predicate.
    pub fn group_is_open(&self, members: &[VulnerabilityRecord]) -> Result<bool, SyncError> {
        for member in members {
            let ctx = record_context(member);
            if self.eval_bool(&self.config.vulnerability_open_template, &ctx)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Whether the issue is eligible to be (re)opened for the current
    /// snapshot.
    pub fn is_issue_openable(&self, cache: &IssueFieldCache) -> Result<bool, SyncError> {
        Ok(self.eligible_rule(cache, Direction::Open)?.is_some())
    }

    /// Whether the issue is eligible to be closed for the current
    /// snapshot.
    pub fn is_issue_closeable(&self, cache: &IssueFieldCache) -> Result<bool, SyncError> {
        Ok(self.eligible_rule(cache, Direction::Close)?.is_some())
    }

    /// Reconcile one existing issue against its group's members.
    ///
    /// New issues never come through here; they only get the new-issue
    /// hook.
    pub fn reconcile(
        &self,
        target: &dyn TargetCollaborator,
        cache: &IssueFieldCache,
        members: &[VulnerabilityRecord],
    ) -> Result<ReconcileOutcome, SyncError> {
        let vulnerabilities_open = self.group_is_open(members)?;
        let direction = if vulnerabilities_open {
            Direction::Open
        } else {
            Direction::Close
        };

        let Some(rule) = self.eligible_rule(cache, direction)? else {
            return Ok(ReconcileOutcome::NoActionNeeded);
        };

        for step in &rule.steps {
            let accepted = target
                .transition_issue(cache.locator(), &step.name, step.comment.as_deref())
                .map_err(SyncError::Target)?;
            if !accepted {
                tracing::warn!(
                    step = %step.name,
                    issue = %cache.locator().display(),
                    tracker = %self.tracker_name,
                    "transition step rejected; skipping remaining steps for this issue"
                );
                return Ok(ReconcileOutcome::ActionFailed {
                    step: step.name.clone(),
                });
            }
            tracing::debug!(
                step = %step.name,
                issue = %cache.locator().display(),
                "transition step applied"
            );
        }

        // the snapshot changed underneath the memo
        cache.reset();

        Ok(if vulnerabilities_open {
            ReconcileOutcome::Opened
        } else {
            ReconcileOutcome::Closed
        })
    }

    /// Select the transition rule for a direction, or `None` when the
    /// issue is not eligible.
    ///
    /// Returns `None` before evaluating any predicate when no rules exist
    /// for the direction or the tracker cannot be queried. Otherwise the
    /// optional eligibility template (default `true`) gates, then the
    /// first rule whose predicate matches the snapshot is selected;
    /// a matching rule with no steps leaves the issue ineligible.
    fn eligible_rule(
        &self,
        cache: &IssueFieldCache,
        direction: Direction,
    ) -> Result<Option<&'a TransitionRule>, SyncError> {
        let rules = match direction {
            Direction::Open => &self.config.transitions.for_opening_issue,
            Direction::Close => &self.config.transitions.for_closing_issue,
        };
        if rules.is_empty() {
            return Ok(None);
        }
        if !cache.can_retrieve_fields() {
            return Ok(None);
        }

        let snapshot = cache.fields()?;
        let ctx = snapshot_context(snapshot.as_ref());

        let gate = match direction {
            Direction::Open => self.config.is_issue_openable_template.as_deref(),
            Direction::Close => self.config.is_issue_closeable_template.as_deref(),
        };
        if let Some(template) = gate {
            if !self.eval_bool(template, &ctx)? {
                return Ok(None);
            }
        }

        for rule in rules {
            if self.eval_bool(&rule.when, &ctx)? {
                return Ok(if rule.steps.is_empty() {
                    None
                } else {
                    Some(rule)
                });
            }
        }
        Ok(None)
    }

    fn eval_bool(&self, template: &str, ctx: &EvalContext) -> Result<bool, SyncError> {
        let value = self
            .evaluator
            .evaluate(template, ctx)
            .map_err(|e| SyncError::template(template, e))?;
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(SyncError::template(
                template,
                ExprError::Type(format!("predicate evaluated to {other}, expected a boolean")),
            )),
        }
    }
}

/// Evaluation context exposing the snapshot as `issueState`.
fn snapshot_context(snapshot: Option<&IssueStateSnapshot>) -> EvalContext {
    let value = snapshot.map(|s| s.to_value()).unwrap_or(Value::Null);
    EvalContext::with_subject(ISSUE_STATE_BINDING, value)
}
