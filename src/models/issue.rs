//! Issue locators, state snapshots and transition rules.

use serde::{Deserialize, Serialize};

use crate::models::fields::FieldMap;

/// Current issue fields as returned by the tracker.
///
/// Opaque to the engine; only predicate templates interpret it, under the
/// `issueState` context binding.
pub type IssueStateSnapshot = FieldMap;

/// Identifies an issue in the target tracker.
///
/// Immutable once created. At least one part is present on any locator
/// the engine produces; `id` may be absent when the tracker only returns
/// a browsable URL, and `deep_link` may be absent when a codec template
/// carries only the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueLocator {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub deep_link: Option<String>,
}

impl IssueLocator {
    pub fn new(id: Option<String>, deep_link: Option<String>) -> Self {
        Self { id, deep_link }
    }

    pub fn from_parts(id: &str, deep_link: &str) -> Self {
        Self::new(Some(id.to_string()), Some(deep_link.to_string()))
    }

    pub fn from_link(deep_link: &str) -> Self {
        Self::new(None, Some(deep_link.to_string()))
    }

    /// Best display form for log context: the deep link when present,
    /// otherwise the id.
    pub fn display(&self) -> &str {
        self.deep_link
            .as_deref()
            .or(self.id.as_deref())
            .unwrap_or("<unknown issue>")
    }
}

/// One named workflow step, optionally carrying a comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionStep {
    pub name: String,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Ordered workflow steps guarded by a state predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRule {
    /// Predicate template evaluated against the issue state snapshot.
    pub when: String,
    pub steps: Vec<TransitionStep>,
}

/// Transition rules per direction.
///
/// The first rule whose predicate matches the current snapshot is
/// selected; its steps run in order. An empty direction means the engine
/// never transitions that way, whatever the vulnerability state says.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TransitionTable {
    #[serde(default)]
    pub for_opening_issue: Vec<TransitionRule>,
    #[serde(default)]
    pub for_closing_issue: Vec<TransitionRule>,
}
