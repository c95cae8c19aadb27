//! Collaborator contracts consumed by the engine.
//!
//! Vendor REST clients implement these traits; authentication, pagination
//! and rate-limit retry live behind them. The engine applies no retry of
//! its own and treats every filter as an opaque, caller-defined value it
//! passes straight through.

use serde_json::Value;

use crate::models::fields::FieldMap;
use crate::models::issue::IssueLocator;
use crate::models::vulnerability::VulnerabilityRecord;

/// Lazily paginated record stream; the engine consumes it exactly once.
pub type VulnerabilityStream<'a> =
    Box<dyn Iterator<Item = Result<VulnerabilityRecord, anyhow::Error>> + 'a>;

/// The scanner-side system vulnerabilities are retrieved from.
pub trait SourceCollaborator {
    /// Display name of the scanner, for logs and reports.
    fn source_name(&self) -> &str;

    /// Retrieve vulnerabilities matching an opaque filter configuration.
    fn retrieve(&self, filter: &Value) -> Result<VulnerabilityStream<'_>, anyhow::Error>;
}

/// The tracker-side system issues are submitted to and updated in.
pub trait TargetCollaborator {
    /// Display name of the tracker, for logs and reports.
    fn tracker_name(&self) -> &str;

    /// Create a new issue from a field map.
    fn submit_issue(&self, fields: &FieldMap) -> Result<IssueLocator, anyhow::Error>;

    /// Update fields on an existing issue. Returns `false` when the issue
    /// id could not be resolved from the locator; that is a per-issue
    /// condition, not a hard error.
    fn update_issue_fields(
        &self,
        locator: &IssueLocator,
        fields: &FieldMap,
    ) -> Result<bool, anyhow::Error>;

    /// Current issue fields, or `None` when the tracker has no issue for
    /// the locator.
    fn get_issue_fields(&self, locator: &IssueLocator) -> Result<Option<FieldMap>, anyhow::Error>;

    /// Execute one named workflow step against an issue. Returns `false`
    /// when the tracker rejected the step.
    fn transition_issue(
        &self,
        locator: &IssueLocator,
        step_name: &str,
        comment: Option<&str>,
    ) -> Result<bool, anyhow::Error>;

    /// Whether current issue fields can be read back at all. Some
    /// trackers are submit-only.
    fn can_retrieve_fields(&self) -> bool {
        true
    }
}

/// Source-side persistence of a freshly created issue link.
///
/// Runs once per submitted issue so the source system can remember the
/// link (a native field, a custom tag, or a marker comment written with
/// the link codec) for later stateless runs.
pub trait NewIssueHook {
    fn on_issue_created(
        &self,
        locator: &IssueLocator,
        members: &[VulnerabilityRecord],
    ) -> Result<(), anyhow::Error>;
}
