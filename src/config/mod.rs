//! Synchronization run configuration.
//!
//! Supplied fully constructed by the composition root (file loading and
//! CLI parsing are out of scope here), so everything derives
//! `Deserialize`. [`SyncConfig::validate`] fails fast on missing or
//! unparseable templates before any network call is made.

use serde::Deserialize;
use serde_json::Value;

use crate::errors::SyncError;
use crate::expr;
use crate::models::issue::TransitionTable;

fn default_true() -> bool {
    true
}

/// Marker sentence used when no explicit link template is configured.
pub fn default_link_template(target_display_name: &str) -> String {
    format!("Vulnerability submitted to {target_display_name}: ID ${{id}} Location ${{deepLink}}")
}

/// Everything one synchronization run is configured with.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub grouping: GroupingConfig,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub submit: Option<SubmitConfig>,
    #[serde(default)]
    pub update: Option<UpdateConfig>,
}

/// One `name -> template` issue field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldTemplate {
    pub name: String,
    pub template: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupingConfig {
    /// Group-key template. Missing or blank means one implicit group
    /// holding every record.
    #[serde(default)]
    pub group_template: Option<String>,
    /// Ordered simple fields, evaluated once per group against the
    /// representative member.
    #[serde(default)]
    pub fields: Vec<FieldTemplate>,
    /// Ordered appended fields, evaluated once per member and joined in
    /// member order.
    #[serde(default)]
    pub appended_fields: Vec<FieldTemplate>,
    /// Separator between appended member values.
    #[serde(default)]
    pub appended_separator: String,
}

/// How issue links are written to and recovered from text.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LinkConfig {
    /// Codec template with `${id}` / `${deepLink}` placeholders.
    #[serde(default)]
    pub template: Option<String>,
    /// Tracker display name for the default marker sentence, used when no
    /// template is configured.
    #[serde(default)]
    pub target_display_name: Option<String>,
}

impl LinkConfig {
    /// The template the codec compiles from this configuration.
    pub fn effective_template(&self) -> Result<String, SyncError> {
        if let Some(template) = self.template.as_deref() {
            if !template.trim().is_empty() {
                return Ok(template.to_string());
            }
        }
        if let Some(name) = self.target_display_name.as_deref() {
            if !name.trim().is_empty() {
                return Ok(default_link_template(name));
            }
        }
        Err(SyncError::Config(
            "a link template or a target display name is required".to_string(),
        ))
    }
}

/// Submission phase: create issues for untracked groups.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Opaque source filter, passed through to the source collaborator.
    #[serde(default)]
    pub filter: Value,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            filter: Value::Null,
        }
    }
}

/// Update phase: reconcile already-tracked groups with their issues.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Opaque source filter, passed through to the source collaborator.
    #[serde(default)]
    pub filter: Value,
    /// Record field carrying the persisted issue link text.
    pub link_field: String,
    /// Predicate template: is a single vulnerability still open?
    pub vulnerability_open_template: String,
    /// Keys of group fields pushed to the issue during state management.
    /// Unknown keys are dropped, not an error.
    #[serde(default)]
    pub fields_to_update: Vec<String>,
    /// Predicate template gating reopen eligibility. Default `true`:
    /// eligibility is then decided purely by the transition rules.
    #[serde(default)]
    pub is_issue_openable_template: Option<String>,
    /// Predicate template gating close eligibility. Default `true`.
    #[serde(default)]
    pub is_issue_closeable_template: Option<String>,
    #[serde(default)]
    pub transitions: TransitionTable,
}

impl SyncConfig {
    /// Fail-fast validation: phase availability, required fields, and a
    /// parse of every configured template.
    pub fn validate(&self) -> Result<(), SyncError> {
        let submit_enabled = self.submit.as_ref().is_some_and(|s| s.enabled);
        let update_enabled = self.update.as_ref().is_some_and(|u| u.enabled);
        if !submit_enabled && !update_enabled {
            return Err(SyncError::Config(
                "at least one of submit and update must be configured and enabled".to_string(),
            ));
        }

        if let Some(template) = self.grouping.group_template.as_deref() {
            if !template.trim().is_empty() {
                check_template(template)?;
            }
        }
        for field in self
            .grouping
            .fields
            .iter()
            .chain(&self.grouping.appended_fields)
        {
            if field.name.trim().is_empty() {
                return Err(SyncError::Config(
                    "field template with an empty name".to_string(),
                ));
            }
            check_template(&field.template)?;
        }

        if update_enabled {
            if let Some(update) = &self.update {
                self.validate_update(update)?;
            }
        }

        Ok(())
    }

    fn validate_update(&self, update: &UpdateConfig) -> Result<(), SyncError> {
        if update.link_field.trim().is_empty() {
            return Err(SyncError::Config(
                "update.link_field is required".to_string(),
            ));
        }
        if update.vulnerability_open_template.trim().is_empty() {
            return Err(SyncError::Config(
                "update.vulnerability_open_template is required".to_string(),
            ));
        }
        check_template(&update.vulnerability_open_template)?;

        for template in [
            update.is_issue_openable_template.as_deref(),
            update.is_issue_closeable_template.as_deref(),
        ]
        .into_iter()
        .flatten()
        {
            check_template(template)?;
        }

        for rule in update
            .transitions
            .for_opening_issue
            .iter()
            .chain(&update.transitions.for_closing_issue)
        {
            check_template(&rule.when)?;
            for step in &rule.steps {
                if step.name.trim().is_empty() {
                    return Err(SyncError::Config(
                        "transition step with an empty name".to_string(),
                    ));
                }
            }
        }

        // the update path cannot recover locators without a codec template
        self.link.effective_template()?;
        Ok(())
    }
}

fn check_template(template: &str) -> Result<(), SyncError> {
    expr::parse(template)
        .map(|_| ())
        .map_err(|e| SyncError::template(template, e))
}
