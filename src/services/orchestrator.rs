//! Synchronization run orchestration.
//!
//! Composes retrieval, grouping, the link codec, the field cache and the
//! state reconciler into one stateless run. When both phases are enabled
//! the update phase runs before the submit phase, so vulnerabilities that
//! are already tracked get reconciled before anything new is created; a
//! group handled by the update phase is never submitted again within the
//! same run.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::{SubmitConfig, SyncConfig, UpdateConfig};
use crate::errors::SyncError;
use crate::models::issue::IssueLocator;
use crate::services::field_cache::IssueFieldCache;
use crate::services::grouping::{build_groups, VulnerabilityGroup};
use crate::services::link_codec::LinkCodec;
use crate::services::reconcile::{ReconcileOutcome, StateReconciler};
use crate::RunContext;

/// Summary of one synchronization run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncRunReport {
    pub run_id: Uuid,
    pub source: String,
    pub tracker: String,
    pub groups_processed: usize,
    pub issues_submitted: usize,
    pub issues_updated: usize,
    pub issues_opened: usize,
    pub issues_closed: usize,
    pub unchanged: usize,
    pub failures: Vec<GroupFailure>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Non-fatal, group-scoped failure recorded during a run.
#[derive(Debug, Clone, Serialize)]
pub struct GroupFailure {
    pub group_key: String,
    pub stage: String,
    pub message: String,
}

pub struct SyncOrchestrator<'a> {
    ctx: RunContext<'a>,
    config: &'a SyncConfig,
}

impl<'a> SyncOrchestrator<'a> {
    pub fn new(ctx: RunContext<'a>, config: &'a SyncConfig) -> Self {
        Self { ctx, config }
    }

    /// Execute one full run: validate, reconcile tracked issues, submit
    /// untracked groups, and return the run report.
    ///
    /// Configuration problems surface before the first collaborator call.
    /// Collaborator transport failures propagate untouched; per-group
    /// failures are recorded in the report and never abort the run.
    pub fn run(&self) -> Result<SyncRunReport, SyncError> {
        self.config.validate()?;

        let started_at = Utc::now();
        let mut report = SyncRunReport {
            run_id: Uuid::new_v4(),
            source: self.ctx.source.source_name().to_string(),
            tracker: self.ctx.target.tracker_name().to_string(),
            groups_processed: 0,
            issues_submitted: 0,
            issues_updated: 0,
            issues_opened: 0,
            issues_closed: 0,
            unchanged: 0,
            failures: Vec::new(),
            started_at,
            completed_at: started_at,
        };

        // keys of groups tied to an issue this run; never resubmitted
        let mut handled_keys: HashSet<String> = HashSet::new();

        if let Some(update) = self.config.update.as_ref().filter(|u| u.enabled) {
            // compiled before retrieval so template problems stay fail-fast
            let codec = LinkCodec::compile(&self.config.link.effective_template()?)?;
            self.run_update(update, &codec, &mut report, &mut handled_keys)?;
        }

        if let Some(submit) = self.config.submit.as_ref().filter(|s| s.enabled) {
            self.run_submit(submit, &mut report, &handled_keys)?;
        }

        report.completed_at = Utc::now();
        tracing::info!(
            run_id = %report.run_id,
            tracker = %report.tracker,
            submitted = report.issues_submitted,
            updated = report.issues_updated,
            opened = report.issues_opened,
            closed = report.issues_closed,
            unchanged = report.unchanged,
            failures = report.failures.len(),
            "synchronization run finished"
        );
        Ok(report)
    }

    /// Update phase: recover locators for tracked groups, push field
    /// updates, and reconcile open/closed state.
    fn run_update(
        &self,
        config: &UpdateConfig,
        codec: &LinkCodec,
        report: &mut SyncRunReport,
        handled_keys: &mut HashSet<String>,
    ) -> Result<(), SyncError> {
        tracing::info!(
            source = %self.ctx.source.source_name(),
            tracker = %self.ctx.target.tracker_name(),
            "update phase: reconciling tracked issues"
        );

        let records = self
            .ctx
            .source
            .retrieve(&config.filter)
            .map_err(SyncError::Source)?;
        let groups = build_groups(records, &self.config.grouping, self.ctx.evaluator)?;
        let reconciler =
            StateReconciler::new(self.ctx.evaluator, config, self.ctx.target.tracker_name());

        for group in &groups {
            let Some(stored_link) = link_text(group, &config.link_field) else {
                // untracked group: left for the submit phase
                tracing::debug!(group = %group.key, "no issue link on group; skipped in update phase");
                continue;
            };
            report.groups_processed += 1;
            handled_keys.insert(group.key.clone());

            let locator = match decode_link(codec, &stored_link) {
                Ok(locator) => locator,
                Err(e) => {
                    tracing::warn!(
                        group = %group.key,
                        error = %e,
                        "stored issue link did not parse; group excluded from submission"
                    );
                    report.failures.push(GroupFailure {
                        group_key: group.key.clone(),
                        stage: "decode-link".to_string(),
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            if !config.fields_to_update.is_empty() {
                let fields = group.fields.filter_by_keys(&config.fields_to_update);
                let resolved = self
                    .ctx
                    .target
                    .update_issue_fields(&locator, &fields)
                    .map_err(SyncError::Target)?;
                if resolved {
                    report.issues_updated += 1;
                } else {
                    report.failures.push(GroupFailure {
                        group_key: group.key.clone(),
                        stage: "update-fields".to_string(),
                        message: format!(
                            "could not resolve issue from locator {}",
                            locator.display()
                        ),
                    });
                    continue;
                }
            }

            let cache = IssueFieldCache::new(locator, Some(self.ctx.target));
            match reconciler.reconcile(self.ctx.target, &cache, &group.members)? {
                ReconcileOutcome::Opened => report.issues_opened += 1,
                ReconcileOutcome::Closed => report.issues_closed += 1,
                ReconcileOutcome::NoActionNeeded => report.unchanged += 1,
                ReconcileOutcome::ActionFailed { step } => {
                    report.failures.push(GroupFailure {
                        group_key: group.key.clone(),
                        stage: "transition".to_string(),
                        message: format!("tracker rejected transition step `{step}`"),
                    });
                }
            }
        }
        Ok(())
    }

    /// Submit phase: create issues for groups with no prior submission
    /// and let the new-issue hook persist the fresh link.
    fn run_submit(
        &self,
        config: &SubmitConfig,
        report: &mut SyncRunReport,
        handled_keys: &HashSet<String>,
    ) -> Result<(), SyncError> {
        tracing::info!(
            source = %self.ctx.source.source_name(),
            tracker = %self.ctx.target.tracker_name(),
            "submit phase: creating issues for untracked groups"
        );

        let records = self
            .ctx
            .source
            .retrieve(&config.filter)
            .map_err(SyncError::Source)?;
        let groups = build_groups(records, &self.config.grouping, self.ctx.evaluator)?;

        for group in groups {
            if handled_keys.contains(&group.key) {
                tracing::debug!(group = %group.key, "group already reconciled this run; not submitting");
                continue;
            }
            report.groups_processed += 1;

            let locator = self
                .ctx
                .target
                .submit_issue(&group.fields)
                .map_err(SyncError::Target)?;
            report.issues_submitted += 1;
            tracing::info!(
                group = %group.key,
                issue = %locator.display(),
                members = group.members.len(),
                "issue submitted"
            );

            if let Some(hook) = self.ctx.hook {
                hook.on_issue_created(&locator, &group.members)
                    .map_err(SyncError::Hook)?;
            }
        }
        Ok(())
    }
}

/// Persisted link text from the group's representative member.
fn link_text(group: &VulnerabilityGroup, link_field: &str) -> Option<String> {
    let value = group.members.first()?.get(link_field)?;
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Decode persisted link text, scanning for the codec fragment first so a
/// marker embedded in larger comment text still parses.
fn decode_link(codec: &LinkCodec, text: &str) -> Result<IssueLocator, SyncError> {
    match codec.find_fragment(text) {
        Some(fragment) => codec.decode(fragment),
        None => Err(SyncError::LocatorParse(format!(
            "no fragment matching link template `{}` in `{text}`",
            codec.template()
        ))),
    }
}
