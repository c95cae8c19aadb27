//! Grouping and issue field-map construction.
//!
//! Partitions the retrieved vulnerability stream into ordered groups by a
//! group-key template and computes each group's issue field map. One
//! group maps to one tracker issue.

use std::collections::HashMap;

use serde_json::Value;

use crate::config::GroupingConfig;
use crate::errors::SyncError;
use crate::expr::{render, EvalContext, Evaluator};
use crate::models::fields::FieldMap;
use crate::models::vulnerability::VulnerabilityRecord;

/// Context binding under which templates see the record being evaluated.
pub const VULNERABILITY_BINDING: &str = "currentVulnerability";

/// A set of vulnerabilities mapped to a single tracker issue.
#[derive(Debug, Clone, PartialEq)]
pub struct VulnerabilityGroup {
    pub key: String,
    pub members: Vec<VulnerabilityRecord>,
    pub fields: FieldMap,
}

/// Partition records into groups and compute each group's field map.
///
/// Consumes the stream exactly once. Group order is order of first
/// appearance and the first-seen member of each group is its
/// representative; member order within a group is input order. A missing
/// or blank group template yields one implicit group holding every
/// record, and an empty stream yields no groups at all. Template failures
/// are fatal configuration errors, source failures propagate.
pub fn build_groups<I>(
    records: I,
    config: &GroupingConfig,
    evaluator: &dyn Evaluator,
) -> Result<Vec<VulnerabilityGroup>, SyncError>
where
    I: IntoIterator<Item = Result<VulnerabilityRecord, anyhow::Error>>,
{
    let group_template = config
        .group_template
        .as_deref()
        .filter(|t| !t.trim().is_empty());

    let mut groups: Vec<(String, Vec<VulnerabilityRecord>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in records {
        let record = record.map_err(SyncError::Source)?;
        let key = match group_template {
            Some(template) => {
                let ctx = record_context(&record);
                render(&evaluate(evaluator, template, &ctx)?)
            }
            None => String::new(),
        };
        match index.get(&key) {
            Some(&position) => groups[position].1.push(record),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push((key, vec![record]));
            }
        }
    }

    groups
        .into_iter()
        .map(|(key, members)| {
            let fields = build_field_map(&members, config, evaluator)?;
            Ok(VulnerabilityGroup {
                key,
                members,
                fields,
            })
        })
        .collect()
}

/// Compute the ordered field map for one group.
///
/// Simple fields are evaluated once against the representative (first)
/// member. Appended fields are evaluated once per member and joined in
/// member order with the configured separator; members are not
/// deduplicated.
pub fn build_field_map(
    members: &[VulnerabilityRecord],
    config: &GroupingConfig,
    evaluator: &dyn Evaluator,
) -> Result<FieldMap, SyncError> {
    let mut fields = FieldMap::new();
    let Some(representative) = members.first() else {
        return Ok(fields);
    };

    let ctx = record_context(representative);
    for field in &config.fields {
        let value = evaluate(evaluator, &field.template, &ctx)?;
        // null stays null so subset-by-key filtering remains defined
        fields.insert(field.name.clone(), value);
    }

    for field in &config.appended_fields {
        let mut parts = Vec::with_capacity(members.len());
        for member in members {
            let ctx = record_context(member);
            parts.push(render(&evaluate(evaluator, &field.template, &ctx)?));
        }
        fields.insert(
            field.name.clone(),
            Value::String(parts.join(&config.appended_separator)),
        );
    }

    Ok(fields)
}

/// Evaluation context exposing one record as `currentVulnerability`.
pub fn record_context(record: &VulnerabilityRecord) -> EvalContext {
    EvalContext::with_subject(VULNERABILITY_BINDING, record.to_value())
}

fn evaluate(
    evaluator: &dyn Evaluator,
    template: &str,
    ctx: &EvalContext,
) -> Result<Value, SyncError> {
    evaluator
        .evaluate(template, ctx)
        .map_err(|e| SyncError::template(template, e))
}
