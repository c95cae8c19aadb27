//! End-to-end tests for the synchronization engine.
//!
//! Drives full runs against in-memory fake collaborators: a scanner whose
//! records survive between runs (so marker links written by the new-issue
//! hook are visible to later runs) and a tracker with a small issue store
//! and a scripted workflow. No network, no external services.

use std::sync::{Arc, Mutex};

use serde_json::{json, Map, Value};

use vulnbridge::collaborators::{
    NewIssueHook, SourceCollaborator, TargetCollaborator, VulnerabilityStream,
};
use vulnbridge::config::SyncConfig;
use vulnbridge::expr::TemplateEvaluator;
use vulnbridge::models::fields::FieldMap;
use vulnbridge::models::issue::IssueLocator;
use vulnbridge::models::vulnerability::VulnerabilityRecord;
use vulnbridge::services::link_codec::LinkCodec;
use vulnbridge::services::lookup_cache::LookupCache;
use vulnbridge::services::orchestrator::SyncOrchestrator;
use vulnbridge::RunContext;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vulnbridge=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

// ---------------------------------------------------------------------------
// Fake scanner
// ---------------------------------------------------------------------------

type SourceStore = Arc<Mutex<Vec<Map<String, Value>>>>;

/// Scanner fake backed by a shared record store.
///
/// The filter is the engine-opaque value from the configuration; this
/// scanner understands `{"linked": bool}` (select records with/without a
/// persisted `bugLink`) and treats anything else as "all records".
struct FakeScanner {
    store: SourceStore,
}

impl SourceCollaborator for FakeScanner {
    fn source_name(&self) -> &str {
        "FakeScanner"
    }

    fn retrieve(&self, filter: &Value) -> Result<VulnerabilityStream<'_>, anyhow::Error> {
        let linked = filter.get("linked").and_then(Value::as_bool);
        let records = self.store.lock().unwrap();
        let selected: Vec<VulnerabilityRecord> = records
            .iter()
            .filter(|record| match linked {
                Some(want) => {
                    let has_link = matches!(
                        record.get("bugLink"),
                        Some(Value::String(s)) if !s.is_empty()
                    );
                    has_link == want
                }
                None => true,
            })
            .cloned()
            .map(VulnerabilityRecord::new)
            .collect();
        Ok(Box::new(selected.into_iter().map(Ok::<_, anyhow::Error>)))
    }
}

/// New-issue hook writing the marker comment back into the source store.
struct MarkerWriter {
    store: SourceStore,
    codec: LinkCodec,
}

impl NewIssueHook for MarkerWriter {
    fn on_issue_created(
        &self,
        locator: &IssueLocator,
        members: &[VulnerabilityRecord],
    ) -> Result<(), anyhow::Error> {
        let marker = format!(
            "Issue tracked for this finding. {}",
            self.codec.encode(locator)
        );
        let mut store = self.store.lock().unwrap();
        for member in members {
            let id = member.get("id").cloned();
            if let Some(record) = store.iter_mut().find(|r| r.get("id") == id.as_ref()) {
                record.insert("bugLink".to_string(), Value::String(marker.clone()));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fake tracker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredIssue {
    id: String,
    deep_link: String,
    fields: FieldMap,
    status: String,
}

/// Tracker fake with an issue store, a priority name/id lookup that goes
/// through the bounded lookup cache, and a scripted workflow:
/// Reopen -> OPEN, Resolve -> RESOLVED, Close -> CLOSED.
struct FakeTracker {
    issues: Mutex<Vec<StoredIssue>>,
    priorities: Mutex<Vec<(String, String)>>,
    priority_cache: Mutex<LookupCache<String, String>>,
    ops: Mutex<Vec<String>>,
}

impl FakeTracker {
    fn new() -> Self {
        Self {
            issues: Mutex::new(Vec::new()),
            priorities: Mutex::new(vec![
                ("Critical".to_string(), "prio-1".to_string()),
                ("High".to_string(), "prio-2".to_string()),
            ]),
            priority_cache: Mutex::new(LookupCache::with_default_capacity()),
            ops: Mutex::new(Vec::new()),
        }
    }

    fn issue(&self, id: &str) -> StoredIssue {
        self.issues
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .expect("issue not found")
    }

    fn issue_count(&self) -> usize {
        self.issues.lock().unwrap().len()
    }

    fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    /// Resolve a priority name to its internal id, registering unknown
    /// names as new allowed values and invalidating the cache entry so
    /// the next lookup in the same run observes the mutation.
    fn resolve_priority(&self, name: &str) -> String {
        let key = name.to_string();
        let mut cache = self.priority_cache.lock().unwrap();
        if let Some(id) = cache.get(&key) {
            return id.clone();
        }
        let mut priorities = self.priorities.lock().unwrap();
        let id = match priorities.iter().find(|(n, _)| n == name) {
            Some((_, id)) => id.clone(),
            None => {
                let id = format!("prio-{}", priorities.len() + 1);
                priorities.push((key.clone(), id.clone()));
                cache.invalidate(&key);
                id
            }
        };
        cache.insert(key, id.clone());
        id
    }

    fn position(&self, locator: &IssueLocator) -> Option<usize> {
        let issues = self.issues.lock().unwrap();
        issues.iter().position(|issue| {
            locator.id.as_deref() == Some(issue.id.as_str())
                || locator.deep_link.as_deref() == Some(issue.deep_link.as_str())
        })
    }
}

impl TargetCollaborator for FakeTracker {
    fn tracker_name(&self) -> &str {
        "FakeTracker"
    }

    fn submit_issue(&self, fields: &FieldMap) -> Result<IssueLocator, anyhow::Error> {
        let mut stored = fields.clone();
        if let Some(Value::String(priority)) = fields.get("priority").cloned() {
            stored.insert("priorityId", Value::String(self.resolve_priority(&priority)));
        }

        let mut issues = self.issues.lock().unwrap();
        let id = format!("BUG-{}", issues.len() + 1);
        let deep_link = format!("https://tracker.example/browse/{id}");
        issues.push(StoredIssue {
            id: id.clone(),
            deep_link: deep_link.clone(),
            fields: stored,
            status: "OPEN".to_string(),
        });
        self.ops.lock().unwrap().push(format!("submit:{id}"));
        Ok(IssueLocator::from_parts(&id, &deep_link))
    }

    fn update_issue_fields(
        &self,
        locator: &IssueLocator,
        fields: &FieldMap,
    ) -> Result<bool, anyhow::Error> {
        let Some(position) = self.position(locator) else {
            return Ok(false);
        };
        let mut issues = self.issues.lock().unwrap();
        for (name, value) in fields.iter() {
            issues[position].fields.insert(name, value.clone());
        }
        self.ops
            .lock()
            .unwrap()
            .push(format!("update:{}", issues[position].id));
        Ok(true)
    }

    fn get_issue_fields(&self, locator: &IssueLocator) -> Result<Option<FieldMap>, anyhow::Error> {
        let Some(position) = self.position(locator) else {
            return Ok(None);
        };
        let issues = self.issues.lock().unwrap();
        let mut fields = issues[position].fields.clone();
        fields.insert("status", Value::String(issues[position].status.clone()));
        Ok(Some(fields))
    }

    fn transition_issue(
        &self,
        locator: &IssueLocator,
        step_name: &str,
        _comment: Option<&str>,
    ) -> Result<bool, anyhow::Error> {
        let Some(position) = self.position(locator) else {
            return Ok(false);
        };
        let new_status = match step_name {
            "Reopen" => "OPEN",
            "Resolve" => "RESOLVED",
            "Close" => "CLOSED",
            _ => return Ok(false),
        };
        let mut issues = self.issues.lock().unwrap();
        issues[position].status = new_status.to_string();
        self.ops
            .lock()
            .unwrap()
            .push(format!("transition:{}:{step_name}", issues[position].id));
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn record(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("record fixtures must be objects"),
    }
}

fn seeded_store() -> SourceStore {
    Arc::new(Mutex::new(vec![
        record(json!({
            "id": 1, "category": "xss", "title": "Reflected XSS",
            "severity": "High", "state": "open"
        })),
        record(json!({
            "id": 2, "category": "xss", "title": "Stored XSS",
            "severity": "High", "state": "open"
        })),
        record(json!({
            "id": 3, "category": "sqli", "title": "SQL injection in search",
            "severity": "Critical", "state": "open"
        })),
    ]))
}

fn sync_config() -> SyncConfig {
    serde_json::from_value(json!({
        "grouping": {
            "group_template": "category",
            "fields": [
                {"name": "summary", "template": "'[' + category + '] ' + title"},
                {"name": "priority", "template": "severity"}
            ],
            "appended_fields": [
                {"name": "affected", "template": "'#' + id"}
            ],
            "appended_separator": ", "
        },
        "link": {"target_display_name": "FakeTracker"},
        "submit": {"filter": {"linked": false}},
        "update": {
            "filter": {"linked": true},
            "link_field": "bugLink",
            "vulnerability_open_template": "state == 'open'",
            "fields_to_update": ["priority"],
            "transitions": {
                "for_opening_issue": [
                    {"when": "status == 'CLOSED'", "steps": [
                        {"name": "Reopen", "comment": "Vulnerabilities detected again"}
                    ]}
                ],
                "for_closing_issue": [
                    {"when": "status == 'OPEN'", "steps": [
                        {"name": "Resolve", "comment": "All vulnerabilities closed"},
                        {"name": "Close"}
                    ]}
                ]
            }
        }
    }))
    .expect("config fixture")
}

fn set_state(store: &SourceStore, id: i64, state: &str) {
    let mut records = store.lock().unwrap();
    let record = records
        .iter_mut()
        .find(|r| r.get("id") == Some(&json!(id)))
        .expect("record");
    record.insert("state".to_string(), json!(state));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn full_sync_lifecycle() {
    init_tracing();

    let store = seeded_store();
    let scanner = FakeScanner {
        store: Arc::clone(&store),
    };
    let tracker = FakeTracker::new();
    let hook = MarkerWriter {
        store: Arc::clone(&store),
        codec: LinkCodec::for_target("FakeTracker").unwrap(),
    };
    let evaluator = TemplateEvaluator::new();
    let config = sync_config();
    let ctx = RunContext {
        source: &scanner,
        target: &tracker,
        hook: Some(&hook),
        evaluator: &evaluator,
    };
    let orchestrator = SyncOrchestrator::new(ctx, &config);

    // -- Run 1: nothing is tracked yet; both groups get submitted --------
    let report = orchestrator.run().unwrap();
    assert_eq!(report.issues_submitted, 2);
    assert_eq!(report.issues_updated, 0);
    assert_eq!(report.groups_processed, 2);
    assert!(report.failures.is_empty());
    assert_eq!(tracker.issue_count(), 2);

    let xss = tracker.issue("BUG-1");
    assert_eq!(xss.fields.get("summary"), Some(&json!("[xss] Reflected XSS")));
    assert_eq!(xss.fields.get("affected"), Some(&json!("#1, #2")));
    assert_eq!(xss.fields.get("priorityId"), Some(&json!("prio-2")));
    assert_eq!(xss.status, "OPEN");

    let sqli = tracker.issue("BUG-2");
    assert_eq!(
        sqli.fields.get("summary"),
        Some(&json!("[sqli] SQL injection in search"))
    );
    assert_eq!(sqli.fields.get("affected"), Some(&json!("#3")));

    // the hook persisted decodable markers on every member record
    {
        let records = store.lock().unwrap();
        let codec = LinkCodec::for_target("FakeTracker").unwrap();
        for record in records.iter() {
            let link = record.get("bugLink").and_then(Value::as_str).unwrap();
            let fragment = codec.find_fragment(link).expect("marker fragment");
            let locator = codec.decode(fragment).unwrap();
            assert!(locator.id.is_some() && locator.deep_link.is_some());
        }
    }

    // -- Run 2: idempotent re-run; everything tracked, nothing changes ---
    let report = orchestrator.run().unwrap();
    assert_eq!(report.issues_submitted, 0);
    assert_eq!(report.unchanged, 2);
    assert_eq!(report.issues_updated, 2, "field updates pushed per group");
    assert_eq!(tracker.issue_count(), 2, "no duplicate issues");

    // -- Run 3: the xss vulnerabilities get fixed; their issue closes ----
    set_state(&store, 1, "closed");
    set_state(&store, 2, "closed");
    let report = orchestrator.run().unwrap();
    assert_eq!(report.issues_closed, 1);
    assert_eq!(report.unchanged, 1);
    assert_eq!(report.issues_submitted, 0);
    assert_eq!(tracker.issue("BUG-1").status, "CLOSED");
    assert_eq!(tracker.issue("BUG-2").status, "OPEN");

    // the closing sequence ran in rule order
    let ops = tracker.ops();
    assert!(ops.contains(&"transition:BUG-1:Resolve".to_string()));
    assert!(ops.contains(&"transition:BUG-1:Close".to_string()));

    // -- Run 4: one xss vulnerability is redetected; the issue reopens ---
    set_state(&store, 1, "open");
    let report = orchestrator.run().unwrap();
    assert_eq!(report.issues_opened, 1);
    assert_eq!(tracker.issue("BUG-1").status, "OPEN");
    assert_eq!(tracker.issue_count(), 2, "reopened, not resubmitted");
}

#[test]
fn update_phase_runs_first_and_suppresses_resubmission() {
    init_tracing();

    // both phases see every record: filters the fake scanner treats as
    // "all", so the tracked group shows up in the submit phase too
    let store = seeded_store();
    let scanner = FakeScanner {
        store: Arc::clone(&store),
    };
    let tracker = FakeTracker::new();
    let codec = LinkCodec::for_target("FakeTracker").unwrap();
    let hook = MarkerWriter {
        store: Arc::clone(&store),
        codec: LinkCodec::for_target("FakeTracker").unwrap(),
    };
    let evaluator = TemplateEvaluator::new();

    let mut config = sync_config();
    config.submit.as_mut().unwrap().filter = Value::Null;
    config.update.as_mut().unwrap().filter = Value::Null;

    // pre-track the xss group: its members already carry a marker
    let existing = tracker
        .submit_issue(&FieldMap::from_iter([(
            "summary".to_string(),
            json!("[xss] Reflected XSS"),
        )]))
        .unwrap();
    {
        let marker = codec.encode(&existing);
        let mut records = store.lock().unwrap();
        for record in records.iter_mut() {
            if record.get("category") == Some(&json!("xss")) {
                record.insert("bugLink".to_string(), Value::String(marker.clone()));
            }
        }
    }

    let ctx = RunContext {
        source: &scanner,
        target: &tracker,
        hook: Some(&hook),
        evaluator: &evaluator,
    };
    let report = SyncOrchestrator::new(ctx, &config).run().unwrap();

    // xss was reconciled by the update phase and must not be resubmitted;
    // sqli had no link and was submitted
    assert_eq!(report.issues_submitted, 1);
    assert_eq!(tracker.issue_count(), 2);

    let ops = tracker.ops();
    let first_submit_after_seed = ops
        .iter()
        .skip(1) // the seeded submit above
        .position(|op| op.starts_with("submit:"))
        .map(|p| p + 1)
        .expect("submit op");
    let update_op = ops
        .iter()
        .position(|op| op.starts_with("update:"))
        .expect("update op");
    assert!(
        update_op < first_submit_after_seed,
        "update phase must run before submit: {ops:?}"
    );
}

#[test]
fn undecodable_link_is_reported_and_not_resubmitted() {
    init_tracing();

    let store = seeded_store();
    {
        let mut records = store.lock().unwrap();
        for record in records.iter_mut() {
            if record.get("category") == Some(&json!("xss")) {
                record.insert(
                    "bugLink".to_string(),
                    json!("corrupted marker with no placeholders"),
                );
            }
        }
    }
    let scanner = FakeScanner {
        store: Arc::clone(&store),
    };
    let tracker = FakeTracker::new();
    let evaluator = TemplateEvaluator::new();
    let config = sync_config();
    let ctx = RunContext {
        source: &scanner,
        target: &tracker,
        hook: None,
        evaluator: &evaluator,
    };

    let report = SyncOrchestrator::new(ctx, &config).run().unwrap();

    // the corrupted group surfaces as a typed failure and only the clean
    // group is submitted
    assert_eq!(report.issues_submitted, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].stage, "decode-link");
    assert_eq!(report.failures[0].group_key, "xss");
    assert_eq!(tracker.issue_count(), 1);
}

#[test]
fn empty_source_makes_no_tracker_calls() {
    init_tracing();

    let store: SourceStore = Arc::new(Mutex::new(Vec::new()));
    let scanner = FakeScanner {
        store: Arc::clone(&store),
    };
    let tracker = FakeTracker::new();
    let evaluator = TemplateEvaluator::new();
    let config = sync_config();
    let ctx = RunContext {
        source: &scanner,
        target: &tracker,
        hook: None,
        evaluator: &evaluator,
    };

    let report = SyncOrchestrator::new(ctx, &config).run().unwrap();
    assert_eq!(report.groups_processed, 0);
    assert_eq!(report.issues_submitted, 0);
    assert!(tracker.ops().is_empty());
}

#[test]
fn invalid_configuration_fails_before_any_collaborator_call() {
    init_tracing();

    let store = seeded_store();
    let scanner = FakeScanner {
        store: Arc::clone(&store),
    };
    let tracker = FakeTracker::new();
    let evaluator = TemplateEvaluator::new();

    let mut config = sync_config();
    config.grouping.fields[0].template = "'[' + category +".to_string();

    let ctx = RunContext {
        source: &scanner,
        target: &tracker,
        hook: None,
        evaluator: &evaluator,
    };
    let err = SyncOrchestrator::new(ctx, &config).run().unwrap_err();

    assert!(err.is_config(), "{err:?}");
    assert!(tracker.ops().is_empty(), "no tracker calls on config error");
}
