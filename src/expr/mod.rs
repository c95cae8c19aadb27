//! Expression templates evaluated against run contexts.
//!
//! Group-key templates, field templates and state predicates are small
//! expressions (field paths, string concatenation, comparisons, boolean
//! logic) evaluated against named context bindings. The engine depends
//! only on the [`Evaluator`] trait, so the composition root can inject a
//! richer scripting engine; [`TemplateEvaluator`] is the built-in default.

mod eval;
mod parser;

pub use eval::TemplateEvaluator;
pub use parser::{parse, BinaryOp, Expr, UnaryOp};

use serde_json::{Map, Value};

/// Parse or evaluation failure for an expression template.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("type error: {0}")]
    Type(String),
}

/// Named value bindings for one template evaluation.
///
/// Root identifiers resolve against the bindings first; when a subject is
/// set, unresolved roots fall back to the fields of the subject object, so
/// `cwe` and `currentVulnerability.cwe` read the same field.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    bindings: Map<String, Value>,
    subject: Option<String>,
}

impl EvalContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `value` under `name` and make it the fallback subject for
    /// unqualified field references.
    pub fn with_subject(name: &str, value: Value) -> Self {
        Self::new().bind(name, value).subject(name)
    }

    /// Add a named binding.
    pub fn bind(mut self, name: &str, value: Value) -> Self {
        self.bindings.insert(name.to_string(), value);
        self
    }

    /// Mark an existing binding as the fallback subject.
    pub fn subject(mut self, name: &str) -> Self {
        self.subject = Some(name.to_string());
        self
    }

    /// Resolve a root identifier: bindings first, then subject fields.
    pub(crate) fn resolve(&self, root: &str) -> Option<&Value> {
        if let Some(value) = self.bindings.get(root) {
            return Some(value);
        }
        let subject = self.subject.as_deref()?;
        self.bindings.get(subject)?.as_object()?.get(root)
    }
}

/// Contract the engine evaluates templates through.
pub trait Evaluator {
    fn evaluate(&self, template: &str, ctx: &EvalContext) -> Result<Value, ExprError>;
}

/// Render a value the way templates concatenate them: strings verbatim,
/// `null` as empty, everything else in its JSON form.
pub fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
