//! Default template evaluator.

use serde_json::Value;

use crate::expr::parser::{parse, BinaryOp, Expr, UnaryOp};
use crate::expr::{render, EvalContext, Evaluator, ExprError};

/// Built-in evaluator for the expression template language.
///
/// Missing fields evaluate to `null`; `+` adds numbers and concatenates
/// everything else (rendering `null` as the empty string); logical
/// operators insist on booleans.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateEvaluator;

impl TemplateEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl Evaluator for TemplateEvaluator {
    fn evaluate(&self, template: &str, ctx: &EvalContext) -> Result<Value, ExprError> {
        let expr = parse(template)?;
        eval_expr(&expr, ctx)
    }
}

fn eval_expr(expr: &Expr, ctx: &EvalContext) -> Result<Value, ExprError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Path(segments) => Ok(resolve_path(segments, ctx)),
        Expr::Unary {
            op: UnaryOp::Not,
            operand,
        } => {
            let value = eval_expr(operand, ctx)?;
            Ok(Value::Bool(!as_bool(&value)?))
        }
        Expr::Binary { op, left, right } => eval_binary(*op, left, right, ctx),
    }
}

/// Walk a dotted path; any missing segment yields `null`.
fn resolve_path(segments: &[String], ctx: &EvalContext) -> Value {
    let Some(first) = segments.first() else {
        return Value::Null;
    };
    let Some(mut current) = ctx.resolve(first) else {
        return Value::Null;
    };
    for segment in &segments[1..] {
        match current.as_object().and_then(|o| o.get(segment)) {
            Some(value) => current = value,
            None => return Value::Null,
        }
    }
    current.clone()
}

fn eval_binary(
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    ctx: &EvalContext,
) -> Result<Value, ExprError> {
    // short-circuit forms first
    match op {
        BinaryOp::And => {
            if !as_bool(&eval_expr(left, ctx)?)? {
                return Ok(Value::Bool(false));
            }
            return Ok(Value::Bool(as_bool(&eval_expr(right, ctx)?)?));
        }
        BinaryOp::Or => {
            if as_bool(&eval_expr(left, ctx)?)? {
                return Ok(Value::Bool(true));
            }
            return Ok(Value::Bool(as_bool(&eval_expr(right, ctx)?)?));
        }
        _ => {}
    }

    let lhs = eval_expr(left, ctx)?;
    let rhs = eval_expr(right, ctx)?;

    match op {
        BinaryOp::Concat => Ok(concat(&lhs, &rhs)),
        BinaryOp::Eq => Ok(Value::Bool(loose_eq(&lhs, &rhs))),
        BinaryOp::Ne => Ok(Value::Bool(!loose_eq(&lhs, &rhs))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(&lhs, &rhs)?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

/// `+`: numeric addition when both sides are numbers, string
/// concatenation otherwise.
fn concat(lhs: &Value, rhs: &Value) -> Value {
    if let (Value::Number(a), Value::Number(b)) = (lhs, rhs) {
        if let (Some(ia), Some(ib)) = (a.as_i64(), b.as_i64()) {
            return Value::Number(serde_json::Number::from(ia + ib));
        }
        if let (Some(fa), Some(fb)) = (a.as_f64(), b.as_f64()) {
            if let Some(sum) = serde_json::Number::from_f64(fa + fb) {
                return Value::Number(sum);
            }
        }
    }
    Value::String(format!("{}{}", render(lhs), render(rhs)))
}

/// Equality with numeric coercion, so `1 == 1.0` holds.
fn loose_eq(lhs: &Value, rhs: &Value) -> bool {
    if let (Value::Number(a), Value::Number(b)) = (lhs, rhs) {
        return a.as_f64() == b.as_f64();
    }
    lhs == rhs
}

fn compare(lhs: &Value, rhs: &Value) -> Result<std::cmp::Ordering, ExprError> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => {
            let (Some(fa), Some(fb)) = (a.as_f64(), b.as_f64()) else {
                return Err(ExprError::Type("numbers are not comparable".to_string()));
            };
            fa.partial_cmp(&fb)
                .ok_or_else(|| ExprError::Type("numbers are not comparable".to_string()))
        }
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => Err(ExprError::Type(format!(
            "cannot order {lhs} against {rhs}"
        ))),
    }
}

fn as_bool(value: &Value) -> Result<bool, ExprError> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => Err(ExprError::Type(format!(
            "expected a boolean, got {other}"
        ))),
    }
}
