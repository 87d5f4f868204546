//! Expression evaluation against typed contexts

use std::collections::BTreeMap;

use regex::Regex;

use super::{BinOp, Expr, ExprError, Func, Value};

/// Everything an expression can observe, assembled by the orchestrator
/// before each evaluation.
#[derive(Debug, Default, Clone)]
pub struct EvalContext {
    /// Bound task inputs.
    pub inputs: BTreeMap<String, serde_json::Value>,
    /// `validate` patterns for inputs that declare one.
    pub validators: BTreeMap<String, String>,
    /// Effective environment: process env with the step overlay applied.
    pub env: BTreeMap<String, String>,
    /// Outputs of completed steps, keyed by step id.
    pub steps: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
    /// Whether a prior step in the task errored.
    pub failed: bool,
    /// Whether the run has been cancelled.
    pub cancelled: bool,
}

pub(super) fn evaluate(expr: &Expr, ctx: &EvalContext) -> Result<Value, ExprError> {
    match expr {
        Expr::String(s) => Ok(Value::String(s.clone())),
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Bool(b) => Ok(Value::Bool(*b)),

        Expr::Not(inner) => match evaluate(inner, ctx)? {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(ExprError::TypeMismatch {
                op: "!",
                expected: "boolean",
                got: other.type_name(),
            }),
        },

        Expr::Bin { op, lhs, rhs } => eval_bin(*op, lhs, rhs, ctx),

        Expr::Call { func, args } => eval_call(*func, args, ctx),
    }
}

fn eval_bin(op: BinOp, lhs: &Expr, rhs: &Expr, ctx: &EvalContext) -> Result<Value, ExprError> {
    match op {
        BinOp::And | BinOp::Or => {
            let left = boolean(op, evaluate(lhs, ctx)?)?;
            // Short-circuit.
            match (op, left) {
                (BinOp::And, false) => return Ok(Value::Bool(false)),
                (BinOp::Or, true) => return Ok(Value::Bool(true)),
                _ => {}
            }
            let right = boolean(op, evaluate(rhs, ctx)?)?;
            Ok(Value::Bool(right))
        }

        BinOp::Eq | BinOp::Ne => {
            let left = evaluate(lhs, ctx)?;
            let right = evaluate(rhs, ctx)?;
            let eq = left == right;
            Ok(Value::Bool(if op == BinOp::Eq { eq } else { !eq }))
        }

        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let left = evaluate(lhs, ctx)?;
            let right = evaluate(rhs, ctx)?;
            let ordering = match (&left, &right) {
                (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            };
            let Some(ordering) = ordering else {
                return Err(ExprError::TypeMismatch {
                    op: cmp_symbol(op),
                    expected: "two numbers or two strings",
                    got: left.type_name(),
                });
            };
            let result = match op {
                BinOp::Lt => ordering == std::cmp::Ordering::Less,
                BinOp::Le => ordering != std::cmp::Ordering::Greater,
                BinOp::Gt => ordering == std::cmp::Ordering::Greater,
                BinOp::Ge => ordering != std::cmp::Ordering::Less,
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
    }
}

fn eval_call(func: Func, args: &[Expr], ctx: &EvalContext) -> Result<Value, ExprError> {
    match func {
        Func::Always => Ok(Value::Bool(true)),
        Func::Cancelled => Ok(Value::Bool(ctx.cancelled)),
        Func::Failure => Ok(Value::Bool(ctx.failed)),
        Func::Success => Ok(Value::Bool(!ctx.failed)),

        Func::Env => {
            let name = string_arg(func, &args[0], ctx)?;
            Ok(ctx
                .env
                .get(&name)
                .map(|v| Value::String(v.clone()))
                .unwrap_or(Value::Null))
        }

        Func::Input => {
            let name = string_arg(func, &args[0], ctx)?;
            let value = ctx
                .inputs
                .get(&name)
                .ok_or_else(|| ExprError::UnknownInput(name.clone()))?;
            let value = Value::from_json(value);
            if let Some(pattern) = ctx.validators.get(&name) {
                let text = value.stringify();
                let matched = Regex::new(pattern)
                    .map(|re| re.is_match(&text))
                    .unwrap_or(false);
                if !matched {
                    return Err(ExprError::ValidationFailed {
                        input: name,
                        value: text,
                        pattern: pattern.clone(),
                    });
                }
            }
            Ok(value)
        }

        Func::From => {
            let id = string_arg(func, &args[0], ctx)?;
            let key = string_arg(func, &args[1], ctx)?;
            let outputs = ctx
                .steps
                .get(&id)
                .ok_or_else(|| ExprError::UnknownStep(id.clone()))?;
            let value = outputs
                .get(&key)
                .ok_or(ExprError::UnknownOutput { id, key })?;
            Ok(Value::from_json(value))
        }
    }
}

fn string_arg(func: Func, arg: &Expr, ctx: &EvalContext) -> Result<String, ExprError> {
    match evaluate(arg, ctx)? {
        Value::String(s) => Ok(s),
        _ => Err(ExprError::BadArgument { func: func.name() }),
    }
}

fn boolean(op: BinOp, value: Value) -> Result<bool, ExprError> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(ExprError::TypeMismatch {
            op: if op == BinOp::And { "&&" } else { "||" },
            expected: "boolean",
            got: other.type_name(),
        }),
    }
}

fn cmp_symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Lt => "<",
        BinOp::Le => "<=",
        BinOp::Gt => ">",
        BinOp::Ge => ">=",
        _ => "?",
    }
}
