//! # Expression language
//!
//! Expressions are embedded in workflow strings as `${{ expr }}` and appear
//! bare in step `if:` conditions. The language is deliberately small: string
//! / number / boolean literals, `!`, `&&`, `||`, comparisons, parentheses,
//! and a fixed function set:
//!
//! | Function | Meaning |
//! |----------|---------|
//! | `input("name")` | bound value of a task input |
//! | `from("id","key")` | output `key` of completed step `id` |
//! | `env("NAME")` | effective environment variable |
//! | `always()` | true even after the task has failed |
//! | `cancelled()` | true when the run has been cancelled |
//! | `failure()` | true iff a prior step errored |
//! | `success()` | negation of `failure()` |
//!
//! Parsing builds an AST over that closed set; evaluation happens against
//! explicit typed contexts, no host reflection involved.

mod eval;
mod parser;

pub use eval::EvalContext;
pub use parser::parse;

use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExprError {
    #[error("expression syntax error at byte {pos}: {message}")]
    Syntax { pos: usize, message: String },

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("{func}() takes {expected} argument(s), got {got}")]
    WrongArity {
        func: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("{func}() argument must be a string")]
    BadArgument { func: &'static str },

    #[error("unknown input '{0}'")]
    UnknownInput(String),

    #[error("no completed step with id '{0}'")]
    UnknownStep(String),

    #[error("step '{id}' has no output '{key}'")]
    UnknownOutput { id: String, key: String },

    #[error("input '{input}' value '{value}' does not match /{pattern}/")]
    ValidationFailed {
        input: String,
        value: String,
        pattern: String,
    },

    #[error("type mismatch: {op} needs {expected}, got {got}")]
    TypeMismatch {
        op: &'static str,
        expected: &'static str,
        got: &'static str,
    },

    #[error("'if' expression must evaluate to a boolean, got {0}")]
    NotBoolean(&'static str),

    #[error("unterminated '${{{{' in template")]
    UnterminatedTemplate,
}

/// An evaluated expression value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s.clone()),
            // Structured outputs stringify to their JSON form.
            other => Value::String(other.to_string()),
        }
    }

    /// The interpolated form: null is the empty string, whole numbers drop
    /// the fraction.
    pub fn stringify(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 9.0e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            Value::String(s) => s.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.stringify())
    }
}

/// The fixed function set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Input,
    From,
    Env,
    Always,
    Cancelled,
    Failure,
    Success,
}

impl Func {
    pub fn name(self) -> &'static str {
        match self {
            Func::Input => "input",
            Func::From => "from",
            Func::Env => "env",
            Func::Always => "always",
            Func::Cancelled => "cancelled",
            Func::Failure => "failure",
            Func::Success => "success",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Func::From => 2,
            Func::Input | Func::Env => 1,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    String(String),
    Number(f64),
    Bool(bool),
    Not(Box<Expr>),
    Bin {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        func: Func,
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Whether the expression calls `always()` or `failure()` anywhere.
    ///
    /// A failed task short-circuits to steps guarded by one of the two.
    pub fn wants_failed_task(&self) -> bool {
        self.calls(&[Func::Always, Func::Failure])
    }

    /// Whether the expression calls `always()` anywhere. After cancellation
    /// only these steps still run.
    pub fn wants_always(&self) -> bool {
        self.calls(&[Func::Always])
    }

    fn calls(&self, funcs: &[Func]) -> bool {
        match self {
            Expr::Call { func, .. } => funcs.contains(func),
            Expr::Not(inner) => inner.calls(funcs),
            Expr::Bin { lhs, rhs, .. } => lhs.calls(funcs) || rhs.calls(funcs),
            _ => false,
        }
    }
}

/// Evaluate a bare `if:` condition to a boolean.
///
/// A surrounding `${{ … }}` wrapper is tolerated; the result must be a
/// boolean.
pub fn evaluate_condition(text: &str, ctx: &EvalContext) -> Result<bool, ExprError> {
    let expr = parse(strip_wrapper(text))?;
    match eval::evaluate(&expr, ctx)? {
        Value::Bool(b) => Ok(b),
        other => Err(ExprError::NotBoolean(other.type_name())),
    }
}

/// Whether a condition would run inside an already-failed task.
///
/// Malformed conditions answer false; the error surfaces when the step
/// actually evaluates.
pub fn condition_wants_failed_task(text: &str) -> bool {
    parse(strip_wrapper(text))
        .map(|expr| expr.wants_failed_task())
        .unwrap_or(false)
}

/// Whether a condition would still run after cancellation.
pub fn condition_wants_always(text: &str) -> bool {
    parse(strip_wrapper(text))
        .map(|expr| expr.wants_always())
        .unwrap_or(false)
}

/// Substitute every `${{ expr }}` occurrence in `text` with the stringified
/// result. A null result substitutes the empty string.
pub fn interpolate(text: &str, ctx: &EvalContext) -> Result<String, ExprError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("${{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 3..];
        let end = after.find("}}").ok_or(ExprError::UnterminatedTemplate)?;
        let expr = parse(&after[..end])?;
        out.push_str(&eval::evaluate(&expr, ctx)?.stringify());
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

fn strip_wrapper(text: &str) -> &str {
    let trimmed = text.trim();
    match trimmed
        .strip_prefix("${{")
        .and_then(|t| t.strip_suffix("}}"))
    {
        Some(inner) => inner,
        None => trimmed,
    }
}
