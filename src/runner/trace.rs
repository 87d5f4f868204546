//! Run errors and traceback frames
//!
//! Every step failure is wrapped with a frame `"<task>[<index>] in
//! <origin-uri>"` as it propagates out of a task. Frames nest caller-first:
//! the outermost frame names the task the user invoked, the innermost the
//! step that actually failed.

use thiserror::Error;

use crate::builtin::BuiltinError;
use crate::expr::ExprError;
use crate::fetch::FetchError;
use crate::uri::UriError;
use crate::workflow::{ReadError, ValidationError};

#[derive(Error, Debug)]
pub enum RunError {
    #[error("no task named '{0}' in workflow")]
    UnknownTask(String),

    #[error("task '{task}': missing required input '{input}'")]
    MissingInput { task: String, input: String },

    #[error("task '{task}': input '{input}' value '{value}' does not match /{pattern}/")]
    InputValidation {
        task: String,
        input: String,
        value: String,
        pattern: String,
    },

    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Uri(#[from] UriError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Expr(#[from] ExprError),

    #[error(transparent)]
    Builtin(#[from] BuiltinError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("command exited with code {0}")]
    ExitCode(i32),

    #[error("step timed out after {0}")]
    Timeout(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("workflow recursion deeper than {0} levels")]
    DepthLimit(usize),

    #[error("{task}[{index}] in {origin}")]
    Frame {
        task: String,
        index: usize,
        origin: String,
        #[source]
        source: Box<RunError>,
    },
}

impl RunError {
    /// Wrap an error with the frame of the step it escaped from.
    pub fn framed(self, task: &str, index: usize, origin: &str) -> RunError {
        RunError::Frame {
            task: task.to_string(),
            index,
            origin: origin.to_string(),
            source: Box::new(self),
        }
    }

    /// The process exit code this error maps to: a shell step's own code
    /// when that is the root cause, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::ExitCode(code) => *code,
            RunError::Frame { source, .. } => source.exit_code(),
            _ => 1,
        }
    }

    /// Traceback frames, caller-first, plus the root cause message.
    pub fn traceback(&self) -> (Vec<String>, String) {
        let mut frames = Vec::new();
        let mut current = self;
        while let RunError::Frame {
            task,
            index,
            origin,
            source,
        } = current
        {
            frames.push(format!("{task}[{index}] in {origin}"));
            current = source;
        }
        (frames, current.to_string())
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            RunError::Cancelled => true,
            RunError::Fetch(FetchError::Cancelled) => true,
            RunError::Builtin(BuiltinError::Cancelled) => true,
            RunError::Frame { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}
