use thiserror::Error;

use crate::control::ResultKey;
use crate::timeout::TimeUnit;

/// Outcome classification of a single submission to the worker pool.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Execution timed out after configured timeout of {duration} {unit}.")]
    Timeout { duration: u64, unit: TimeUnit },
    #[error("Execution interrupted.")]
    Interrupted,
    #[error("execution control has been stopped")]
    Stopped,
    #[error("{class_name}: {message}")]
    User { class_name: String, message: String },
    #[error("unresolved reference to {}", .names.join(", "))]
    Resolution { names: Vec<String> },
    #[error("No result with key: {0}")]
    MissingResult(ResultKey),
    #[error("invalid timeout string: {0}")]
    InvalidTimeout(String),
    #[error("invalid timeout unit: {0}")]
    InvalidTimeoutUnit(String),
    #[error("failed to start worker pool: {0}")]
    Pool(#[from] std::io::Error),
}

/// User-visible evaluation failures.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("compilation failed: {}", .diagnostics.join("; "))]
    Compilation {
        code: String,
        diagnostics: Vec<String>,
        unresolved: Vec<String>,
    },
    #[error("incomplete source: {remaining}")]
    Incomplete { remaining: String },
    #[error("{class_name}: {message}")]
    Exception { class_name: String, message: String },
    #[error("unresolved reference to {}", .names.join(", "))]
    Unresolved { names: Vec<String> },
    #[error("Execution timed out after configured timeout of {duration} {unit}.")]
    Timeout { duration: u64, unit: TimeUnit, code: String },
    #[error("Execution interrupted.")]
    Interrupted { code: String },
    #[error("execution control has been stopped")]
    Stopped,
    #[error("no execution control registered under '{0}'")]
    NoControl(String),
    #[error(transparent)]
    Exec(ExecError),
}

impl EvalError {
    /// Attaches the offending source to worker-level failures.
    pub fn from_exec(err: ExecError, code: &str) -> Self {
        let code = code.trim().to_string();
        match err {
            ExecError::Timeout { duration, unit } => EvalError::Timeout { duration, unit, code },
            ExecError::Interrupted => EvalError::Interrupted { code },
            ExecError::Stopped => EvalError::Stopped,
            ExecError::User { class_name, message } => EvalError::Exception { class_name, message },
            ExecError::Resolution { names } => EvalError::Unresolved { names },
            other => EvalError::Exec(other),
        }
    }

    /// Short error name shown to notebook users.
    pub fn ename(&self) -> &str {
        match self {
            EvalError::Compilation { .. } => "CompilationException",
            EvalError::Incomplete { .. } => "IncompleteSourceException",
            EvalError::Exception { class_name, .. } => class_name,
            EvalError::Unresolved { .. } => "UnresolvedReferenceException",
            EvalError::Timeout { .. } => "EvaluationTimeoutException",
            EvalError::Interrupted { .. } => "EvaluationInterruptedException",
            EvalError::Stopped => "StoppedException",
            EvalError::NoControl(_) | EvalError::Exec(_) => "InternalError",
        }
    }

    /// Recoverable failures may succeed once later units define what is missing.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EvalError::Unresolved { .. })
    }
}
