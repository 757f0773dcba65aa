//! Execution substrate for the notebook kernel.
//!
//! [`ExecutionControl`] runs compiled units on a worker pool with timeout,
//! interrupt and stop semantics. [`CodeEvaluator`] drives incremental
//! evaluation of source text through a [`CompletenessOracle`] and a
//! [`SnippetBackend`]. The `scratch` module ships a small reference language
//! implementing both backend contracts.

pub mod backend;
pub mod control;
pub mod error;
pub mod evaluator;
pub mod output;
pub mod provider;
pub mod scratch;
pub mod store;
pub mod timeout;

pub use backend::{
    Completeness, CompletenessOracle, CompletionInfo, Execution, Snippet, SnippetBackend, SnippetEvent,
    SnippetKind, SnippetStatus,
};
pub use control::{ExecutionControl, ResultKey, TaskFailure};
pub use error::{EvalError, ExecError};
pub use evaluator::{CodeEvaluator, Completions, IsComplete};
pub use output::{Output, OutputSink};
pub use provider::{ExecConfig, ExecutionControlProvider, REGISTRATION_ID_KEY, TIMEOUT_KEY};
pub use store::{MemUnitStore, UnitStore};
pub use timeout::{TimeUnit, Timeout};
