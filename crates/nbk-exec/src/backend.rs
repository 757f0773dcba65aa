//! Contracts between the evaluator and a concrete language front end.

use std::fmt;

use crate::control::{ExecutionControl, TaskFailure};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Completeness {
    /// A full unit terminated by its own delimiter.
    Complete,
    /// A full unit once a terminator is appended.
    CompleteWithSemi,
    /// More input is required no matter what.
    DefinitelyIncomplete,
    /// Might be complete, but more input is expected.
    ConsideredIncomplete,
    /// The text cannot be classified.
    Unknown,
    Empty,
}

impl Completeness {
    pub fn is_complete(self) -> bool {
        matches!(self, Completeness::Complete | Completeness::CompleteWithSemi)
    }
}

/// One split of the input: the leading unit (when complete) and what follows it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletionInfo {
    pub completeness: Completeness,
    pub source: String,
    pub remaining: String,
}

pub trait CompletenessOracle: Send + Sync {
    fn analyze(&self, input: &str) -> CompletionInfo;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnippetKind {
    Declaration,
    Expression,
    Statement,
    Erroneous,
}

impl SnippetKind {
    /// Only expressions contribute a value to the evaluation result.
    pub fn yields_value(self) -> bool {
        matches!(self, SnippetKind::Expression)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnippetStatus {
    Valid,
    RecoverableUnresolved,
    Overwritten,
    Dropped,
    Rejected,
}

impl SnippetStatus {
    pub fn is_defined(self) -> bool {
        matches!(self, SnippetStatus::Valid)
    }

    pub fn is_active(self) -> bool {
        matches!(self, SnippetStatus::Valid | SnippetStatus::RecoverableUnresolved)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snippet {
    pub id: String,
    pub source: String,
    pub kind: SnippetKind,
    /// Declared symbol, for declarations.
    pub name: Option<String>,
    /// Name of the compiled artifact backing this snippet in the unit store.
    pub artifact: String,
}

pub type Execution = Box<dyn FnOnce() -> Result<String, TaskFailure> + Send>;

/// A state change of one snippet caused by compiling a unit.
pub struct SnippetEvent {
    pub snippet: Snippet,
    pub previous_status: Option<SnippetStatus>,
    pub status: SnippetStatus,
    /// Id of the snippet whose compilation triggered this event, when it is not the snippet itself.
    pub caused_by: Option<String>,
    /// Value available without running anything (declaration defaults).
    pub value: Option<String>,
    /// Work to hand to [`ExecutionControl::submit`].
    pub execution: Option<Execution>,
    pub diagnostics: Vec<String>,
    pub unresolved: Vec<String>,
}

impl SnippetEvent {
    pub fn is_fresh(&self) -> bool {
        self.caused_by.is_none()
    }
}

impl fmt::Debug for SnippetEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnippetEvent")
            .field("snippet", &self.snippet)
            .field("previous_status", &self.previous_status)
            .field("status", &self.status)
            .field("caused_by", &self.caused_by)
            .field("value", &self.value)
            .field("executable", &self.execution.is_some())
            .field("diagnostics", &self.diagnostics)
            .field("unresolved", &self.unresolved)
            .finish()
    }
}

/// Front end that compiles one unit at a time and tracks snippet state.
///
/// `compile` may declare artifacts through [`ExecutionControl::define`]; the
/// returned executions load them back on a worker.
pub trait SnippetBackend: Send {
    fn compile(&mut self, source: &str, control: &ExecutionControl) -> Vec<SnippetEvent>;

    /// Forgets a snippet entirely.
    fn drop_snippet(&mut self, id: &str);

    /// Snippets that are neither overwritten nor dropped.
    fn snippets(&self) -> Vec<Snippet>;

    fn unresolved_dependencies(&self, id: &str) -> Vec<String>;

    fn declared_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn describe(&self, _name: &str) -> Option<String> {
        None
    }
}
