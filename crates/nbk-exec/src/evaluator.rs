use std::sync::{Arc, Mutex};

use crate::backend::{Completeness, CompletenessOracle, CompletionInfo, Snippet, SnippetBackend, SnippetStatus};
use crate::control::ExecutionControl;
use crate::error::EvalError;
use crate::output::Output;
use crate::provider::ExecutionControlProvider;

const INDENTATION: &str = "  ";

/// Answer to "can this text run as is?".
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IsComplete {
    Complete,
    Invalid,
    Unknown,
    /// More input is needed; carries the suggested indent for the next line.
    Incomplete(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completions {
    pub cursor_start: usize,
    pub cursor_end: usize,
    pub matches: Vec<String>,
}

/// Incrementally evaluates source text against a persistent session.
///
/// Methods take `&self` so that [`interrupt`](Self::interrupt) can be called
/// from another thread while an evaluation is blocked on a worker.
pub struct CodeEvaluator {
    provider: Arc<ExecutionControlProvider>,
    control_id: String,
    backend: Mutex<Box<dyn SnippetBackend>>,
    oracle: Arc<dyn CompletenessOracle>,
    startup: Mutex<Vec<String>>,
    output: Arc<Output>,
}

impl CodeEvaluator {
    pub fn new(
        provider: Arc<ExecutionControlProvider>,
        control_id: impl Into<String>,
        backend: Box<dyn SnippetBackend>,
        oracle: Arc<dyn CompletenessOracle>,
        startup: Vec<String>,
    ) -> Self {
        Self {
            provider,
            control_id: control_id.into(),
            backend: Mutex::new(backend),
            oracle,
            startup: Mutex::new(startup),
            output: Arc::new(Output::default()),
        }
    }

    /// Shares `output` with the backend's workers so callers can redirect it.
    pub fn with_output(mut self, output: Arc<Output>) -> Self {
        self.output = output;
        self
    }

    /// Where user code's standard output goes while it runs.
    pub fn output(&self) -> &Arc<Output> {
        &self.output
    }

    fn control(&self) -> Result<Arc<ExecutionControl>, EvalError> {
        self.provider
            .get(&self.control_id)
            .ok_or_else(|| EvalError::NoControl(self.control_id.clone()))
    }

    /// Evaluates every complete unit of `code` in order and returns the value
    /// of the last one. Startup snippets run once, before the first evaluation.
    pub fn eval(&self, code: &str) -> Result<Option<String>, EvalError> {
        self.run_startup()?;
        self.eval_units(code)
    }

    /// A startup snippet leaves the queue only after it succeeds, so a failing
    /// one runs again on the next evaluation.
    fn run_startup(&self) -> Result<(), EvalError> {
        loop {
            let Some(script) = self.startup.lock().unwrap().first().cloned() else {
                return Ok(());
            };
            tracing::debug!(len = script.len(), "running startup snippet");
            if let Err(err) = self.eval_units(&script) {
                tracing::warn!(%err, "startup snippet failed");
                return Err(err);
            }
            self.startup.lock().unwrap().remove(0);
        }
    }

    fn eval_units(&self, code: &str) -> Result<Option<String>, EvalError> {
        let mut last = None;
        let mut info = self.oracle.analyze(code);
        while info.completeness.is_complete() {
            last = self.eval_single(&info.source)?;
            info = self.oracle.analyze(&info.remaining);
        }
        if info.completeness != Completeness::Empty {
            return Err(EvalError::Incomplete { remaining: info.remaining.trim().to_string() });
        }
        Ok(last)
    }

    fn eval_single(&self, code: &str) -> Result<Option<String>, EvalError> {
        let control = self.control()?;
        let mut events = self.backend.lock().unwrap().compile(code, &control);

        for event in events.iter().filter(|event| event.status == SnippetStatus::Overwritten) {
            self.retire(&control, &event.snippet);
        }

        let mut result = None;
        let mut failure = None;
        for event in events.iter_mut().filter(|event| event.status != SnippetStatus::Overwritten) {
            let fresh = event.is_fresh();
            if fresh {
                match event.status {
                    SnippetStatus::Rejected => {
                        failure.get_or_insert(EvalError::Compilation {
                            code: code.trim().to_string(),
                            diagnostics: event.diagnostics.clone(),
                            unresolved: event.unresolved.clone(),
                        });
                        continue;
                    }
                    SnippetStatus::RecoverableUnresolved => {
                        failure.get_or_insert(EvalError::Unresolved { names: event.unresolved.clone() });
                        continue;
                    }
                    _ => {}
                }
            }

            let value = match event.execution.take() {
                Some(execution) => match control.submit(execution).and_then(|key| control.take_result(&key)) {
                    Ok(value) => Some(value),
                    Err(err) if fresh => {
                        failure.get_or_insert(EvalError::from_exec(err, code));
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(snippet = %event.snippet.id, %err, "dependent snippet failed");
                        continue;
                    }
                },
                None => event.value.clone(),
            };
            if fresh {
                result = if event.snippet.kind.yields_value() { value } else { None };
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(result),
        }
    }

    /// Drops a superseded snippet and unloads its artifact once nothing live shares it.
    fn retire(&self, control: &ExecutionControl, snippet: &Snippet) {
        let mut backend = self.backend.lock().unwrap();
        backend.drop_snippet(&snippet.id);
        let shared = backend.snippets().iter().any(|live| live.artifact == snippet.artifact);
        if !shared {
            control.unload(&snippet.artifact);
        }
        tracing::debug!(snippet = %snippet.id, artifact = %snippet.artifact, shared, "retired snippet");
    }

    pub fn is_complete(&self, code: &str) -> IsComplete {
        let mut info: CompletionInfo = self.oracle.analyze(code);
        while info.completeness.is_complete() {
            info = self.oracle.analyze(&info.remaining);
        }
        match info.completeness {
            Completeness::Unknown => IsComplete::Invalid,
            Completeness::Complete | Completeness::CompleteWithSemi | Completeness::Empty => IsComplete::Complete,
            Completeness::ConsideredIncomplete | Completeness::DefinitelyIncomplete => {
                IsComplete::Incomplete(compute_indentation(&info.remaining))
            }
        }
    }

    pub fn interrupt(&self) {
        if let Some(control) = self.provider.get(&self.control_id) {
            control.interrupt();
        }
    }

    pub fn shutdown(&self) {
        if let Some(control) = self.provider.get(&self.control_id) {
            control.stop();
        }
    }

    pub fn snippets(&self) -> Vec<Snippet> {
        self.backend.lock().unwrap().snippets()
    }

    pub fn unresolved_dependencies(&self, id: &str) -> Vec<String> {
        self.backend.lock().unwrap().unresolved_dependencies(id)
    }

    /// Declared names starting with the identifier that ends at `cursor` (in chars).
    pub fn complete(&self, code: &str, cursor: usize) -> Completions {
        let (start, prefix) = identifier_before(code, cursor);
        let matches = self
            .backend
            .lock()
            .unwrap()
            .declared_names()
            .into_iter()
            .filter(|name| name.starts_with(&prefix))
            .collect();
        Completions { cursor_start: start, cursor_end: cursor, matches }
    }

    pub fn inspect(&self, code: &str, cursor: usize) -> Option<String> {
        let (start, _) = identifier_before(code, cursor);
        let name: String = code
            .chars()
            .skip(start)
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        if name.is_empty() {
            return None;
        }
        self.backend.lock().unwrap().describe(&name)
    }
}

fn identifier_before(code: &str, cursor: usize) -> (usize, String) {
    let chars: Vec<char> = code.chars().take(cursor).collect();
    let start = chars
        .iter()
        .rposition(|c| !(c.is_alphanumeric() || *c == '_'))
        .map(|idx| idx + 1)
        .unwrap_or(0);
    (start, chars[start..].iter().collect())
}

/// Indent of the last line, plus one level when `{` or `(` opened on it stay open.
fn compute_indentation(partial: &str) -> String {
    let last_line = partial.rsplit('\n').next().unwrap_or_default();
    let current: String = last_line.chars().take_while(|c| c.is_whitespace()).collect();

    let mut braces: i32 = -1;
    let mut parens: i32 = -1;
    for c in last_line.chars() {
        match c {
            '}' if braces != -1 => braces -= 1,
            ')' if parens != -1 => parens -= 1,
            '{' => braces += if braces == -1 { 2 } else { 1 },
            '(' => parens += if parens == -1 { 2 } else { 1 },
            _ => {}
        }
    }

    if braces > 0 || parens > 0 {
        current + INDENTATION
    } else {
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indentation_follows_last_line() {
        assert_eq!(compute_indentation("int y ="), "");
        assert_eq!(compute_indentation("foo {\n    bar("), "      ");
        assert_eq!(compute_indentation("foo {\n    bar()"), "    ");
        assert_eq!(compute_indentation("  x) + ("), "    ");
        assert_eq!(compute_indentation("\tdone"), "\t");
    }

    #[test]
    fn closers_before_openers_are_ignored() {
        assert_eq!(compute_indentation("}) {"), "  ");
        assert_eq!(compute_indentation("{ }"), "");
    }

    #[test]
    fn identifier_prefix_before_cursor() {
        assert_eq!(identifier_before("int total = co", 14), (12, "co".to_string()));
        assert_eq!(identifier_before("x", 0), (0, String::new()));
        assert_eq!(identifier_before("a + b_1", 7), (4, "b_1".to_string()));
    }
}
