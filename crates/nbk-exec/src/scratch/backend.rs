use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::ast::{TypeName, Unit, Value, ValueType};
use super::interp::{self, Vars};
use super::parser::parse_unit;
use crate::backend::{Execution, Snippet, SnippetBackend, SnippetEvent, SnippetKind, SnippetStatus};
use crate::control::{ExecutionControl, TaskFailure};
use crate::output::Output;
use crate::store::UnitStore;

struct Entry {
    snippet: Snippet,
    status: SnippetStatus,
    unit: Unit,
    /// Static type of the declared variable, for declarations.
    declared: Option<ValueType>,
    unresolved: Vec<String>,
}

/// Snippet backend for the scratch language.
///
/// Compiled units are stored as JSON-encoded syntax trees under `unit_<id>`;
/// session variables live in a map shared with the workers.
pub struct ScratchBackend {
    entries: Vec<Entry>,
    next_id: u64,
    vars: Arc<Vars>,
    output: Arc<Output>,
}

impl Default for ScratchBackend {
    fn default() -> Self {
        Self::new(Arc::default())
    }
}

impl ScratchBackend {
    /// `print` writes go to `output`.
    pub fn new(output: Arc<Output>) -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
            vars: Arc::new(RwLock::new(HashMap::new())),
            output,
        }
    }

    pub fn value(&self, name: &str) -> Option<Value> {
        self.vars.read().unwrap().get(name).cloned()
    }

    fn lookup(&self, name: &str) -> Option<ValueType> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.status.is_active() && entry.snippet.name.as_deref() == Some(name))
            .and_then(|entry| entry.declared)
    }

    fn unresolved_in(&self, unit: &Unit) -> Vec<String> {
        let references = match unit {
            Unit::Declare { init: Some(expr), .. } | Unit::Eval(expr) => expr.references(),
            Unit::Assign { name, value } => {
                let mut names = vec![name.clone()];
                names.extend(value.references().into_iter().filter(|n| n != name));
                names
            }
            Unit::Declare { init: None, .. } => Vec::new(),
        };
        references.into_iter().filter(|name| self.lookup(name).is_none()).collect()
    }

    /// Static checks for a unit whose references all resolve. Returns the declared type.
    fn check(&self, unit: &Unit) -> Result<Option<ValueType>, String> {
        let lookup = |name: &str| self.lookup(name);
        match unit {
            Unit::Declare { ty, init, .. } => {
                let found = init.as_ref().map(|expr| interp::type_of(expr, &lookup)).transpose()?;
                match (ty.value_type(), found) {
                    (Some(expected), Some(found)) => interp::assignable(expected, found).map(|_| Some(expected)),
                    (Some(expected), None) => Ok(Some(expected)),
                    (None, Some(ValueType::Void)) => Err("cannot infer type: 'void' initializer".into()),
                    (None, found) => Ok(found),
                }
            }
            Unit::Assign { name, value } => {
                let expected = lookup(name).ok_or_else(|| format!("cannot find symbol: variable {name}"))?;
                interp::assignable(expected, interp::type_of(value, &lookup)?)?;
                Ok(None)
            }
            Unit::Eval(expr) => interp::type_of(expr, &lookup).map(|_| None),
        }
    }

    fn execution(&self, store: Arc<dyn UnitStore>, artifact: String, declared: Option<ValueType>) -> Execution {
        let vars = self.vars.clone();
        let output = self.output.clone();
        Box::new(move || {
            let bytes = store
                .load(&artifact)
                .ok_or_else(|| TaskFailure::thrown("NoClassDefFoundError", artifact.clone()))?;
            let unit: Unit = serde_json::from_slice(&bytes)
                .map_err(|err| TaskFailure::thrown("ClassFormatError", err.to_string()))?;
            interp::execute(&unit, declared, &vars, &output)
        })
    }

    /// Declares the artifact and builds the work that runs it. Declarations
    /// without an initializer take their default value directly.
    fn activate(
        &self,
        control: &ExecutionControl,
        snippet: &Snippet,
        unit: &Unit,
        declared: Option<ValueType>,
    ) -> Result<(Option<String>, Option<Execution>), String> {
        if let Unit::Declare { name, init: None, .. } = unit {
            let value = Value::default_for(declared.unwrap_or(ValueType::Int));
            let rendered = value.to_string();
            self.vars.write().unwrap().insert(name.clone(), value);
            return Ok((Some(rendered), None));
        }
        let bytes = serde_json::to_vec(unit).map_err(|err| err.to_string())?;
        control.define(&snippet.artifact, bytes);
        let execution = self.execution(control.store(), snippet.artifact.clone(), declared);
        Ok((None, Some(execution)))
    }

    /// Re-checks unresolved declarations after `cause` defined a new name.
    fn resolve_dependents(&mut self, cause: &str, control: &ExecutionControl) -> Vec<SnippetEvent> {
        let mut events = Vec::new();
        for idx in 0..self.entries.len() {
            if self.entries[idx].status != SnippetStatus::RecoverableUnresolved {
                continue;
            }
            let unresolved = self.unresolved_in(&self.entries[idx].unit);
            if !unresolved.is_empty() {
                self.entries[idx].unresolved = unresolved;
                continue;
            }

            let entry = &self.entries[idx];
            let outcome = self
                .check(&entry.unit)
                .and_then(|declared| self.activate(control, &entry.snippet, &entry.unit, declared));
            let entry = &mut self.entries[idx];
            entry.unresolved.clear();
            let (status, value, execution, diagnostics) = match outcome {
                Ok((value, execution)) => (SnippetStatus::Valid, value, execution, Vec::new()),
                Err(diag) => (SnippetStatus::Rejected, None, None, vec![diag]),
            };
            tracing::debug!(snippet = %entry.snippet.id, cause, ?status, "dependent snippet re-evaluated");
            entry.status = status;
            events.push(SnippetEvent {
                snippet: entry.snippet.clone(),
                previous_status: Some(SnippetStatus::RecoverableUnresolved),
                status,
                caused_by: Some(cause.to_string()),
                value,
                execution,
                diagnostics,
                unresolved: Vec::new(),
            });
        }
        events
    }
}

fn event(snippet: Snippet, status: SnippetStatus) -> SnippetEvent {
    SnippetEvent {
        snippet,
        previous_status: None,
        status,
        caused_by: None,
        value: None,
        execution: None,
        diagnostics: Vec::new(),
        unresolved: Vec::new(),
    }
}

impl SnippetBackend for ScratchBackend {
    fn compile(&mut self, source: &str, control: &ExecutionControl) -> Vec<SnippetEvent> {
        let id = self.next_id.to_string();
        self.next_id += 1;
        let mut snippet = Snippet {
            id: id.clone(),
            source: source.trim().to_string(),
            kind: SnippetKind::Erroneous,
            name: None,
            artifact: format!("unit_{id}"),
        };

        let unit = match parse_unit(source) {
            Ok(unit) => unit,
            Err(diag) => {
                let mut rejected = event(snippet, SnippetStatus::Rejected);
                rejected.diagnostics.push(diag);
                return vec![rejected];
            }
        };

        let unresolved = self.unresolved_in(&unit);
        snippet.kind = match &unit {
            Unit::Declare { name, .. } => {
                snippet.name = Some(name.clone());
                SnippetKind::Declaration
            }
            Unit::Assign { .. } => SnippetKind::Statement,
            Unit::Eval(_) => SnippetKind::Expression,
        };

        let mut fresh = event(snippet.clone(), SnippetStatus::Valid);
        let declared = if !unresolved.is_empty() {
            match &unit {
                Unit::Declare { ty, .. } if *ty != TypeName::Var => {
                    fresh.status = SnippetStatus::RecoverableUnresolved;
                    ty.value_type()
                }
                _ => {
                    fresh.status = SnippetStatus::Rejected;
                    fresh.diagnostics = unresolved
                        .iter()
                        .map(|name| format!("cannot find symbol: variable {name}"))
                        .collect();
                    None
                }
            }
        } else {
            match self.check(&unit).and_then(|declared| {
                self.activate(control, &snippet, &unit, declared).map(|out| (declared, out))
            }) {
                Ok((declared, (value, execution))) => {
                    fresh.value = value;
                    fresh.execution = execution;
                    declared
                }
                Err(diag) => {
                    fresh.status = SnippetStatus::Rejected;
                    fresh.diagnostics.push(diag);
                    None
                }
            }
        };
        fresh.unresolved = unresolved.clone();

        if let Unit::Eval(expr) = &unit {
            let lookup = |name: &str| self.lookup(name);
            if matches!(interp::type_of(expr, &lookup), Ok(ValueType::Void)) {
                fresh.snippet.kind = SnippetKind::Statement;
                snippet.kind = SnippetKind::Statement;
            }
        }

        if fresh.status == SnippetStatus::Rejected {
            return vec![fresh];
        }

        let status = fresh.status;
        let mut events = vec![fresh];
        if let Some(name) = snippet.name.clone() {
            if status == SnippetStatus::RecoverableUnresolved {
                // the replaced value must not stay visible under the new declaration
                self.vars.write().unwrap().remove(&name);
            }
            for entry in self.entries.iter_mut() {
                if entry.status.is_active() && entry.snippet.name.as_deref() == Some(name.as_str()) {
                    let mut overwritten = event(entry.snippet.clone(), SnippetStatus::Overwritten);
                    overwritten.previous_status = Some(entry.status);
                    overwritten.caused_by = Some(id.clone());
                    entry.status = SnippetStatus::Overwritten;
                    events.push(overwritten);
                }
            }
        }

        self.entries.push(Entry { snippet, status, unit, declared, unresolved });
        if status == SnippetStatus::Valid && self.entries.last().is_some_and(|e| e.snippet.name.is_some()) {
            events.extend(self.resolve_dependents(&id, control));
        }
        events
    }

    fn drop_snippet(&mut self, id: &str) {
        let Some(idx) = self.entries.iter().position(|entry| entry.snippet.id == id) else {
            return;
        };
        let entry = self.entries.remove(idx);
        if entry.status.is_active() {
            if let Some(name) = &entry.snippet.name {
                self.vars.write().unwrap().remove(name);
            }
        }
    }

    fn snippets(&self) -> Vec<Snippet> {
        self.entries
            .iter()
            .filter(|entry| entry.status.is_active())
            .map(|entry| entry.snippet.clone())
            .collect()
    }

    fn unresolved_dependencies(&self, id: &str) -> Vec<String> {
        self.entries
            .iter()
            .find(|entry| entry.snippet.id == id)
            .map(|entry| entry.unresolved.clone())
            .unwrap_or_default()
    }

    fn declared_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.status.is_active())
            .filter_map(|entry| entry.snippet.name.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    fn describe(&self, name: &str) -> Option<String> {
        let declared = self.lookup(name)?;
        Some(match self.value(name) {
            Some(value) => format!("{declared} {name} = {value}"),
            None => format!("{declared} {name}"),
        })
    }
}
