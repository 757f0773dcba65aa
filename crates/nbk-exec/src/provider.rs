use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use crate::control::ExecutionControl;
use crate::error::ExecError;
use crate::store::MemUnitStore;
use crate::timeout::Timeout;

/// Parameter naming the id under which a generated control is registered.
pub const REGISTRATION_ID_KEY: &str = "registration-id";
/// Parameter holding the per-submission timeout spec.
pub const TIMEOUT_KEY: &str = "timeout";

/// Settings for the execution backend of one kernel session.
#[derive(Clone, Debug)]
pub struct ExecConfig {
    pub registration_id: String,
    pub timeout: Option<String>,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            registration_id: uuid::Uuid::new_v4().to_string(),
            timeout: None,
        }
    }
}

impl ExecConfig {
    pub fn to_parameters(&self) -> HashMap<String, String> {
        let mut params = HashMap::new();
        params.insert(REGISTRATION_ID_KEY.to_string(), self.registration_id.clone());
        if let Some(timeout) = &self.timeout {
            params.insert(TIMEOUT_KEY.to_string(), timeout.clone());
        }
        params
    }
}

/// Builds [`ExecutionControl`]s and remembers them by registration id.
///
/// The table holds weak references, so a control disappears from lookups once
/// its owner drops it.
#[derive(Default)]
pub struct ExecutionControlProvider {
    controls: RwLock<HashMap<String, Weak<ExecutionControl>>>,
}

impl ExecutionControlProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&self) -> &'static str {
        "nbk"
    }

    pub fn generate(&self, params: &HashMap<String, String>) -> Result<Arc<ExecutionControl>, ExecError> {
        let timeout = match params.get(TIMEOUT_KEY) {
            Some(spec) => Timeout::parse(spec)?,
            None => None,
        };
        let control = Arc::new(ExecutionControl::new(Arc::new(MemUnitStore::new()), timeout)?);

        if let Some(id) = params.get(REGISTRATION_ID_KEY) {
            let mut controls = self.controls.write().unwrap();
            controls.retain(|_, control| control.strong_count() > 0);
            controls.insert(id.clone(), Arc::downgrade(&control));
        }
        tracing::debug!(
            id = params.get(REGISTRATION_ID_KEY).map(String::as_str),
            ?timeout,
            "generated execution control"
        );
        Ok(control)
    }

    pub fn get(&self, id: &str) -> Option<Arc<ExecutionControl>> {
        self.controls.read().unwrap().get(id).and_then(Weak::upgrade)
    }
}
