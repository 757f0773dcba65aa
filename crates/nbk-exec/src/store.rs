use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

/// Registry of compiled-unit artifacts keyed by artifact name.
///
/// Declaration happens on the evaluating thread; workers only `load`.
pub trait UnitStore: Send + Sync {
    /// Declares (or replaces) the artifact for `name`.
    fn store(&self, name: &str, artifact: Vec<u8>);

    /// Resolves `name` to its artifact, marking it loaded.
    fn load(&self, name: &str) -> Option<Arc<[u8]>>;

    /// Forgets both the declaration and the loaded handle. Returns whether anything was removed.
    fn unload(&self, name: &str) -> bool;

    fn contains(&self, name: &str) -> bool;

    fn names(&self) -> Vec<String>;
}

#[derive(Clone, Default)]
pub struct MemUnitStore {
    declared: Arc<RwLock<HashMap<String, Arc<[u8]>>>>,
    loaded: Arc<RwLock<HashSet<String>>>,
}

impl std::fmt::Debug for MemUnitStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemUnitStore")
            .field("declared", &self.declared.read().unwrap().len())
            .field("loaded", &self.loaded.read().unwrap().len())
            .finish()
    }
}

impl MemUnitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.read().unwrap().contains(name)
    }
}

impl UnitStore for MemUnitStore {
    fn store(&self, name: &str, artifact: Vec<u8>) {
        let mut declared = self.declared.write().unwrap();
        declared.insert(name.to_string(), Arc::from(artifact));
        // a redeclared unit must be loaded afresh
        self.loaded.write().unwrap().remove(name);
    }

    fn load(&self, name: &str) -> Option<Arc<[u8]>> {
        let artifact = self.declared.read().unwrap().get(name).cloned()?;
        self.loaded.write().unwrap().insert(name.to_string());
        Some(artifact)
    }

    fn unload(&self, name: &str) -> bool {
        let declared = self.declared.write().unwrap().remove(name).is_some();
        let loaded = self.loaded.write().unwrap().remove(name);
        declared || loaded
    }

    fn contains(&self, name: &str) -> bool {
        self.declared.read().unwrap().contains_key(name)
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.declared.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}
