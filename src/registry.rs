//! Name-keyed store of decision models.
//!
//! A [`ModelRegistry`] is an ordinary value owned by the host (no process-wide static), so each
//! test or embedding controls its lifetime. Models are handed out as `Arc<DecisionModel>`:
//! identity is `Arc::ptr_eq`, and a removed model stays usable by whoever still holds it.
//!
//! Notes:
//! - `get` never fails; an absent name is created with the registry's [`ModelServices`].
//! - Concurrent `get` calls for the same absent name construct exactly one model.
//! - Entries are only destroyed explicitly (`put(name, None)`, `remove`, `clear`); there is no
//!   size-based eviction.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::model::{DecisionModel, ModelServices};
use crate::{Error, Result};

#[derive(Debug, Default)]
pub struct ModelRegistry {
    services: ModelServices,
    models: Mutex<HashMap<String, Arc<DecisionModel>>>,
}

impl ModelRegistry {
    /// Empty registry whose lazily created models carry no collaborators.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty registry whose lazily created models share `services`.
    pub fn with_services(services: ModelServices) -> Self {
        Self {
            services,
            models: Mutex::new(HashMap::new()),
        }
    }

    pub fn services(&self) -> &ModelServices {
        &self.services
    }

    /// Return the model registered under `name`, creating it if absent.
    ///
    /// Never fails, so any key is served, including `""`. Explicit registration through
    /// [`put`](Self::put) or [`insert`](Self::insert) requires a non-empty name.
    pub fn get(&self, name: &str) -> Arc<DecisionModel> {
        let mut models = self.models.lock();
        if let Some(m) = models.get(name) {
            return Arc::clone(m);
        }
        let model = Arc::new(DecisionModel::with_services(name, &self.services));
        models.insert(name.to_string(), Arc::clone(&model));
        debug!(model = %name, size = models.len(), "model created");
        model
    }

    /// Associate `model` with `name`, or remove `name` when `model` is `None`.
    ///
    /// An absent or empty `name` is always an invalid-argument error, whatever `model` is. A
    /// present model must carry the same name it is registered under.
    pub fn put(&self, name: Option<&str>, model: Option<Arc<DecisionModel>>) -> Result<()> {
        let Some(name) = name else {
            return Err(Error::invalid("model name must not be absent"));
        };
        if name.is_empty() {
            return Err(Error::invalid("model name must not be empty"));
        }
        match model {
            Some(model) => self.insert(name, model),
            None => {
                self.remove(name);
                Ok(())
            }
        }
    }

    /// Insert or overwrite `name`.
    pub fn insert(&self, name: &str, model: Arc<DecisionModel>) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid("model name must not be empty"));
        }
        if model.name() != name {
            return Err(Error::invalid(format!(
                "model named [{}] cannot be registered as [{name}]",
                model.name()
            )));
        }
        let replaced = self.models.lock().insert(name.to_string(), model).is_some();
        debug!(model = %name, replaced, "model registered");
        Ok(())
    }

    /// Remove `name`, returning the removed model if there was one.
    pub fn remove(&self, name: &str) -> Option<Arc<DecisionModel>> {
        let removed = self.models.lock().remove(name);
        if removed.is_some() {
            debug!(model = %name, "model removed");
        }
        removed
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.lock().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.models.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.lock().is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.models.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.models.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_creates_once_and_returns_same_instance() {
        let r = ModelRegistry::new();
        assert!(r.is_empty());
        let a = r.get("m");
        assert_eq!(a.name(), "m");
        assert_eq!(r.len(), 1);
        let b = r.get("m");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn put_with_absent_name_always_fails() {
        let r = ModelRegistry::new();
        r.get("x");
        let m = Arc::new(DecisionModel::new("m"));
        assert!(r.put(None, Some(m)).unwrap_err().is_invalid_argument());
        assert!(r.put(None, None).unwrap_err().is_invalid_argument());
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn put_absent_model_removes_entry() {
        let r = ModelRegistry::new();
        r.get("other");
        r.put(Some("m"), Some(Arc::new(DecisionModel::new("m")))).unwrap();
        assert_eq!(r.len(), 2);
        r.put(Some("m"), None).unwrap();
        assert_eq!(r.len(), 1);
        assert!(!r.contains("m"));
        // Removing again is a no-op.
        r.put(Some("m"), None).unwrap();
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn overwrite_yields_distinct_instance_under_same_name() {
        let r = ModelRegistry::new();
        let first = r.get("m");
        let second = Arc::new(DecisionModel::new("m"));
        r.put(Some("m"), Some(Arc::clone(&second))).unwrap();
        let now = r.get("m");
        assert!(!Arc::ptr_eq(&first, &now));
        assert!(Arc::ptr_eq(&second, &now));
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn empty_name_cannot_be_registered() {
        let r = ModelRegistry::new();
        let m = Arc::new(DecisionModel::new(""));
        assert!(r
            .put(Some(""), Some(Arc::clone(&m)))
            .unwrap_err()
            .is_invalid_argument());
        assert!(r.put(Some(""), None).unwrap_err().is_invalid_argument());
        assert!(r.insert("", m).unwrap_err().is_invalid_argument());
        assert!(r.is_empty());
        // Lookup still never fails.
        assert_eq!(r.get("").name(), "");
    }

    #[test]
    fn mismatched_name_is_rejected() {
        let r = ModelRegistry::new();
        let err = r
            .put(Some("a"), Some(Arc::new(DecisionModel::new("b"))))
            .unwrap_err();
        assert!(err.is_invalid_argument());
        assert!(r.is_empty());
    }

    #[test]
    fn concurrent_get_constructs_one_model() {
        let r = ModelRegistry::new();
        let got: Vec<Arc<DecisionModel>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..16).map(|_| s.spawn(|| r.get("shared"))).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(r.len(), 1);
        assert!(got.iter().all(|m| Arc::ptr_eq(m, &got[0])));
    }

    #[test]
    fn names_and_clear() {
        let r = ModelRegistry::new();
        r.get("b");
        r.get("a");
        assert_eq!(r.names(), vec!["a".to_string(), "b".to_string()]);
        r.clear();
        assert!(r.is_empty());
    }
}
