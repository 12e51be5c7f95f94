//! Persistence gateway for reward attribution.
//!
//! After each decision the model stores the decision id against its model name, so a reward
//! that arrives later (possibly from another process or session) can be attributed to it.
//! The platform store itself lives outside this crate; [`MemoryStore`] is the in-process
//! implementation used by default and in tests.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::Result;

/// Key under which the last decision id for `model_name` is stored.
pub fn last_decision_key(model_name: &str) -> String {
    format!("last_decision_id:{model_name}")
}

/// String key/value capability scoped per model name.
///
/// Implementations must never leave a partially written value: a failed write keeps the
/// previous value or leaves the key absent.
pub trait PersistenceGateway: Send + Sync {
    fn persist_last_decision_id(&self, model_name: &str, decision_id: &str) -> Result<()> {
        self.write_raw(&last_decision_key(model_name), decision_id)
    }

    /// Last decision id for `model_name`, or an empty string if none was stored.
    fn last_decision_id(&self, model_name: &str) -> Result<String>;

    fn write_raw(&self, key: &str, value: &str) -> Result<()>;
}

/// Thread-safe in-memory [`PersistenceGateway`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_raw(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl PersistenceGateway for MemoryStore {
    fn last_decision_id(&self, model_name: &str) -> Result<String> {
        Ok(self
            .read_raw(&last_decision_key(model_name))
            .unwrap_or_default())
    }

    fn write_raw(&self, key: &str, value: &str) -> Result<()> {
        self.values.write().insert(key.to_string(), value.to_string());
        Ok(())
    }
}
