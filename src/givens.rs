//! Givens: extra context merged into every score, decision and tracked body of a model.
//!
//! A host installs one [`GivensProvider`] in [`ModelServices`](crate::ModelServices). The
//! provider sees the caller's own context and returns the context actually used, so it can add
//! app-wide facts (locale, app version, day of week) without every call site passing them.

use serde_json::{Map, Value};

pub trait GivensProvider: Send + Sync {
    /// Context to use for `model_name`, given the caller's own `givens`.
    fn givens_for_model(&self, model_name: &str, givens: Option<&Value>) -> Option<Value>;
}

/// Fixed key/value givens.
///
/// Merged under an object context (the caller's keys win). A non-object caller context is
/// passed through unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StaticGivens {
    values: Map<String, Value>,
}

impl StaticGivens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }
}

impl GivensProvider for StaticGivens {
    fn givens_for_model(&self, _model_name: &str, givens: Option<&Value>) -> Option<Value> {
        match givens {
            None if self.values.is_empty() => None,
            None => Some(Value::Object(self.values.clone())),
            Some(Value::Object(own)) => {
                let mut merged = self.values.clone();
                for (k, v) in own {
                    merged.insert(k.clone(), v.clone());
                }
                Some(Value::Object(merged))
            }
            Some(other) => Some(other.clone()),
        }
    }
}
