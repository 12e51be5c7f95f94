//! Decisions bound to a fixed context, and multivariate variant generation.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::model::{Decision, DecisionModel};
use crate::{Error, Result};

/// A model paired with the givens every call through it uses.
///
/// Created by [`DecisionModel::given`]. The model's [`GivensProvider`](crate::GivensProvider),
/// if any, still merges its own givens on top.
#[derive(Debug, Clone, Copy)]
pub struct DecisionContext<'m> {
    model: &'m DecisionModel,
    givens: Option<&'m Value>,
}

impl<'m> DecisionContext<'m> {
    pub(crate) fn new(model: &'m DecisionModel, givens: Option<&'m Value>) -> Self {
        Self { model, givens }
    }

    pub fn model(&self) -> &'m DecisionModel {
        self.model
    }

    pub fn givens(&self) -> Option<&'m Value> {
        self.givens
    }

    pub fn score<V: Serialize>(&self, variants: &[V]) -> Result<Vec<f64>> {
        self.model.score(variants, self.givens)
    }

    pub fn choose<'a, V: Serialize>(&self, variants: &'a [V]) -> Result<Decision<'a, V>> {
        self.model.choose(variants, self.givens)
    }

    pub fn choose_with_scores<'a, V: Serialize>(
        &self,
        variants: &'a [V],
        scores: &[f64],
    ) -> Result<Decision<'a, V>> {
        self.model.choose_with_scores(variants, scores, self.givens)
    }

    pub fn choose_first<'a, V: Serialize>(&self, variants: &'a [V]) -> Result<Decision<'a, V>> {
        self.model.choose_first(variants, self.givens)
    }

    pub fn choose_random<'a, V: Serialize>(&self, variants: &'a [V]) -> Result<Decision<'a, V>> {
        self.model.choose_random(variants, self.givens)
    }

    pub fn rank<'a, V: Serialize>(&self, variants: &'a [V]) -> Result<Vec<&'a V>> {
        self.model.rank(variants, self.givens)
    }

    pub fn which<'a, V: Serialize>(&self, variants: &'a [V]) -> Result<&'a V> {
        self.model.which(variants, self.givens)
    }

    pub fn optimize(&self, options: &Map<String, Value>) -> Result<Value> {
        self.model.optimize(options, self.givens)
    }
}

/// Every combination of `options`.
///
/// An array value contributes one option per element; any other value is a fixed option. Keys
/// holding an empty array are left out of every combination. Combinations are produced in key
/// order with the last key varying fastest.
///
/// ```
/// use serde_json::json;
/// use verdict::context::full_factorial_variants;
///
/// let options = json!({"color": ["red", "blue"], "size": [1, 2], "font": "serif"});
/// let variants = full_factorial_variants(options.as_object().unwrap()).unwrap();
/// assert_eq!(variants.len(), 4);
/// assert_eq!(variants[0], json!({"color": "red", "font": "serif", "size": 1}));
/// ```
pub fn full_factorial_variants(options: &Map<String, Value>) -> Result<Vec<Value>> {
    if options.is_empty() {
        return Err(Error::invalid("variant options must be non-empty"));
    }
    let mut combos: Vec<Map<String, Value>> = vec![Map::new()];
    for (key, value) in options {
        let choices: Vec<&Value> = match value {
            Value::Array(items) if items.is_empty() => continue,
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        combos = combos
            .into_iter()
            .flat_map(|base| {
                choices.iter().map(move |&choice| {
                    let mut next = base.clone();
                    next.insert(key.clone(), choice.clone());
                    next
                })
            })
            .collect();
    }
    Ok(combos.into_iter().map(Value::Object).collect())
}
