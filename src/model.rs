//! Decision models.
//!
//! A [`DecisionModel`] is the named unit callers decide with. It owns:
//! - an optional loaded [`Scorer`] (metadata + encoder + evaluator),
//! - a seedable, non-cryptographic RNG for tie-breaks, unloaded-model and random scores,
//! - the collaborators it was built with: a persistence gateway and a tracker.
//!
//! `choose` runs the whole decision path: score, select, mint an id, persist it, track it.
//! Persistence and tracking failures are logged and never fail the decision. Tracking is queued
//! for the tracker's delivery thread, so `choose` never waits on the network.
//!
//! Variants of `choose`:
//! - `choose_first`: no scoring, the first variant wins.
//! - `choose_random`: unsorted Gaussian scores, so every variant is equally likely.
//! - `choose_with_scores`: caller-supplied scores.
//! - `which` / `optimize`: return just the winning variant; `optimize` picks among the full
//!   factorial combinations of an options object.
//!
//! Every call's context passes through the [`GivensProvider`] installed in [`ModelServices`].

use parking_lot::{Mutex, RwLock};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::context::{full_factorial_variants, DecisionContext};
use crate::givens::GivensProvider;
use crate::ksuid::{is_valid_id, KsuidGenerator};
use crate::metadata::{can_parse_model, ModelMetadata};
use crate::persist::PersistenceGateway;
use crate::scoring::{descending_gaussians, gaussians, ModelBuilder, ModelFetcher, Scorer};
use crate::select::{rank, select_best_index};
use crate::track::{DecisionTracker, DeliveryStats, TrackerConfig, Transport};
use crate::{Error, Result};

/// Longest accepted model name.
pub const MAX_MODEL_NAME_LEN: usize = 64;

/// Whether `name` is a valid model name for tracking.
///
/// 1 to 64 ASCII characters; the first alphanumeric, the rest alphanumeric or `_`, `-`, `.`.
#[must_use]
pub fn is_valid_model_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    name.len() <= MAX_MODEL_NAME_LEN
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Per-model configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionModelConfig {
    /// Tracking endpoint. `None` disables tracking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_url: Option<String>,
    /// Sent as `x-api-key` with every tracking body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_api_key: Option<String>,
    /// Seed for the tie-break RNG. `None` seeds from the thread RNG.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tie_break_seed: Option<u64>,
    /// When set, models whose major version differs are refused at load time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdk_version: Option<String>,
}

impl DecisionModelConfig {
    pub fn with_track_url(mut self, url: impl Into<String>) -> Self {
        self.track_url = Some(url.into());
        self
    }

    pub fn with_track_api_key(mut self, key: impl Into<String>) -> Self {
        self.track_api_key = Some(key.into());
        self
    }

    pub fn with_tie_break_seed(mut self, seed: u64) -> Self {
        self.tie_break_seed = Some(seed);
        self
    }

    pub fn with_sdk_version(mut self, version: impl Into<String>) -> Self {
        self.sdk_version = Some(version.into());
        self
    }
}

/// Configuration plus collaborators handed to every model a registry creates.
#[derive(Clone, Default)]
pub struct ModelServices {
    pub config: DecisionModelConfig,
    pub persistence: Option<Arc<dyn PersistenceGateway>>,
    pub transport: Option<Arc<dyn Transport>>,
    pub givens: Option<Arc<dyn GivensProvider>>,
}

impl std::fmt::Debug for ModelServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelServices")
            .field("config", &self.config)
            .field("persistence", &self.persistence.is_some())
            .field("transport", &self.transport.is_some())
            .field("givens", &self.givens.is_some())
            .finish()
    }
}

impl ModelServices {
    pub fn with_config(mut self, config: DecisionModelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn PersistenceGateway>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_givens_provider(mut self, givens: Arc<dyn GivensProvider>) -> Self {
        self.givens = Some(givens);
        self
    }
}

/// Result of one [`DecisionModel::choose`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision<'a, V> {
    /// The chosen variant.
    pub variant: &'a V,
    /// Position of the chosen variant in the input.
    pub index: usize,
    pub model_name: String,
    /// Freshly minted id; rewards are attributed through it.
    pub id: String,
}

/// A named decision model.
pub struct DecisionModel {
    name: String,
    config: DecisionModelConfig,
    scorer: RwLock<Option<Arc<Scorer>>>,
    rng: Mutex<SmallRng>,
    ids: KsuidGenerator,
    persistence: Option<Arc<dyn PersistenceGateway>>,
    tracker: Option<DecisionTracker>,
    givens: Option<Arc<dyn GivensProvider>>,
}

impl std::fmt::Debug for DecisionModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionModel")
            .field("name", &self.name)
            .field("loaded", &self.is_loaded())
            .field("tracking", &self.tracker.is_some())
            .finish()
    }
}

impl DecisionModel {
    /// A model with default configuration and no collaborators.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_services(name, &ModelServices::default())
    }

    pub fn with_services(name: impl Into<String>, services: &ModelServices) -> Self {
        let name = name.into();
        let config = services.config.clone();
        let rng = match config.tie_break_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_rng(&mut rand::rng()),
        };
        let tracker = build_tracker(&name, &config, services.transport.as_ref());
        Self {
            name,
            config,
            scorer: RwLock::new(None),
            rng: Mutex::new(rng),
            ids: KsuidGenerator::new(),
            persistence: services.persistence.clone(),
            tracker,
            givens: services.givens.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &DecisionModelConfig {
        &self.config
    }

    pub fn is_loaded(&self) -> bool {
        self.scorer.read().is_some()
    }

    pub fn is_tracking(&self) -> bool {
        self.tracker.is_some()
    }

    /// Delivery counters of the tracker, if tracking is enabled.
    pub fn tracking_stats(&self) -> Option<DeliveryStats> {
        self.tracker.as_ref().map(DecisionTracker::stats)
    }

    /// Wait until every tracking body queued so far has been handed to the transport.
    pub fn flush_tracking(&self) -> Result<()> {
        match self.tracker {
            Some(ref t) => t.flush(),
            None => Ok(()),
        }
    }

    /// Bind `givens` to every call made through the returned context.
    pub fn given<'m>(&'m self, givens: &'m Value) -> DecisionContext<'m> {
        DecisionContext::new(self, Some(givens))
    }

    /// Metadata of the loaded model, if any.
    pub fn metadata(&self) -> Option<ModelMetadata> {
        self.scorer.read().as_ref().map(|s| s.metadata().clone())
    }

    /// Install a loaded model, replacing any previous one.
    ///
    /// Fails if `sdk_version` is configured and the model's major version differs. A model name
    /// that differs from this model's name is logged and otherwise ignored.
    pub fn set_scorer(&self, scorer: Scorer) -> Result<()> {
        let schema = scorer.schema();
        if let Some(ref sdk) = self.config.sdk_version {
            if !can_parse_model(&schema.model_version, sdk) {
                return Err(Error::malformed(format!(
                    "model version {} is incompatible with sdk version {sdk}",
                    schema.model_version
                )));
            }
        }
        if schema.model_name != self.name {
            warn!(
                model = %self.name,
                loaded = %schema.model_name,
                "model names don't match; keeping registry name"
            );
        }
        debug!(
            model = %self.name,
            version = %schema.model_version,
            features = schema.feature_names.len(),
            "model loaded"
        );
        *self.scorer.write() = Some(Arc::new(scorer));
        Ok(())
    }

    /// Drop the loaded model; later decisions use unloaded scoring.
    pub fn unload(&self) {
        *self.scorer.write() = None;
    }

    /// Load from a raw blob: metadata block followed by model bytes.
    pub fn load(&self, blob: &[u8], builder: &dyn ModelBuilder) -> Result<()> {
        let (metadata, used) = ModelMetadata::parse(blob)?;
        let (encoder, evaluator) = builder.build(&metadata, &blob[used..])?;
        self.set_scorer(Scorer::new(metadata, encoder, evaluator)?)
    }

    /// Fetch a blob by URL and [`load`](Self::load) it.
    pub fn load_url(
        &self,
        url: &str,
        fetcher: &dyn ModelFetcher,
        builder: &dyn ModelBuilder,
    ) -> Result<()> {
        let blob = fetcher.fetch(url)?;
        debug!(model = %self.name, url, bytes = blob.len(), "model fetched");
        self.load(&blob, builder)
    }

    /// Score `variants` with the loaded model, or descending Gaussian noise when unloaded.
    pub fn score<V: Serialize>(&self, variants: &[V], context: Option<&Value>) -> Result<Vec<f64>> {
        let values = to_values(variants)?;
        let givens = self.all_givens(context);
        self.score_values(&values, givens.as_ref())
    }

    /// Score, select, mint an id, persist it and track the decision.
    pub fn choose<'a, V: Serialize>(
        &self,
        variants: &'a [V],
        context: Option<&Value>,
    ) -> Result<Decision<'a, V>> {
        let values = to_values(variants)?;
        let givens = self.all_givens(context);
        let scores = self.score_values(&values, givens.as_ref())?;
        let index = self.select(&scores)?;
        self.decide(variants, &values, index, givens.as_ref())
    }

    /// Like [`choose`](Self::choose) with caller-supplied scores.
    pub fn choose_with_scores<'a, V: Serialize>(
        &self,
        variants: &'a [V],
        scores: &[f64],
        context: Option<&Value>,
    ) -> Result<Decision<'a, V>> {
        if variants.len() != scores.len() {
            return Err(Error::invalid(format!(
                "variants ({}) and scores ({}) must have equal length",
                variants.len(),
                scores.len()
            )));
        }
        let values = to_values(variants)?;
        let index = self.select(scores)?;
        let givens = self.all_givens(context);
        self.decide(variants, &values, index, givens.as_ref())
    }

    /// Decide for the first variant without scoring. Still persisted and tracked.
    pub fn choose_first<'a, V: Serialize>(
        &self,
        variants: &'a [V],
        context: Option<&Value>,
    ) -> Result<Decision<'a, V>> {
        let values = non_empty(to_values(variants)?)?;
        let givens = self.all_givens(context);
        self.decide(variants, &values, 0, givens.as_ref())
    }

    /// Decide for a uniformly random variant. Still persisted and tracked.
    pub fn choose_random<'a, V: Serialize>(
        &self,
        variants: &'a [V],
        context: Option<&Value>,
    ) -> Result<Decision<'a, V>> {
        let values = non_empty(to_values(variants)?)?;
        let scores = gaussians(values.len(), &mut *self.rng.lock());
        let index = self.select(&scores)?;
        let givens = self.all_givens(context);
        self.decide(variants, &values, index, givens.as_ref())
    }

    /// Score `variants` and order them best first. Nothing is persisted or tracked.
    pub fn rank<'a, V: Serialize>(
        &self,
        variants: &'a [V],
        context: Option<&Value>,
    ) -> Result<Vec<&'a V>> {
        let scores = self.score(variants, context)?;
        rank(variants, &scores)
    }

    /// [`choose`](Self::choose), returning only the winning variant.
    pub fn which<'a, V: Serialize>(
        &self,
        variants: &'a [V],
        context: Option<&Value>,
    ) -> Result<&'a V> {
        Ok(self.choose(variants, context)?.variant)
    }

    /// Choose among every combination of `options` (see [`full_factorial_variants`]).
    pub fn optimize(&self, options: &Map<String, Value>, context: Option<&Value>) -> Result<Value> {
        let variants = full_factorial_variants(options)?;
        Ok(self.choose(&variants, context)?.variant.clone())
    }

    /// Attribute `reward` to the last decision persisted for this model name.
    ///
    /// Ignored (with a warning) when no decision was persisted yet. Storage and transport
    /// failures are logged and absorbed.
    pub fn add_reward(&self, reward: f64) -> Result<()> {
        if !reward.is_finite() {
            return Err(Error::invalid("reward must not be NaN or infinite"));
        }
        let Some(ref persistence) = self.persistence else {
            return Err(Error::invalid("add_reward requires a persistence gateway"));
        };
        if self.tracker.is_none() {
            return Err(Error::invalid("add_reward requires a track_url and transport"));
        }
        let last = match persistence.last_decision_id(&self.name) {
            Ok(id) => id,
            Err(e) => {
                warn!(model = %self.name, error = %e, "reading last decision id failed");
                return Ok(());
            }
        };
        if last.is_empty() {
            warn!(model = %self.name, "no previous decision; reward ignored");
            return Ok(());
        }
        self.add_reward_for_decision(&last, reward)
    }

    /// Attribute `reward` to a specific decision id.
    pub fn add_reward_for_decision(&self, decision_id: &str, reward: f64) -> Result<()> {
        if !reward.is_finite() {
            return Err(Error::invalid("reward must not be NaN or infinite"));
        }
        if !is_valid_id(decision_id) {
            return Err(Error::invalid(format!("invalid decision id: [{decision_id}]")));
        }
        let Some(ref tracker) = self.tracker else {
            return Err(Error::invalid("add_reward requires a track_url and transport"));
        };
        match tracker.add_reward(&self.name, decision_id, reward) {
            Err(e) if e.is_collaborator() => {
                warn!(model = %self.name, error = %e, "reward not delivered");
                Ok(())
            }
            other => other,
        }
    }

    fn all_givens(&self, context: Option<&Value>) -> Option<Value> {
        match self.givens {
            Some(ref p) => p.givens_for_model(&self.name, context),
            None => context.cloned(),
        }
    }

    fn score_values(&self, values: &[Value], givens: Option<&Value>) -> Result<Vec<f64>> {
        if values.is_empty() {
            return Err(Error::invalid("variants must be non-empty"));
        }
        let scorer = self.scorer.read().clone();
        match scorer {
            Some(s) => s.score(values, givens),
            None => Ok(descending_gaussians(values.len(), &mut *self.rng.lock())),
        }
    }

    fn select(&self, scores: &[f64]) -> Result<usize> {
        select_best_index(scores, &mut *self.rng.lock())
            .ok_or_else(|| Error::invalid("variants must be non-empty"))
    }

    fn decide<'a, V>(
        &self,
        variants: &'a [V],
        values: &[Value],
        index: usize,
        givens: Option<&Value>,
    ) -> Result<Decision<'a, V>> {
        let id = self.ids.next()?;
        self.record(&id, values, index, givens);
        debug!(model = %self.name, index, count = variants.len(), id = %id, "decision made");
        Ok(Decision {
            variant: &variants[index],
            index,
            model_name: self.name.clone(),
            id,
        })
    }

    // Best-effort side effects of a decision.
    fn record(&self, id: &str, values: &[Value], index: usize, context: Option<&Value>) {
        if let Some(ref p) = self.persistence {
            if let Err(e) = p.persist_last_decision_id(&self.name, id) {
                warn!(model = %self.name, error = %e, "persisting decision id failed");
            }
        }
        if let Some(ref t) = self.tracker {
            if let Err(e) = t.track_decision(&self.name, id, values, index, context) {
                warn!(model = %self.name, error = %e, "tracking decision failed");
            }
        }
    }
}

fn to_values<V: Serialize>(variants: &[V]) -> Result<Vec<Value>> {
    variants
        .iter()
        .map(|v| serde_json::to_value(v).map_err(Error::from))
        .collect()
}

fn non_empty(values: Vec<Value>) -> Result<Vec<Value>> {
    if values.is_empty() {
        return Err(Error::invalid("variants must be non-empty"));
    }
    Ok(values)
}

fn build_tracker(
    name: &str,
    config: &DecisionModelConfig,
    transport: Option<&Arc<dyn Transport>>,
) -> Option<DecisionTracker> {
    let url = config.track_url.as_ref()?;
    let Some(transport) = transport else {
        debug!(model = %name, "track_url set without a transport; tracking disabled");
        return None;
    };
    let mut cfg = TrackerConfig::new(url.clone());
    cfg.api_key = config.track_api_key.clone();
    match DecisionTracker::new(cfg, transport.clone()) {
        Ok(t) => Some(t),
        Err(e) => {
            warn!(model = %name, error = %e, "tracking disabled");
            None
        }
    }
}
