//! `verdict`: client-side decision engine for contextual bandits.
//!
//! Given a set of candidate options ("variants") and optional context, a [`DecisionModel`]
//! scores each variant, picks the best one, and mints a time-sortable decision id so a reward
//! arriving later can be attributed to the decision.
//!
//! **Pieces:**
//! - [`ModelRegistry`]: name-keyed store of models with get-or-create and explicit removal.
//! - [`ModelMetadata`]: parser for the length-prefixed metadata block at the head of a model
//!   artifact, promoting the reserved `user_defined_metadata` JSON into a typed [`ModelSchema`].
//! - [`select_best`] / [`rank`]: single-pass selection with uniform reservoir tie-breaking.
//! - [`KsuidGenerator`]: 27-character base-62 ids, lexicographically ordered by second.
//! - [`DecisionContext`] / [`GivensProvider`]: per-call and app-wide context for scoring and
//!   tracking.
//! - [`PersistenceGateway`] / [`Transport`] / [`FeatureEncoder`] / [`Evaluator`]: host
//!   capabilities. The crate does no I/O of its own.
//!
//! **Decision path** (`DecisionModel::choose`):
//!
//! ```text
//! variants (+ context) -> encoder -> evaluator -> scores -> select_best -> id
//!                                                                -> persist id
//!                                                                -> track decision
//! ```
//!
//! Notes:
//! - Persistence and tracking failures are logged (`tracing`) and never fail a decision.
//! - Tracking bodies are delivered on a background thread; `choose` never waits on the network.
//! - An unloaded model scores with descending Gaussian noise, so it returns the first variant.
//! - NaN scores never win or tie. If every score is NaN the first variant is returned.
//! - Tie-breaks use a seedable non-cryptographic RNG; ids use the OS entropy source.
//!
//! ```
//! use verdict::ModelRegistry;
//!
//! let registry = ModelRegistry::new();
//! let model = registry.get("greetings");
//! let decision = model.choose(&["hi", "hello"], None).unwrap();
//! assert_eq!(*decision.variant, "hi");
//! assert_eq!(decision.id.len(), 27);
//! ```

#![forbid(unsafe_code)]

mod error;
pub use error::{Error, Result};

pub mod ksuid;
pub use ksuid::{is_valid_id, KsuidGenerator};

pub mod metadata;
pub use metadata::{can_parse_model, ModelMetadata, ModelSchema};

pub mod select;
pub use select::{rank, select_best, select_best_index};

pub mod persist;
pub use persist::{MemoryStore, PersistenceGateway};

pub mod track;
pub use track::{DecisionTracker, DeliveryStats, TrackerConfig, Transport};

pub mod givens;
pub use givens::{GivensProvider, StaticGivens};

pub mod scoring;
pub use scoring::{Evaluator, FeatureEncoder, FeatureVector, ModelBuilder, ModelFetcher, Scorer};

pub mod model;
pub use model::{is_valid_model_name, Decision, DecisionModel, DecisionModelConfig, ModelServices};

pub mod context;
pub use context::{full_factorial_variants, DecisionContext};

pub mod registry;
pub use registry::ModelRegistry;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
