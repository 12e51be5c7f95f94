//! Scoring capabilities.
//!
//! The feature encoder and the evaluator (e.g. a gradient-boosted tree predictor) are external
//! collaborators. This module fixes their numeric contract and bundles a loaded pair with the
//! metadata that configured it:
//!
//! - [`FeatureEncoder`]: JSON variants + optional context -> one feature vector per variant, in
//!   `ModelSchema::feature_names` column order.
//! - [`Evaluator`]: feature vectors -> one score per vector, same length and order.
//! - [`ModelBuilder`]: turns a parsed metadata block plus the model bytes that follow it into an
//!   encoder/evaluator pair.
//! - [`ModelFetcher`]: fetches a raw metadata+model blob by URL.

use rand::Rng;
use rand_distr::StandardNormal;
use serde_json::Value;

use crate::metadata::{ModelMetadata, ModelSchema, USER_DEFINED_METADATA};
use crate::{Error, Result};

/// One encoded row.
pub type FeatureVector = Vec<f64>;

pub trait FeatureEncoder: Send + Sync {
    fn encode(
        &self,
        schema: &ModelSchema,
        variants: &[Value],
        context: Option<&Value>,
    ) -> Result<Vec<FeatureVector>>;
}

pub trait Evaluator: Send + Sync {
    /// Deterministic given deterministic input and the schema seed.
    fn evaluate(&self, features: &[FeatureVector]) -> Result<Vec<f64>>;
}

pub trait ModelBuilder: Send + Sync {
    fn build(
        &self,
        metadata: &ModelMetadata,
        model_bytes: &[u8],
    ) -> Result<(Box<dyn FeatureEncoder>, Box<dyn Evaluator>)>;
}

pub trait ModelFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// A loaded model: metadata with a schema, plus its encoder and evaluator.
pub struct Scorer {
    schema: ModelSchema,
    metadata: ModelMetadata,
    encoder: Box<dyn FeatureEncoder>,
    evaluator: Box<dyn Evaluator>,
}

impl std::fmt::Debug for Scorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scorer")
            .field("model_name", &self.schema.model_name)
            .field("model_version", &self.schema.model_version)
            .finish_non_exhaustive()
    }
}

impl Scorer {
    /// Bundle a loaded model. The metadata must carry a schema.
    pub fn new(
        metadata: ModelMetadata,
        encoder: Box<dyn FeatureEncoder>,
        evaluator: Box<dyn Evaluator>,
    ) -> Result<Self> {
        let schema = metadata
            .schema()
            .cloned()
            .ok_or(Error::MissingField(USER_DEFINED_METADATA))?;
        Ok(Self {
            schema,
            metadata,
            encoder,
            evaluator,
        })
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    pub fn schema(&self) -> &ModelSchema {
        &self.schema
    }

    /// Score `variants`, enforcing one score per variant.
    pub fn score(&self, variants: &[Value], context: Option<&Value>) -> Result<Vec<f64>> {
        let features = self.encoder.encode(&self.schema, variants, context)?;
        if features.len() != variants.len() {
            return Err(Error::scoring(format!(
                "encoder returned {} rows for {} variants",
                features.len(),
                variants.len()
            )));
        }
        let scores = self.evaluator.evaluate(&features)?;
        if scores.len() != variants.len() {
            return Err(Error::scoring(format!(
                "evaluator returned {} scores for {} variants",
                scores.len(),
                variants.len()
            )));
        }
        Ok(scores)
    }
}

/// `n` independent standard-normal draws.
pub fn gaussians<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Vec<f64> {
    (0..n).map(|_| rng.sample(StandardNormal)).collect()
}

/// `n` standard-normal draws sorted from highest to lowest.
///
/// Used as scores when no model is loaded: the first variant wins and the rest keep their
/// order, while the score vector stays well-formed for logging and ranking.
pub fn descending_gaussians<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Vec<f64> {
    let mut scores = gaussians(n, rng);
    scores.sort_by(|a, b| b.total_cmp(a));
    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::encode_attributes;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    struct Rows(usize);
    impl FeatureEncoder for Rows {
        fn encode(
            &self,
            schema: &ModelSchema,
            variants: &[Value],
            _context: Option<&Value>,
        ) -> Result<Vec<FeatureVector>> {
            Ok((0..self.0.min(variants.len()))
                .map(|i| vec![i as f64; schema.feature_names.len()])
                .collect())
        }
    }

    struct FirstColumn;
    impl Evaluator for FirstColumn {
        fn evaluate(&self, features: &[FeatureVector]) -> Result<Vec<f64>> {
            Ok(features.iter().map(|f| f.first().copied().unwrap_or(0.0)).collect())
        }
    }

    fn metadata() -> ModelMetadata {
        let udm = r#"{"json":{"model_name":"m","version":"1.0","model_seed":1,"feature_names":["a","b"]}}"#;
        ModelMetadata::parse(&encode_attributes([(USER_DEFINED_METADATA, udm)]))
            .unwrap()
            .0
    }

    #[test]
    fn scorer_requires_schema() {
        let (bare, _) = ModelMetadata::parse(&encode_attributes([("k", "v")])).unwrap();
        let err = Scorer::new(bare, Box::new(Rows(9)), Box::new(FirstColumn)).unwrap_err();
        assert!(err.is_malformed_data());
    }

    #[test]
    fn scorer_scores_each_variant() {
        let s = Scorer::new(metadata(), Box::new(Rows(9)), Box::new(FirstColumn)).unwrap();
        let v = vec![Value::from(1), Value::from(2), Value::from(3)];
        assert_eq!(s.score(&v, None).unwrap(), vec![0.0, 1.0, 2.0]);
        assert_eq!(s.schema().feature_names.len(), 2);
    }

    #[test]
    fn short_encoder_output_is_a_scoring_error() {
        let s = Scorer::new(metadata(), Box::new(Rows(1)), Box::new(FirstColumn)).unwrap();
        let v = vec![Value::from(1), Value::from(2)];
        assert!(matches!(s.score(&v, None), Err(Error::Scoring(_))));
    }

    #[test]
    fn gaussians_are_descending() {
        let mut rng = SmallRng::seed_from_u64(0);
        let g = descending_gaussians(50, &mut rng);
        assert_eq!(g.len(), 50);
        assert!(g.windows(2).all(|w| w[0] >= w[1]));
        assert!(descending_gaussians(0, &mut rng).is_empty());
    }
}
