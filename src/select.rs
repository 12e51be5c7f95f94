//! Score-based selection.
//!
//! [`select_best`] picks the highest-scoring variant in one pass. Exact ties at the running
//! maximum are broken by reservoir sampling: the `n`-th tied variant replaces the incumbent with
//! probability `1 / n`, so every variant sharing the maximum is returned with equal probability
//! regardless of input order, using O(1) extra state.
//!
//! Notes:
//! - Scores are compared with plain `f64` equality; there is no epsilon.
//! - NaN scores are disqualifying: they never win and never tie. If every score is NaN the first
//!   variant is returned as a numerical fallback.
//! - The random source is caller-supplied and only consulted on ties (one draw per tie).

use rand::Rng;

use crate::{Error, Result};

/// Select the best-scoring variant.
///
/// `variants` and `scores` must be positionally aligned, of equal and non-zero length; otherwise
/// an [`Error::InvalidArgument`] is returned and no random draw is consumed.
pub fn select_best<'a, V, R>(variants: &'a [V], scores: &[f64], rng: &mut R) -> Result<&'a V>
where
    R: Rng + ?Sized,
{
    check_aligned(variants.len(), scores.len())?;
    Ok(&variants[best_index(scores, rng)])
}

/// Index form of [`select_best`] for callers that keep variants elsewhere.
///
/// Returns `None` only if `scores` is empty.
pub fn select_best_index<R>(scores: &[f64], rng: &mut R) -> Option<usize>
where
    R: Rng + ?Sized,
{
    if scores.is_empty() {
        return None;
    }
    Some(best_index(scores, rng))
}

/// Rank variants from best to worst score.
///
/// The sort is stable (equal scores keep input order) and NaN scores sink to the end.
pub fn rank<'a, V>(variants: &'a [V], scores: &[f64]) -> Result<Vec<&'a V>> {
    check_aligned(variants.len(), scores.len())?;
    let mut order: Vec<usize> = (0..variants.len()).collect();
    order.sort_by(|&a, &b| {
        let (x, y) = (scores[a], scores[b]);
        x.is_nan()
            .cmp(&y.is_nan())
            .then_with(|| y.total_cmp(&x))
    });
    Ok(order.into_iter().map(|i| &variants[i]).collect())
}

fn check_aligned(n_variants: usize, n_scores: usize) -> Result<()> {
    if n_variants == 0 {
        return Err(Error::invalid("variants must be non-empty"));
    }
    if n_variants != n_scores {
        return Err(Error::invalid(format!(
            "variants ({n_variants}) and scores ({n_scores}) must have equal length"
        )));
    }
    Ok(())
}

fn best_index<R>(scores: &[f64], rng: &mut R) -> usize
where
    R: Rng + ?Sized,
{
    let mut best: Option<(usize, f64)> = None;
    let mut replacement_count: u64 = 0;
    for (i, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, best_score)) if score < best_score => {}
            Some((_, best_score)) if score == best_score => {
                let p = 1.0 / (2.0 + replacement_count as f64);
                if rng.random::<f64>() < p {
                    best = Some((i, score));
                }
                replacement_count += 1;
            }
            _ => {
                best = Some((i, score));
                replacement_count = 0;
            }
        }
    }
    best.map(|(i, _)| i).unwrap_or(0)
}
