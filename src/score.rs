//! Confidence scoring.
//!
//! Two pure functions implement the scoring model. [`score_match`] damps an
//! attribute's base confidence toward 0.5 by the quality of the matcher and
//! field that produced the match. [`score_composite`] conflates per-attribute
//! scores into one hit-level confidence. Both are deterministic, so a
//! [`ScoreCache`] memoizes match scores per (attribute, matcher, collection,
//! field) for the lifetime of a job.

use std::collections::HashMap;

/// Damps `score` toward 0.5 by one quality factor in [0.0, 1.0].
///
/// Quality 1.0 leaves the score unchanged; quality 0.0 collapses it to 0.5
/// (an uninformative match). The expression is kept in this exact form so
/// results are bit-identical across releases.
fn damp(score: f64, quality: f64) -> f64 {
    ((score - 0.5) / (score - 0.0)) * ((score * quality) - score) + score
}

/// Scores one attribute match.
///
/// Returns `None` when the attribute declares no base confidence. Otherwise
/// applies the matcher quality and then the field quality, each only if
/// present. A NaN result, which arises only when `base` is exactly 0.0,
/// yields 0.0. Applying the two qualities in either order gives the same
/// result.
#[must_use]
pub fn score_match(
    base: Option<f64>,
    matcher_quality: Option<f64>,
    field_quality: Option<f64>,
) -> Option<f64> {
    let mut score = base?;
    if let Some(quality) = matcher_quality {
        score = damp(score, quality);
    }
    if let Some(quality) = field_quality {
        score = damp(score, quality);
    }
    if score.is_nan() {
        score = 0.0;
    }
    Some(score)
}

/// Conflates per-attribute scores into one composite confidence.
///
/// `None` entries are dropped. An empty input yields `None`. Otherwise the
/// result is `p / (p + q)` where `p` multiplies the scores and `q` multiplies
/// their complements. A NaN result, which arises when the input holds both an
/// exact 1.0 and an exact 0.0, yields 0.5. The result is invariant under
/// permutation of the input.
#[must_use]
pub fn score_composite<I>(scores: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let mut product = 1.0_f64;
    let mut product_inverse = 1.0_f64;
    let mut any = false;
    for score in scores.into_iter().flatten() {
        any = true;
        product *= score;
        product_inverse *= 1.0 - score;
    }
    if !any {
        return None;
    }
    let composite = product / (product + product_inverse);
    Some(if composite.is_nan() { 0.5 } else { composite })
}

/// Memo for match scores, write-once per key per job.
///
/// The score for a given (attribute, matcher, collection, field) is a pure
/// function of the model, so one job never needs to compute it twice.
#[derive(Debug, Default)]
pub struct ScoreCache {
    entries: HashMap<ScoreKey, Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ScoreKey {
    attribute: String,
    matcher: String,
    collection: String,
    field: String,
}

impl ScoreCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached score for the key, computing and storing it on
    /// first use.
    pub fn score_or_insert_with<F>(
        &mut self,
        attribute: &str,
        matcher: &str,
        collection: &str,
        field: &str,
        compute: F,
    ) -> Option<f64>
    where
        F: FnOnce() -> Option<f64>,
    {
        let key = ScoreKey {
            attribute: attribute.to_string(),
            matcher: matcher.to_string(),
            collection: collection.to_string(),
            field: field.to_string(),
        };
        *self.entries.entry(key).or_insert_with(compute)
    }

    /// Number of distinct keys scored so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing has been scored yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-12,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn no_base_score_contributes_nothing() {
        assert_eq!(score_match(None, Some(0.9), Some(0.9)), None);
    }

    #[test]
    fn perfect_qualities_are_identity() {
        for base in [0.0, 0.1, 0.25, 0.5, 0.75, 0.9, 1.0] {
            let scored = score_match(Some(base), Some(1.0), Some(1.0)).unwrap();
            assert_close(scored, base);
        }
    }

    #[test]
    fn absent_qualities_are_identity() {
        assert_close(score_match(Some(0.8), None, None).unwrap(), 0.8);
    }

    #[test]
    fn zero_quality_collapses_to_midpoint() {
        for base in [0.1, 0.5, 0.75, 1.0] {
            for other in [0.0, 0.3, 1.0] {
                assert_close(score_match(Some(base), Some(other), Some(0.0)).unwrap(), 0.5);
                assert_close(score_match(Some(base), Some(0.0), Some(other)).unwrap(), 0.5);
            }
        }
    }

    #[test]
    fn zero_base_scores_zero() {
        assert_close(score_match(Some(0.0), Some(0.9), None).unwrap(), 0.0);
        assert_close(score_match(Some(0.0), Some(0.9), Some(0.0)).unwrap(), 0.0);
    }

    #[test]
    fn quality_order_does_not_matter() {
        for base in [0.2, 0.6, 0.95] {
            let ab = score_match(Some(base), Some(0.7), Some(0.9)).unwrap();
            let ba = score_match(Some(base), Some(0.9), Some(0.7)).unwrap();
            assert_close(ab, ba);
        }
    }

    #[test]
    fn damping_moves_toward_midpoint() {
        let scored = score_match(Some(0.9), Some(0.8), None).unwrap();
        assert!(scored < 0.9);
        assert!(scored > 0.5);

        let scored = score_match(Some(0.2), Some(0.8), None).unwrap();
        assert!(scored > 0.2);
        assert!(scored < 0.5);
    }

    #[test]
    fn composite_of_nothing_is_none() {
        assert_eq!(score_composite(Vec::new()), None);
        assert_eq!(score_composite(vec![None, None]), None);
    }

    #[test]
    fn composite_of_one_is_that_score() {
        assert_close(score_composite(vec![Some(0.7)]).unwrap(), 0.7);
    }

    #[test]
    fn certainty_dominates_composite() {
        for x in [0.1, 0.5, 0.99, 1.0] {
            assert_close(score_composite(vec![Some(1.0), Some(x)]).unwrap(), 1.0);
        }
        for x in [0.1, 0.5, 0.99] {
            assert_close(score_composite(vec![Some(0.0), Some(x)]).unwrap(), 0.0);
        }
    }

    #[test]
    fn contradictory_certainty_composes_to_midpoint() {
        assert_close(
            score_composite(vec![Some(1.0), Some(0.0), Some(0.7)]).unwrap(),
            0.5,
        );
    }

    #[test]
    fn composite_is_permutation_invariant() {
        let forward = score_composite(vec![Some(0.6), Some(0.8), None, Some(0.55)]).unwrap();
        let backward = score_composite(vec![Some(0.55), None, Some(0.8), Some(0.6)]).unwrap();
        assert_close(forward, backward);
    }

    #[test]
    fn two_agreeing_scores_reinforce() {
        let composite = score_composite(vec![Some(0.75), Some(0.75)]).unwrap();
        assert!(composite > 0.75);
        assert_close(composite, 0.9);
    }

    #[test]
    fn cache_computes_once_per_key() {
        let mut cache = ScoreCache::new();
        let mut calls = 0;
        for _ in 0..3 {
            let scored = cache.score_or_insert_with("name", "exact", "people", "full_name", || {
                calls += 1;
                score_match(Some(0.8), Some(0.9), None)
            });
            assert!(scored.is_some());
        }
        assert_eq!(calls, 1);
        assert_eq!(cache.len(), 1);

        cache.score_or_insert_with("name", "exact", "people", "other_field", || {
            calls += 1;
            None
        });
        assert_eq!(calls, 2);
        assert_eq!(cache.len(), 2);
    }
}
