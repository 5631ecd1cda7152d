//! Nearest-neighbour matching of a probe embedding against registered faces.

use crate::types::{Embedding, UserId};

/// Outcome of identifying a probe against the registered gallery.
///
/// `NotMatched` and `NoCandidates` are ordinary negative answers, not errors.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched {
        user_id: UserId,
        confidence: f64,
        distance: f64,
    },
    NotMatched {
        confidence: f64,
        distance: f64,
        threshold: f64,
    },
    NoCandidates,
}

/// `(1 - distance) * 100`. Deliberately unclamped: distances above 1.0 give
/// negative confidence and clients see the raw value.
pub fn confidence_from_distance(distance: f64) -> f64 {
    (1.0 - distance) * 100.0
}

/// Strategy for comparing a probe embedding against a gallery of registered faces.
pub trait Matcher: Send + Sync {
    fn identify(
        &self,
        probe: &Embedding,
        candidates: &[(UserId, Embedding)],
        threshold: f64,
    ) -> MatchOutcome;
}

/// Brute-force Euclidean matcher.
///
/// Scans every candidate; the first candidate at the minimum distance wins, so
/// the result is stable for a fixed candidate order. Candidates whose
/// dimension differs from the probe are skipped.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn identify(
        &self,
        probe: &Embedding,
        candidates: &[(UserId, Embedding)],
        threshold: f64,
    ) -> MatchOutcome {
        let mut best: Option<(usize, f64)> = None;

        for (i, (user_id, embedding)) in candidates.iter().enumerate() {
            if embedding.dim() != probe.dim() {
                tracing::warn!(
                    %user_id,
                    expected = probe.dim(),
                    actual = embedding.dim(),
                    "skipping candidate with mismatched embedding dimension"
                );
                continue;
            }

            let distance = probe.euclidean_distance(embedding);
            if distance.is_nan() {
                continue;
            }
            match best {
                Some((_, best_distance)) if distance >= best_distance => {}
                _ => best = Some((i, distance)),
            }
        }

        let Some((idx, distance)) = best else {
            return MatchOutcome::NoCandidates;
        };
        let confidence = confidence_from_distance(distance);

        if distance <= threshold {
            MatchOutcome::Matched {
                user_id: candidates[idx].0.clone(),
                confidence,
                distance,
            }
        } else {
            MatchOutcome::NotMatched {
                confidence,
                distance,
                threshold,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: i64, values: &[f32]) -> (UserId, Embedding) {
        (UserId::Number(id), Embedding::new(values.to_vec()))
    }

    #[test]
    fn test_identify_scans_whole_gallery() {
        // Best match is the last entry.
        let probe = Embedding::new(vec![1.0, 0.0, 0.0]);
        let gallery = vec![
            candidate(1, &[0.0, 1.0, 0.0]),
            candidate(2, &[0.0, 0.0, 1.0]),
            candidate(3, &[0.9, 0.0, 0.0]),
        ];

        match EuclideanMatcher.identify(&probe, &gallery, 0.5) {
            MatchOutcome::Matched { user_id, confidence, distance } => {
                assert_eq!(user_id, UserId::Number(3));
                assert!((distance - 0.1).abs() < 1e-6);
                assert!((confidence - 90.0).abs() < 1e-4);
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn test_identify_threshold_is_inclusive() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        let gallery = vec![candidate(1, &[0.5, 0.0])];
        assert!(matches!(
            EuclideanMatcher.identify(&probe, &gallery, 0.5),
            MatchOutcome::Matched { .. }
        ));
    }

    #[test]
    fn test_identify_not_matched_carries_diagnostics() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        let gallery = vec![candidate(1, &[0.0, 1.0])];

        assert_eq!(
            EuclideanMatcher.identify(&probe, &gallery, 0.5),
            MatchOutcome::NotMatched {
                confidence: 0.0,
                distance: 1.0,
                threshold: 0.5,
            }
        );
    }

    #[test]
    fn test_identify_confidence_unclamped() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        let gallery = vec![candidate(1, &[3.0, 4.0])];

        match EuclideanMatcher.identify(&probe, &gallery, 0.5) {
            MatchOutcome::NotMatched { confidence, .. } => assert!((confidence + 400.0).abs() < 1e-9),
            other => panic!("expected no match, got {other:?}"),
        }
    }

    #[test]
    fn test_identify_empty_gallery() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(EuclideanMatcher.identify(&probe, &[], 0.5), MatchOutcome::NoCandidates);
    }

    #[test]
    fn test_identify_ties_keep_first() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        let gallery = vec![
            candidate(7, &[0.1, 0.0]),
            candidate(8, &[0.0, 0.1]),
        ];

        for _ in 0..3 {
            match EuclideanMatcher.identify(&probe, &gallery, 0.5) {
                MatchOutcome::Matched { user_id, .. } => assert_eq!(user_id, UserId::Number(7)),
                other => panic!("expected match, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_identify_skips_dimension_mismatch() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        let only_mismatched = vec![candidate(1, &[0.0, 0.0, 0.0])];
        assert_eq!(
            EuclideanMatcher.identify(&probe, &only_mismatched, 0.5),
            MatchOutcome::NoCandidates
        );

        let mixed = vec![candidate(1, &[0.0, 0.0, 0.0]), candidate(2, &[0.2, 0.0])];
        match EuclideanMatcher.identify(&probe, &mixed, 0.5) {
            MatchOutcome::Matched { user_id, .. } => assert_eq!(user_id, UserId::Number(2)),
            other => panic!("expected match, got {other:?}"),
        }
    }
}
