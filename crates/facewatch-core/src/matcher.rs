//! Nearest-neighbour matching of a probe descriptor against the gallery.

use crate::types::{Descriptor, IdentityRecord, MatchResult};
use thiserror::Error;

/// Default maximum Euclidean distance for a positive match (raw embedding units).
pub const DEFAULT_THRESHOLD: f32 = 20.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("descriptor dimension mismatch for {identifier}: probe has {probe}, stored has {stored}")]
    DimensionMismatch {
        identifier: String,
        probe: usize,
        stored: usize,
    },
}

/// Strategy for comparing a probe descriptor against a gallery of enrolled identities.
pub trait Matcher {
    fn best_match(
        &self,
        probe: &Descriptor,
        gallery: &[IdentityRecord],
        threshold: f32,
    ) -> Result<MatchResult, MatchError>;
}

/// Euclidean-distance matcher.
///
/// Scans the whole gallery and reduces to the global minimum distance
/// before testing the threshold, so the result never depends on gallery
/// order. Ties go to the lexicographically smallest identifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn best_match(
        &self,
        probe: &Descriptor,
        gallery: &[IdentityRecord],
        threshold: f32,
    ) -> Result<MatchResult, MatchError> {
        let mut best: Option<(f32, &IdentityRecord)> = None;

        for record in gallery {
            if record.descriptor.dim() != probe.dim() {
                return Err(MatchError::DimensionMismatch {
                    identifier: record.identifier.to_string(),
                    probe: probe.dim(),
                    stored: record.descriptor.dim(),
                });
            }

            let dist = probe.euclidean_distance(&record.descriptor);
            let is_better = match best {
                None => true,
                Some((best_dist, best_record)) => {
                    dist < best_dist
                        || (dist == best_dist && record.identifier < best_record.identifier)
                }
            };
            if is_better {
                best = Some((dist, record));
            }
        }

        Ok(match best {
            Some((dist, record)) if dist < threshold => MatchResult {
                matched: true,
                identifier: Some(record.identifier.clone()),
                distance: Some(dist),
            },
            Some((dist, _)) => MatchResult::unknown(Some(dist)),
            None => MatchResult::unknown(None),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::Identifier;

    fn record(id: &str, values: &[f32]) -> IdentityRecord {
        IdentityRecord {
            identifier: Identifier::parse(id).unwrap(),
            descriptor: Descriptor::new(values.to_vec()).unwrap(),
            updated_at: String::new(),
        }
    }

    fn probe(values: &[f32]) -> Descriptor {
        Descriptor::new(values.to_vec()).unwrap()
    }

    fn matched_id(result: &MatchResult) -> Option<&str> {
        result.identifier.as_ref().map(|id| id.as_str())
    }

    #[test]
    fn test_alice_bob_scenario() {
        let gallery = vec![
            record("alice", &[0.0, 0.0, 0.0]),
            record("bob", &[100.0, 100.0, 100.0]),
        ];

        let near_alice = EuclideanMatcher
            .best_match(&probe(&[1.0, 1.0, 1.0]), &gallery, 20.0)
            .unwrap();
        assert!(near_alice.matched);
        assert_eq!(matched_id(&near_alice), Some("alice"));
        assert!((near_alice.distance.unwrap() - 3f32.sqrt()).abs() < 1e-4);

        let near_bob = EuclideanMatcher
            .best_match(&probe(&[90.0, 90.0, 90.0]), &gallery, 20.0)
            .unwrap();
        assert_eq!(matched_id(&near_bob), Some("bob"));

        let between = EuclideanMatcher
            .best_match(&probe(&[50.0, 50.0, 50.0]), &gallery, 20.0)
            .unwrap();
        assert!(!between.matched);
        assert_eq!(between.identifier, None);
        assert!(between.distance.unwrap() > 20.0);
    }

    #[test]
    fn test_picks_global_minimum_not_first_below_threshold() {
        // Both are within threshold; the closer one is listed last.
        let gallery = vec![
            record("far", &[10.0, 0.0]),
            record("near", &[1.0, 0.0]),
        ];
        let result = EuclideanMatcher
            .best_match(&probe(&[0.0, 0.0]), &gallery, 20.0)
            .unwrap();
        assert_eq!(matched_id(&result), Some("near"));
    }

    #[test]
    fn test_order_independent() {
        let mut gallery = vec![
            record("a", &[3.0, 0.0]),
            record("b", &[0.0, 2.0]),
            record("c", &[5.0, 5.0]),
            record("d", &[-2.5, 0.0]),
        ];
        let query = probe(&[0.0, 0.0]);
        let expected = EuclideanMatcher.best_match(&query, &gallery, 20.0).unwrap();
        assert_eq!(matched_id(&expected), Some("b"));

        for rotation in 0..gallery.len() {
            gallery.rotate_left(1);
            let mut reversed = gallery.clone();
            reversed.reverse();
            for permutation in [&gallery, &reversed] {
                let result = EuclideanMatcher.best_match(&query, permutation, 20.0).unwrap();
                assert_eq!(result, expected, "rotation {rotation}");
            }
        }
    }

    #[test]
    fn test_tie_breaks_on_smallest_identifier() {
        let gallery = vec![record("zed", &[1.0, 0.0]), record("amy", &[-1.0, 0.0])];
        let result = EuclideanMatcher
            .best_match(&probe(&[0.0, 0.0]), &gallery, 20.0)
            .unwrap();
        assert_eq!(matched_id(&result), Some("amy"));

        let swapped = vec![gallery[1].clone(), gallery[0].clone()];
        let result = EuclideanMatcher
            .best_match(&probe(&[0.0, 0.0]), &swapped, 20.0)
            .unwrap();
        assert_eq!(matched_id(&result), Some("amy"));
    }

    #[test]
    fn test_threshold_is_strict() {
        let gallery = vec![record("edge", &[20.0])];
        let at = EuclideanMatcher.best_match(&probe(&[0.0]), &gallery, 20.0).unwrap();
        assert!(!at.matched);
        assert_eq!(at.distance, Some(20.0));
    }

    #[test]
    fn test_threshold_monotonic() {
        let gallery = vec![
            record("a", &[4.0, 3.0]),
            record("b", &[12.0, 0.0]),
            record("c", &[30.0, 30.0]),
        ];
        let thresholds = [0.5, 2.0, 5.0, 5.1, 11.0, 20.0, 50.0];
        for query in [[0.0, 0.0], [8.0, 1.0], [25.0, 25.0], [100.0, 0.0]] {
            let query = probe(&query);
            for (i, &t1) in thresholds.iter().enumerate() {
                for &t2 in &thresholds[i + 1..] {
                    let r1 = EuclideanMatcher.best_match(&query, &gallery, t1).unwrap();
                    let r2 = EuclideanMatcher.best_match(&query, &gallery, t2).unwrap();
                    if r1.matched {
                        assert!(r2.matched);
                        assert_eq!(r1.identifier, r2.identifier);
                    }
                }
            }
        }
    }

    #[test]
    fn test_empty_gallery_is_unknown() {
        let result = EuclideanMatcher.best_match(&probe(&[1.0, 2.0]), &[], 1e9).unwrap();
        assert_eq!(result, MatchResult::unknown(None));
    }

    #[test]
    fn test_dimension_mismatch_is_error() {
        let gallery = vec![record("ok", &[0.0, 0.0]), record("short", &[0.0])];
        let err = EuclideanMatcher
            .best_match(&probe(&[0.0, 0.0]), &gallery, 20.0)
            .unwrap_err();
        assert_eq!(
            err,
            MatchError::DimensionMismatch {
                identifier: "short".into(),
                probe: 2,
                stored: 1,
            }
        );
    }
}
