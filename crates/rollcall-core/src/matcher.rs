//! Nearest-neighbor identification of a live embedding against the known faces.
//!
//! Distances come from the embedding provider; the matcher only decides.

use crate::types::{DistanceMetric, KnownFaces, MatchResult};

/// Strategy for identifying a live face among enrolled faces.
pub trait Matcher {
    /// `distances[i]` is the live embedding's distance to the `i`-th identity of
    /// `known`, in gallery order.
    fn identify(&self, known: &KnownFaces, distances: &[f32]) -> MatchResult;
}

/// Picks the single closest identity, then accepts it only if the metric's
/// match predicate holds for that identity.
///
/// Ties resolve to the identity that comes first in gallery order.
#[derive(Debug, Clone, Copy)]
pub struct NearestMatcher {
    metric: DistanceMetric,
}

impl NearestMatcher {
    pub fn new(metric: DistanceMetric) -> Self {
        Self { metric }
    }
}

impl Matcher for NearestMatcher {
    fn identify(&self, known: &KnownFaces, distances: &[f32]) -> MatchResult {
        let mut best: Option<(&str, f32)> = None;
        for (identity, &d) in known.iter().zip(distances) {
            // Strict `<` keeps the first of equal distances.
            if best.map_or(true, |(_, best_d)| d < best_d) {
                best = Some((&identity.name, d));
            }
        }

        match best {
            Some((name, distance)) if self.metric.accepts(distance) => MatchResult {
                matched: true,
                distance,
                name: Some(name.to_string()),
            },
            Some((_, distance)) => MatchResult {
                matched: false,
                distance,
                name: None,
            },
            None => MatchResult::unknown(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Embedding;

    fn gallery(entries: &[(&str, Vec<f32>)]) -> KnownFaces {
        entries
            .iter()
            .map(|(n, v)| (n.to_string(), Embedding::new(v.clone())))
            .collect()
    }

    const EUCLIDEAN: DistanceMetric = DistanceMetric::Euclidean { tolerance: 0.6 };

    fn identify(metric: DistanceMetric, query: &Embedding, known: &KnownFaces) -> MatchResult {
        let distances = metric.distances(known.embeddings(), query);
        NearestMatcher::new(metric).identify(known, &distances)
    }

    #[test]
    fn test_identical_embedding_matches_owner() {
        let known = gallery(&[("alice", vec![1.0, 0.0, 0.0]), ("bob", vec![0.0, 1.0, 0.0])]);
        let query = Embedding::new(vec![1.0, 0.0, 0.0]);

        let result = identify(EUCLIDEAN, &query, &known);
        assert!(result.matched);
        assert_eq!(result.name.as_deref(), Some("alice"));
        assert!(result.distance.abs() < 1e-6);

        let query = Embedding::new(vec![0.0, 1.0, 0.0]);
        let result = identify(EUCLIDEAN, &query, &known);
        assert_eq!(result.name.as_deref(), Some("bob"));
    }

    #[test]
    fn test_empty_gallery_is_unknown() {
        let query = Embedding::new(vec![0.3, 0.2]);
        let result = identify(EUCLIDEAN, &query, &KnownFaces::new());
        assert!(!result.matched);
        assert_eq!(result.name, None);
        assert_eq!(result.label(), "Unknown");
        assert!(result.distance.is_infinite());
    }

    #[test]
    fn test_nearest_outside_tolerance_is_unknown() {
        let known = gallery(&[("alice", vec![5.0, 5.0])]);
        let query = Embedding::new(vec![0.0, 0.0]);
        let result = identify(EUCLIDEAN, &query, &known);
        assert!(!result.matched);
        assert_eq!(result.name, None);
        assert!(result.distance > 0.6);
    }

    #[test]
    fn test_only_nearest_is_considered() {
        // bob is within tolerance too, but alice is nearer.
        let known = gallery(&[("bob", vec![0.5, 0.0]), ("alice", vec![0.1, 0.0])]);
        let query = Embedding::new(vec![0.0, 0.0]);
        let result = identify(EUCLIDEAN, &query, &known);
        assert_eq!(result.name.as_deref(), Some("alice"));
    }

    #[test]
    fn test_tie_resolves_to_first_in_gallery_order() {
        let known = gallery(&[("carol", vec![0.2, 0.0]), ("dave", vec![-0.2, 0.0])]);
        let query = Embedding::new(vec![0.0, 0.0]);
        let result = identify(EUCLIDEAN, &query, &known);
        assert_eq!(result.name.as_deref(), Some("carol"));
    }

    #[test]
    fn test_cosine_metric() {
        let cosine = DistanceMetric::Cosine { tolerance: 0.6 };
        let known = gallery(&[("alice", vec![1.0, 0.0]), ("bob", vec![0.0, 1.0])]);
        let query = Embedding::new(vec![0.9, 0.1]);
        let result = identify(cosine, &query, &known);
        assert_eq!(result.name.as_deref(), Some("alice"));

        let query = Embedding::new(vec![-1.0, -1.0]);
        assert!(!identify(cosine, &query, &known).matched);
    }

    #[test]
    fn test_distances_are_taken_as_given() {
        // The matcher trusts the provider's distances, not the embeddings.
        let known = gallery(&[("alice", vec![0.0]), ("bob", vec![100.0])]);
        let result = NearestMatcher::new(EUCLIDEAN).identify(&known, &[3.0, 0.2]);
        assert_eq!(result.name.as_deref(), Some("bob"));
        assert!((result.distance - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_missing_distances_are_unknown() {
        let known = gallery(&[("alice", vec![0.0])]);
        assert_eq!(NearestMatcher::new(EUCLIDEAN).identify(&known, &[]), MatchResult::unknown());
    }
}
