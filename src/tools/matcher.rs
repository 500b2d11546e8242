use serde::Serialize;

use crate::domain::embedding::Embedding;

use super::match_index::IndexArena;

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct MatchDecision {
    pub identity_id: Option<String>,
    /// Smallest distance seen, even when it was not accepted.
    pub distance: Option<f32>,
    pub confidence: f32,
}

impl MatchDecision {
    fn no_match(distance: Option<f32>) -> Self {
        Self { identity_id: None, distance, confidence: 0.0 }
    }

    pub fn is_match(&self) -> bool {
        self.identity_id.is_some()
    }
}

/// Linear normalization: 1.0 at distance 0, 0.0 at the threshold.
pub fn confidence(distance: f32, threshold: f32) -> f32 {
    if threshold <= 0.0 {
        return 0.0;
    }
    (1.0 - distance / threshold).max(0.0)
}

/// Global nearest neighbour of every candidate against every indexed prototype.
///
/// A single close prototype wins even if its identity has many distant ones.
pub fn match_candidates(candidates: &[Embedding], snapshot: &IndexArena, threshold: f32) -> MatchDecision {
    let mut best: Option<(usize, f32)> = None;
    for candidate in candidates {
        if let Some((entry, distance)) = snapshot.nearest(candidate) {
            match best {
                Some((_, best_distance)) if distance >= best_distance => {}
                _ => best = Some((entry, distance)),
            }
        }
    }

    match best {
        Some((entry, distance)) if distance < threshold => MatchDecision {
            identity_id: Some(snapshot.label(entry).to_string()),
            distance: Some(distance),
            confidence: confidence(distance, threshold),
        },
        Some((_, distance)) => MatchDecision::no_match(Some(distance)),
        None => MatchDecision::no_match(None),
    }
}


#[cfg(test)]
mod tests {
    use crate::tools::match_index::MatchIndex;

    use super::*;

    fn e(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    async fn snapshot_of(entries: &[(&str, Vec<Embedding>)]) -> std::sync::Arc<IndexArena> {
        let index = MatchIndex::new(2, None);
        for (identity, prototypes) in entries {
            index.upsert(identity, prototypes).await;
        }
        index.snapshot().await
    }

    #[tokio::test]
    async fn test_accepts_below_threshold() {
        let snapshot = snapshot_of(&[("E1", vec![e(&[0.0, 0.0])]), ("E2", vec![e(&[5.0, 5.0])])]).await;
        let decision = match_candidates(&[e(&[0.3, 0.0])], &snapshot, 0.5);
        assert_eq!(decision.identity_id.as_deref(), Some("E1"));
        assert!((decision.confidence - 0.4).abs() < 1e-5);

        let decision = match_candidates(&[e(&[0.6, 0.0])], &snapshot, 0.5);
        assert!(!decision.is_match());
        assert!((decision.distance.unwrap() - 0.6).abs() < 1e-5);
        assert_eq!(decision.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_threshold_is_exclusive() {
        let snapshot = snapshot_of(&[("E1", vec![e(&[0.0, 0.0])])]).await;
        assert!(!match_candidates(&[e(&[0.5, 0.0])], &snapshot, 0.5).is_match());
    }

    #[tokio::test]
    async fn test_best_candidate_wins() {
        let snapshot = snapshot_of(&[
            ("E1", vec![e(&[0.0, 0.0]), e(&[9.0, 9.0]), e(&[8.0, 9.0])]),
            ("E2", vec![e(&[4.0, 4.0])]),
        ]).await;
        let decision = match_candidates(&[e(&[3.0, 0.0]), e(&[4.1, 4.0])], &snapshot, 0.5);
        assert_eq!(decision.identity_id.as_deref(), Some("E2"));
        // a single close prototype beats an identity with more entries
        let decision = match_candidates(&[e(&[8.0, 8.9])], &snapshot, 0.5);
        assert_eq!(decision.identity_id.as_deref(), Some("E1"));
    }

    #[tokio::test]
    async fn test_empty_inputs() {
        let empty = snapshot_of(&[]).await;
        assert_eq!(match_candidates(&[e(&[0.0, 0.0])], &empty, 0.5), MatchDecision::no_match(None));
        let snapshot = snapshot_of(&[("E1", vec![e(&[0.0, 0.0])])]).await;
        assert_eq!(match_candidates(&[], &snapshot, 0.5), MatchDecision::no_match(None));
        // wrong dimension candidates are ignored
        assert_eq!(match_candidates(&[e(&[0.0])], &snapshot, 0.5), MatchDecision::no_match(None));
    }

    #[tokio::test]
    async fn test_monotonic_in_threshold_and_distance() {
        let snapshot = snapshot_of(&[("E1", vec![e(&[0.0, 0.0])])]).await;
        let thresholds = [1.0, 0.8, 0.6, 0.4, 0.2];
        for window in thresholds.windows(2) {
            for step in 0..20 {
                let candidate = e(&[step as f32 * 0.05, 0.0]);
                let wide = match_candidates(&[candidate.clone()], &snapshot, window[0]);
                let narrow = match_candidates(&[candidate], &snapshot, window[1]);
                if narrow.is_match() {
                    assert!(wide.is_match());
                    assert!(narrow.confidence <= wide.confidence);
                }
            }
        }
        let mut previous = f32::INFINITY;
        for step in 0..10 {
            let c = confidence(step as f32 * 0.05, 0.5);
            assert!(c < previous);
            previous = c;
        }
    }
}
