use ndarray::{Array2, Axis};

use crate::domain::{embedding::Embedding, identity::Identity};


/// Merges `new` into an identity's prototype set, keeping at most `max_k` entries.
///
/// Below the bound the new embedding is appended. Above it, a farthest-point
/// selection runs over `existing ∪ {new}`: `new` is always kept, then the
/// candidate whose minimum distance to the selected set is largest is added
/// until `max_k` are kept. Ties go to the earliest candidate and the result
/// keeps input order.
pub fn consolidate(existing: &[Embedding], new: Embedding, max_k: usize) -> Vec<Embedding> {
    let max_k = max_k.max(1);
    if existing.len() < max_k {
        let mut prototypes = existing.to_vec();
        prototypes.push(new);
        return prototypes;
    }

    let mut candidates = existing.to_vec();
    candidates.push(new);
    let selected = farthest_point_selection(&candidates, candidates.len() - 1, max_k);
    candidates
        .into_iter()
        .zip(selected)
        .filter_map(|(candidate, keep)| if keep { Some(candidate) } else { None })
        .collect()
}

/// Returns a keep-mask over `candidates` with `count` entries set, seeded with `seed`.
pub fn farthest_point_selection(candidates: &[Embedding], seed: usize, count: usize) -> Vec<bool> {
    let mut selected = vec![false; candidates.len()];
    if candidates.is_empty() || count == 0 {
        return selected;
    }
    selected[seed] = true;
    let mut min_distances: Vec<f32> = candidates.iter().map(|c| c.distance(&candidates[seed])).collect();

    for _ in 1..count.min(candidates.len()) {
        let mut best: Option<(usize, f32)> = None;
        for (index, distance) in min_distances.iter().enumerate() {
            if selected[index] {
                continue;
            }
            match best {
                Some((_, best_distance)) if *distance <= best_distance => {}
                _ => best = Some((index, *distance)),
            }
        }
        let Some((picked, _)) = best else { break };
        selected[picked] = true;
        for (index, candidate) in candidates.iter().enumerate() {
            let distance = candidate.distance(&candidates[picked]);
            if distance < min_distances[index] {
                min_distances[index] = distance;
            }
        }
    }
    selected
}

/// Arithmetic mean of the prototypes, `None` for an empty or ragged set.
pub fn centroid(prototypes: &[Embedding]) -> Option<Embedding> {
    let first = prototypes.first()?;
    let dim = first.dim();
    if prototypes.iter().any(|p| p.dim() != dim) {
        return None;
    }
    let flat: Vec<f32> = prototypes.iter().flat_map(|p| p.as_slice().iter().copied()).collect();
    let matrix = Array2::from_shape_vec((prototypes.len(), dim), flat).ok()?;
    let mean = matrix.mean_axis(Axis(0))?;
    Some(Embedding::new(mean.to_vec()))
}

/// Extension point applied after every consolidation.
pub trait PrototypeRetention: Send + Sync {
    fn retain(&self, identity: &Identity) -> Vec<Embedding>;
}

/// Keeps every prototype. Age based expiry is not defined yet.
#[derive(Debug, Clone, Default)]
pub struct KeepAll;

impl PrototypeRetention for KeepAll {
    fn retain(&self, identity: &Identity) -> Vec<Embedding> {
        identity.prototypes.clone()
    }
}
