//! Search nodes and the frontier ordering heuristic

use std::hash::{Hash, Hasher};

/// Decay constant of the heuristic
pub const DECAY: f64 = -2.0;

/// `e^(k·distance) / Σ_{i=1..max_depth} e^(k·i)` with `k = DECAY`.
///
/// Strictly decreasing in `distance` for a fixed `max_depth`. A `max_depth`
/// of zero is treated as one.
pub fn heuristic(distance: usize, max_depth: usize) -> f64 {
    let norm: f64 = (1..=max_depth.max(1)).map(|i| (DECAY * i as f64).exp()).sum();
    (DECAY * distance as f64).exp() / norm
}

/// An entity reached by the search, `distance` hops from the side that
/// found it. Identity is the entity alone.
#[derive(Debug, Clone)]
pub struct Node<T> {
    pub value: T,
    pub distance: usize,
}

impl<T> Node<T> {
    pub fn new(value: T, distance: usize) -> Self {
        Self { value, distance }
    }

    pub fn heuristic(&self, max_depth: usize) -> f64 {
        heuristic(self.distance, max_depth)
    }
}

impl<T: PartialEq> PartialEq for Node<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T: Eq> Eq for Node<T> {}

impl<T: Hash> Hash for Node<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heuristic_strictly_decreasing() {
        for max_depth in 1..6 {
            for d in 0..10 {
                assert!(heuristic(d, max_depth) > heuristic(d + 1, max_depth));
            }
        }
    }

    #[test]
    fn test_heuristic_normalized_over_depths() {
        let total: f64 = (1..=4).map(|d| heuristic(d, 4)).sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_depth_treated_as_one() {
        assert_eq!(heuristic(1, 0), heuristic(1, 1));
        assert!((heuristic(1, 1) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_node_identity_ignores_distance() {
        assert_eq!(Node::new("a", 1), Node::new("a", 3));
        assert_ne!(Node::new("a", 1), Node::new("b", 1));
    }
}
