//! Per-direction search state: the frontier queue and discovered connections

use std::collections::VecDeque;

use super::node::Node;

/// Not-yet-expanded nodes of one search direction
#[derive(Debug, Clone)]
pub struct SearchFrontier<T> {
    nodes: VecDeque<Node<T>>,
}

impl<T> SearchFrontier<T> {
    pub fn new(origin: Node<T>) -> Self {
        Self {
            nodes: VecDeque::from([origin]),
        }
    }

    pub fn pop(&mut self) -> Option<Node<T>> {
        self.nodes.pop_front()
    }

    pub fn push(&mut self, node: Node<T>) {
        self.nodes.push_back(node);
    }

    /// Ascending heuristic score; equal scores keep their order
    pub fn sort_by_heuristic(&mut self, max_depth: usize) {
        self.nodes
            .make_contiguous()
            .sort_by(|a, b| a.heuristic(max_depth).total_cmp(&b.heuristic(max_depth)));
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node<T>> {
        self.nodes.iter()
    }
}

/// Neighbors discovered from one expanded node, with multiplicities,
/// capped at a fixed size.
#[derive(Debug, Clone)]
pub struct ConnectionSet<T> {
    cap: usize,
    entries: Vec<(Node<T>, u32)>,
}

impl<T: PartialEq> ConnectionSet<T> {
    pub fn new(cap: usize) -> Self {
        Self { cap, entries: Vec::new() }
    }

    /// Record a neighbor seen `sightings` times. Returns false when it was
    /// already present (its weight grows by `sightings`) or the set is full.
    pub fn add(&mut self, node: Node<T>, sightings: u32) -> bool {
        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| *n == node) {
            entry.1 += sightings;
            return false;
        }
        if self.entries.len() >= self.cap {
            return false;
        }
        self.entries.push((node, sightings.max(1)));
        true
    }

    pub fn weight(&self, value: &T) -> Option<u32> {
        self.entries.iter().find(|(n, _)| n.value == *value).map(|(_, w)| *w)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.cap
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node<T>> {
        self.entries.iter().map(|(n, _)| n)
    }
}
