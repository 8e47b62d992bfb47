//! Graph traversal over cached adjacency

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::Result;

/// BFS distance from `start` to `end`, bounded by `max_hops`.
///
/// Neighbor lookups are fallible because they hit the persistent store.
pub fn bfs_distance<F>(
    start: u128,
    end: u128,
    max_hops: usize,
    mut get_neighbors: F,
) -> Result<Option<usize>>
where
    F: FnMut(u128) -> Result<Vec<u128>>,
{
    if start == end {
        return Ok(Some(0));
    }

    let mut visited = HashSet::from([start]);
    let mut queue = VecDeque::from([(start, 0usize)]);

    while let Some((node, depth)) = queue.pop_front() {
        if depth >= max_hops {
            continue;
        }

        for neighbor in get_neighbors(node)? {
            if neighbor == end {
                return Ok(Some(depth + 1));
            }
            if visited.insert(neighbor) {
                queue.push_back((neighbor, depth + 1));
            }
        }
    }

    Ok(None)
}

/// All shortest paths from `start` to `end` of at most `max_hops` edges.
///
/// BFS level by level, keeping every parent that reaches a node at its
/// minimal depth, then walks the parent DAG back from `end`. Enumeration
/// stops after `max_paths` paths.
pub fn shortest_paths<F>(
    start: u128,
    end: u128,
    max_hops: usize,
    max_paths: usize,
    mut get_neighbors: F,
) -> Result<Vec<Vec<u128>>>
where
    F: FnMut(u128) -> Result<Vec<u128>>,
{
    if max_paths == 0 {
        return Ok(Vec::new());
    }
    if start == end {
        return Ok(vec![vec![start]]);
    }

    let mut depth: HashMap<u128, usize> = HashMap::from([(start, 0)]);
    let mut parents: HashMap<u128, Vec<u128>> = HashMap::new();
    let mut level = vec![start];
    let mut current_depth = 0;

    while !level.is_empty() && current_depth < max_hops {
        let next_depth = current_depth + 1;
        let mut next_level = Vec::new();

        for &node in &level {
            for neighbor in get_neighbors(node)? {
                match depth.get(&neighbor) {
                    None => {
                        depth.insert(neighbor, next_depth);
                        parents.entry(neighbor).or_default().push(node);
                        next_level.push(neighbor);
                    }
                    Some(&d) if d == next_depth => {
                        let entry = parents.entry(neighbor).or_default();
                        if !entry.contains(&node) {
                            entry.push(node);
                        }
                    }
                    Some(_) => {}
                }
            }
        }

        if depth.contains_key(&end) {
            break;
        }

        // `end` is never expanded, so paths cannot run through it
        next_level.retain(|&id| id != end);
        level = next_level;
        current_depth = next_depth;
    }

    if !depth.contains_key(&end) {
        return Ok(Vec::new());
    }

    let mut paths = Vec::new();
    let mut stack = vec![(end, vec![end])];

    while let Some((node, suffix)) = stack.pop() {
        if node == start {
            let mut path = suffix;
            path.reverse();
            paths.push(path);
            if paths.len() >= max_paths {
                break;
            }
            continue;
        }

        if let Some(node_parents) = parents.get(&node) {
            for &parent in node_parents.iter().rev() {
                let mut next = suffix.clone();
                next.push(parent);
                stack.push((parent, next));
            }
        }
    }

    Ok(paths)
}
