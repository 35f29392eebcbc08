//! Graph-based approximate nearest neighbor index over embeddings.
//!
//! Places and chunks arrive continuously in small increments, so the index
//! is a hierarchical small-world graph: inserts extend the graph in place
//! with no retrain step, unlike partition/cluster structures whose
//! boundaries degrade as data drifts. Deletes are soft; a deleted node is
//! still used for navigation but never returned.
//!
//! Distance is **cosine distance** (`1 - cosine similarity`), the
//! store-wide metric for both the place-level and chunk-level instances.
//! Ties are broken by ascending external id for determinism.

use parking_lot::RwLock;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::error::{StoreError, StoreResult};

/// Tuning parameters for the graph.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Bidirectional links per node above layer 0.
    pub m: usize,
    /// Maximum links per node at layer 0.
    pub m_max0: usize,
    /// Candidate list size during construction.
    pub ef_construction: usize,
    /// Candidate list size during search.
    pub ef_search: usize,
    /// Maximum number of layers.
    pub max_layers: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            m: 16,
            m_max0: 32,
            ef_construction: 100,
            ef_search: 64,
            max_layers: 16,
        }
    }
}

/// Cosine distance between two equal-length vectors. Zero-norm vectors are
/// maximally distant from everything.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f32::EPSILON {
        return 1.0;
    }
    (1.0 - dot / denom).max(0.0)
}

/// Heap entry ordered by distance, then node id for stable ordering.
#[derive(Debug, Clone, Copy, PartialEq)]
struct HeapEntry {
    dist: f32,
    node: u32,
}

impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.dist
            .total_cmp(&other.dist)
            .then(self.node.cmp(&other.node))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct Graph {
    /// Contiguous vector arena, `dimension` floats per node.
    vectors: Vec<f32>,
    /// `[node][layer][neighbor]` adjacency lists.
    neighbors: Vec<Vec<Vec<u32>>>,
    levels: Vec<u8>,
    deleted: Vec<bool>,
    /// Node slot to external id.
    external: Vec<u32>,
    /// External id to its live node slot.
    live: HashMap<u32, u32>,
    entry_point: Option<u32>,
    max_level: usize,
}

impl Graph {
    fn vector_of(&self, node: u32, dimension: usize) -> &[f32] {
        let start = node as usize * dimension;
        &self.vectors[start..start + dimension]
    }

    fn node_count(&self) -> usize {
        self.levels.len()
    }
}

/// An ANN index instance. One per entity kind (places, chunks).
#[derive(Debug)]
pub struct SemanticIndex {
    dimension: usize,
    config: GraphConfig,
    graph: RwLock<Graph>,
}

impl SemanticIndex {
    pub fn new(dimension: usize) -> Self {
        Self::with_config(dimension, GraphConfig::default())
    }

    pub fn with_config(dimension: usize, config: GraphConfig) -> Self {
        Self {
            dimension,
            config,
            graph: RwLock::new(Graph::default()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of live (non-deleted) vectors.
    pub fn len(&self) -> usize {
        self.graph.read().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: u32) -> bool {
        self.graph.read().live.contains_key(&id)
    }

    fn check_dimension(&self, vector: &[f32]) -> StoreResult<()> {
        if vector.len() != self.dimension {
            return Err(StoreError::validation(
                "embedding",
                format!(
                    "dimension mismatch: expected {}, got {}",
                    self.dimension,
                    vector.len()
                ),
            ));
        }
        Ok(())
    }

    /// Exponential layer assignment, clamped to the configured maximum.
    fn sample_level(&self) -> usize {
        let ml = 1.0 / (self.config.m as f64).ln();
        let r: f64 = rand::random::<f64>().max(f64::MIN_POSITIVE);
        ((-r.ln() * ml).floor() as usize).min(self.config.max_layers - 1)
    }

    /// Insert a vector under an external id. Re-inserting an existing id
    /// replaces its vector: the old node is soft-deleted and a fresh node
    /// takes over the id.
    pub fn insert(&self, id: u32, vector: &[f32]) -> StoreResult<()> {
        self.check_dimension(vector)?;
        let mut graph = self.graph.write();

        if let Some(old) = graph.live.remove(&id) {
            graph.deleted[old as usize] = true;
        }

        let level = self.sample_level();
        let node = graph.node_count() as u32;

        if graph.entry_point.is_none() {
            graph.vectors.extend_from_slice(vector);
            graph.neighbors.push(vec![Vec::new(); level + 1]);
            graph.levels.push(level as u8);
            graph.deleted.push(false);
            graph.external.push(id);
            graph.live.insert(id, node);
            graph.entry_point = Some(node);
            graph.max_level = level;
            return Ok(());
        }

        let entry = graph.entry_point.expect("entry point present");
        let mut current = entry;

        // Greedy descent through layers above the new node's level.
        for layer in (level + 1..=graph.max_level).rev() {
            let found = self.search_layer(&graph, vector, &[current], 1, layer, |_| true);
            if let Some(&(_, nearest)) = found.first() {
                current = nearest;
            }
        }

        // Collect neighbor lists per layer before the node exists in the
        // graph, exactly as the search sees it.
        let top = level.min(graph.max_level);
        let mut node_neighbors: Vec<Vec<u32>> = vec![Vec::new(); level + 1];
        let mut entry_points = vec![current];
        for layer in (0..=top).rev() {
            let candidates = self.search_layer(
                &graph,
                vector,
                &entry_points,
                self.config.ef_construction,
                layer,
                |_| true,
            );
            let m_max = if layer == 0 {
                self.config.m_max0
            } else {
                self.config.m
            };
            node_neighbors[layer] = self
                .select_neighbors(&graph, &candidates, m_max)
                .into_iter()
                .map(|(_, n)| n)
                .collect();
            entry_points.clear();
            entry_points.extend(candidates.iter().map(|&(_, n)| n));
            if entry_points.is_empty() {
                entry_points.push(entry);
            }
        }

        graph.vectors.extend_from_slice(vector);
        graph.neighbors.push(node_neighbors);
        graph.levels.push(level as u8);
        graph.deleted.push(false);
        graph.external.push(id);
        graph.live.insert(id, node);

        // Bidirectional links, pruning any neighbor now over capacity.
        for layer in 0..=top {
            let m_max = if layer == 0 {
                self.config.m_max0
            } else {
                self.config.m
            };
            let linked: Vec<u32> = graph.neighbors[node as usize][layer].clone();
            for neighbor in linked {
                let nid = neighbor as usize;
                while graph.neighbors[nid].len() <= layer {
                    graph.neighbors[nid].push(Vec::new());
                }
                graph.neighbors[nid][layer].push(node);

                if graph.neighbors[nid][layer].len() > m_max {
                    let base = graph.vector_of(neighbor, self.dimension).to_vec();
                    let candidates: Vec<(f32, u32)> = graph.neighbors[nid][layer]
                        .iter()
                        .map(|&other| {
                            let dist = cosine_distance(
                                &base,
                                graph.vector_of(other, self.dimension),
                            );
                            (dist, other)
                        })
                        .collect();
                    let pruned = self.select_neighbors(&graph, &candidates, m_max);
                    graph.neighbors[nid][layer] = pruned.into_iter().map(|(_, n)| n).collect();
                }
            }
        }

        // Hand the entry point to the new node when it out-levels the graph,
        // or when the current entry is a soft-deleted husk (a replace can
        // leave one behind); the new node is linked to every live region the
        // search reached, so it keeps the graph navigable.
        if level > graph.max_level || graph.deleted[entry as usize] {
            graph.max_level = graph.max_level.max(level);
            graph.entry_point = Some(node);
        }
        Ok(())
    }

    /// Soft-delete an external id. Returns `false` if the id was not live.
    pub fn remove(&self, id: u32) -> bool {
        let mut graph = self.graph.write();
        match graph.live.remove(&id) {
            Some(node) => {
                graph.deleted[node as usize] = true;
                true
            }
            None => false,
        }
    }

    /// k-nearest search. Results are `(external_id, distance)` ordered by
    /// ascending distance, ties by ascending id.
    pub fn search(&self, query: &[f32], k: usize) -> StoreResult<Vec<(u32, f32)>> {
        self.search_filtered(query, k, |_| true)
    }

    /// k-nearest search restricted by a predicate over external ids.
    /// Filtered-out nodes still navigate the graph; `ef` grows adaptively
    /// when the filter is selective.
    pub fn search_filtered(
        &self,
        query: &[f32],
        k: usize,
        filter: impl Fn(u32) -> bool,
    ) -> StoreResult<Vec<(u32, f32)>> {
        self.check_dimension(query)?;
        let graph = self.graph.read();
        let Some(entry) = graph.entry_point else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut current = entry;
        for layer in (1..=graph.max_level).rev() {
            let found = self.search_layer(&graph, query, &[current], 1, layer, |_| true);
            if let Some(&(_, nearest)) = found.first() {
                current = nearest;
            }
        }

        let base_ef = self.config.ef_search.max(k);
        let max_ef = (base_ef * 4).min(graph.node_count().max(1));
        let mut ef = base_ef;
        let mut found;
        loop {
            found = self.search_layer(&graph, query, &[current], ef, 0, |node| {
                filter(graph.external[node as usize])
            });
            if found.len() >= k || ef >= max_ef {
                break;
            }
            ef = (ef * 2).min(max_ef);
        }

        let mut results: Vec<(u32, f32)> = found
            .into_iter()
            .map(|(dist, node)| (graph.external[node as usize], dist))
            .collect();
        results.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        results.truncate(k);
        Ok(results)
    }

    /// Best-first search over one layer. Returns up to `ef` non-deleted
    /// nodes passing the filter, ascending by distance.
    fn search_layer(
        &self,
        graph: &Graph,
        query: &[f32],
        entry_points: &[u32],
        ef: usize,
        layer: usize,
        accept: impl Fn(u32) -> bool,
    ) -> Vec<(f32, u32)> {
        let mut visited: HashSet<u32> = HashSet::new();
        let mut candidates: BinaryHeap<Reverse<HeapEntry>> = BinaryHeap::new();
        let mut results: BinaryHeap<HeapEntry> = BinaryHeap::new();

        for &ep in entry_points {
            if !visited.insert(ep) {
                continue;
            }
            let dist = cosine_distance(query, graph.vector_of(ep, self.dimension));
            candidates.push(Reverse(HeapEntry { dist, node: ep }));
            if !graph.deleted[ep as usize] && accept(ep) {
                results.push(HeapEntry { dist, node: ep });
            }
        }

        while let Some(Reverse(candidate)) = candidates.pop() {
            if results.len() >= ef {
                let worst = results.peek().expect("results non-empty").dist;
                if candidate.dist > worst {
                    break;
                }
            }
            let node = candidate.node as usize;
            if layer >= graph.neighbors[node].len() {
                continue;
            }
            for &neighbor in &graph.neighbors[node][layer] {
                if !visited.insert(neighbor) {
                    continue;
                }
                let dist = cosine_distance(query, graph.vector_of(neighbor, self.dimension));
                let worst = results.peek().map(|e| e.dist).unwrap_or(f32::MAX);
                if results.len() < ef || dist < worst {
                    candidates.push(Reverse(HeapEntry {
                        dist,
                        node: neighbor,
                    }));
                    if !graph.deleted[neighbor as usize] && accept(neighbor) {
                        results.push(HeapEntry {
                            dist,
                            node: neighbor,
                        });
                        if results.len() > ef {
                            results.pop();
                        }
                    }
                }
            }
        }

        results
            .into_sorted_vec()
            .into_iter()
            .map(|e| (e.dist, e.node))
            .collect()
    }

    /// Diversity-preferring neighbor selection: a candidate is kept only if
    /// it is closer to the base than to any already-selected neighbor, then
    /// remaining slots fill with the closest leftovers.
    fn select_neighbors(
        &self,
        graph: &Graph,
        candidates: &[(f32, u32)],
        m: usize,
    ) -> Vec<(f32, u32)> {
        let mut sorted = candidates.to_vec();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut selected: Vec<(f32, u32)> = Vec::with_capacity(m);
        for &(dist_to_base, node) in &sorted {
            if selected.len() >= m {
                break;
            }
            let candidate_vec = graph.vector_of(node, self.dimension);
            let diverse = selected.iter().all(|&(_, kept)| {
                let dist_to_kept =
                    cosine_distance(candidate_vec, graph.vector_of(kept, self.dimension));
                dist_to_base <= dist_to_kept
            });
            if diverse {
                selected.push((dist_to_base, node));
            }
        }

        if selected.len() < m {
            let kept: HashSet<u32> = selected.iter().map(|&(_, n)| n).collect();
            for &(dist, node) in &sorted {
                if selected.len() >= m {
                    break;
                }
                if !kept.contains(&node) {
                    selected.push((dist, node));
                }
            }
        }
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_vector(dimension: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dimension];
        v[hot % dimension] = 1.0;
        v
    }

    #[test]
    fn identity_search_returns_zero_distance() {
        let index = SemanticIndex::new(8);
        let v = vec![0.3, -0.1, 0.5, 0.0, 0.2, 0.9, -0.4, 0.1];
        index.insert(42, &v).unwrap();

        let results = index.search(&v, 1).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, 42);
        assert!(results[0].1 < 1e-5, "distance was {}", results[0].1);
    }

    #[test]
    fn nearest_neighbors_are_ordered() {
        let index = SemanticIndex::new(4);
        index.insert(1, &[1.0, 0.0, 0.0, 0.0]).unwrap();
        index.insert(2, &[0.9, 0.1, 0.0, 0.0]).unwrap();
        index.insert(3, &[0.0, 1.0, 0.0, 0.0]).unwrap();

        let results = index.search(&[1.0, 0.0, 0.0, 0.0], 3).unwrap();
        let ids: Vec<u32> = results.iter().map(|&(id, _)| id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        for pair in results.windows(2) {
            assert!(pair[0].1 <= pair[1].1);
        }
    }

    #[test]
    fn ties_break_by_ascending_id() {
        let index = SemanticIndex::new(4);
        let v = [0.0, 0.0, 1.0, 0.0];
        index.insert(9, &v).unwrap();
        index.insert(3, &v).unwrap();
        index.insert(7, &v).unwrap();

        let results = index.search(&v, 3).unwrap();
        let ids: Vec<u32> = results.iter().map(|&(id, _)| id).collect();
        assert_eq!(ids, vec![3, 7, 9]);
    }

    #[test]
    fn removed_ids_are_never_returned() {
        let index = SemanticIndex::new(4);
        index.insert(1, &[1.0, 0.0, 0.0, 0.0]).unwrap();
        index.insert(2, &[0.0, 1.0, 0.0, 0.0]).unwrap();

        assert!(index.remove(1));
        assert!(!index.remove(1));

        let results = index.search(&[1.0, 0.0, 0.0, 0.0], 5).unwrap();
        assert!(results.iter().all(|&(id, _)| id != 1));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn reinsert_replaces_the_vector() {
        let index = SemanticIndex::new(4);
        index.insert(1, &[1.0, 0.0, 0.0, 0.0]).unwrap();
        index.insert(1, &[0.0, 0.0, 0.0, 1.0]).unwrap();

        assert_eq!(index.len(), 1);
        let results = index.search(&[0.0, 0.0, 0.0, 1.0], 1).unwrap();
        assert_eq!(results[0].0, 1);
        assert!(results[0].1 < 1e-5);
    }

    #[test]
    fn filtered_search_respects_predicate() {
        let index = SemanticIndex::new(8);
        for i in 1..=20u32 {
            index.insert(i, &unit_vector(8, i as usize)).unwrap();
        }
        let query = unit_vector(8, 3);
        let results = index
            .search_filtered(&query, 5, |id| id % 2 == 0)
            .unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|&(id, _)| id % 2 == 0));
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let index = SemanticIndex::new(8);
        assert!(index.insert(1, &[0.5; 4]).is_err());
        assert!(index.search(&[0.5; 4], 1).is_err());
    }

    #[test]
    fn empty_index_returns_no_results() {
        let index = SemanticIndex::new(8);
        let results = index.search(&[0.5; 8], 3).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn recall_over_a_larger_set() {
        let index = SemanticIndex::new(16);
        let mut vectors = Vec::new();
        for i in 1..=200u32 {
            let angle = i as f32 * 0.37;
            let mut v = vec![0.0f32; 16];
            v[0] = angle.cos();
            v[1] = angle.sin();
            v[(i % 13) as usize + 2] = 0.5;
            vectors.push((i, v.clone()));
            index.insert(i, &v).unwrap();
        }
        let mut hits = 0;
        for (id, v) in &vectors {
            let results = index.search(v, 1).unwrap();
            if results.first().map(|&(found, _)| found) == Some(*id) {
                hits += 1;
            }
        }
        // Exact self-recall should be near-perfect on a graph this small.
        assert!(hits >= 195, "self-recall too low: {hits}/200");
    }
}
