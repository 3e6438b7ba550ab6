//! HNSW vector index over the long-term tier.
//!
//! Wraps `instant-distance` to provide approximate cosine-similarity search.
//! The memory store only consults the built graph once a character's
//! long-term tier grows past the brute-force threshold; below it, and while
//! the graph is stale, queries fall back to a linear scan over the same
//! points, so results never miss a record that is present.

use instant_distance::{Builder, HnswMap, Point, Search};

use crate::types::{Embedding, MemoryId};

// ---------------------------------------------------------------------------
// Point adapter
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct IndexPoint {
    normalized: Vec<f32>,
}

impl IndexPoint {
    fn from_embedding(embedding: &Embedding) -> Self {
        let norm = embedding
            .0
            .iter()
            .map(|x| x * x)
            .sum::<f32>()
            .sqrt()
            .max(f32::EPSILON);
        Self {
            normalized: embedding.0.iter().map(|x| x / norm).collect(),
        }
    }
}

impl Point for IndexPoint {
    /// Cosine distance on pre-normalized vectors.
    fn distance(&self, other: &Self) -> f32 {
        if self.normalized.len() != other.normalized.len() {
            return 1.0;
        }
        let dot: f32 = self
            .normalized
            .iter()
            .zip(other.normalized.iter())
            .map(|(a, b)| a * b)
            .sum();
        (1.0 - dot).max(0.0)
    }
}

/// A single nearest-neighbour hit.
#[derive(Debug, Clone)]
pub struct IndexHit {
    /// The matching record.
    pub memory_id: MemoryId,
    /// Cosine similarity in `[-1, 1]`.
    pub similarity: f32,
}

// ---------------------------------------------------------------------------
// LongTermIndex
// ---------------------------------------------------------------------------

/// Approximate nearest-neighbour index for one character's long-term tier.
///
/// `instant-distance` graphs are immutable, so inserts and removals edit the
/// point list and drop the built graph. [`LongTermIndex::ensure_built`]
/// rebuilds it lazily before the next query.
pub struct LongTermIndex {
    points: Vec<IndexPoint>,
    ids: Vec<MemoryId>,
    map: Option<HnswMap<IndexPoint, MemoryId>>,
    ef_construction: usize,
    ef_search: usize,
}

impl LongTermIndex {
    /// Create an empty index with default HNSW parameters.
    #[must_use]
    pub fn new() -> Self {
        Self {
            points: Vec::new(),
            ids: Vec::new(),
            map: None,
            ef_construction: 100,
            ef_search: 50,
        }
    }

    /// Insert or replace the embedding for `memory_id`.
    pub fn upsert(&mut self, memory_id: MemoryId, embedding: &Embedding) {
        self.remove(memory_id);
        self.points.push(IndexPoint::from_embedding(embedding));
        self.ids.push(memory_id);
        self.map = None;
    }

    /// Remove `memory_id` if present.
    pub fn remove(&mut self, memory_id: MemoryId) {
        if let Some(pos) = self.ids.iter().position(|id| *id == memory_id) {
            self.ids.swap_remove(pos);
            self.points.swap_remove(pos);
            self.map = None;
        }
    }

    /// Drop every point.
    pub fn clear(&mut self) {
        self.points.clear();
        self.ids.clear();
        self.map = None;
    }

    /// Number of indexed points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the index holds no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Whether the HNSW graph is current.
    #[must_use]
    pub fn is_built(&self) -> bool {
        self.map.is_some()
    }

    /// Build the graph if it is stale and the index holds more than
    /// `threshold` points. Returns whether a build happened.
    pub fn ensure_built(&mut self, threshold: usize) -> bool {
        if self.map.is_some() || self.points.len() <= threshold {
            return false;
        }
        let builder = Builder::default()
            .ef_construction(self.ef_construction)
            .ef_search(self.ef_search)
            .seed(42);
        self.map = Some(builder.build(self.points.clone(), self.ids.clone()));
        tracing::debug!(points = self.points.len(), "long-term index rebuilt");
        true
    }

    /// The `k` nearest points to `query`, most similar first.
    #[must_use]
    pub fn search(&self, query: &Embedding, k: usize) -> Vec<IndexHit> {
        let query = IndexPoint::from_embedding(query);
        match &self.map {
            Some(map) => {
                let mut search = Search::default();
                map.search(&query, &mut search)
                    .take(k)
                    .map(|item| IndexHit {
                        memory_id: *item.value,
                        similarity: 1.0 - item.distance,
                    })
                    .collect()
            }
            None => self.brute_force(&query, k),
        }
    }

    fn brute_force(&self, query: &IndexPoint, k: usize) -> Vec<IndexHit> {
        let mut scored: Vec<(f32, usize)> = self
            .points
            .iter()
            .enumerate()
            .map(|(i, point)| (query.distance(point), i))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));
        scored.truncate(k);
        scored
            .into_iter()
            .map(|(dist, idx)| IndexHit {
                memory_id: self.ids[idx],
                similarity: 1.0 - dist,
            })
            .collect()
    }
}

impl Default for LongTermIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding(values.to_vec())
    }

    #[test]
    fn empty_index_returns_no_results() {
        let index = LongTermIndex::new();
        assert!(index.search(&emb(&[1.0, 0.0]), 5).is_empty());
    }

    #[test]
    fn brute_force_below_threshold() {
        let mut index = LongTermIndex::new();
        let near = MemoryId::new();
        index.upsert(near, &emb(&[0.9, 0.1, 0.0]));
        index.upsert(MemoryId::new(), &emb(&[0.0, 1.0, 0.0]));

        assert!(!index.ensure_built(128));
        let hits = index.search(&emb(&[1.0, 0.0, 0.0]), 1);
        assert_eq!(hits[0].memory_id, near);
        assert!(hits[0].similarity > 0.9);
    }

    #[test]
    fn upsert_replaces_existing_point() {
        let mut index = LongTermIndex::new();
        let id = MemoryId::new();
        index.upsert(id, &emb(&[1.0, 0.0]));
        index.upsert(id, &emb(&[0.0, 1.0]));
        assert_eq!(index.len(), 1);
        let hits = index.search(&emb(&[0.0, 1.0]), 1);
        assert!((hits[0].similarity - 1.0).abs() < 1e-5);
    }

    #[test]
    fn build_and_search_sorted() {
        let mut index = LongTermIndex::new();
        for i in 0..200u16 {
            let angle = f32::from(i) / 200.0 * std::f32::consts::TAU;
            index.upsert(MemoryId::new(), &emb(&[angle.cos(), angle.sin(), 0.0]));
        }
        assert!(index.ensure_built(128));
        assert!(index.is_built());

        let hits = index.search(&emb(&[1.0, 0.0, 0.0]), 5);
        assert_eq!(hits.len(), 5);
        assert!(hits[0].similarity > 0.95, "top similarity {}", hits[0].similarity);
        for pair in hits.windows(2) {
            assert!(pair[0].similarity + 1e-3 >= pair[1].similarity);
        }
    }

    #[test]
    fn removal_invalidates_graph() {
        let mut index = LongTermIndex::new();
        let ids: Vec<MemoryId> = (0..10).map(|_| MemoryId::new()).collect();
        for id in &ids {
            index.upsert(*id, &emb(&[1.0, 0.0]));
        }
        assert!(index.ensure_built(0));
        index.remove(ids[0]);
        assert!(!index.is_built());
        assert!(index.search(&emb(&[1.0, 0.0]), 20).iter().all(|h| h.memory_id != ids[0]));
    }
}
