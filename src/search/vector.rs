//! Semantic similarity backend (spec §4.E).
//!
//! There is no embedding model in this crate (network inference is an
//! explicit non-goal) — "semantic" similarity is approximated with
//! TF-IDF feature-hashed vectors. `VectorBackend` abstracts over a
//! brute-force cosine backend and an optional `usearch` HNSW backend,
//! grounded on the teacher's `search/vector.rs`: reserve-before-add,
//! distance-to-similarity conversion, graceful degradation when the
//! optional dependency is unavailable (spec §9 design note).

use std::collections::HashMap;

use crate::error::Result;
use crate::tokenizer::tokenize_with_bigrams;

/// Fixed dimensionality of the hashed TF-IDF vectors, matching the
/// teacher's `DEFAULT_DIMENSIONS` for its embedding index.
pub const VECTOR_DIMENSIONS: usize = 256;

/// A content-similarity index: add/remove/search over fixed-width
/// vectors. Implementations may be exact (brute force) or approximate
/// (HNSW); a backend's raw `search` result is a cosine similarity in
/// `[-1, 1]` (the feature-hashing sign trick can make a match
/// legitimately negative). `SearchEngine` min-max normalizes these raw
/// scores to `[0, 1]` before fusing them with BM25's scale, so nothing
/// downstream of `SearchEngine::search` ever sees a raw `[-1, 1]` value.
pub trait VectorBackend: Send {
    fn index(&mut self, id: i64, vector: &[f32]) -> Result<()>;
    fn remove(&mut self, id: i64) -> Result<()>;
    fn search(&self, query: &[f32], limit: usize) -> Result<Vec<(i64, f32)>>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Builds document-frequency-weighted, feature-hashed vectors from raw
/// text. Shared by both backends so the same vector always means the
/// same thing regardless of which index stores it.
pub struct TfIdfVectorizer {
    doc_freq: HashMap<String, u32>,
    doc_count: u32,
}

impl Default for TfIdfVectorizer {
    fn default() -> Self {
        Self::new()
    }
}

impl TfIdfVectorizer {
    pub fn new() -> Self {
        Self { doc_freq: HashMap::new(), doc_count: 0 }
    }

    /// Rebuild document-frequency statistics from the full corpus.
    pub fn rebuild<'a>(&mut self, documents: impl Iterator<Item = &'a str>) {
        self.doc_freq.clear();
        self.doc_count = 0;
        for text in documents {
            self.doc_count += 1;
            let mut seen = std::collections::HashSet::new();
            for term in tokenize_with_bigrams(text) {
                if seen.insert(term.clone()) {
                    *self.doc_freq.entry(term).or_insert(0) += 1;
                }
            }
        }
    }

    fn idf(&self, term: &str) -> f32 {
        let df = *self.doc_freq.get(term).unwrap_or(&1) as f32;
        let n = self.doc_count.max(1) as f32;
        ((n + 1.0) / (df + 1.0)).ln() + 1.0
    }

    fn hash_bucket(term: &str) -> (usize, f32) {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        term.hash(&mut hasher);
        let h = hasher.finish();
        let bucket = (h as usize) % VECTOR_DIMENSIONS;
        // The next bit decides sign, the standard feature-hashing trick
        // to keep colliding terms from always reinforcing each other.
        let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        (bucket, sign)
    }

    /// Vectorize `text` into an L2-normalized, fixed-width vector.
    pub fn vectorize(&self, text: &str) -> [f32; VECTOR_DIMENSIONS] {
        let mut vector = [0f32; VECTOR_DIMENSIONS];
        let terms = tokenize_with_bigrams(text);
        let mut term_freq: HashMap<String, u32> = HashMap::new();
        for term in &terms {
            *term_freq.entry(term.clone()).or_insert(0) += 1;
        }
        for (term, tf) in &term_freq {
            let (bucket, sign) = Self::hash_bucket(term);
            let weight = (*tf as f32) * self.idf(term) * sign;
            vector[bucket] += weight;
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }

    /// Sparse term -> TF-IDF weight map, L2-normalized. Unlike
    /// `vectorize`, nothing is hashed away, so individual term weights
    /// stay inspectable — the graph engine uses this to pick
    /// representative entities and to compute exact-term similarity
    /// (spec §4.I), rather than similarity over collision-prone buckets.
    pub fn sparse_vectorize(&self, text: &str) -> HashMap<String, f32> {
        let terms = tokenize_with_bigrams(text);
        let mut term_freq: HashMap<String, u32> = HashMap::new();
        for term in &terms {
            *term_freq.entry(term.clone()).or_insert(0) += 1;
        }
        let mut weights: HashMap<String, f32> = term_freq
            .into_iter()
            .map(|(term, tf)| {
                let idf = self.idf(&term);
                (term, tf as f32 * idf)
            })
            .collect();
        let norm: f32 = weights.values().map(|w| w * w).sum::<f32>().sqrt();
        if norm > 0.0 {
            for w in weights.values_mut() {
                *w /= norm;
            }
        }
        weights
    }
}

/// Cosine similarity between two sparse term-weight maps, iterating the
/// smaller one for the dot product.
pub fn sparse_cosine(a: &HashMap<String, f32>, b: &HashMap<String, f32>) -> f32 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let dot: f32 = small.iter().filter_map(|(term, w)| large.get(term).map(|ow| w * ow)).sum();
    let norm_a: f32 = a.values().map(|w| w * w).sum::<f32>().sqrt();
    let norm_b: f32 = b.values().map(|w| w * w).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// The `top_k` highest-weight terms at or above `min_weight`, sorted by
/// weight descending then alphabetically for deterministic ties — the
/// entity set the graph engine stores per memory (spec §4.I).
pub fn top_terms(weights: &HashMap<String, f32>, top_k: usize, min_weight: f32) -> Vec<String> {
    let mut ranked: Vec<(&String, f32)> =
        weights.iter().filter(|(_, &w)| w >= min_weight).map(|(t, &w)| (t, w)).collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(b.0)));
    ranked.truncate(top_k);
    ranked.into_iter().map(|(t, _)| t.clone()).collect()
}

/// Exact brute-force cosine backend. Always available; the fallback
/// when `vector-search` is disabled or the HNSW backend fails to
/// initialize (spec §9: degrade, never hard-fail, search).
#[derive(Default)]
pub struct BruteForceBackend {
    vectors: HashMap<i64, Vec<f32>>,
}

impl VectorBackend for BruteForceBackend {
    fn index(&mut self, id: i64, vector: &[f32]) -> Result<()> {
        self.vectors.insert(id, vector.to_vec());
        Ok(())
    }

    fn remove(&mut self, id: i64) -> Result<()> {
        self.vectors.remove(&id);
        Ok(())
    }

    fn search(&self, query: &[f32], limit: usize) -> Result<Vec<(i64, f32)>> {
        let mut scored: Vec<(i64, f32)> =
            self.vectors.iter().map(|(&id, v)| (id, cosine(query, v))).collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }
}

#[cfg(feature = "vector-search")]
mod ann {
    use super::{Result, VectorBackend, VECTOR_DIMENSIONS};
    use crate::error::ErrorKind;
    use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

    /// HNSW-backed approximate nearest-neighbor index over the same
    /// hashed TF-IDF vectors, for profiles large enough that brute
    /// force cosine becomes a bottleneck (spec §4.E).
    pub struct AnnBackend {
        index: Index,
        count: usize,
    }

    impl AnnBackend {
        pub fn new() -> Result<Self> {
            let options = IndexOptions {
                dimensions: VECTOR_DIMENSIONS,
                metric: MetricKind::Cos,
                quantization: ScalarKind::F32,
                connectivity: 16,
                expansion_add: 128,
                expansion_search: 64,
                multi: false,
            };
            let index = Index::new(&options)
                .map_err(|e| ErrorKind::Unavailable(format!("ann index unavailable: {e}")))?;
            index
                .reserve(16)
                .map_err(|e| ErrorKind::Unavailable(format!("ann index unavailable: {e}")))?;
            Ok(Self { index, count: 0 })
        }

        fn ensure_capacity(&self) -> Result<()> {
            let size = self.index.size();
            let capacity = self.index.capacity();
            if size >= capacity {
                let new_capacity = (capacity * 2).max(16);
                self.index
                    .reserve(new_capacity)
                    .map_err(|e| ErrorKind::Internal(format!("ann reserve failed: {e}")))?;
            }
            Ok(())
        }
    }

    impl VectorBackend for AnnBackend {
        fn index(&mut self, id: i64, vector: &[f32]) -> Result<()> {
            let key = id as u64;
            if self.index.contains(key) {
                self.index
                    .remove(key)
                    .map_err(|e| ErrorKind::Internal(format!("ann remove failed: {e}")))?;
                self.count = self.count.saturating_sub(1);
            }
            self.ensure_capacity()?;
            self.index
                .add(key, vector)
                .map_err(|e| ErrorKind::Internal(format!("ann add failed: {e}")))?;
            self.count += 1;
            Ok(())
        }

        fn remove(&mut self, id: i64) -> Result<()> {
            let key = id as u64;
            if self.index.contains(key) {
                self.index
                    .remove(key)
                    .map_err(|e| ErrorKind::Internal(format!("ann remove failed: {e}")))?;
                self.count = self.count.saturating_sub(1);
            }
            Ok(())
        }

        fn search(&self, query: &[f32], limit: usize) -> Result<Vec<(i64, f32)>> {
            if self.count == 0 {
                return Ok(Vec::new());
            }
            let matches = self
                .index
                .search(query, limit)
                .map_err(|e| ErrorKind::Internal(format!("ann search failed: {e}")))?;
            Ok(matches
                .keys
                .iter()
                .zip(matches.distances.iter())
                .map(|(&key, &distance)| (key as i64, 1.0 - distance))
                .collect())
        }

        fn len(&self) -> usize {
            self.count
        }
    }
}

#[cfg(feature = "vector-search")]
pub use ann::AnnBackend;

/// Build the best available backend: HNSW when the `vector-search`
/// feature is enabled and initializes successfully, brute force
/// otherwise. Never fails outright — degraded capability is still a
/// working capability (spec §9).
pub fn build_backend() -> Box<dyn VectorBackend> {
    #[cfg(feature = "vector-search")]
    {
        match ann::AnnBackend::new() {
            Ok(backend) => return Box::new(backend),
            Err(e) => tracing::warn!(error = %e, "ann backend unavailable, falling back to brute force"),
        }
    }
    Box::new(BruteForceBackend::default())
}
