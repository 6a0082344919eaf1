//! Search subsystem (spec §4.D–§4.H): BM25, TF-IDF/ANN similarity,
//! query optimization, result caching, and hybrid fusion, wired
//! together behind one `SearchEngine` facade per profile.

pub mod bm25;
pub mod cache;
pub mod hybrid;
pub mod optimizer;
pub mod vector;

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use crate::config::{Config, OptimizerConfig};
use crate::error::Result;
use crate::graph::GraphEngine;
use crate::store::Store;

use bm25::{Bm25Params, InvertedIndex};
use cache::{cache_key, ResultCache};
use hybrid::{content_preview, min_max_normalize, HybridFusion, MatchOrigin, SearchHit};
use vector::{build_backend, TfIdfVectorizer, VectorBackend};

/// Fusion strategy requested by the caller (spec §4.H:
/// `method ∈ {bm25, semantic, graph, weighted, rrf}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionStrategy {
    Bm25,
    Semantic,
    Graph,
    ReciprocalRank,
    Weighted,
}

/// One profile's in-memory search state: its BM25 index, its TF-IDF
/// vectorizer/backend, and a result cache. The orchestrator owns one
/// `SearchEngine` (spanning every profile) and rebuilds a profile's
/// indexes lazily the first time it's searched or explicitly.
pub struct SearchEngine {
    bm25_params: Bm25Params,
    fusion: HybridFusion,
    optimizer: OptimizerConfig,
    profiles: RwLock<HashMap<String, Mutex<ProfileIndex>>>,
    cache: ResultCache<Vec<(i64, f64, hybrid::MatchOrigin)>>,
}

struct ProfileIndex {
    inverted: InvertedIndex,
    vectorizer: TfIdfVectorizer,
    backend: Box<dyn VectorBackend>,
}

impl ProfileIndex {
    fn new() -> Self {
        Self { inverted: InvertedIndex::new(), vectorizer: TfIdfVectorizer::new(), backend: build_backend() }
    }
}

impl SearchEngine {
    pub fn new(config: &Config) -> Self {
        Self {
            bm25_params: Bm25Params { k1: config.bm25.k1, b: config.bm25.b },
            fusion: HybridFusion::new(config.fusion_weights),
            optimizer: config.optimizer,
            profiles: RwLock::new(HashMap::new()),
            cache: ResultCache::new(config.cache.capacity, Duration::from_secs(config.cache.ttl_secs)),
        }
    }

    fn with_profile<T>(&self, profile: &str, f: impl FnOnce(&mut ProfileIndex) -> T) -> T {
        {
            let read = self.profiles.read().unwrap();
            if let Some(index) = read.get(profile) {
                return f(&mut index.lock().unwrap());
            }
        }
        let mut write = self.profiles.write().unwrap();
        let entry = write.entry(profile.to_string()).or_insert_with(|| Mutex::new(ProfileIndex::new()));
        f(&mut entry.lock().unwrap())
    }

    /// Rebuild a profile's BM25 and vector indexes from the store.
    /// Called after bulk imports/restores, or lazily would also work,
    /// but an explicit rebuild keeps index staleness observable.
    pub fn rebuild(&self, store: &Store, profile: &str) -> Result<()> {
        let filters = crate::store::ListFilters::default();
        let documents =
            store.list(profile, &filters, crate::store::SortBy::CreatedAtDesc, i64::MAX as usize, 0)?;
        self.with_profile(profile, |index| {
            index.inverted.rebuild(documents.iter().map(|m| (m.id, m.content.as_str())));
            index.vectorizer.rebuild(documents.iter().map(|m| m.content.as_str()));
            index.backend = build_backend();
            for memory in &documents {
                let vector = index.vectorizer.vectorize(&memory.content);
                if let Err(e) = index.backend.index(memory.id, &vector) {
                    tracing::warn!(error = %e, id = memory.id, "failed to index vector during rebuild");
                }
            }
        });
        self.cache.clear();
        Ok(())
    }

    /// Incrementally update a single document's contribution, e.g.
    /// right after `Store::add`/`Store::update`.
    pub fn index_document(&self, profile: &str, id: i64, content: &str) {
        self.with_profile(profile, |index| {
            index.inverted.index_document(id, content);
            let vector = index.vectorizer.vectorize(content);
            if let Err(e) = index.backend.index(id, &vector) {
                tracing::warn!(error = %e, id, "failed to index vector");
            }
        });
        self.cache.clear();
    }

    pub fn remove_document(&self, profile: &str, id: i64) {
        self.with_profile(profile, |index| {
            index.inverted.remove_document(id);
            if let Err(e) = index.backend.remove(id) {
                tracing::warn!(error = %e, id, "failed to remove vector");
            }
        });
        self.cache.clear();
    }

    /// Run the full search pipeline: parse boolean structure, spell-
    /// correct and (if enabled) expand each positive term, fuse BM25 +
    /// TF-IDF/ANN similarity + graph expansion, cache the fused (id,
    /// score, origin) triples, then materialize previews from the
    /// store on every call (content can change between cache hits).
    pub fn search(
        &self,
        store: &Store,
        graph: &GraphEngine,
        profile: &str,
        query: &str,
        limit: usize,
        strategy: FusionStrategy,
    ) -> Result<Vec<SearchHit>> {
        let strategy_key = match strategy {
            FusionStrategy::Bm25 => "bm25",
            FusionStrategy::Semantic => "semantic",
            FusionStrategy::Graph => "graph",
            FusionStrategy::ReciprocalRank => "rrf",
            FusionStrategy::Weighted => "weighted",
        };
        let key = cache_key(profile, query, limit, strategy_key);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached
                .into_iter()
                .map(|(id, score, origin)| SearchHit { id, score, origin })
                .collect());
        }

        let (positive, negative) = optimizer::parse(query).flatten();
        let (search_terms, excluded_ids) = self.with_profile(profile, |index| {
            let mut terms: Vec<String> = Vec::new();
            for term in &positive {
                let corrected = if optimizer::is_technical(term) {
                    term.clone()
                } else {
                    let lower = term.to_lowercase();
                    optimizer::suggest_correction(&lower, &index.inverted).unwrap_or(lower)
                };
                if self.optimizer.expand_queries {
                    for expansion in optimizer::expand_query_terms(&corrected, &index.inverted, self.optimizer.expansion_top_k) {
                        terms.push(expansion);
                    }
                }
                terms.push(corrected);
            }
            let excluded: HashSet<i64> =
                negative.iter().flat_map(|t| index.inverted.doc_ids(&t.to_lowercase())).collect();
            (terms.join(" "), excluded)
        });

        let lexical: Vec<(i64, f64)> = self
            .with_profile(profile, |index| index.inverted.search(&search_terms, limit * 2, self.bm25_params))
            .into_iter()
            .filter(|(id, _)| !excluded_ids.contains(id))
            .collect();
        let semantic: Vec<(i64, f64)> = self
            .with_profile(profile, |index| {
                let query_vector = index.vectorizer.vectorize(&search_terms);
                index
                    .backend
                    .search(&query_vector, limit * 2)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(id, score)| (id, score as f64))
                    .collect::<Vec<_>>()
            })
            .into_iter()
            .filter(|(id, _)| !excluded_ids.contains(id))
            .collect();

        let graph_expansion = |limit: usize| -> Result<Vec<(i64, f64)>> {
            let seeds = store.search_fts(profile, &search_terms, limit.max(10))?;
            let results = graph.expand_from_seeds(store, profile, &seeds)?;
            Ok(results.into_iter().filter(|(id, _)| !excluded_ids.contains(id)).collect())
        };

        let hits: Vec<SearchHit> = match strategy {
            FusionStrategy::Bm25 => min_max_normalize(&lexical)
                .into_iter()
                .take(limit)
                .map(|(id, score)| SearchHit { id, score, origin: MatchOrigin::Lexical })
                .collect(),
            FusionStrategy::Semantic => min_max_normalize(&semantic)
                .into_iter()
                .take(limit)
                .map(|(id, score)| SearchHit { id, score, origin: MatchOrigin::Semantic })
                .collect(),
            FusionStrategy::Graph => min_max_normalize(&graph_expansion(limit * 2)?)
                .into_iter()
                .take(limit)
                .map(|(id, score)| SearchHit { id, score, origin: MatchOrigin::Graph })
                .collect(),
            FusionStrategy::ReciprocalRank => {
                let graph_results = graph_expansion(limit * 2)?;
                self.fusion.fuse_rrf(&lexical, &semantic, &graph_results).into_iter().take(limit).collect()
            }
            FusionStrategy::Weighted => {
                let graph_results = graph_expansion(limit * 2)?;
                self.fusion.fuse_weighted(&lexical, &semantic, &graph_results).into_iter().take(limit).collect()
            }
        };

        self.cache.put(key, hits.iter().map(|h| (h.id, h.score, h.origin)).collect());
        Ok(hits)
    }

    /// Attach a truncated content preview to a raw hit, reading the
    /// current content from the store (never from the cache).
    pub fn preview_for(&self, store: &Store, profile: &str, hit: &SearchHit, max_chars: usize) -> Result<String> {
        let memory = store.get(profile, hit.id)?;
        Ok(content_preview(&memory.content, max_chars))
    }

    pub fn cache_evictions(&self) -> u64 {
        self.cache.evictions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NewMemory;

    fn setup() -> (tempfile::TempDir, Store, SearchEngine, GraphEngine) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let store = Store::open(dir.path(), &config).unwrap();
        let engine = SearchEngine::new(&config);
        let graph = GraphEngine::new(config.graph);
        (dir, store, engine, graph)
    }

    #[test]
    fn search_finds_indexed_document() {
        let (_dir, store, engine, graph) = setup();
        let id = store.add("default", NewMemory { content: "Use React hooks for state".into(), ..Default::default() }).unwrap();
        engine.index_document("default", id, "Use React hooks for state");
        let hits = engine.search(&store, &graph, "default", "react hooks", 10, FusionStrategy::ReciprocalRank).unwrap();
        assert!(hits.iter().any(|h| h.id == id));
    }

    #[test]
    fn rebuild_picks_up_every_stored_memory() {
        let (_dir, store, engine, graph) = setup();
        store.add("default", NewMemory { content: "alpha beta gamma".into(), ..Default::default() }).unwrap();
        store.add("default", NewMemory { content: "delta epsilon zeta".into(), ..Default::default() }).unwrap();
        engine.rebuild(&store, "default").unwrap();
        let hits = engine.search(&store, &graph, "default", "alpha", 10, FusionStrategy::Weighted).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn remove_document_excludes_it_from_future_searches() {
        let (_dir, store, engine, graph) = setup();
        let id = store.add("default", NewMemory { content: "unique keyword zephyr".into(), ..Default::default() }).unwrap();
        engine.index_document("default", id, "unique keyword zephyr");
        engine.remove_document("default", id);
        let hits = engine.search(&store, &graph, "default", "zephyr", 10, FusionStrategy::ReciprocalRank).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn repeated_search_hits_the_cache() {
        let (_dir, store, engine, graph) = setup();
        let id = store.add("default", NewMemory { content: "cached query content".into(), ..Default::default() }).unwrap();
        engine.index_document("default", id, "cached query content");
        engine.search(&store, &graph, "default", "cached query", 10, FusionStrategy::ReciprocalRank).unwrap();
        let evictions_before = engine.cache_evictions();
        engine.search(&store, &graph, "default", "cached query", 10, FusionStrategy::ReciprocalRank).unwrap();
        assert_eq!(engine.cache_evictions(), evictions_before);
    }

    #[test]
    fn profiles_have_independent_indexes() {
        let (_dir, store, engine, graph) = setup();
        let work_id = store.add("work", NewMemory { content: "work only keyword bazinga".into(), ..Default::default() }).unwrap();
        engine.index_document("work", work_id, "work only keyword bazinga");
        let hits = engine.search(&store, &graph, "personal", "bazinga", 10, FusionStrategy::ReciprocalRank).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn not_clause_excludes_matching_documents() {
        let (_dir, store, engine, graph) = setup();
        let keep = store.add("default", NewMemory { content: "database engine written in rust".into(), ..Default::default() }).unwrap();
        let drop = store.add("default", NewMemory { content: "database engine written in mongodb".into(), ..Default::default() }).unwrap();
        engine.index_document("default", keep, "database engine written in rust");
        engine.index_document("default", drop, "database engine written in mongodb");
        let hits = engine.search(&store, &graph, "default", "database -mongodb", 10, FusionStrategy::ReciprocalRank).unwrap();
        assert!(hits.iter().any(|h| h.id == keep));
        assert!(!hits.iter().any(|h| h.id == drop));
    }

    #[test]
    fn bm25_strategy_returns_only_lexical_matches() {
        let (_dir, store, engine, graph) = setup();
        let id = store.add("default", NewMemory { content: "lexical only keyword quokka".into(), ..Default::default() }).unwrap();
        engine.index_document("default", id, "lexical only keyword quokka");
        let hits = engine.search(&store, &graph, "default", "quokka", 10, FusionStrategy::Bm25).unwrap();
        assert!(hits.iter().all(|h| h.origin == hybrid::MatchOrigin::Lexical));
    }

    #[test]
    fn graph_strategy_surfaces_neighbors_of_the_seed() {
        let (_dir, store, engine, graph) = setup();
        let seed = store.add("default", NewMemory { content: "rust ownership rules prevent data races".into(), ..Default::default() }).unwrap();
        let neighbor = store.add("default", NewMemory { content: "rust borrowing rules prevent data races".into(), ..Default::default() }).unwrap();
        engine.index_document("default", seed, "rust ownership rules prevent data races");
        engine.index_document("default", neighbor, "rust borrowing rules prevent data races");
        graph.index_memory(&store, "default", seed, "rust ownership rules prevent data races").unwrap();
        graph.index_memory(&store, "default", neighbor, "rust borrowing rules prevent data races").unwrap();
        let hits = engine.search(&store, &graph, "default", "rust ownership", 10, FusionStrategy::Graph).unwrap();
        assert!(hits.iter().all(|h| h.origin == hybrid::MatchOrigin::Graph));
    }

    #[test]
    fn expansion_is_off_by_default() {
        let (_dir, store, engine, graph) = setup();
        let id = store
            .add("default", NewMemory { content: "react hooks simplify component lifecycle".into(), ..Default::default() })
            .unwrap();
        engine.index_document("default", id, "react hooks simplify component lifecycle");
        let other =
            store.add("default", NewMemory { content: "lifecycle events fire on every hooks render".into(), ..Default::default() }).unwrap();
        engine.index_document("default", other, "lifecycle events fire on every hooks render");
        let hits = engine.search(&store, &graph, "default", "react", 10, FusionStrategy::Bm25).unwrap();
        assert!(!hits.iter().any(|h| h.id == other));
    }
}
