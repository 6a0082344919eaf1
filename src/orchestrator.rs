//! Public façade (spec §4.K): wires `Store`/`SearchEngine`/
//! `GraphEngine`/`PatternLearner`/`Compressor`/`ProfileManager` behind
//! one entry point, enforcing a per-caller rate limit and a
//! trust-score gate on writes, and broadcasting lifecycle events.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::compressor::{CompressionReport, Compressor};
use crate::config::Config;
use crate::error::{ErrorKind, Result};
use crate::event::{Event, EventBus, EventType};
use crate::graph::{ClusterSummary, GraphEngine, GraphStats};
use crate::learner::{LearnedPattern, PatternLearner};
use crate::search::hybrid::SearchHit;
use crate::search::{FusionStrategy, SearchEngine};
use crate::store::{ListFilters, Memory, MemoryUpdate, NewMemory, ProfileManager, ProfileMeta, SortBy, Store};

/// Cooperative cancellation for long-running calls (graph rebuild,
/// compression run). Checked at transaction boundaries, never inside
/// a single SQL statement — a small `Arc<AtomicBool>` wrapper rather
/// than `tokio_util::sync::CancellationToken`, since no async runtime
/// is linked into this crate.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Identity of a caller making a request: who they are (for per-caller
/// rate limiting) and how much the orchestrator should trust them with
/// mutating operations (spec §4.K, §5).
#[derive(Debug, Clone)]
pub struct Caller {
    pub id: String,
    pub trust_score: f64,
}

impl Caller {
    pub fn new(id: impl Into<String>, trust_score: f64) -> Self {
        Self { id: id.into(), trust_score: trust_score.clamp(0.0, 1.0) }
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Per-caller token bucket (spec §4.K "`RateLimiter` (token-bucket per
/// caller id...)"). One bucket instance covers either all writes or
/// all reads across every profile — callers are rate-limited
/// globally, not per-profile, matching "applied at the orchestrator
/// boundary" rather than per-resource.
struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    fn new(per_minute: u32) -> Self {
        Self {
            capacity: per_minute.max(1) as f64,
            refill_per_sec: per_minute.max(1) as f64 / 60.0,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn try_acquire(&self, caller_id: &str) -> bool {
        let mut buckets = self.buckets.lock().unwrap();
        let now = Instant::now();
        let bucket = buckets
            .entry(caller_id.to_string())
            .or_insert_with(|| Bucket { tokens: self.capacity, last_refill: now });
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// The engine: one `Orchestrator` per opened memory root, owning every
/// component and acting as the single choke-point a caller goes
/// through (spec §4.K). Grounded on the teacher's `Storage` as the
/// one owning façade, generalized to compose the additional
/// components this crate adds.
pub struct Orchestrator {
    store: Store,
    search: SearchEngine,
    graph: GraphEngine,
    learner: PatternLearner,
    compressor: Compressor,
    profiles: Mutex<ProfileManager>,
    events: EventBus,
    config: Config,
    write_limiter: RateLimiter,
    read_limiter: RateLimiter,
}

impl Orchestrator {
    /// Open (creating if needed) every component rooted at `root`.
    pub fn open(root: impl Into<PathBuf>, config: Config) -> Result<Self> {
        let root = root.into();
        let store = Store::open(&root, &config)?;
        let search = SearchEngine::new(&config);
        let graph = GraphEngine::new(config.graph);
        let learner = PatternLearner::new(config.learner);
        let compressor = Compressor::new(root.clone(), config.compression);
        let profiles = Mutex::new(ProfileManager::open(&root)?);
        let write_limiter = RateLimiter::new(config.policy.writes_per_min);
        let read_limiter = RateLimiter::new(config.policy.reads_per_min);
        Ok(Self { store, search, graph, learner, compressor, profiles, events: EventBus::new(), config, write_limiter, read_limiter })
    }

    pub fn subscribe(&self) -> Receiver<Event> {
        self.events.subscribe()
    }

    fn check_write(&self, caller: &Caller) -> Result<()> {
        if caller.trust_score < self.config.policy.min_trust_for_write {
            return Err(ErrorKind::InvalidInput("caller trust score is below the write threshold".into()));
        }
        if !self.write_limiter.try_acquire(&caller.id) {
            return Err(ErrorKind::Busy("write rate limit exceeded, retry with backoff".into()));
        }
        Ok(())
    }

    fn check_read(&self, caller: &Caller) -> Result<()> {
        if !self.read_limiter.try_acquire(&caller.id) {
            return Err(ErrorKind::Busy("read rate limit exceeded, retry with backoff".into()));
        }
        Ok(())
    }

    // --- Profiles ---------------------------------------------------

    pub fn active_profile(&self) -> String {
        self.profiles.lock().unwrap().active_profile().to_string()
    }

    pub fn list_profiles(&self) -> Vec<(String, ProfileMeta)> {
        self.profiles.lock().unwrap().list()
    }

    pub fn create_profile(&self, caller: &Caller, name: &str, description: &str) -> Result<()> {
        self.check_write(caller)?;
        self.profiles.lock().unwrap().create(name, description)
    }

    pub fn switch_profile(&self, caller: &Caller, name: &str) -> Result<()> {
        self.check_write(caller)?;
        self.profiles.lock().unwrap().switch(name)?;
        self.events.publish(Event::new(EventType::ProfileSwitched, name, serde_json::json!({})).with_agent(caller.id.clone()));
        Ok(())
    }

    /// Remove a profile's metadata and purge every row it owns across
    /// `memories` (cascading into archive/graph-node/graph-edge rows)
    /// and `identity_patterns`/`pattern_examples` and `graph_clusters`,
    /// none of which are reachable through a memory foreign key —
    /// `graph_clusters` carries its own `profile` column, and
    /// `cluster_members` cascades from `graph_clusters.id`.
    pub fn delete_profile(&self, caller: &Caller, name: &str) -> Result<()> {
        self.check_write(caller)?;
        let name_owned = name.to_string();
        self.store.with_writer(move |conn| {
            conn.execute("DELETE FROM memories WHERE profile = ?1", rusqlite::params![name_owned])?;
            conn.execute("DELETE FROM identity_patterns WHERE profile = ?1", rusqlite::params![name_owned])?;
            conn.execute("DELETE FROM graph_clusters WHERE profile = ?1", rusqlite::params![name_owned])?;
            Ok(())
        })?;
        self.profiles.lock().unwrap().delete(name)
    }

    // --- Memories -----------------------------------------------------

    pub fn remember(&self, caller: &Caller, profile: &str, input: NewMemory) -> Result<i64> {
        self.check_write(caller)?;
        let content = input.content.clone();
        let id = self.store.add(profile, input)?;
        self.search.index_document(profile, id, &content);
        if let Err(e) = self.graph.index_memory(&self.store, profile, id, &content) {
            tracing::warn!(error = %e, id, "failed to index memory into the graph incrementally");
        }
        self.events.publish(
            Event::new(EventType::MemoryCreated, profile, serde_json::json!({ "id": id })).with_agent(caller.id.clone()),
        );
        Ok(id)
    }

    pub fn recall(&self, caller: &Caller, profile: &str, id: i64) -> Result<Memory> {
        self.check_read(caller)?;
        let memory = self.store.get(profile, id)?;
        self.events.publish(
            Event::new(EventType::MemoryAccessed, profile, serde_json::json!({ "id": id })).with_agent(caller.id.clone()),
        );
        Ok(memory)
    }

    pub fn recall_many(&self, caller: &Caller, profile: &str, ids: &[i64]) -> Result<Vec<Memory>> {
        self.check_read(caller)?;
        self.store.get_many(profile, ids)
    }

    pub fn amend(&self, caller: &Caller, profile: &str, id: i64, fields: MemoryUpdate) -> Result<()> {
        self.check_write(caller)?;
        let reindex_content = fields.content.clone();
        self.store.update(profile, id, fields)?;
        if let Some(content) = reindex_content {
            self.search.index_document(profile, id, &content);
        }
        self.events.publish(
            Event::new(EventType::MemoryUpdated, profile, serde_json::json!({ "id": id })).with_agent(caller.id.clone()),
        );
        Ok(())
    }

    pub fn forget(&self, caller: &Caller, profile: &str, id: i64) -> Result<()> {
        self.check_write(caller)?;
        self.store.delete(profile, id)?;
        self.search.remove_document(profile, id);
        self.events.publish(
            Event::new(EventType::MemoryDeleted, profile, serde_json::json!({ "id": id })).with_agent(caller.id.clone()),
        );
        Ok(())
    }

    pub fn list(
        &self,
        caller: &Caller,
        profile: &str,
        filters: &ListFilters,
        sort: SortBy,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Memory>> {
        self.check_read(caller)?;
        self.store.list(profile, filters, sort, limit, offset)
    }

    // --- Search ---------------------------------------------------------

    pub fn rebuild_search_index(&self, caller: &Caller, profile: &str) -> Result<()> {
        self.check_write(caller)?;
        self.search.rebuild(&self.store, profile)
    }

    pub fn search(&self, caller: &Caller, profile: &str, query: &str, limit: usize, strategy: FusionStrategy) -> Result<Vec<SearchHit>> {
        self.check_read(caller)?;
        self.search.search(&self.store, &self.graph, profile, query, limit, strategy)
    }

    pub fn preview(&self, caller: &Caller, profile: &str, hit: &SearchHit, max_chars: usize) -> Result<String> {
        self.check_read(caller)?;
        self.search.preview_for(&self.store, profile, hit, max_chars)
    }

    // --- Graph --------------------------------------------------------

    pub fn build_graph(&self, caller: &Caller, profile: &str, min_sim: Option<f64>, cancel: &CancellationToken) -> Result<GraphStats> {
        self.check_write(caller)?;
        if cancel.is_cancelled() {
            return Err(ErrorKind::InvalidInput("operation cancelled".into()));
        }
        let stats = self.graph.build(&self.store, profile, min_sim)?;
        self.events.publish(
            Event::new(
                EventType::GraphBuilt,
                profile,
                serde_json::json!({ "nodes": stats.node_count, "edges": stats.edge_count, "clusters": stats.cluster_count }),
            )
            .with_agent(caller.id.clone()),
        );
        Ok(stats)
    }

    pub fn related_memories(&self, caller: &Caller, profile: &str, id: i64, max_hops: u32) -> Result<Vec<i64>> {
        self.check_read(caller)?;
        self.graph.related(&self.store, profile, id, max_hops)
    }

    pub fn cluster_summary(&self, caller: &Caller, cluster_id: i64) -> Result<ClusterSummary> {
        self.check_read(caller)?;
        self.graph.cluster_summary(&self.store, cluster_id)
    }

    // --- Pattern learner ------------------------------------------------

    pub fn update_patterns(&self, caller: &Caller, profile: &str) -> Result<usize> {
        self.check_write(caller)?;
        let count = self.learner.update(&self.store, profile)?;
        self.events.publish(
            Event::new(EventType::PatternsUpdated, profile, serde_json::json!({ "count": count })).with_agent(caller.id.clone()),
        );
        Ok(count)
    }

    pub fn patterns(&self, caller: &Caller, profile: &str, min_confidence: f64) -> Result<Vec<LearnedPattern>> {
        self.check_read(caller)?;
        self.learner.patterns(&self.store, profile, min_confidence)
    }

    pub fn identity_context(&self, caller: &Caller, profile: &str, min_confidence: f64) -> Result<String> {
        self.check_read(caller)?;
        self.learner.identity_context(&self.store, profile, min_confidence)
    }

    pub fn correct_pattern(&self, caller: &Caller, pattern_id: i64, new_value: Option<String>) -> Result<()> {
        self.check_write(caller)?;
        self.learner.correct(&self.store, pattern_id, new_value)
    }

    // --- Compression ----------------------------------------------------

    pub fn compress(&self, caller: &Caller, profile: &str, cancel: &CancellationToken) -> Result<CompressionReport> {
        self.check_write(caller)?;
        if cancel.is_cancelled() {
            return Err(ErrorKind::InvalidInput("operation cancelled".into()));
        }
        let report = self.compressor.run(&self.store, profile)?;
        self.events.publish(
            Event::new(
                EventType::CompressionRan,
                profile,
                serde_json::json!({
                    "examined": report.examined,
                    "moved_to_tier2": report.moved_to_tier2,
                    "moved_to_tier3": report.moved_to_tier3,
                    "archived_cold": report.archived_cold,
                }),
            )
            .with_agent(caller.id.clone()),
        );
        Ok(report)
    }

    pub fn restore(&self, caller: &Caller, profile: &str, id: i64) -> Result<()> {
        self.check_write(caller)?;
        self.compressor.restore(&self.store, profile, id)?;
        self.events.publish(
            Event::new(EventType::MemoryRestored, profile, serde_json::json!({ "id": id })).with_agent(caller.id.clone()),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, Orchestrator) {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::open(dir.path(), Config::default()).unwrap();
        (dir, orchestrator)
    }

    fn trusted() -> Caller {
        Caller::new("agent-1", 0.9)
    }

    #[test]
    fn remember_and_recall_round_trip() {
        let (_dir, orchestrator) = setup();
        let caller = trusted();
        let id = orchestrator
            .remember(&caller, "default", NewMemory { content: "prefer rust for systems work".into(), ..Default::default() })
            .unwrap();
        let memory = orchestrator.recall(&caller, "default", id).unwrap();
        assert_eq!(memory.content, "prefer rust for systems work");
    }

    #[test]
    fn low_trust_caller_cannot_write() {
        let (_dir, orchestrator) = setup();
        let caller = Caller::new("stranger", 0.1);
        let result = orchestrator.remember(&caller, "default", NewMemory { content: "x".into(), ..Default::default() });
        assert!(matches!(result, Err(ErrorKind::InvalidInput(_))));
    }

    #[test]
    fn write_rate_limit_is_enforced() {
        let (_dir, orchestrator) = setup();
        let caller = trusted();
        orchestrator.write_limiter.buckets.lock().unwrap().clear();
        for i in 0..orchestrator.config.policy.writes_per_min {
            orchestrator
                .remember(&caller, "default", NewMemory { content: format!("note {i}"), ..Default::default() })
                .unwrap();
        }
        let result = orchestrator.remember(&caller, "default", NewMemory { content: "overflow".into(), ..Default::default() });
        assert!(matches!(result, Err(ErrorKind::Busy(_))));
    }

    #[test]
    fn forget_removes_from_search_index_too() {
        let (_dir, orchestrator) = setup();
        let caller = trusted();
        let id = orchestrator.remember(&caller, "default", NewMemory { content: "unique zephyr token".into(), ..Default::default() }).unwrap();
        orchestrator.forget(&caller, "default", id).unwrap();
        let hits = orchestrator.search(&caller, "default", "zephyr", 10, FusionStrategy::ReciprocalRank).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn profile_deletion_purges_memories() {
        let (_dir, orchestrator) = setup();
        let caller = trusted();
        orchestrator.create_profile(&caller, "work", "work stuff").unwrap();
        let id = orchestrator.remember(&caller, "work", NewMemory { content: "work note".into(), ..Default::default() }).unwrap();
        orchestrator.delete_profile(&caller, "work").unwrap();
        assert!(orchestrator.recall(&caller, "work", id).is_err());
        assert!(!orchestrator.list_profiles().iter().any(|(name, _)| name == "work"));
    }

    #[test]
    fn cancelled_token_blocks_graph_build() {
        let (_dir, orchestrator) = setup();
        let caller = trusted();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = orchestrator.build_graph(&caller, "default", None, &cancel);
        assert!(matches!(result, Err(ErrorKind::InvalidInput(_))));
    }

    #[test]
    fn compress_emits_report_and_snapshot() {
        let (_dir, orchestrator) = setup();
        let caller = trusted();
        orchestrator.remember(&caller, "default", NewMemory { content: "fresh".into(), ..Default::default() }).unwrap();
        let cancel = CancellationToken::new();
        let report = orchestrator.compress(&caller, "default", &cancel).unwrap();
        assert!(report.snapshot_path.is_some());
    }
}
