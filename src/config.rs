//! Tunable configuration (`config.json` on disk).
//!
//! Every field has a default so that older config files (missing newly
//! added knobs) still load — the same additive philosophy as the
//! store's forward-only schema migrations.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// BM25 ranking parameters (spec §4.D).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Config {
    pub k1: f64,
    pub b: f64,
}

impl Default for Bm25Config {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

/// Weights for the weighted-fusion hybrid strategy (spec §4.H).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionWeights {
    pub bm25: f64,
    pub semantic: f64,
    pub graph: f64,
}

impl Default for FusionWeights {
    // Spec §9 open question: the source disagreed between 0.4/0.3/0.3
    // and 0.7/0.3/0.0 across files; 0.4/0.3/0.3 is the documented default.
    fn default() -> Self {
        Self { bm25: 0.4, semantic: 0.3, graph: 0.3 }
    }
}

/// Query-optimizer tuning (spec §4.F). Expansion is opt-in: it widens
/// recall by adding co-occurring terms, which can also widen noise, so
/// it stays off until a caller turns it on for a given deployment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub expand_queries: bool,
    pub expansion_top_k: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { expand_queries: false, expansion_top_k: 2 }
    }
}

/// Result-cache tuning (spec §4.G).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 100, ttl_secs: 300 }
    }
}

/// Compression / tiering thresholds (spec §4.B).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub tier2_age_days: i64,
    pub tier3_age_days: i64,
    pub cold_age_days: i64,
    pub important_importance_floor: u8,
    pub recent_access_days: i64,
    pub summary_budget_chars: usize,
    pub tier3_bullet_count: usize,
    pub tier3_bullet_max_chars: usize,
    pub backups_retained: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            tier2_age_days: 30,
            tier3_age_days: 90,
            cold_age_days: 365,
            important_importance_floor: 8,
            recent_access_days: 7,
            summary_budget_chars: 1000,
            tier3_bullet_count: 5,
            tier3_bullet_max_chars: 80,
            backups_retained: 7,
        }
    }
}

/// Graph-engine tuning (spec §4.I).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub edge_weight_threshold: f64,
    pub similar_kind_threshold: f64,
    pub entity_top_k: usize,
    pub entity_weight_floor: f64,
    pub max_shared_entities: usize,
    pub hierarchical_subdivision_min_members: usize,
    pub max_depth: u8,
    pub incremental_rebuild_edge_threshold: usize,
    pub sample_cap: usize,
    pub leiden_seed: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            edge_weight_threshold: 0.3,
            similar_kind_threshold: 0.7,
            entity_top_k: 20,
            entity_weight_floor: 0.05,
            max_shared_entities: 10,
            hierarchical_subdivision_min_members: 30,
            max_depth: 3,
            incremental_rebuild_edge_threshold: 5,
            sample_cap: 10_000,
            leiden_seed: 42,
        }
    }
}

/// Pattern-learner tuning (spec §4.J).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerConfig {
    pub frequency_min_count: u32,
    pub frequency_min_share: f64,
    pub context_min_share: f64,
    pub terminology_min_examples: u32,
    pub recency_window_days: i64,
    pub recency_bonus: f64,
    pub distribution_span_days: i64,
    pub distribution_bonus: f64,
    pub low_evidence_floor: u32,
    pub low_evidence_penalty: f64,
    pub max_examples_per_pattern: usize,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            frequency_min_count: 3,
            frequency_min_share: 0.6,
            context_min_share: 0.65,
            terminology_min_examples: 3,
            recency_window_days: 30,
            recency_bonus: 1.2,
            distribution_span_days: 7,
            distribution_bonus: 1.1,
            low_evidence_floor: 3,
            low_evidence_penalty: 0.8,
            max_examples_per_pattern: 5,
        }
    }
}

/// Store / concurrency tuning (spec §4.A, §5).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub max_content_bytes: usize,
    pub max_summary_bytes: usize,
    pub max_tags: usize,
    pub max_tag_chars: usize,
    pub writer_queue_capacity: usize,
    pub reader_pool_size: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_content_bytes: 1024 * 1024,
            max_summary_bytes: 10 * 1024,
            max_tags: 20,
            max_tag_chars: 50,
            writer_queue_capacity: 1000,
            reader_pool_size: 50,
        }
    }
}

/// Orchestrator trust / rate-limit policy (spec §5, §4.K).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub min_trust_for_write: f64,
    pub writes_per_min: u32,
    pub reads_per_min: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            min_trust_for_write: 0.3,
            writes_per_min: 120,
            reads_per_min: 600,
        }
    }
}

/// Root configuration, mirrors `config.json` (spec §6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub bm25: Bm25Config,
    pub fusion_weights: FusionWeights,
    pub optimizer: OptimizerConfig,
    pub cache: CacheConfig,
    pub compression: CompressionConfig,
    pub graph: GraphConfig,
    pub learner: LearnerConfig,
    pub store: StoreConfig,
    pub policy: PolicyConfig,
}

impl Config {
    /// Load from a JSON file, falling back to defaults for any field
    /// missing from an older config file. Missing file => full default.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Ok(serde_json::from_str(&raw).unwrap_or_default()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Persist to a JSON file, pretty-printed for human inspection.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self).unwrap_or_default();
        std::fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_fusion_weights_match_documented_default() {
        let w = FusionWeights::default();
        assert_eq!((w.bm25, w.semantic, w.graph), (0.4, 0.3, 0.3));
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let path = Path::new("/nonexistent/path/config.json");
        let cfg = Config::load(path).unwrap();
        assert_eq!(cfg.bm25.k1, 1.5);
    }

    #[test]
    fn round_trip_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut cfg = Config::default();
        cfg.bm25.k1 = 2.0;
        cfg.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.bm25.k1, 2.0);
    }

    #[test]
    fn missing_fields_in_old_json_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"bm25": {"k1": 3.0}}"#).unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.bm25.k1, 3.0);
        assert_eq!(cfg.bm25.b, 0.75);
        assert_eq!(cfg.cache.capacity, 100);
    }
}
