//! Pattern learner (spec §4.J): derives preference/style/terminology
//! patterns from a profile's memory corpus with a Beta-Binomial
//! confidence posterior, persisted into `identity_patterns`/
//! `pattern_examples`.

use chrono::{DateTime, Duration, Utc};
use rusqlite::params;

use crate::config::LearnerConfig;
use crate::error::{sanitize, ErrorKind, Result};
use crate::search::hybrid::content_preview;
use crate::store::{ListFilters, SortBy, Store};

/// A category with a fixed set of named choices, each backed by a
/// keyword set (spec §4.J frequency analyzer, e.g. `frontend_framework`
/// -> react/vue/angular/svelte/nextjs). Grounded on the teacher's
/// category -> keyword-set shape in `codebase/patterns.rs`
/// (`PatternDetector::extract_keywords`), generalized from per-pattern
/// keyword lists to a fixed category table.
struct FrequencyCategory {
    category: &'static str,
    choices: &'static [(&'static str, &'static [&'static str])],
}

const FREQUENCY_CATEGORIES: &[FrequencyCategory] = &[
    FrequencyCategory {
        category: "frontend_framework",
        choices: &[
            ("React", &["react", "jsx", "usestate", "useeffect", "use client"]),
            ("Vue", &["vue", "vuex", "nuxt", "v-if", "v-for"]),
            ("Angular", &["angular", "ngmodule", "rxjs", "ngoninit"]),
            ("Svelte", &["svelte", "sveltekit"]),
            ("Next.js", &["nextjs", "next.js", "getserversideprops"]),
        ],
    },
    FrequencyCategory {
        category: "backend_language",
        choices: &[
            ("Rust", &["rust", "cargo", "tokio", "borrow checker"]),
            ("Go", &["golang", "goroutine", "go mod"]),
            ("Python", &["python", "django", "flask", "fastapi"]),
            ("TypeScript", &["typescript", "ts-node", "tsconfig"]),
        ],
    },
];

/// A binary style axis (spec §4.J context analyzer): two poles, each
/// with its own keyword set, whichever dominates enough emits a
/// candidate.
struct ContextAxis {
    category: &'static str,
    pole_a: (&'static str, &'static [&'static str]),
    pole_b: (&'static str, &'static [&'static str]),
}

const CONTEXT_AXES: &[ContextAxis] = &[
    ContextAxis {
        category: "optimization_priority",
        pole_a: ("performance", &["performance", "fast", "speed", "latency", "throughput", "benchmark"]),
        pole_b: ("readability", &["readability", "readable", "clean code", "maintainable", "clarity"]),
    },
    ContextAxis {
        category: "testing_style",
        pole_a: ("unit tests", &["unit test", "mock", "stub", "test isolation"]),
        pole_b: ("integration tests", &["integration test", "end-to-end", "e2e", "real database"]),
    },
];

/// A polysemous term whose intended meaning is disambiguated from
/// co-occurring words in a window around each mention (spec §4.J
/// terminology analyzer).
struct TerminologyTerm {
    term: &'static str,
    category: &'static str,
    meanings: &'static [(&'static str, &'static [&'static str])],
}

const TERMINOLOGY_TERMS: &[TerminologyTerm] = &[
    TerminologyTerm {
        term: "optimize",
        category: "optimize_meaning",
        meanings: &[
            ("performance tuning", &["speed", "latency", "cache", "faster", "throughput", "benchmark"]),
            ("code simplification", &["readability", "simplify", "clean", "refactor", "clarity"]),
        ],
    },
    TerminologyTerm {
        term: "clean",
        category: "clean_meaning",
        meanings: &[
            ("removing unused code", &["dead code", "unused", "remove", "delete", "prune"]),
            ("improving style", &["readability", "format", "lint", "style", "consistent"]),
        ],
    },
];

const WINDOW_RADIUS: usize = 50;

/// One supporting mention for a candidate pattern.
#[derive(Debug, Clone)]
struct Evidence {
    memory_id: i64,
    created_at: DateTime<Utc>,
    excerpt: String,
    relevance: f64,
}

/// A pattern about to be scored and persisted: `e` successes out of
/// `n` trials, with the winning side's supporting evidence attached.
struct Candidate {
    pattern_type: &'static str,
    category: String,
    value: String,
    e: usize,
    n: usize,
    evidence: Vec<Evidence>,
}

fn char_boundary_window(content: &str, idx: usize, term_len: usize, radius: usize) -> String {
    let mut start = idx.saturating_sub(radius);
    while start < content.len() && !content.is_char_boundary(start) {
        start += 1;
    }
    let mut end = (idx + term_len + radius).min(content.len());
    while end > start && !content.is_char_boundary(end) {
        end -= 1;
    }
    content[start..end].to_string()
}

fn frequency_analyzer(corpus: &[(i64, String, DateTime<Utc>)], config: &LearnerConfig) -> Vec<Candidate> {
    let mut out = Vec::new();
    for cat in FREQUENCY_CATEGORIES {
        let mut by_choice: Vec<(&str, Vec<Evidence>)> = cat.choices.iter().map(|(name, _)| (*name, Vec::new())).collect();
        for (id, content, created_at) in corpus {
            let lower = content.to_lowercase();
            for (idx, (_, keywords)) in cat.choices.iter().enumerate() {
                if keywords.iter().any(|kw| lower.contains(kw)) {
                    by_choice[idx].1.push(Evidence {
                        memory_id: *id,
                        created_at: *created_at,
                        excerpt: content_preview(content, 160),
                        relevance: 1.0,
                    });
                }
            }
        }
        let total: usize = by_choice.iter().map(|(_, ev)| ev.len()).sum();
        if total == 0 {
            continue;
        }
        by_choice.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
        let (top_name, top_evidence) = &by_choice[0];
        let e = top_evidence.len();
        if e < config.frequency_min_count as usize {
            continue;
        }
        if e as f64 / total as f64 < config.frequency_min_share {
            continue;
        }
        let value = match by_choice.get(1).filter(|(_, ev)| !ev.is_empty()) {
            Some((second_name, _)) => format!("{top_name} over {second_name}"),
            None => top_name.to_string(),
        };
        out.push(Candidate {
            pattern_type: "preference",
            category: cat.category.to_string(),
            value,
            e,
            n: total,
            evidence: top_evidence.clone(),
        });
    }
    out
}

fn context_analyzer(corpus: &[(i64, String, DateTime<Utc>)], config: &LearnerConfig) -> Vec<Candidate> {
    let mut out = Vec::new();
    for axis in CONTEXT_AXES {
        let mut evidence_a = Vec::new();
        let mut evidence_b = Vec::new();
        for (id, content, created_at) in corpus {
            let lower = content.to_lowercase();
            let ev = || Evidence { memory_id: *id, created_at: *created_at, excerpt: content_preview(content, 160), relevance: 1.0 };
            if axis.pole_a.1.iter().any(|kw| lower.contains(kw)) {
                evidence_a.push(ev());
            }
            if axis.pole_b.1.iter().any(|kw| lower.contains(kw)) {
                evidence_b.push(ev());
            }
        }
        let total = evidence_a.len() + evidence_b.len();
        if total == 0 {
            continue;
        }
        let (dominant_name, dominant_evidence, other_name) = if evidence_a.len() >= evidence_b.len() {
            (axis.pole_a.0, &evidence_a, axis.pole_b.0)
        } else {
            (axis.pole_b.0, &evidence_b, axis.pole_a.0)
        };
        let e = dominant_evidence.len();
        if e == 0 || e as f64 / total as f64 < config.context_min_share {
            continue;
        }
        out.push(Candidate {
            pattern_type: "style",
            category: axis.category.to_string(),
            value: format!("{dominant_name} over {other_name}"),
            e,
            n: total,
            evidence: dominant_evidence.clone(),
        });
    }
    out
}

fn terminology_analyzer(corpus: &[(i64, String, DateTime<Utc>)], config: &LearnerConfig) -> Vec<Candidate> {
    let mut out = Vec::new();
    for term_def in TERMINOLOGY_TERMS {
        let mut by_meaning: Vec<(&str, Vec<Evidence>)> = term_def.meanings.iter().map(|(name, _)| (*name, Vec::new())).collect();
        let mut total_examples = 0usize;
        for (id, content, created_at) in corpus {
            let lower = content.to_lowercase();
            let Some(idx) = lower.find(term_def.term) else { continue };
            total_examples += 1;
            let window = char_boundary_window(content, idx, term_def.term.len(), WINDOW_RADIUS);
            let window_lower = window.to_lowercase();

            let mut best: Option<(usize, usize)> = None; // (meaning index, hit count)
            for (meaning_idx, (_, triggers)) in term_def.meanings.iter().enumerate() {
                let hits = triggers.iter().filter(|t| window_lower.contains(*t)).count();
                if hits > 0 && best.map(|(_, best_hits)| hits > best_hits).unwrap_or(true) {
                    best = Some((meaning_idx, hits));
                }
            }
            if let Some((meaning_idx, hits)) = best {
                by_meaning[meaning_idx].1.push(Evidence {
                    memory_id: *id,
                    created_at: *created_at,
                    excerpt: window,
                    relevance: hits as f64,
                });
            }
        }
        if total_examples == 0 {
            continue;
        }
        by_meaning.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
        let (meaning_name, meaning_evidence) = &by_meaning[0];
        let e = meaning_evidence.len();
        if e < config.terminology_min_examples as usize {
            continue;
        }
        out.push(Candidate {
            pattern_type: "terminology",
            category: term_def.category.to_string(),
            value: format!("\"{}\" means {}", term_def.term, meaning_name),
            e,
            n: total_examples,
            evidence: meaning_evidence.clone(),
        });
    }
    out
}

/// Beta(α=1+e, β=1+(n−e)) posterior mean, adjusted by a recency bonus
/// (evidence skewed recent) and a distribution factor (evidence either
/// too sparse to trust or spread convincingly over time), clamped to
/// [0, 1] (spec §4.J; clamp decision recorded in DESIGN.md).
fn confidence(candidate: &Candidate, config: &LearnerConfig, now: DateTime<Utc>) -> f64 {
    let e = candidate.e as f64;
    let n = candidate.n as f64;
    let alpha = 1.0 + e;
    let beta = 1.0 + (n - e).max(0.0);
    let posterior_mean = alpha / (alpha + beta);

    let recency_window = Duration::days(config.recency_window_days);
    let recent = candidate.evidence.iter().filter(|ev| now.signed_duration_since(ev.created_at) <= recency_window).count();
    let recency_factor = if !candidate.evidence.is_empty() && recent as f64 / candidate.evidence.len() as f64 > 0.5 {
        config.recency_bonus
    } else {
        1.0
    };

    let distribution_factor = if candidate.evidence.len() < config.low_evidence_floor as usize {
        config.low_evidence_penalty
    } else {
        let earliest = candidate.evidence.iter().map(|ev| ev.created_at).min().unwrap();
        let latest = candidate.evidence.iter().map(|ev| ev.created_at).max().unwrap();
        if (latest - earliest).num_days() > config.distribution_span_days {
            config.distribution_bonus
        } else {
            1.0
        }
    };

    (posterior_mean * recency_factor * distribution_factor).clamp(0.0, 1.0)
}

/// A persisted learned pattern, as stored in `identity_patterns`.
#[derive(Debug, Clone)]
pub struct LearnedPattern {
    pub id: i64,
    pub pattern_type: String,
    pub category: String,
    pub value: String,
    pub confidence: f64,
    pub evidence_count: u32,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

fn row_to_pattern(row: &rusqlite::Row) -> rusqlite::Result<LearnedPattern> {
    Ok(LearnedPattern {
        id: row.get(0)?,
        pattern_type: row.get(1)?,
        category: row.get(2)?,
        value: row.get(3)?,
        confidence: row.get(4)?,
        evidence_count: row.get::<_, i64>(5)? as u32,
        first_seen: row.get(6)?,
        last_updated: row.get(7)?,
    })
}

/// Derives and persists preference/style/terminology patterns for a
/// profile's memory corpus (spec §4.J).
pub struct PatternLearner {
    config: LearnerConfig,
}

impl PatternLearner {
    pub fn new(config: LearnerConfig) -> Self {
        Self { config }
    }

    /// Run every analyzer over the profile's current corpus and
    /// upsert whatever candidates clear their thresholds. Returns the
    /// number of patterns written (new or refreshed).
    pub fn update(&self, store: &Store, profile: &str) -> Result<usize> {
        let filters = ListFilters::default();
        let memories = store.list(profile, &filters, SortBy::CreatedAtDesc, i64::MAX as usize, 0)?;
        let corpus: Vec<(i64, String, DateTime<Utc>)> =
            memories.into_iter().map(|m| (m.id, m.content, m.created_at)).collect();

        let mut candidates = frequency_analyzer(&corpus, &self.config);
        candidates.extend(context_analyzer(&corpus, &self.config));
        candidates.extend(terminology_analyzer(&corpus, &self.config));

        let now = Utc::now();
        let max_examples = self.config.max_examples_per_pattern;
        let profile = profile.to_string();
        let count = candidates.len();

        let rows: Vec<(String, String, String, f64, i64, Vec<Evidence>)> = candidates
            .into_iter()
            .map(|c| {
                let score = confidence(&c, &self.config, now);
                (c.pattern_type.to_string(), c.category, c.value, score, c.e as i64, c.evidence)
            })
            .collect();

        store.with_writer(move |conn| {
            let tx = conn.unchecked_transaction()?;
            for (pattern_type, category, value, score, evidence_count, mut evidence) in rows {
                tx.execute(
                    "INSERT INTO identity_patterns (profile, type, category, value, confidence, evidence_count, first_seen, last_updated)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                     ON CONFLICT(profile, type, category, value) DO UPDATE SET
                         confidence = excluded.confidence,
                         evidence_count = excluded.evidence_count,
                         last_updated = excluded.last_updated",
                    params![profile, pattern_type, category, value, score, evidence_count, now.to_rfc3339()],
                )?;
                let pattern_id = conn.last_insert_rowid();

                tx.execute("DELETE FROM pattern_examples WHERE pattern_id = ?1", params![pattern_id])?;
                evidence.sort_by(|a, b| b.relevance.partial_cmp(&a.relevance).unwrap_or(std::cmp::Ordering::Equal));
                for ev in evidence.into_iter().take(max_examples) {
                    tx.execute(
                        "INSERT OR IGNORE INTO pattern_examples (pattern_id, memory_id, excerpt, relevance) VALUES (?1, ?2, ?3, ?4)",
                        params![pattern_id, ev.memory_id, ev.excerpt, ev.relevance],
                    )?;
                }
            }
            tx.commit()?;
            Ok(())
        })?;

        Ok(count)
    }

    pub fn patterns(&self, store: &Store, profile: &str, min_confidence: f64) -> Result<Vec<LearnedPattern>> {
        let conn = store.reader()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, type, category, value, confidence, evidence_count, first_seen, last_updated
                 FROM identity_patterns WHERE profile = ?1 AND confidence >= ?2 ORDER BY confidence DESC",
            )
            .map_err(|e| ErrorKind::Internal(sanitize(e.to_string())))?;
        let rows = stmt
            .query_map(params![profile, min_confidence], row_to_pattern)
            .map_err(|e| ErrorKind::Internal(sanitize(e.to_string())))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| ErrorKind::Internal(sanitize(e.to_string())))?);
        }
        Ok(out)
    }

    /// Formatted block suitable for injection into an AI tool prompt
    /// (spec §4.J `identity_context`), grouped by pattern type.
    pub fn identity_context(&self, store: &Store, profile: &str, min_confidence: f64) -> Result<String> {
        let patterns = self.patterns(store, profile, min_confidence)?;
        if patterns.is_empty() {
            return Ok(String::new());
        }
        let mut out = String::new();
        for (section, pattern_type) in [("Preferences", "preference"), ("Style", "style"), ("Terminology", "terminology")] {
            let matching: Vec<&LearnedPattern> = patterns.iter().filter(|p| p.pattern_type == pattern_type).collect();
            if matching.is_empty() {
                continue;
            }
            out.push_str(&format!("## {section}\n"));
            for pattern in matching {
                out.push_str(&format!(
                    "- {} (confidence {:.2}, {} examples)\n",
                    pattern.value, pattern.confidence, pattern.evidence_count
                ));
            }
            out.push('\n');
        }
        Ok(out.trim_end().to_string())
    }

    /// Apply a user override: replace a pattern's value, or delete it
    /// outright when `new_value` is `None`.
    pub fn correct(&self, store: &Store, pattern_id: i64, new_value: Option<String>) -> Result<()> {
        let affected = match new_value {
            Some(value) => {
                let now = Utc::now().to_rfc3339();
                store.with_writer(move |conn| {
                    conn.execute(
                        "UPDATE identity_patterns SET value = ?1, last_updated = ?2 WHERE id = ?3",
                        params![value, now, pattern_id],
                    )
                })?
            }
            None => store.with_writer(move |conn| conn.execute("DELETE FROM identity_patterns WHERE id = ?1", params![pattern_id]))?,
        };
        if affected == 0 {
            return Err(ErrorKind::NotFound(format!("pattern {pattern_id} not found")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::NewMemory;

    fn setup() -> (tempfile::TempDir, Store, PatternLearner) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let store = Store::open(dir.path(), &config).unwrap();
        let learner = PatternLearner::new(config.learner);
        (dir, store, learner)
    }

    #[test]
    fn frequency_analyzer_prefers_dominant_framework() {
        let (_dir, store, learner) = setup();
        for _ in 0..7 {
            store.add("default", NewMemory { content: "using react hooks for this component".into(), ..Default::default() }).unwrap();
        }
        for _ in 0..3 {
            store.add("default", NewMemory { content: "this vue component uses vuex".into(), ..Default::default() }).unwrap();
        }
        learner.update(&store, "default").unwrap();

        let patterns = learner.patterns(&store, "default", 0.0).unwrap();
        let framework = patterns.iter().find(|p| p.category == "frontend_framework").unwrap();
        assert_eq!(framework.value, "React over Vue");
        assert_eq!(framework.evidence_count, 7);
        assert!(framework.confidence > 0.5 && framework.confidence <= 1.0);
    }

    #[test]
    fn below_threshold_frequency_is_not_emitted() {
        let (_dir, store, learner) = setup();
        store.add("default", NewMemory { content: "one react mention".into(), ..Default::default() }).unwrap();
        store.add("default", NewMemory { content: "one vue mention".into(), ..Default::default() }).unwrap();
        learner.update(&store, "default").unwrap();

        let patterns = learner.patterns(&store, "default", 0.0).unwrap();
        assert!(patterns.iter().all(|p| p.category != "frontend_framework"));
    }

    #[test]
    fn context_analyzer_detects_dominant_axis() {
        let (_dir, store, learner) = setup();
        for _ in 0..5 {
            store
                .add("default", NewMemory { content: "prioritize performance and latency over everything else".into(), ..Default::default() })
                .unwrap();
        }
        store.add("default", NewMemory { content: "readability matters here too".into(), ..Default::default() }).unwrap();
        learner.update(&store, "default").unwrap();

        let patterns = learner.patterns(&store, "default", 0.0).unwrap();
        let axis = patterns.iter().find(|p| p.category == "optimization_priority").unwrap();
        assert_eq!(axis.value, "performance over readability");
    }

    #[test]
    fn terminology_analyzer_picks_dominant_meaning() {
        let (_dir, store, learner) = setup();
        for _ in 0..4 {
            store
                .add("default", NewMemory { content: "we need to optimize for speed and lower latency in the hot path".into(), ..Default::default() })
                .unwrap();
        }
        learner.update(&store, "default").unwrap();

        let patterns = learner.patterns(&store, "default", 0.0).unwrap();
        let meaning = patterns.iter().find(|p| p.category == "optimize_meaning").unwrap();
        assert_eq!(meaning.value, "\"optimize\" means performance tuning");
    }

    #[test]
    fn confidence_never_exceeds_one_even_with_every_bonus_applied() {
        let config = LearnerConfig::default();
        let now = Utc::now();
        let evidence: Vec<Evidence> = (0..20)
            .map(|i| Evidence { memory_id: i, created_at: now - Duration::days(1), excerpt: String::new(), relevance: 1.0 })
            .collect();
        let candidate = Candidate {
            pattern_type: "preference",
            category: "x".into(),
            value: "y".into(),
            e: 20,
            n: 20,
            evidence,
        };
        let score = confidence(&candidate, &config, now);
        assert!(score <= 1.0);
    }

    #[test]
    fn sparse_evidence_is_penalized() {
        let config = LearnerConfig::default();
        let now = Utc::now();
        let sparse = Candidate {
            pattern_type: "preference",
            category: "x".into(),
            value: "y".into(),
            e: 2,
            n: 2,
            evidence: vec![
                Evidence { memory_id: 1, created_at: now - Duration::days(40), excerpt: String::new(), relevance: 1.0 },
                Evidence { memory_id: 2, created_at: now - Duration::days(41), excerpt: String::new(), relevance: 1.0 },
            ],
        };
        let rich = Candidate {
            pattern_type: "preference",
            category: "x".into(),
            value: "y".into(),
            e: 5,
            n: 5,
            evidence: (0..5)
                .map(|i| Evidence { memory_id: i, created_at: now - Duration::days(40), excerpt: String::new(), relevance: 1.0 })
                .collect(),
        };
        assert!(confidence(&sparse, &config, now) < confidence(&rich, &config, now));
    }

    #[test]
    fn correct_overrides_value_and_delete_removes_pattern() {
        let (_dir, store, learner) = setup();
        for _ in 0..7 {
            store.add("default", NewMemory { content: "react hooks everywhere".into(), ..Default::default() }).unwrap();
        }
        learner.update(&store, "default").unwrap();
        let pattern = learner.patterns(&store, "default", 0.0).unwrap().into_iter().find(|p| p.category == "frontend_framework").unwrap();

        learner.correct(&store, pattern.id, Some("React, always".to_string())).unwrap();
        let updated = learner.patterns(&store, "default", 0.0).unwrap().into_iter().find(|p| p.id == pattern.id).unwrap();
        assert_eq!(updated.value, "React, always");

        learner.correct(&store, pattern.id, None).unwrap();
        assert!(learner.patterns(&store, "default", 0.0).unwrap().iter().all(|p| p.id != pattern.id));
    }

    #[test]
    fn identity_context_groups_by_type() {
        let (_dir, store, learner) = setup();
        for _ in 0..7 {
            store.add("default", NewMemory { content: "react hooks everywhere".into(), ..Default::default() }).unwrap();
        }
        learner.update(&store, "default").unwrap();
        let text = learner.identity_context(&store, "default", 0.0).unwrap();
        assert!(text.contains("## Preferences"));
        assert!(text.contains("React"));
    }

    #[test]
    fn profiles_do_not_leak_patterns() {
        let (_dir, store, learner) = setup();
        for _ in 0..7 {
            store.add("work", NewMemory { content: "react hooks everywhere".into(), ..Default::default() }).unwrap();
        }
        learner.update(&store, "work").unwrap();
        let personal_patterns = learner.patterns(&store, "personal", 0.0).unwrap();
        assert!(personal_patterns.is_empty());
    }
}
