//! Tiered compression (spec §4.B): age/importance/access-recency tier
//! classification, deterministic extractive summarization into Tier-2,
//! bullet digesting into Tier-3, and monthly gzip cold-storage archives.

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use rusqlite::OptionalExtension;

use crate::config::CompressionConfig;
use crate::error::{sanitize, ErrorKind, Result};
use crate::store::{ColdStorageRecord, ListFilters, Memory, MemoryUpdate, SortBy, Store, Tier};
use crate::tokenizer::tokenize;

/// Fixed emphasis markers used by the sentence scorer and the keyword-
/// paragraph excerpt picker (spec §4.B "important-keyword count").
/// Grounded on the teacher's `important_patterns` list in
/// `advanced/compression.rs::score_sentence`.
const IMPORTANT_KEYWORDS: &[&str] = &["must", "should", "always", "never", "important", "critical", "required"];

/// Where a memory belongs given its current age/importance/access
/// history (spec §4.B "Classifier").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TierDecision {
    Full,
    Summary,
    Bullets,
    Cold,
}

fn classify(memory: &Memory, now: DateTime<Utc>, config: &CompressionConfig) -> TierDecision {
    let age_days = (now - memory.created_at).num_days();
    let recently_accessed = (now - memory.last_accessed).num_days() < config.recent_access_days;
    if recently_accessed || memory.importance >= config.important_importance_floor || age_days < config.tier2_age_days {
        TierDecision::Full
    } else if age_days < config.tier3_age_days {
        TierDecision::Summary
    } else if age_days < config.cold_age_days {
        TierDecision::Bullets
    } else {
        TierDecision::Cold
    }
}

fn split_sentences(text: &str) -> Vec<&str> {
    text.split(['.', '!', '?']).map(|s| s.trim()).filter(|s| s.len() > 10).collect()
}

fn word_frequencies(text: &str) -> HashMap<String, usize> {
    let mut freq: HashMap<String, usize> = HashMap::new();
    for token in tokenize(text) {
        *freq.entry(token.text).or_insert(0) += 1;
    }
    freq
}

/// (count of recurring domain terms) + (position bonus of 2 for
/// first/last) + (1 if contains digits) + (2 × important-keyword
/// count) — spec §4.B Tier-2 scoring formula.
fn score_sentence(sentence: &str, index: usize, total: usize, word_freq: &HashMap<String, usize>) -> f64 {
    let domain_terms =
        tokenize(sentence).iter().filter(|t| word_freq.get(&t.text).copied().unwrap_or(0) >= 2).count();
    let position_bonus = if total > 1 && (index == 0 || index + 1 == total) { 2.0 } else { 0.0 };
    let digit_bonus = if sentence.chars().any(|c| c.is_ascii_digit()) { 1.0 } else { 0.0 };
    let lower = sentence.to_lowercase();
    let important_count = IMPORTANT_KEYWORDS.iter().filter(|kw| lower.contains(*kw)).count();
    domain_terms as f64 + position_bonus + digit_bonus + 2.0 * important_count as f64
}

fn fenced_code_blocks(content: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut rest = content;
    while let Some(start) = rest.find("```") {
        let after_start = &rest[start + 3..];
        match after_start.find("```") {
            Some(end) => {
                blocks.push(format!("```{}```", &after_start[..end]));
                rest = &after_start[end + 3..];
            }
            None => break,
        }
    }
    blocks
}

fn bullet_list(content: &str) -> Option<String> {
    let lines: Vec<&str> =
        content.lines().filter(|l| { let t = l.trim_start(); t.starts_with("- ") || t.starts_with("* ") }).collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

fn keyword_paragraphs(content: &str) -> Vec<String> {
    content
        .split("\n\n")
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .filter(|p| {
            let lower = p.to_lowercase();
            IMPORTANT_KEYWORDS.iter().any(|kw| lower.contains(kw))
        })
        .map(|p| p.to_string())
        .collect()
}

/// Excerpts: up to 2 fenced code blocks, up to 1 bullet list, then
/// paragraphs containing important keywords (spec §4.B Tier-2).
fn extract_excerpts(content: &str) -> String {
    let mut parts: Vec<String> = fenced_code_blocks(content).into_iter().take(2).collect();
    if let Some(bullets) = bullet_list(content) {
        parts.push(bullets);
    }
    parts.extend(keyword_paragraphs(content));
    parts.join("\n\n")
}

/// Top-scored sentences (in original order) up to `summary_budget_chars`,
/// followed by the excerpts block.
fn build_tier2_summary(content: &str, config: &CompressionConfig) -> String {
    let sentences = split_sentences(content);
    let word_freq = word_frequencies(content);
    let mut scored: Vec<(usize, &str, f64)> =
        sentences.iter().enumerate().map(|(i, s)| (i, *s, score_sentence(s, i, sentences.len(), &word_freq))).collect();
    scored.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

    let mut summary = String::new();
    for (_, sentence, _) in &scored {
        let candidate = format!("{summary}{}. ", sentence.trim());
        if candidate.chars().count() > config.summary_budget_chars && !summary.is_empty() {
            break;
        }
        summary = candidate;
        if summary.chars().count() >= config.summary_budget_chars {
            break;
        }
    }
    if summary.chars().count() > config.summary_budget_chars {
        summary = summary.chars().take(config.summary_budget_chars).collect();
    }
    let summary = summary.trim().to_string();

    let excerpts = extract_excerpts(content);
    if excerpts.is_empty() {
        summary
    } else {
        format!("{summary}\n\n{excerpts}")
    }
}

/// Reduce an existing summary to at most `tier3_bullet_count` bullets,
/// each truncated to `tier3_bullet_max_chars` (spec §4.B Tier-3).
fn build_tier3_bullets(summary: &str, config: &CompressionConfig) -> String {
    let sentences = split_sentences(summary);
    let word_freq = word_frequencies(summary);
    let mut scored: Vec<(&str, f64)> =
        sentences.iter().enumerate().map(|(i, s)| (*s, score_sentence(s, i, sentences.len(), &word_freq))).collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    scored
        .into_iter()
        .take(config.tier3_bullet_count)
        .map(|(s, _)| {
            let truncated: String = s.trim().chars().take(config.tier3_bullet_max_chars).collect();
            format!("- {truncated}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Outcome of one `Compressor::run` call.
#[derive(Debug, Clone, Default)]
pub struct CompressionReport {
    pub examined: usize,
    pub moved_to_tier2: usize,
    pub moved_to_tier3: usize,
    pub archived_cold: usize,
    pub restored_to_tier1: usize,
    pub snapshot_path: Option<PathBuf>,
}

/// Tier classification, Tier-2/3 transformation, cold-storage archival,
/// and restore, rooted at the same directory the `Store` opened
/// (spec §4.B). Grounded in the teacher's `advanced/compression.rs`
/// (`MemoryCompressor`: sentence extraction/scoring/keyword list
/// shape), adapted from embeddings-based group compression to the
/// spec's deterministic per-memory classifier.
pub struct Compressor {
    root: PathBuf,
    config: CompressionConfig,
}

impl Compressor {
    pub fn new(root: impl Into<PathBuf>, config: CompressionConfig) -> Self {
        Self { root: root.into(), config }
    }

    /// Snapshot, classify every Tier-1..3 memory in the profile, apply
    /// whatever transform its new tier requires, and sweep anything
    /// past `cold_age_days` into a monthly gzip archive.
    pub fn run(&self, store: &Store, profile: &str) -> Result<CompressionReport> {
        let snapshot_path = self.snapshot(store)?;
        let now = Utc::now();
        let filters = ListFilters::default();
        let memories = store.list(profile, &filters, SortBy::CreatedAtAsc, i64::MAX as usize, 0)?;

        let mut report = CompressionReport { snapshot_path: Some(snapshot_path), ..Default::default() };
        for memory in &memories {
            report.examined += 1;
            match classify(memory, now, &self.config) {
                TierDecision::Full => {
                    if memory.tier != Tier::Full {
                        self.restore(store, profile, memory.id)?;
                        report.restored_to_tier1 += 1;
                    }
                }
                TierDecision::Summary => {
                    if memory.tier == Tier::Full {
                        self.apply_tier2(store, profile, memory, now)?;
                        report.moved_to_tier2 += 1;
                    }
                }
                TierDecision::Bullets => match memory.tier {
                    Tier::Full => {
                        let summary = self.apply_tier2(store, profile, memory, now)?;
                        self.apply_tier3(store, profile, memory.id, &summary)?;
                        report.moved_to_tier2 += 1;
                        report.moved_to_tier3 += 1;
                    }
                    Tier::Summary => {
                        let summary = memory.summary.clone().unwrap_or_else(|| memory.content.clone());
                        self.apply_tier3(store, profile, memory.id, &summary)?;
                        report.moved_to_tier3 += 1;
                    }
                    Tier::Bullets => {}
                },
                TierDecision::Cold => {
                    self.archive_cold(store, profile, memory, now)?;
                    report.archived_cold += 1;
                }
            }
        }
        Ok(report)
    }

    fn apply_tier2(&self, store: &Store, profile: &str, memory: &Memory, now: DateTime<Utc>) -> Result<String> {
        self.archive_original(store, memory.id, &memory.content, now)?;
        let summary = build_tier2_summary(&memory.content, &self.config);
        store.update(
            profile,
            memory.id,
            MemoryUpdate {
                content: Some(summary.clone()),
                summary: Some(Some(summary.clone())),
                tier: Some(Tier::Summary),
                ..Default::default()
            },
        )?;
        Ok(summary)
    }

    fn apply_tier3(&self, store: &Store, profile: &str, memory_id: i64, summary_source: &str) -> Result<()> {
        let bullets = build_tier3_bullets(summary_source, &self.config);
        store.update(
            profile,
            memory_id,
            MemoryUpdate {
                content: Some(bullets.clone()),
                summary: Some(Some(bullets)),
                tier: Some(Tier::Bullets),
                ..Default::default()
            },
        )
    }

    fn archive_original(&self, store: &Store, memory_id: i64, full_content: &str, now: DateTime<Utc>) -> Result<()> {
        let full_content = full_content.to_string();
        let now_str = now.to_rfc3339();
        store.with_writer(move |conn| {
            conn.execute(
                "INSERT INTO memory_archive (memory_id, full_content, archived_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(memory_id) DO UPDATE SET full_content = excluded.full_content, archived_at = excluded.archived_at",
                rusqlite::params![memory_id, full_content, now_str],
            )
        })
    }

    fn read_archived_content(&self, store: &Store, memory_id: i64) -> Result<Option<String>> {
        let conn = store.reader()?;
        conn.query_row(
            "SELECT full_content FROM memory_archive WHERE memory_id = ?1",
            rusqlite::params![memory_id],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(|e| ErrorKind::Internal(sanitize(e.to_string())))
    }

    /// Recover a memory's original content and return it to Tier-1.
    /// The archive row is left in place — harmless, and re-used as-is
    /// if the memory ages back into compression eligibility.
    pub fn restore(&self, store: &Store, profile: &str, memory_id: i64) -> Result<()> {
        let content = self
            .read_archived_content(store, memory_id)?
            .ok_or_else(|| ErrorKind::NotFound(format!("no archive found for memory {memory_id}")))?;
        store.update(
            profile,
            memory_id,
            MemoryUpdate { content: Some(content), summary: Some(None), tier: Some(Tier::Full), ..Default::default() },
        )
    }

    fn archive_cold(&self, store: &Store, profile: &str, memory: &Memory, now: DateTime<Utc>) -> Result<()> {
        let full_content = if memory.tier == Tier::Full {
            self.archive_original(store, memory.id, &memory.content, now)?;
            memory.content.clone()
        } else {
            self.read_archived_content(store, memory.id)?.unwrap_or_else(|| memory.content.clone())
        };
        let record = ColdStorageRecord {
            id: memory.id,
            content: full_content,
            tags: memory.tags.clone(),
            created_at: memory.created_at,
            archived_at: now,
        };
        self.append_cold_record(&record, now)?;
        store.delete(profile, memory.id)
    }

    fn cold_storage_dir(&self) -> PathBuf {
        self.root.join("cold")
    }

    fn append_cold_record(&self, record: &ColdStorageRecord, now: DateTime<Utc>) -> Result<()> {
        let dir = self.cold_storage_dir();
        fs::create_dir_all(&dir).map_err(|e| ErrorKind::Internal(sanitize(e.to_string())))?;
        let path = dir.join(format!("archive-{}.json.gz", now.format("%Y-%m")));

        let mut records: Vec<ColdStorageRecord> = if path.exists() {
            let file = fs::File::open(&path).map_err(|e| ErrorKind::Internal(sanitize(e.to_string())))?;
            let mut decoder = flate2::read::GzDecoder::new(file);
            let mut buf = String::new();
            decoder.read_to_string(&mut buf).map_err(|e| ErrorKind::Internal(sanitize(e.to_string())))?;
            serde_json::from_str(&buf).unwrap_or_default()
        } else {
            Vec::new()
        };
        records.push(record.clone());

        let tmp_path = PathBuf::from(format!("{}.tmp", path.display()));
        let tmp_file = fs::File::create(&tmp_path).map_err(|e| ErrorKind::Internal(sanitize(e.to_string())))?;
        let mut encoder = GzEncoder::new(tmp_file, Compression::default());
        let json = serde_json::to_vec(&records).map_err(|e| ErrorKind::Internal(sanitize(e.to_string())))?;
        encoder.write_all(&json).map_err(|e| ErrorKind::Internal(sanitize(e.to_string())))?;
        encoder.finish().map_err(|e| ErrorKind::Internal(sanitize(e.to_string())))?;
        fs::rename(&tmp_path, &path).map_err(|e| ErrorKind::Internal(sanitize(e.to_string())))?;
        Ok(())
    }

    /// Checkpoint the WAL so the copy below is complete, then file-copy
    /// `memory.db` under a timestamped name and trim to the
    /// `backups_retained` most recent (spec §4.B "Safety").
    fn snapshot(&self, store: &Store) -> Result<PathBuf> {
        {
            let conn = store.reader()?;
            conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
                .map_err(|e| ErrorKind::Internal(sanitize(e.to_string())))?;
        }
        let backups_dir = self.root.join("backups");
        fs::create_dir_all(&backups_dir).map_err(|e| ErrorKind::Internal(sanitize(e.to_string())))?;
        let now = Utc::now();
        let dest = backups_dir.join(format!("pre-compress-{}.db", now.format("%Y%m%dT%H%M%S%3f")));
        fs::copy(self.root.join("memory.db"), &dest).map_err(|e| ErrorKind::Internal(sanitize(e.to_string())))?;
        self.trim_backups(&backups_dir)?;
        Ok(dest)
    }

    fn trim_backups(&self, backups_dir: &Path) -> Result<()> {
        let mut entries: Vec<PathBuf> = fs::read_dir(backups_dir)
            .map_err(|e| ErrorKind::Internal(sanitize(e.to_string())))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().map(|ext| ext == "db").unwrap_or(false))
            .collect();
        entries.sort();
        while entries.len() > self.config.backups_retained {
            let oldest = entries.remove(0);
            let _ = fs::remove_file(oldest);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::NewMemory;
    use chrono::Duration;

    fn setup() -> (tempfile::TempDir, Store, Compressor) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let store = Store::open(dir.path(), &config).unwrap();
        let compressor = Compressor::new(dir.path(), config.compression);
        (dir, store, compressor)
    }

    fn backdate(store: &Store, profile: &str, id: i64, days: i64) {
        let conn = store.reader().unwrap();
        let ts = (Utc::now() - Duration::days(days)).to_rfc3339();
        conn.execute(
            "UPDATE memories SET created_at = ?1, last_accessed = ?1 WHERE id = ?2 AND profile = ?3",
            rusqlite::params![ts, id, profile],
        )
        .unwrap();
    }

    #[test]
    fn recent_memory_stays_tier1() {
        let (_dir, store, compressor) = setup();
        let id = store.add("default", NewMemory { content: "fresh note".into(), ..Default::default() }).unwrap();
        let report = compressor.run(&store, "default").unwrap();
        assert_eq!(report.moved_to_tier2, 0);
        let memory = store.get("default", id).unwrap();
        assert_eq!(memory.tier, Tier::Full);
    }

    #[test]
    fn compression_round_trip_tier2_then_restore() {
        let (_dir, store, compressor) = setup();
        let content = "word ".repeat(2000);
        let id = store.add("default", NewMemory { content: content.clone(), importance: Some(5), ..Default::default() }).unwrap();
        backdate(&store, "default", id, 100);

        let report = compressor.run(&store, "default").unwrap();
        assert_eq!(report.moved_to_tier3, 1);
        let compressed = store.get("default", id).unwrap();
        assert_eq!(compressed.tier, Tier::Bullets);

        compressor.restore(&store, "default", id).unwrap();
        let restored = store.get("default", id).unwrap();
        assert_eq!(restored.tier, Tier::Full);
        assert_eq!(restored.content, content);
    }

    #[test]
    fn important_memory_is_never_compressed() {
        let (_dir, store, compressor) = setup();
        let id = store.add("default", NewMemory { content: "critical decision record".into(), importance: Some(9), ..Default::default() }).unwrap();
        backdate(&store, "default", id, 400);
        compressor.run(&store, "default").unwrap();
        let memory = store.get("default", id).unwrap();
        assert_eq!(memory.tier, Tier::Full);
    }

    #[test]
    fn recently_accessed_old_memory_stays_tier1() {
        let (_dir, store, compressor) = setup();
        let id = store.add("default", NewMemory { content: "old but touched recently".into(), ..Default::default() }).unwrap();
        backdate(&store, "default", id, 200);
        store.get("default", id).unwrap(); // bumps last_accessed back to now
        let report = compressor.run(&store, "default").unwrap();
        assert_eq!(report.moved_to_tier2, 0);
        assert_eq!(report.moved_to_tier3, 0);
    }

    #[test]
    fn tier2_summary_respects_budget() {
        let (_dir, store, compressor) = setup();
        let content: String = (0..200).map(|i| format!("Sentence number {i} about system design choices. ")).collect();
        let id = store.add("default", NewMemory { content, ..Default::default() }).unwrap();
        backdate(&store, "default", id, 45);
        compressor.run(&store, "default").unwrap();
        let memory = store.get("default", id).unwrap();
        assert_eq!(memory.tier, Tier::Summary);
        assert!(memory.summary.unwrap().chars().count() <= store.config().max_summary_bytes);
    }

    #[test]
    fn ancient_memory_is_archived_cold_and_removed() {
        let (_dir, store, compressor) = setup();
        let id = store.add("default", NewMemory { content: "ancient note to archive".into(), ..Default::default() }).unwrap();
        backdate(&store, "default", id, 400);
        let report = compressor.run(&store, "default").unwrap();
        assert_eq!(report.archived_cold, 1);
        assert!(store.get("default", id).is_err());
        assert!(compressor.cold_storage_dir().read_dir().unwrap().next().is_some());
    }

    #[test]
    fn snapshot_retention_keeps_only_configured_count() {
        let (_dir, store, compressor) = setup();
        for _ in 0..10 {
            compressor.run(&store, "default").unwrap();
        }
        let backups_dir = compressor.root.join("backups");
        let count = fs::read_dir(&backups_dir).unwrap().count();
        assert!(count <= compressor.config.backups_retained);
    }
}
