//! Core data types (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Compression tier (spec §3, §4.B, glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Tier {
    /// Full content, no summary.
    Full = 1,
    /// Summary + excerpts; original content moved to the archive table.
    Summary = 2,
    /// Bullet-point digest of the summary; archive record retained.
    Bullets = 3,
}

impl Tier {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Tier::Full),
            2 => Some(Tier::Summary),
            3 => Some(Tier::Bullets),
            _ => None,
        }
    }
}

/// The primary entity (spec §3 "Memory").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: i64,
    pub profile: String,
    pub content: String,
    pub summary: Option<String>,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
    pub project: Option<String>,
    pub importance: u8,
    pub tier: Tier,
    pub parent_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
}

/// Inputs accepted by `Store::add` (spec §4.A).
#[derive(Debug, Clone, Default)]
pub struct NewMemory {
    pub content: String,
    pub tags: Vec<String>,
    pub project: Option<String>,
    pub importance: Option<u8>,
    pub parent_id: Option<i64>,
    pub metadata: Option<serde_json::Value>,
}

/// Fields accepted by `Store::update` — `None` means "leave unchanged".
#[derive(Debug, Clone, Default)]
pub struct MemoryUpdate {
    pub content: Option<String>,
    pub summary: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
    pub project: Option<Option<String>>,
    pub importance: Option<u8>,
    pub tier: Option<Tier>,
    pub metadata: Option<serde_json::Value>,
}

/// One-to-one archive row for a memory whose tier >= 2 (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub memory_id: i64,
    pub full_content: String,
    pub archived_at: DateTime<Utc>,
}

/// A single record inside a monthly cold-storage gzip file (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColdStorageRecord {
    pub id: i64,
    pub content: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub archived_at: DateTime<Utc>,
}

/// Sort order for `Store::list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    CreatedAtDesc,
    CreatedAtAsc,
    ImportanceDesc,
    LastAccessedDesc,
}

/// Filter set for `Store::list` (spec §4.A).
#[derive(Debug, Clone, Default)]
pub struct ListFilters {
    pub tag: Option<String>,
    pub project: Option<String>,
    pub min_importance: Option<u8>,
    pub tier: Option<Tier>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_round_trips_through_u8() {
        for t in [Tier::Full, Tier::Summary, Tier::Bullets] {
            assert_eq!(Tier::from_u8(t.as_u8()), Some(t));
        }
    }

    #[test]
    fn invalid_tier_byte_is_none() {
        assert_eq!(Tier::from_u8(0), None);
        assert_eq!(Tier::from_u8(4), None);
    }
}
