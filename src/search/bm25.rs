//! Okapi BM25 ranking over a hand-rolled inverted index (spec §4.D).
//!
//! Mirrors the teacher's "own the algorithm" posture (hybrid.rs,
//! activation.rs): the index is a plain `HashMap`, rebuilt from the
//! store's content on `rebuild`, and kept incrementally current via
//! `index_document`/`remove_document` on every store mutation.

use std::collections::HashMap;

use crate::tokenizer::tokenize_with_bigrams;

#[derive(Debug, Clone, Default)]
struct Posting {
    term_freq: HashMap<i64, u32>,
}

/// Inverted index plus the document-length statistics BM25 needs.
#[derive(Debug, Default)]
pub struct InvertedIndex {
    postings: HashMap<String, Posting>,
    doc_len: HashMap<i64, u32>,
    total_len: u64,
}

/// BM25 tuning (k1, b) — see spec §4.D and `crate::config::Bm25Config`.
#[derive(Debug, Clone, Copy)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

impl InvertedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn doc_count(&self) -> usize {
        self.doc_len.len()
    }

    fn avg_doc_len(&self) -> f64 {
        if self.doc_len.is_empty() {
            0.0
        } else {
            self.total_len as f64 / self.doc_len.len() as f64
        }
    }

    /// Document frequency (number of distinct documents containing `term`).
    pub fn doc_freq(&self, term: &str) -> usize {
        self.postings.get(term).map(|p| p.term_freq.len()).unwrap_or(0)
    }

    pub fn vocabulary(&self) -> impl Iterator<Item = &str> {
        self.postings.keys().map(|s| s.as_str())
    }

    /// Ids of every document containing `term` verbatim, used to
    /// post-filter `NOT`-excluded terms out of a result set.
    pub fn doc_ids(&self, term: &str) -> Vec<i64> {
        self.postings.get(term).map(|p| p.term_freq.keys().copied().collect()).unwrap_or_default()
    }

    /// Remove a document's contribution, if indexed.
    pub fn remove_document(&mut self, id: i64) {
        if let Some(len) = self.doc_len.remove(&id) {
            self.total_len = self.total_len.saturating_sub(len as u64);
        }
        self.postings.retain(|_, posting| {
            posting.term_freq.remove(&id);
            !posting.term_freq.is_empty()
        });
    }

    /// Index (or re-index) a document's full text.
    pub fn index_document(&mut self, id: i64, text: &str) {
        self.remove_document(id);
        let terms = tokenize_with_bigrams(text);
        self.doc_len.insert(id, terms.len() as u32);
        self.total_len += terms.len() as u64;
        for term in terms {
            self.postings.entry(term).or_default().term_freq.entry(id).and_modify(|c| *c += 1).or_insert(1);
        }
    }

    /// Rebuild the whole index from scratch given an iterator of
    /// `(id, text)` pairs, e.g. every memory in a profile.
    pub fn rebuild<'a>(&mut self, documents: impl Iterator<Item = (i64, &'a str)>) {
        self.postings.clear();
        self.doc_len.clear();
        self.total_len = 0;
        for (id, text) in documents {
            self.index_document(id, text);
        }
    }

    /// Score every document containing at least one query term, Okapi
    /// BM25, sorted descending, truncated to `limit`.
    pub fn search(&self, query: &str, limit: usize, params: Bm25Params) -> Vec<(i64, f64)> {
        let query_terms = tokenize_with_bigrams(query);
        if query_terms.is_empty() || self.doc_len.is_empty() {
            return Vec::new();
        }
        let n = self.doc_len.len() as f64;
        let avg_len = self.avg_doc_len().max(1.0);

        let mut scores: HashMap<i64, f64> = HashMap::new();
        for term in &query_terms {
            let Some(posting) = self.postings.get(term) else { continue };
            let df = posting.term_freq.len() as f64;
            // BM25 idf, clamped at 0 so very common terms never push a
            // document's score negative.
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln().max(0.0);
            for (&doc_id, &tf) in &posting.term_freq {
                let tf = tf as f64;
                let doc_len = *self.doc_len.get(&doc_id).unwrap_or(&0) as f64;
                let denom = tf + params.k1 * (1.0 - params.b + params.b * doc_len / avg_len);
                let term_score = idf * (tf * (params.k1 + 1.0)) / denom.max(1e-9);
                *scores.entry(doc_id).or_insert(0.0) += term_score;
            }
        }

        let mut ranked: Vec<(i64, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(limit);
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_index() -> InvertedIndex {
        let mut idx = InvertedIndex::new();
        idx.index_document(1, "Use React hooks for component state");
        idx.index_document(2, "Prefer PostgreSQL for relational data storage");
        idx.index_document(3, "React hooks simplify component lifecycle");
        idx
    }

    #[test]
    fn ranks_documents_containing_query_terms_above_others() {
        let idx = build_index();
        let results = idx.search("react hooks", 10, Bm25Params::default());
        let ids: Vec<i64> = results.iter().map(|(id, _)| *id).collect();
        assert!(ids.contains(&1));
        assert!(ids.contains(&3));
        assert!(!ids.contains(&2));
    }

    #[test]
    fn document_repeating_term_scores_higher_all_else_equal() {
        let mut idx = InvertedIndex::new();
        idx.index_document(1, "database database database connection");
        idx.index_document(2, "database connection once");
        let results = idx.search("database", 10, Bm25Params::default());
        let scores: HashMap<i64, f64> = results.into_iter().collect();
        assert!(scores[&1] > scores[&2]);
    }

    #[test]
    fn remove_document_drops_its_contribution() {
        let mut idx = build_index();
        idx.remove_document(1);
        assert_eq!(idx.doc_count(), 2);
        let results = idx.search("react hooks", 10, Bm25Params::default());
        assert!(results.iter().all(|(id, _)| *id != 1));
    }

    #[test]
    fn rebuild_replaces_prior_state() {
        let mut idx = build_index();
        idx.rebuild(vec![(9, "entirely new content about graphs")].into_iter());
        assert_eq!(idx.doc_count(), 1);
        assert_eq!(idx.doc_freq("react"), 0);
        assert_eq!(idx.doc_freq("graphs"), 1);
    }

    #[test]
    fn empty_query_returns_no_results() {
        let idx = build_index();
        assert!(idx.search("", 10, Bm25Params::default()).is_empty());
    }

    #[test]
    fn bigrams_are_part_of_the_vocabulary() {
        let idx = build_index();
        assert!(idx.doc_freq("react hooks") > 0);
    }
}
