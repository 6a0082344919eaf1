//! Deterministic tokenization (spec §4.C).
//!
//! Lowercase, strip punctuation, collapse whitespace, split, drop
//! tokens outside `[2, 50)` chars, remove stop words, emit unigrams
//! plus (optionally) adjacent bigrams. Positions are retained so
//! phrase queries can be matched against the original order.

/// A single token with its position in the original (post-filter)
/// sequence, used for phrase-query matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub position: usize,
}

const MIN_TOKEN_LEN: usize = 2;
const MAX_TOKEN_LEN: usize = 50;

// Small fixed stop-word list. Deliberately short: the BM25/TF-IDF
// strategies already discount common terms via idf; this list exists
// only to keep the index from bloating with pure noise words.
const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "if", "then", "else", "of",
    "to", "in", "on", "at", "by", "for", "with", "about", "as", "is",
    "it", "its", "this", "that", "these", "those", "be", "been",
    "being", "am", "are", "was", "were", "do", "does", "did", "will",
    "would", "can", "could", "should", "may", "might", "must", "shall",
    "i", "you", "he", "she", "we", "they", "them", "his", "her", "our",
    "your", "their", "not", "no", "so", "than", "too", "very", "just",
];

fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

/// Lowercase and replace any non-alphanumeric character with a space.
fn normalize(text: &str) -> String {
    text.chars()
        .map(|c| {
            let lower = c.to_ascii_lowercase();
            if lower.is_ascii_alphanumeric() {
                lower
            } else {
                ' '
            }
        })
        .collect()
}

/// Tokenize `text` into unigrams, applying length and stop-word filters.
/// Positions are dense (0-based, post-filter) so adjacent positions are
/// truly adjacent in the filtered stream, which is what `bigrams` and
/// phrase matching rely on.
pub fn tokenize(text: &str) -> Vec<Token> {
    let normalized = normalize(text);
    normalized
        .split_whitespace()
        .filter(|w| w.len() >= MIN_TOKEN_LEN && w.len() < MAX_TOKEN_LEN)
        .filter(|w| !is_stop_word(w))
        .enumerate()
        .map(|(position, text)| Token { text: text.to_string(), position })
        .collect()
}

/// Build adjacent bigrams (joined by a single space) from an already
/// tokenized, position-ordered sequence.
pub fn bigrams(tokens: &[Token]) -> Vec<String> {
    tokens
        .windows(2)
        .filter(|pair| pair[1].position == pair[0].position + 1)
        .map(|pair| format!("{} {}", pair[0].text, pair[1].text))
        .collect()
}

/// Tokenize and append bigrams to the unigram term list, the combined
/// vocabulary TF-IDF/BM25 index over.
pub fn tokenize_with_bigrams(text: &str) -> Vec<String> {
    let unigrams = tokenize(text);
    let bi = bigrams(&unigrams);
    unigrams.into_iter().map(|t| t.text).chain(bi).collect()
}
