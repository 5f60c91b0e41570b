//! Keyword normalisation and extraction
//!
//! Text is split on every non-alphanumeric character, lower-cased, and
//! filtered: pieces shorter than [`MIN_KEYWORD_LEN`] characters and stop-words
//! are dropped. Document extraction and query parsing share this tokenizer so
//! that a term typed in a query normalises to the same keyword as the text
//! it was indexed from.

use std::collections::BTreeSet;

use cs_core::{CsError, CsResult};

/// Minimum keyword length, in characters
pub const MIN_KEYWORD_LEN: usize = 3;

const STOP_WORDS: &[&str] = &[
    "about", "above", "after", "again", "all", "also", "and", "any", "are", "because", "been",
    "before", "being", "below", "between", "both", "but", "can", "could", "did", "does", "doing",
    "down", "during", "each", "every", "few", "for", "from", "further", "get", "had", "has",
    "have", "having", "her", "here", "him", "his", "how", "into", "its", "just", "let", "like",
    "long", "look", "make", "many", "may", "might", "more", "most", "much", "must", "need", "not",
    "once", "one", "only", "other", "our", "out", "over", "own", "per", "said", "same", "say",
    "she", "should", "some", "still", "such", "than", "that", "the", "them", "then", "there",
    "these", "they", "this", "those", "through", "too", "under", "until", "upon", "use", "very",
    "via", "was", "were", "what", "when", "where", "which", "while", "who", "why", "will", "with",
    "without", "would", "you", "your",
];

fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.binary_search(&word).is_ok()
}

/// A normalised, indexable keyword: lower-case alphanumeric, at least
/// [`MIN_KEYWORD_LEN`] characters, not a stop-word.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Keyword(String);

impl Keyword {
    /// Normalise `raw` and accept it if it qualifies as a keyword.
    pub fn parse(raw: &str) -> Option<Keyword> {
        let word = normalize(raw);
        if word.chars().count() < MIN_KEYWORD_LEN || is_stop_word(&word) {
            return None;
        }
        Some(Keyword(word))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Lower-case and strip everything that is not alphanumeric.
fn normalize(raw: &str) -> String {
    raw.chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric())
        .collect()
}

fn split_words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
}

/// Extract the distinct keywords of a document body.
pub fn extract_keywords(text: &str) -> BTreeSet<Keyword> {
    split_words(text).filter_map(Keyword::parse).collect()
}

/// Parse a query into its keyword terms, preserving order and dropping repeats.
///
/// Unlike extraction, a query term that cannot be a keyword is an error
/// rather than silently ignored: it could never match anything.
pub fn parse_query_terms(query: &str) -> CsResult<Vec<Keyword>> {
    let mut terms: Vec<Keyword> = Vec::new();
    for word in split_words(query) {
        let normalized = normalize(word);
        if normalized.chars().count() < MIN_KEYWORD_LEN {
            return Err(CsError::InvalidQuery(format!(
                "term '{word}' is shorter than {MIN_KEYWORD_LEN} characters"
            )));
        }
        if is_stop_word(&normalized) {
            return Err(CsError::InvalidQuery(format!(
                "term '{word}' is a stop-word and is never indexed"
            )));
        }
        let keyword = Keyword(normalized);
        if !terms.contains(&keyword) {
            terms.push(keyword);
        }
    }
    if terms.is_empty() {
        return Err(CsError::InvalidQuery("query contains no keywords".into()));
    }
    Ok(terms)
}
