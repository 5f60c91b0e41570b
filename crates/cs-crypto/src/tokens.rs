//! Deterministic search tokens for exact and fuzzy matching
//!
//! Three HMAC-SHA256 keys are expanded from `search_key` with HKDF, one per
//! token family. Exact tokens, n-gram tokens and keyword group hashes are
//! therefore unlinkable to each other: the server cannot tell which n-gram
//! group belongs to which exact token.
//!
//! N-grams are the overlapping length-n windows of the keyword (a keyword
//! shorter than n is one gram equal to itself), plus the boundary grams of
//! the keyword padded with n-1 `$` anchors on each side. The anchors weight
//! the first and last characters, which is what keeps a single-letter typo
//! above a 0.7 overlap threshold for typical keyword lengths.

use std::collections::BTreeSet;

use cs_core::{CsResult, KeywordHash, NgramEntry, Token};

use crate::kdf::SecretKey;
use crate::keys::{hkdf_derive, hmac_sha256};
use crate::keywords::Keyword;

const EXACT_TOKEN_INFO: &[u8] = b"ciphersearch:token:exact";
const NGRAM_TOKEN_INFO: &[u8] = b"ciphersearch:token:ngram";
const KEYWORD_GROUP_INFO: &[u8] = b"ciphersearch:keyword-group";

/// Boundary anchor. Never part of a normalised keyword, which is alphanumeric.
const ANCHOR: char = '$';

/// Produces opaque tokens from keywords. Holds only keys derived from `search_key`.
pub struct TokenGenerator {
    exact_key: SecretKey,
    ngram_key: SecretKey,
    group_key: SecretKey,
}

impl TokenGenerator {
    pub fn new(search_key: &SecretKey) -> CsResult<Self> {
        Ok(Self {
            exact_key: hkdf_derive(search_key, EXACT_TOKEN_INFO)?,
            ngram_key: hkdf_derive(search_key, NGRAM_TOKEN_INFO)?,
            group_key: hkdf_derive(search_key, KEYWORD_GROUP_INFO)?,
        })
    }

    /// Equality-matchable token for a whole keyword.
    pub fn exact_token(&self, keyword: &Keyword) -> CsResult<Token> {
        hmac_sha256(&self.exact_key, keyword.as_str().as_bytes()).map(Token::from_bytes)
    }

    /// Opaque grouping key shared by all n-gram tokens of `keyword`.
    pub fn keyword_hash(&self, keyword: &Keyword) -> CsResult<KeywordHash> {
        hmac_sha256(&self.group_key, keyword.as_str().as_bytes()).map(KeywordHash::from_bytes)
    }

    /// One token per distinct n-gram of `keyword`. `n` below 1 is treated as 1.
    pub fn ngram_tokens(&self, keyword: &Keyword, n: usize) -> CsResult<BTreeSet<Token>> {
        ngrams(keyword.as_str(), n)
            .iter()
            .map(|gram| hmac_sha256(&self.ngram_key, gram.as_bytes()).map(Token::from_bytes))
            .collect()
    }

    /// The n-gram index rows for one keyword.
    pub fn ngram_entry(&self, keyword: &Keyword, n: usize) -> CsResult<NgramEntry> {
        Ok(NgramEntry {
            source_keyword_hash: self.keyword_hash(keyword)?,
            tokens: self.ngram_tokens(keyword, n)?.into_iter().collect(),
        })
    }
}

impl std::fmt::Debug for TokenGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGenerator").finish_non_exhaustive()
    }
}

/// Distinct n-grams of `keyword`, boundary-anchored.
fn ngrams(keyword: &str, n: usize) -> BTreeSet<String> {
    let n = n.max(1);
    let chars: Vec<char> = keyword.chars().collect();
    let mut grams = BTreeSet::new();

    if chars.len() < n {
        grams.insert(keyword.to_string());
    } else {
        grams.extend(chars.windows(n).map(|w| w.iter().collect::<String>()));
    }

    let pad = n - 1;
    if pad > 0 {
        let padded: Vec<char> = std::iter::repeat(ANCHOR)
            .take(pad)
            .chain(chars.iter().copied())
            .chain(std::iter::repeat(ANCHOR).take(pad))
            .collect();
        grams.extend(
            padded
                .windows(n)
                .filter(|w| w.contains(&ANCHOR))
                .map(|w| w.iter().collect::<String>()),
        );
    }
    grams
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KEY_SIZE;
    use proptest::prelude::*;

    fn generator(seed: u8) -> TokenGenerator {
        TokenGenerator::new(&SecretKey::from_bytes([seed; KEY_SIZE])).unwrap()
    }

    fn kw(s: &str) -> Keyword {
        Keyword::parse(s).unwrap()
    }

    #[test]
    fn test_ngrams_interior_and_anchors() {
        let grams = ngrams("diabetes", 3);
        for g in ["dia", "iab", "abe", "bet", "ete", "tes"] {
            assert!(grams.contains(g), "missing interior gram {g}");
        }
        for g in ["$$d", "$di", "es$", "s$$"] {
            assert!(grams.contains(g), "missing anchor gram {g}");
        }
        assert_eq!(grams.len(), 10);
    }

    #[test]
    fn test_ngrams_short_keyword_is_one_gram() {
        let grams = ngrams("abc", 5);
        assert!(grams.contains("abc"));
        assert!(grams.iter().all(|g| g == "abc" || g.contains(ANCHOR)));
    }

    #[test]
    fn test_ngrams_unigram_has_no_anchors() {
        let grams = ngrams("abca", 1);
        let expected: BTreeSet<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        assert_eq!(grams, expected);
    }

    #[test]
    fn test_typo_overlap_fraction() {
        let stored = ngrams("diabetes", 3);
        let query = ngrams("diabtes", 3);
        let shared = query.intersection(&stored).count();
        let fraction = shared as f64 / query.len() as f64;
        assert!(fraction >= 0.7, "fraction {fraction} should clear 0.7");
        assert!(fraction < 0.95);
    }

    #[test]
    fn test_exact_token_deterministic() {
        let g = generator(1);
        assert_eq!(
            g.exact_token(&kw("diabetes")).unwrap(),
            g.exact_token(&kw("diabetes")).unwrap()
        );
    }

    #[test]
    fn test_exact_token_depends_on_key() {
        let a = generator(1).exact_token(&kw("diabetes")).unwrap();
        let b = generator(2).exact_token(&kw("diabetes")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_token_families_unlinkable() {
        let g = generator(3);
        let k = kw("metformin");
        let exact = g.exact_token(&k).unwrap();
        let group = g.keyword_hash(&k).unwrap();
        assert_ne!(exact.as_bytes(), group.as_bytes());
        assert!(!g.ngram_tokens(&k, 3).unwrap().contains(&exact));
    }

    #[test]
    fn test_ngram_entry_shares_group() {
        let g = generator(4);
        let entry = g.ngram_entry(&kw("heart"), 3).unwrap();
        assert_eq!(entry.source_keyword_hash, g.keyword_hash(&kw("heart")).unwrap());
        assert_eq!(entry.tokens.len(), ngrams("heart", 3).len());
    }

    #[test]
    fn test_no_collisions_in_sampled_corpus() {
        let g = generator(5);
        let mut seen = std::collections::HashSet::new();
        for i in 0..5000u32 {
            let word = format!("keyword{i}");
            let token = g.exact_token(&kw(&word)).unwrap();
            assert!(seen.insert(token), "collision at {word}");
        }
    }

    proptest! {
        #[test]
        fn prop_distinct_keywords_distinct_tokens(a in "[a-z]{3,16}", b in "[a-z]{3,16}") {
            let (Some(ka), Some(kb)) = (Keyword::parse(&a), Keyword::parse(&b)) else {
                return Ok(());
            };
            prop_assume!(ka != kb);
            let g = generator(6);
            prop_assert_ne!(g.exact_token(&ka).unwrap(), g.exact_token(&kb).unwrap());
        }

        #[test]
        fn prop_ngram_count_bounded(word in "[a-z]{3,20}", n in 1usize..6) {
            let grams = ngrams(&word, n);
            let len = word.chars().count();
            let interior = if len < n { 1 } else { len - n + 1 };
            prop_assert!(!grams.is_empty());
            prop_assert!(grams.len() <= interior + 2 * (n - 1));
        }
    }
}
