use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CsError, CsResult};
use crate::TOKEN_SIZE;

/// Stable, caller-chosen document identifier. Stored in the clear and bound
/// into each ciphertext as associated data.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    /// Trim and validate a caller-supplied identifier.
    pub fn new(id: impl Into<String>) -> CsResult<Self> {
        let id = DocId(id.into().trim().to_string());
        id.validate()?;
        Ok(id)
    }

    /// Reject ids that are empty or padded with whitespace.
    ///
    /// The `From` conversions skip this check; anything that persists a
    /// document calls it.
    pub fn validate(&self) -> CsResult<()> {
        if self.0.is_empty() || self.0.trim() != self.0 {
            return Err(CsError::InvalidDocId(self.0.clone()));
        }
        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl From<&str> for DocId {
    fn from(s: &str) -> Self {
        DocId(s.to_string())
    }
}

impl From<String> for DocId {
    fn from(s: String) -> Self {
        DocId(s)
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque search token: a keyed one-way hash of a keyword or n-gram.
///
/// The server compares tokens for equality and nothing else.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Token([u8; TOKEN_SIZE]);

impl Token {
    pub fn from_bytes(bytes: [u8; TOKEN_SIZE]) -> Self {
        Self(bytes)
    }

    /// Rebuild a token read back from storage; `None` if the length is wrong.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; TOKEN_SIZE] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; TOKEN_SIZE] {
        &self.0
    }

    /// URL-safe base64 rendering, used by the audit dump and CLI output.
    pub fn to_base64(&self) -> String {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use base64::Engine;
        URL_SAFE_NO_PAD.encode(self.0)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b64 = self.to_base64();
        write!(f, "Token({}…)", &b64[..12])
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

/// Opaque grouping key shared by every n-gram token of one keyword.
///
/// Lets the server count per-keyword n-gram overlap without learning the keyword.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeywordHash(Token);

impl KeywordHash {
    pub fn from_bytes(bytes: [u8; TOKEN_SIZE]) -> Self {
        Self(Token::from_bytes(bytes))
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        Token::from_slice(bytes).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; TOKEN_SIZE] {
        self.0.as_bytes()
    }

    pub fn to_base64(&self) -> String {
        self.0.to_base64()
    }
}

impl fmt::Debug for KeywordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeywordHash({}…)", &self.0.to_base64()[..12])
    }
}

/// The n-gram tokens of one indexed keyword, sharing a grouping key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NgramEntry {
    pub source_keyword_hash: KeywordHash,
    pub tokens: Vec<Token>,
}

/// Search mode requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Exact,
    And,
    Or,
    Fuzzy,
}

impl FromStr for SearchMode {
    type Err = CsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(SearchMode::Exact),
            "and" => Ok(SearchMode::And),
            "or" => Ok(SearchMode::Or),
            "fuzzy" => Ok(SearchMode::Fuzzy),
            other => Err(CsError::InvalidQuery(format!(
                "unknown search mode '{other}' (expected exact, and, or, fuzzy)"
            ))),
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SearchMode::Exact => "exact",
            SearchMode::And => "and",
            SearchMode::Or => "or",
            SearchMode::Fuzzy => "fuzzy",
        };
        f.write_str(s)
    }
}

/// Boolean combinator for multi-term exact matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TermOperator {
    /// Intersection of the per-token matches
    And,
    /// Union of the per-token matches
    Or,
}

/// Everything the server needs to persist one uploaded document.
#[derive(Debug, Clone)]
pub struct StoreRequest {
    pub doc_id: DocId,
    pub encrypted_content: Vec<u8>,
    pub nonce: Vec<u8>,
    pub keyword_count: usize,
    pub exact_tokens: Vec<Token>,
    pub ngram_entries: Vec<NgramEntry>,
}

/// Ciphertext returned verbatim by the server for client-side decryption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    pub doc_id: DocId,
    pub encrypted_content: Vec<u8>,
    pub nonce: Vec<u8>,
}

/// A full document row as held by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub doc_id: DocId,
    pub encrypted_content: Vec<u8>,
    pub nonce: Vec<u8>,
    pub keyword_count: u64,
    /// Unix timestamp (seconds) of the upload
    pub created_at: u64,
}

/// A document accepted by fuzzy matching, with its best per-keyword overlap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuzzyMatch {
    pub doc_id: DocId,
    /// matched distinct query n-grams / total query n-grams
    pub score: f64,
}

/// Raw row of the exact-match index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchIndexEntry {
    pub token: Token,
    pub doc_id: DocId,
}

/// Raw row of the n-gram index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NgramIndexEntry {
    pub token: Token,
    pub doc_id: DocId,
    pub source_keyword_hash: KeywordHash,
}

/// Non-secret per-client record kept server-side: the KDF salt and the
/// optional password verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientProfile {
    pub salt: Vec<u8>,
    pub verifier: Option<Vec<u8>>,
}

/// Row counts reported by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub documents: u64,
    pub index_entries: u64,
    pub unique_tokens: u64,
    pub ngram_entries: u64,
    pub audit_events: u64,
}

/// One server-side operation record. Holds counts and doc_ids only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub action: String,
    pub doc_id: Option<DocId>,
    pub detail: String,
    /// Unix timestamp (seconds)
    pub timestamp: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_id_rejects_blank() {
        assert!(DocId::new("   ").is_err());
        assert_eq!(DocId::new("  MR-001 ").unwrap().as_str(), "MR-001");
        assert!(matches!(DocId::new(""), Err(CsError::InvalidDocId(_))));
    }

    #[test]
    fn test_doc_id_validate_catches_unchecked_conversions() {
        assert!(DocId::from("MR-001").validate().is_ok());
        assert!(matches!(DocId::from("").validate(), Err(CsError::InvalidDocId(_))));
        assert!(DocId::from(" MR-001").validate().is_err());
        assert!(DocId::from(String::from("MR-001\n")).validate().is_err());
    }

    #[test]
    fn test_search_mode_parse() {
        assert_eq!("AND".parse::<SearchMode>().unwrap(), SearchMode::And);
        assert_eq!("fuzzy".parse::<SearchMode>().unwrap(), SearchMode::Fuzzy);
        assert!(matches!(
            "regex".parse::<SearchMode>(),
            Err(CsError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_token_from_slice_length_checked() {
        assert!(Token::from_slice(&[0u8; 31]).is_none());
        let t = Token::from_slice(&[7u8; TOKEN_SIZE]).unwrap();
        assert_eq!(t.as_bytes(), &[7u8; TOKEN_SIZE]);
    }

    #[test]
    fn test_token_debug_is_truncated() {
        let t = Token::from_bytes([0xAB; TOKEN_SIZE]);
        let dbg = format!("{t:?}");
        assert!(dbg.len() < t.to_base64().len());
    }
}
