//! Client orchestrator: the only place keys and plaintext meet the index

use std::collections::HashMap;

use secrecy::SecretString;

use cs_core::config::CipherSearchConfig;
use cs_core::types::{EncryptedBlob, StoreRequest};
use cs_core::{CsError, CsResult, DocId, SearchBackend, SearchMode, TermOperator};
use cs_crypto::{
    check_verifier, compute_verifier, decrypt_document, derive, encrypt_document,
    extract_keywords, generate_salt, parse_query_terms, DerivedKeySet, KdfParams, Keyword, Salt,
    TokenGenerator,
};

use crate::search::{DecryptedDocument, SearchResponse};

/// Knobs the client needs from the configuration file.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub kdf: KdfParams,
    pub ngram_size: usize,
    pub default_threshold: f64,
    /// Record a verifier on first login so later logins can reject a wrong password
    pub password_verifier: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self::from(&CipherSearchConfig::default())
    }
}

impl From<&CipherSearchConfig> for ClientSettings {
    fn from(config: &CipherSearchConfig) -> Self {
        Self {
            kdf: KdfParams {
                iterations: config.kdf.iterations,
            },
            ngram_size: config.search.ngram_size,
            default_threshold: config.search.default_threshold,
            password_verifier: config.client.password_verifier,
        }
    }
}

/// What an upload sent to the server, in counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub doc_id: DocId,
    pub keyword_count: usize,
    pub ngram_tokens: usize,
    pub ciphertext_len: usize,
}

struct Session {
    keys: DerivedKeySet,
    tokens: TokenGenerator,
}

/// A ciphersearch client bound to one backend.
///
/// Keys exist only between [`login`](Client::login) and
/// [`logout`](Client::logout) (or drop); both paths zeroize them.
pub struct Client<B: SearchBackend> {
    backend: B,
    settings: ClientSettings,
    session: Option<Session>,
}

impl<B: SearchBackend> Client<B> {
    pub fn new(backend: B, settings: ClientSettings) -> Self {
        Self {
            backend,
            settings,
            session: None,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.is_some()
    }

    fn session(&self) -> CsResult<&Session> {
        self.session.as_ref().ok_or(CsError::KeyNotDerived)
    }

    // ── Session ──────────────────────────────────────────────────────────────

    /// Derive the session keys from `password`.
    ///
    /// The salt comes from the backend's client profile; the first login
    /// proposes a fresh one, and keys are always derived from whichever salt
    /// the backend ended up storing. A stored verifier is always checked; a
    /// new one is recorded only when `password_verifier` is enabled. Without
    /// a verifier a wrong password is accepted here and only shows up later
    /// as authentication failures on decrypt.
    pub fn login(&mut self, password: &SecretString) -> CsResult<()> {
        self.logout();

        let (profile, first_login) = match self.backend.profile()? {
            Some(profile) => (profile, false),
            None => (self.backend.init_profile(generate_salt().as_bytes())?, true),
        };
        let salt = Salt::from_slice(&profile.salt).ok_or_else(|| {
            CsError::Config(format!(
                "stored salt has {} bytes, expected {}",
                profile.salt.len(),
                cs_crypto::SALT_SIZE
            ))
        })?;

        let keys = derive(password, &salt, &self.settings.kdf)?;

        let expected = match profile.verifier {
            Some(stored) => Some(stored),
            None if self.settings.password_verifier => {
                Some(self.backend.init_verifier(&compute_verifier(keys.data_key())?)?)
            }
            None => None,
        };
        if let Some(expected) = expected {
            if !check_verifier(keys.data_key(), &expected)? {
                tracing::warn!("login rejected: password does not match stored verifier");
                return Err(CsError::WeakCredential(
                    "password does not match this store's verifier".into(),
                ));
            }
        }

        let tokens = TokenGenerator::new(keys.search_key())?;
        self.session = Some(Session { keys, tokens });
        tracing::info!(first_login, "logged in");
        Ok(())
    }

    /// Drop the session keys. Safe to call when not logged in.
    pub fn logout(&mut self) {
        if self.session.take().is_some() {
            tracing::info!("logged out, session keys zeroized");
        }
    }

    /// Base64 of the salt in use, for display or backup.
    pub fn salt_base64(&self) -> CsResult<String> {
        Ok(self.session()?.keys.salt().to_base64())
    }

    // ── Upload ───────────────────────────────────────────────────────────────

    /// Encrypt `plaintext`, tokenize its keywords, and store both.
    ///
    /// The bytes are sealed as given. Keywords come from a lossy UTF-8 view,
    /// so invalid sequences split words but never reject the document.
    pub fn upload(
        &self,
        doc_id: &DocId,
        plaintext: impl AsRef<[u8]>,
        replace: bool,
    ) -> CsResult<UploadReceipt> {
        let session = self.session()?;
        doc_id.validate()?;
        let plaintext = plaintext.as_ref();

        let keywords = extract_keywords(&String::from_utf8_lossy(plaintext));
        if keywords.is_empty() {
            return Err(CsError::EmptyDocument(doc_id.clone()));
        }

        let sealed = encrypt_document(session.keys.data_key(), doc_id, plaintext)?;

        let exact_tokens = keywords
            .iter()
            .map(|kw| session.tokens.exact_token(kw))
            .collect::<CsResult<Vec<_>>>()?;
        let ngram_entries = keywords
            .iter()
            .map(|kw| session.tokens.ngram_entry(kw, self.settings.ngram_size))
            .collect::<CsResult<Vec<_>>>()?;

        let receipt = UploadReceipt {
            doc_id: doc_id.clone(),
            keyword_count: keywords.len(),
            ngram_tokens: ngram_entries.iter().map(|e| e.tokens.len()).sum(),
            ciphertext_len: sealed.ciphertext.len(),
        };

        let request = StoreRequest {
            doc_id: doc_id.clone(),
            encrypted_content: sealed.ciphertext,
            nonce: sealed.nonce.to_vec(),
            keyword_count: keywords.len(),
            exact_tokens,
            ngram_entries,
        };
        self.backend.store(&request, replace)?;

        tracing::info!(
            doc_id = %doc_id,
            keywords = receipt.keyword_count,
            ngram_tokens = receipt.ngram_tokens,
            replace,
            "uploaded document"
        );
        Ok(receipt)
    }

    // ── Search ───────────────────────────────────────────────────────────────

    /// Run a query and decrypt the matches.
    ///
    /// `exact` and `fuzzy` take a single term; `and`/`or` take one or more.
    /// `threshold` applies to fuzzy mode only and defaults to
    /// `default_threshold`. Blobs that fail authentication are listed in
    /// [`SearchResponse::tampered`] and left out of the documents.
    pub fn search(
        &self,
        query: &str,
        mode: SearchMode,
        threshold: Option<f64>,
    ) -> CsResult<SearchResponse> {
        let session = self.session()?;
        let terms = parse_query_terms(query)?;

        let hits: Vec<(DocId, Option<f64>)> = match mode {
            SearchMode::Exact => {
                let term = single_term(&terms, mode)?;
                let token = session.tokens.exact_token(term)?;
                self.backend
                    .exact_match(&token)?
                    .into_iter()
                    .map(|id| (id, None))
                    .collect()
            }
            SearchMode::And | SearchMode::Or => {
                let op = if mode == SearchMode::And {
                    TermOperator::And
                } else {
                    TermOperator::Or
                };
                let tokens = terms
                    .iter()
                    .map(|kw| session.tokens.exact_token(kw))
                    .collect::<CsResult<Vec<_>>>()?;
                self.backend
                    .multi_term_match(&tokens, op)?
                    .into_iter()
                    .map(|id| (id, None))
                    .collect()
            }
            SearchMode::Fuzzy => {
                let term = single_term(&terms, mode)?;
                let threshold = threshold.unwrap_or(self.settings.default_threshold);
                if !(threshold > 0.0 && threshold <= 1.0) {
                    return Err(CsError::InvalidQuery(format!(
                        "fuzzy threshold {threshold} is outside (0, 1]"
                    )));
                }
                let grams: Vec<_> = session
                    .tokens
                    .ngram_tokens(term, self.settings.ngram_size)?
                    .into_iter()
                    .collect();
                self.backend
                    .fuzzy_match(&grams, grams.len(), threshold)?
                    .into_iter()
                    .map(|m| (m.doc_id, Some(m.score)))
                    .collect()
            }
        };

        let ids: Vec<DocId> = hits.iter().map(|(id, _)| id.clone()).collect();
        let scores: HashMap<DocId, Option<f64>> = hits.into_iter().collect();
        let blobs = self.backend.fetch(&ids)?;

        let response = decrypt_all(&session.keys, blobs, &scores)?;

        tracing::debug!(
            %mode,
            terms = terms.len(),
            matched = ids.len(),
            decrypted = response.documents.len(),
            tampered = response.tampered.len(),
            "search complete"
        );
        if response.wrong_key_suspected() {
            tracing::warn!(
                tampered = response.tampered.len(),
                "no returned document authenticated; the password is probably wrong"
            );
        }
        Ok(response)
    }

    // ── Delete ───────────────────────────────────────────────────────────────

    /// Remove a document and its index rows. Needs no keys.
    pub fn delete(&self, doc_id: &DocId) -> CsResult<bool> {
        self.backend.delete(doc_id)
    }
}

impl<B: SearchBackend> std::fmt::Debug for Client<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("settings", &self.settings)
            .field("logged_in", &self.is_logged_in())
            .finish_non_exhaustive()
    }
}

fn single_term(terms: &[Keyword], mode: SearchMode) -> CsResult<&Keyword> {
    match terms {
        [term] => Ok(term),
        _ => Err(CsError::InvalidQuery(format!(
            "{mode} search takes exactly one term, got {}",
            terms.len()
        ))),
    }
}

fn decrypt_all(
    keys: &DerivedKeySet,
    blobs: Vec<EncryptedBlob>,
    scores: &HashMap<DocId, Option<f64>>,
) -> CsResult<SearchResponse> {
    let mut response = SearchResponse::default();
    for blob in blobs {
        match decrypt_document(keys.data_key(), &blob.doc_id, &blob.encrypted_content, &blob.nonce) {
            Ok(plaintext) => {
                let score = scores.get(&blob.doc_id).copied().flatten();
                response.documents.push(DecryptedDocument {
                    doc_id: blob.doc_id,
                    plaintext,
                    score,
                });
            }
            Err(CsError::Authentication(_)) => {
                let err = CsError::TamperedDocument(blob.doc_id.clone());
                tracing::warn!(doc_id = %blob.doc_id, "{err}");
                response.tampered.push(blob.doc_id);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_config() {
        let mut config = CipherSearchConfig::default();
        config.search.ngram_size = 4;
        config.client.password_verifier = true;

        let settings = ClientSettings::from(&config);
        assert_eq!(settings.ngram_size, 4);
        assert!(settings.password_verifier);
        assert_eq!(settings.kdf.iterations, 100_000);
        assert!((settings.default_threshold - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn test_single_term_rules() {
        let terms = parse_query_terms("diabetes").unwrap();
        assert_eq!(single_term(&terms, SearchMode::Exact).unwrap().as_str(), "diabetes");

        let terms = parse_query_terms("heart attack").unwrap();
        let err = single_term(&terms, SearchMode::Fuzzy).unwrap_err();
        assert!(matches!(err, CsError::InvalidQuery(ref msg) if msg.contains("fuzzy")));
    }
}
