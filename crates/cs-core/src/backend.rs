//! The seam between the trusted client and the untrusted matching server.
//!
//! Everything crossing this trait is ciphertext, nonces, opaque tokens, or
//! doc_ids. Implementations never receive keys or plaintext.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::CsResult;
use crate::types::{ClientProfile, DocId, EncryptedBlob, FuzzyMatch, StoreRequest, TermOperator, Token};

pub trait SearchBackend {
    /// Persist a document and all of its index rows atomically.
    ///
    /// Fails with `DuplicateDocument` when `doc_id` exists and `replace` is false.
    fn store(&self, request: &StoreRequest, replace: bool) -> CsResult<()>;

    /// Doc_ids whose exact index contains `token`.
    fn exact_match(&self, token: &Token) -> CsResult<BTreeSet<DocId>>;

    /// AND = intersection, OR = union of `exact_match` over `tokens`.
    /// An empty token list yields an empty set.
    fn multi_term_match(&self, tokens: &[Token], op: TermOperator) -> CsResult<BTreeSet<DocId>>;

    /// Per-keyword n-gram overlap matching, best score first.
    fn fuzzy_match(
        &self,
        query_ngram_tokens: &[Token],
        total_query_ngrams: usize,
        threshold: f64,
    ) -> CsResult<Vec<FuzzyMatch>>;

    /// Ciphertext for `doc_ids`, in the requested order; unknown ids are skipped.
    fn fetch(&self, doc_ids: &[DocId]) -> CsResult<Vec<EncryptedBlob>>;

    /// Remove a document and its index rows. Returns whether it existed.
    fn delete(&self, doc_id: &DocId) -> CsResult<bool>;

    fn profile(&self) -> CsResult<Option<ClientProfile>>;

    /// Store a profile with `salt` unless one already exists, then return
    /// the stored profile. An existing salt is never overwritten.
    fn init_profile(&self, salt: &[u8]) -> CsResult<ClientProfile>;

    /// Attach `verifier` to the profile unless it already has one, then
    /// return the stored verifier.
    fn init_verifier(&self, verifier: &[u8]) -> CsResult<Vec<u8>>;
}

macro_rules! forward_backend {
    ($ty:ty) => {
        impl<T: SearchBackend + ?Sized> SearchBackend for $ty {
            fn store(&self, request: &StoreRequest, replace: bool) -> CsResult<()> {
                (**self).store(request, replace)
            }

            fn exact_match(&self, token: &Token) -> CsResult<BTreeSet<DocId>> {
                (**self).exact_match(token)
            }

            fn multi_term_match(&self, tokens: &[Token], op: TermOperator) -> CsResult<BTreeSet<DocId>> {
                (**self).multi_term_match(tokens, op)
            }

            fn fuzzy_match(
                &self,
                query_ngram_tokens: &[Token],
                total_query_ngrams: usize,
                threshold: f64,
            ) -> CsResult<Vec<FuzzyMatch>> {
                (**self).fuzzy_match(query_ngram_tokens, total_query_ngrams, threshold)
            }

            fn fetch(&self, doc_ids: &[DocId]) -> CsResult<Vec<EncryptedBlob>> {
                (**self).fetch(doc_ids)
            }

            fn delete(&self, doc_id: &DocId) -> CsResult<bool> {
                (**self).delete(doc_id)
            }

            fn profile(&self) -> CsResult<Option<ClientProfile>> {
                (**self).profile()
            }

            fn init_profile(&self, salt: &[u8]) -> CsResult<ClientProfile> {
                (**self).init_profile(salt)
            }

            fn init_verifier(&self, verifier: &[u8]) -> CsResult<Vec<u8>> {
                (**self).init_verifier(verifier)
            }
        }
    };
}

forward_backend!(&T);
forward_backend!(Arc<T>);
