//! cs-server: the untrusted half of ciphersearch
//!
//! Stores ciphertext blobs and opaque tokens in SQLite and answers match
//! queries by token equality. It never receives keys, keywords or
//! plaintext, and never decrypts what it returns.
//!
//! Tables:
//! ```text
//! documents     (doc_id PK, encrypted_content, nonce, keyword_count, created_at)
//! search_index  (token, doc_id → documents ON DELETE CASCADE)   idx on token
//! ngram_index   (token, doc_id → documents, source_keyword_hash) idx on token
//! profile       (salt, verifier)   single row, non-secret
//! audit_log     (action, doc_id, detail, timestamp)   bounded, oldest evicted
//! ```

pub mod audit;
pub mod engine;
pub mod schema;

pub use audit::AuditLog;
pub use engine::MatchingEngine;
