//! cs-crypto: client-side cryptography for ciphersearch
//!
//! Everything in this crate runs in the trusted zone. The server only ever
//! sees its outputs: ciphertext, nonces, and opaque tokens.
//!
//! Key hierarchy:
//! ```text
//! Master Password + Salt (16 bytes, stored server-side, non-secret)
//!   ├── data_key   = PBKDF2-HMAC-SHA256(password, salt || "ciphersearch:data")
//!   │   ├── Document AEAD: XChaCha20-Poly1305 (nonce=random_192bit, AAD=tag||doc_id)
//!   │   └── Verifier key (HKDF, info="ciphersearch:verifier")
//!   └── search_key = PBKDF2-HMAC-SHA256(password, salt || "ciphersearch:search")
//!       ├── Exact token key   (HKDF, info="ciphersearch:token:exact")
//!       ├── N-gram token key  (HKDF, info="ciphersearch:token:ngram")
//!       └── Keyword group key (HKDF, info="ciphersearch:keyword-group")
//! ```

pub mod cipher;
pub mod kdf;
pub mod keys;
pub mod keywords;
pub mod tokens;

pub use cipher::{decrypt_document, encrypt_document, SealedDocument};
pub use kdf::{derive, generate_salt, DerivedKeySet, KdfParams, Salt, SecretKey};
pub use keys::{compute_verifier, check_verifier};
pub use keywords::{extract_keywords, parse_query_terms, Keyword, MIN_KEYWORD_LEN};
pub use tokens::TokenGenerator;

/// Size of a derived key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of the per-client KDF salt
pub const SALT_SIZE: usize = 16;
