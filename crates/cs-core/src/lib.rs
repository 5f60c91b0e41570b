//! cs-core: shared vocabulary for the ciphersearch client and server.
//!
//! Nothing in this crate touches key material. It defines the opaque values
//! that cross the trust boundary (tokens, ciphertext blobs, index rows), the
//! error taxonomy, the configuration schema, and the `SearchBackend` seam the
//! client talks to.

pub mod backend;
pub mod config;
pub mod error;
pub mod types;

pub use backend::SearchBackend;
pub use error::{CsError, CsResult};
pub use types::{DocId, KeywordHash, NgramEntry, SearchMode, TermOperator, Token};

/// Size of a search token in bytes (HMAC-SHA256 output)
pub const TOKEN_SIZE: usize = 32;
