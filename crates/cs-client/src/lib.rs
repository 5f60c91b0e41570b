//! cs-client: the trusted half of ciphersearch
//!
//! [`Client`] owns the session keys and is the only component that sees
//! plaintext. It talks to any [`cs_core::SearchBackend`]; in-process that is
//! a `cs_server::MatchingEngine`.

pub mod client;
pub mod search;

pub use client::{Client, ClientSettings, UploadReceipt};
pub use search::{DecryptedDocument, SearchResponse};
