//! MatchingEngine: blind storage and matching over opaque tokens

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};

use cs_core::types::{
    AuditEvent, ClientProfile, EncryptedBlob, FuzzyMatch, IndexStats, NgramIndexEntry, SearchIndexEntry,
    StoreRequest, StoredDocument,
};
use cs_core::{CsError, CsResult, DocId, KeywordHash, SearchBackend, TermOperator, Token};

use crate::audit::{now_unix, AuditLog};
use crate::schema;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const FILE_POOL_SIZE: u32 = 8;

/// Server-side store. Holds ciphertext and tokens only.
///
/// `&MatchingEngine` is `Sync`: reads run concurrently on pooled
/// connections; writers are serialised by SQLite's `IMMEDIATE` transactions.
/// Each read appends its audit row in a short autocommit write afterwards.
pub struct MatchingEngine {
    pool: Pool<SqliteConnectionManager>,
    audit: AuditLog,
}

fn unavailable<E: std::fmt::Display>(e: E) -> CsError {
    CsError::ServerUnavailable(e.to_string())
}

fn init_connection(conn: &mut rusqlite::Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")
}

fn blob_error(idx: usize, what: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Blob,
        Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("{what} has wrong length"),
        )),
    )
}

fn token_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Token> {
    let bytes: Vec<u8> = row.get(idx)?;
    Token::from_slice(&bytes).ok_or_else(|| blob_error(idx, "token"))
}

fn keyword_hash_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<KeywordHash> {
    let bytes: Vec<u8> = row.get(idx)?;
    KeywordHash::from_slice(&bytes).ok_or_else(|| blob_error(idx, "source_keyword_hash"))
}

impl MatchingEngine {
    /// Open (creating if absent) the SQLite database at `path`.
    pub fn open(path: &Path) -> CsResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let manager = SqliteConnectionManager::file(path).with_init(init_connection);
        let engine = Self::with_manager(manager, FILE_POOL_SIZE)?;
        tracing::info!(path = %path.display(), "opened matching engine");
        Ok(engine)
    }

    /// A private in-memory database. Uses a single pooled connection, since
    /// every SQLite `:memory:` connection is its own database.
    pub fn open_in_memory() -> CsResult<Self> {
        let manager = SqliteConnectionManager::memory().with_init(init_connection);
        Self::with_manager(manager, 1)
    }

    fn with_manager(manager: SqliteConnectionManager, max_size: u32) -> CsResult<Self> {
        let pool = Pool::builder()
            .max_size(max_size)
            .min_idle(Some(1))
            .build(manager)
            .map_err(unavailable)?;

        let mut conn = pool.get().map_err(unavailable)?;
        schema::migrate(&mut conn).map_err(unavailable)?;
        drop(conn);

        Ok(Self {
            pool,
            audit: AuditLog::default(),
        })
    }

    fn conn(&self) -> CsResult<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(unavailable)
    }

    // ── Writes ───────────────────────────────────────────────────────────────

    /// Insert a document and all of its index rows in one transaction.
    ///
    /// With `replace`, an existing row for the same doc_id is deleted together
    /// with every index row it owned before the new rows are written.
    pub fn store(&self, request: &StoreRequest, replace: bool) -> CsResult<()> {
        request.doc_id.validate()?;
        let doc_id = request.doc_id.as_str();
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(unavailable)?;

        let exists: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM documents WHERE doc_id = ?1)",
                params![doc_id],
                |row| row.get(0),
            )
            .map_err(unavailable)?;

        if exists && !replace {
            return Err(CsError::DuplicateDocument(request.doc_id.clone()));
        }
        if exists {
            delete_rows(&tx, doc_id).map_err(unavailable)?;
        }

        tx.execute(
            "INSERT INTO documents (doc_id, encrypted_content, nonce, keyword_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                doc_id,
                request.encrypted_content,
                request.nonce,
                request.keyword_count as i64,
                now_unix() as i64,
            ],
        )
        .map_err(unavailable)?;

        let mut ngram_rows = 0usize;
        {
            let mut exact = tx
                .prepare_cached("INSERT INTO search_index (token, doc_id) VALUES (?1, ?2)")
                .map_err(unavailable)?;
            for token in &request.exact_tokens {
                exact
                    .execute(params![token.as_bytes().as_slice(), doc_id])
                    .map_err(unavailable)?;
            }

            let mut ngram = tx
                .prepare_cached(
                    "INSERT INTO ngram_index (token, doc_id, source_keyword_hash) VALUES (?1, ?2, ?3)",
                )
                .map_err(unavailable)?;
            for entry in &request.ngram_entries {
                for token in &entry.tokens {
                    ngram
                        .execute(params![
                            token.as_bytes().as_slice(),
                            doc_id,
                            entry.source_keyword_hash.as_bytes().as_slice(),
                        ])
                        .map_err(unavailable)?;
                    ngram_rows += 1;
                }
            }
        }

        let action = if exists { "REPLACE" } else { "STORE" };
        self.audit
            .record(
                &tx,
                action,
                Some(&request.doc_id),
                &format!(
                    "exact_tokens={} ngram_tokens={ngram_rows}",
                    request.exact_tokens.len()
                ),
            )
            .map_err(unavailable)?;
        tx.commit().map_err(unavailable)?;

        tracing::info!(
            doc_id,
            exact_tokens = request.exact_tokens.len(),
            ngram_tokens = ngram_rows,
            replaced = exists,
            "stored document"
        );
        Ok(())
    }

    /// Delete a document and its index rows. Returns whether it existed.
    pub fn delete(&self, doc_id: &DocId) -> CsResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(unavailable)?;
        let removed = delete_rows(&tx, doc_id.as_str()).map_err(unavailable)?;
        self.audit
            .record(&tx, "DELETE", Some(doc_id), &format!("removed={removed}"))
            .map_err(unavailable)?;
        tx.commit().map_err(unavailable)?;

        tracing::info!(doc_id = %doc_id, removed, "deleted document");
        Ok(removed)
    }

    /// Remove every document and index row, and reset the audit log.
    pub fn clear(&self) -> CsResult<()> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(unavailable)?;
        tx.execute_batch(
            "DELETE FROM search_index; DELETE FROM ngram_index; DELETE FROM documents;",
        )
        .map_err(unavailable)?;
        self.audit.clear(&tx).map_err(unavailable)?;
        self.audit
            .record(&tx, "CLEAR", None, "all documents removed")
            .map_err(unavailable)?;
        tx.commit().map_err(unavailable)?;

        tracing::warn!("cleared all documents and indexes");
        Ok(())
    }

    // ── Matching ─────────────────────────────────────────────────────────────

    /// Log a read. A failed audit write never fails the query it describes.
    fn note_read(&self, conn: &rusqlite::Connection, action: &str, detail: &str) {
        if let Err(e) = self.audit.record(conn, action, None, detail) {
            tracing::warn!(action, error = %e, "failed to record audit event");
        }
    }

    /// Doc_ids whose exact index contains `token`.
    pub fn exact_match(&self, token: &Token) -> CsResult<BTreeSet<DocId>> {
        let conn = self.conn()?;
        let found = lookup_exact(&conn, token).map_err(unavailable)?;
        self.note_read(&conn, "EXACT_MATCH", &format!("results={}", found.len()));
        Ok(found)
    }

    /// AND: doc_ids matching every token. OR: doc_ids matching any token.
    pub fn multi_term_match(&self, tokens: &[Token], op: TermOperator) -> CsResult<BTreeSet<DocId>> {
        let distinct: BTreeSet<&Token> = tokens.iter().collect();
        let mut result: Option<BTreeSet<DocId>> = None;
        let conn = self.conn()?;

        if !distinct.is_empty() {
            for token in &distinct {
                let found = lookup_exact(&conn, token).map_err(unavailable)?;
                result = Some(match (result, op) {
                    (None, _) => found,
                    (Some(acc), TermOperator::And) => acc.intersection(&found).cloned().collect(),
                    (Some(mut acc), TermOperator::Or) => {
                        acc.extend(found);
                        acc
                    }
                });
                if op == TermOperator::And && result.as_ref().is_some_and(BTreeSet::is_empty) {
                    break;
                }
            }
        }

        let result = result.unwrap_or_default();
        let action = match op {
            TermOperator::And => "MULTI_MATCH_AND",
            TermOperator::Or => "MULTI_MATCH_OR",
        };
        self.note_read(
            &conn,
            action,
            &format!("tokens={} results={}", distinct.len(), result.len()),
        );
        Ok(result)
    }

    /// Fuzzy matching by per-keyword n-gram overlap.
    ///
    /// Index rows hit by the query tokens are grouped by
    /// `(doc_id, source_keyword_hash)`; a group's score is its number of
    /// distinct matching query tokens divided by `total_query_ngrams`. A
    /// document qualifies when its best group scores at least `threshold`.
    /// Results are ordered by score descending, then doc_id ascending.
    pub fn fuzzy_match(
        &self,
        query_ngram_tokens: &[Token],
        total_query_ngrams: usize,
        threshold: f64,
    ) -> CsResult<Vec<FuzzyMatch>> {
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(CsError::InvalidQuery(format!(
                "fuzzy threshold {threshold} is outside (0, 1]"
            )));
        }

        let distinct: BTreeSet<&Token> = query_ngram_tokens.iter().collect();
        let mut matches = Vec::new();
        let conn = self.conn()?;

        if !distinct.is_empty() && total_query_ngrams > 0 {
            let mut stmt = conn
                .prepare_cached(
                    "SELECT DISTINCT doc_id, source_keyword_hash FROM ngram_index WHERE token = ?1",
                )
                .map_err(unavailable)?;

            let mut groups: HashMap<(DocId, KeywordHash), usize> = HashMap::new();
            for token in &distinct {
                let rows = stmt
                    .query_map(params![token.as_bytes().as_slice()], |row| {
                        Ok((DocId::from(row.get::<_, String>(0)?), keyword_hash_column(row, 1)?))
                    })
                    .map_err(unavailable)?;
                for row in rows {
                    *groups.entry(row.map_err(unavailable)?).or_insert(0) += 1;
                }
            }

            let mut best: HashMap<DocId, f64> = HashMap::new();
            for ((doc_id, _), matched) in groups {
                let score = matched as f64 / total_query_ngrams as f64;
                if score >= threshold {
                    let slot = best.entry(doc_id).or_insert(score);
                    if score > *slot {
                        *slot = score;
                    }
                }
            }

            matches = best
                .into_iter()
                .map(|(doc_id, score)| FuzzyMatch { doc_id, score })
                .collect();
            matches.sort_by(|a, b| {
                b.score
                    .total_cmp(&a.score)
                    .then_with(|| a.doc_id.cmp(&b.doc_id))
            });
        }

        self.note_read(
            &conn,
            "FUZZY_MATCH",
            &format!(
                "ngrams={} threshold={threshold} results={}",
                distinct.len(),
                matches.len()
            ),
        );
        tracing::debug!(ngrams = distinct.len(), results = matches.len(), "fuzzy match");
        Ok(matches)
    }

    /// Ciphertext for `doc_ids`, returned verbatim in the requested order.
    pub fn fetch(&self, doc_ids: &[DocId]) -> CsResult<Vec<EncryptedBlob>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare_cached("SELECT encrypted_content, nonce FROM documents WHERE doc_id = ?1")
            .map_err(unavailable)?;

        let mut blobs = Vec::with_capacity(doc_ids.len());
        for doc_id in doc_ids {
            let row = stmt
                .query_row(params![doc_id.as_str()], |row| {
                    Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?))
                })
                .optional()
                .map_err(unavailable)?;
            if let Some((encrypted_content, nonce)) = row {
                blobs.push(EncryptedBlob {
                    doc_id: doc_id.clone(),
                    encrypted_content,
                    nonce,
                });
            }
        }
        Ok(blobs)
    }

    // ── Client profile ───────────────────────────────────────────────────────

    pub fn profile(&self) -> CsResult<Option<ClientProfile>> {
        let conn = self.conn()?;
        conn.query_row("SELECT salt, verifier FROM profile WHERE id = 1", [], |row| {
            Ok(ClientProfile {
                salt: row.get(0)?,
                verifier: row.get(1)?,
            })
        })
        .optional()
        .map_err(unavailable)
    }

    /// Insert a profile holding `salt` if none exists and return whichever
    /// profile is stored. Concurrent first logins all get the winner's salt.
    pub fn init_profile(&self, salt: &[u8]) -> CsResult<ClientProfile> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(unavailable)?;
        let inserted = tx
            .execute(
                "INSERT INTO profile (id, salt, verifier) VALUES (1, ?1, NULL)
                 ON CONFLICT(id) DO NOTHING",
                params![salt],
            )
            .map_err(unavailable)?;
        let profile = tx
            .query_row("SELECT salt, verifier FROM profile WHERE id = 1", [], |row| {
                Ok(ClientProfile {
                    salt: row.get(0)?,
                    verifier: row.get(1)?,
                })
            })
            .map_err(unavailable)?;
        tx.commit().map_err(unavailable)?;

        if inserted > 0 {
            tracing::info!("created client profile");
        }
        Ok(profile)
    }

    /// Set the profile's verifier if it has none and return the stored one.
    /// The salt column is never touched.
    pub fn init_verifier(&self, verifier: &[u8]) -> CsResult<Vec<u8>> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(unavailable)?;
        tx.execute(
            "UPDATE profile SET verifier = ?1 WHERE id = 1 AND verifier IS NULL",
            params![verifier],
        )
        .map_err(unavailable)?;
        let stored: Option<Option<Vec<u8>>> = tx
            .query_row("SELECT verifier FROM profile WHERE id = 1", [], |row| row.get(0))
            .optional()
            .map_err(unavailable)?;
        tx.commit().map_err(unavailable)?;

        stored
            .flatten()
            .ok_or_else(|| CsError::Config("no client profile to attach a verifier to".into()))
    }

    // ── Audit surface (read-only) ────────────────────────────────────────────

    /// Every stored document row, still encrypted, ordered by doc_id.
    pub fn dump_documents(&self) -> CsResult<Vec<StoredDocument>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT doc_id, encrypted_content, nonce, keyword_count, created_at
                 FROM documents ORDER BY doc_id",
            )
            .map_err(unavailable)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(StoredDocument {
                    doc_id: DocId::from(row.get::<_, String>(0)?),
                    encrypted_content: row.get(1)?,
                    nonce: row.get(2)?,
                    keyword_count: row.get::<_, i64>(3)?.max(0) as u64,
                    created_at: row.get::<_, i64>(4)?.max(0) as u64,
                })
            })
            .map_err(unavailable)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(unavailable)
    }

    /// Up to `limit` rows of the exact index, in insertion order.
    pub fn dump_search_index(&self, limit: usize) -> CsResult<Vec<SearchIndexEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT token, doc_id FROM search_index ORDER BY id LIMIT ?1")
            .map_err(unavailable)?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(SearchIndexEntry {
                    token: token_column(row, 0)?,
                    doc_id: DocId::from(row.get::<_, String>(1)?),
                })
            })
            .map_err(unavailable)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(unavailable)
    }

    /// Up to `limit` rows of the n-gram index, in insertion order.
    pub fn dump_ngram_index(&self, limit: usize) -> CsResult<Vec<NgramIndexEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT token, doc_id, source_keyword_hash FROM ngram_index ORDER BY id LIMIT ?1",
            )
            .map_err(unavailable)?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(NgramIndexEntry {
                    token: token_column(row, 0)?,
                    doc_id: DocId::from(row.get::<_, String>(1)?),
                    source_keyword_hash: keyword_hash_column(row, 2)?,
                })
            })
            .map_err(unavailable)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(unavailable)
    }

    pub fn stats(&self) -> CsResult<IndexStats> {
        let conn = self.conn()?;
        let count = |sql: &str| -> CsResult<u64> {
            conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                .map(|n| n.max(0) as u64)
                .map_err(unavailable)
        };
        Ok(IndexStats {
            documents: count("SELECT COUNT(*) FROM documents")?,
            index_entries: count("SELECT COUNT(*) FROM search_index")?,
            unique_tokens: count("SELECT COUNT(DISTINCT token) FROM search_index")?,
            ngram_entries: count("SELECT COUNT(*) FROM ngram_index")?,
            audit_events: self.audit.count(&conn).map_err(unavailable)?,
        })
    }

    /// The retained audit events, oldest first.
    pub fn audit_events(&self) -> CsResult<Vec<AuditEvent>> {
        let conn = self.conn()?;
        self.audit.snapshot(&conn).map_err(unavailable)
    }
}

fn lookup_exact(conn: &rusqlite::Connection, token: &Token) -> rusqlite::Result<BTreeSet<DocId>> {
    let mut stmt =
        conn.prepare_cached("SELECT DISTINCT doc_id FROM search_index WHERE token = ?1")?;
    let rows = stmt.query_map(params![token.as_bytes().as_slice()], |row| {
        row.get::<_, String>(0).map(DocId::from)
    })?;
    rows.collect()
}

/// Delete a document's index rows and then the document row itself.
fn delete_rows(conn: &rusqlite::Connection, doc_id: &str) -> rusqlite::Result<bool> {
    conn.execute("DELETE FROM search_index WHERE doc_id = ?1", params![doc_id])?;
    conn.execute("DELETE FROM ngram_index WHERE doc_id = ?1", params![doc_id])?;
    let removed = conn.execute("DELETE FROM documents WHERE doc_id = ?1", params![doc_id])?;
    Ok(removed > 0)
}

impl SearchBackend for MatchingEngine {
    fn store(&self, request: &StoreRequest, replace: bool) -> CsResult<()> {
        MatchingEngine::store(self, request, replace)
    }

    fn exact_match(&self, token: &Token) -> CsResult<BTreeSet<DocId>> {
        MatchingEngine::exact_match(self, token)
    }

    fn multi_term_match(&self, tokens: &[Token], op: TermOperator) -> CsResult<BTreeSet<DocId>> {
        MatchingEngine::multi_term_match(self, tokens, op)
    }

    fn fuzzy_match(
        &self,
        query_ngram_tokens: &[Token],
        total_query_ngrams: usize,
        threshold: f64,
    ) -> CsResult<Vec<FuzzyMatch>> {
        MatchingEngine::fuzzy_match(self, query_ngram_tokens, total_query_ngrams, threshold)
    }

    fn fetch(&self, doc_ids: &[DocId]) -> CsResult<Vec<EncryptedBlob>> {
        MatchingEngine::fetch(self, doc_ids)
    }

    fn delete(&self, doc_id: &DocId) -> CsResult<bool> {
        MatchingEngine::delete(self, doc_id)
    }

    fn profile(&self) -> CsResult<Option<ClientProfile>> {
        MatchingEngine::profile(self)
    }

    fn init_profile(&self, salt: &[u8]) -> CsResult<ClientProfile> {
        MatchingEngine::init_profile(self, salt)
    }

    fn init_verifier(&self, verifier: &[u8]) -> CsResult<Vec<u8>> {
        MatchingEngine::init_verifier(self, verifier)
    }
}
