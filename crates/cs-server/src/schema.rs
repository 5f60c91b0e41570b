//! Versioned schema migrations
//!
//! Each migration runs in its own transaction and is recorded in
//! `schema_version`, so opening an existing database is idempotent.

use rusqlite::{params, Connection, OptionalExtension};

use crate::audit::now_unix;

/// A single forward migration.
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub up_sql: &'static str,
}

pub fn migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "documents, exact and n-gram token indexes, client profile",
            up_sql: r#"
            CREATE TABLE IF NOT EXISTS documents (
                doc_id TEXT PRIMARY KEY,
                encrypted_content BLOB NOT NULL,
                nonce BLOB NOT NULL,
                keyword_count INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS search_index (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                token BLOB NOT NULL,
                doc_id TEXT NOT NULL,
                FOREIGN KEY (doc_id) REFERENCES documents(doc_id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_search_token ON search_index(token);
            CREATE INDEX IF NOT EXISTS idx_search_doc ON search_index(doc_id);

            CREATE TABLE IF NOT EXISTS ngram_index (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                token BLOB NOT NULL,
                doc_id TEXT NOT NULL,
                source_keyword_hash BLOB NOT NULL,
                FOREIGN KEY (doc_id) REFERENCES documents(doc_id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_ngram_token ON ngram_index(token);
            CREATE INDEX IF NOT EXISTS idx_ngram_doc ON ngram_index(doc_id);

            CREATE TABLE IF NOT EXISTS profile (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                salt BLOB NOT NULL,
                verifier BLOB
            );
            "#,
        },
        Migration {
            version: 2,
            description: "persistent audit log",
            up_sql: r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                action TEXT NOT NULL,
                doc_id TEXT,
                detail TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            );
            "#,
        },
    ]
}

fn current_version(conn: &Connection) -> rusqlite::Result<i64> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let version: Option<i64> = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;

    Ok(version.unwrap_or(0))
}

/// Apply every migration newer than the recorded schema version.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<()> {
    let current = current_version(conn)?;

    for migration in migrations().into_iter().filter(|m| m.version > current) {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.up_sql)?;
        tx.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
            params![migration.version, now_unix() as i64],
        )?;
        tx.commit()?;

        tracing::debug!(
            version = migration.version,
            description = migration.description,
            "applied schema migration"
        );
    }

    Ok(())
}

/// Latest migration version shipped with this build.
pub fn latest_version() -> i64 {
    migrations().iter().map(|m| m.version).max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_migration_creates_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        for expected in [
            "audit_log",
            "documents",
            "ngram_index",
            "profile",
            "schema_version",
            "search_index",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing table {expected}");
        }
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, latest_version());
    }

    #[test]
    fn test_upgrade_from_version_one_adds_audit_log() {
        let mut conn = Connection::open_in_memory().unwrap();
        let first = &migrations()[0];
        conn.execute_batch(first.up_sql).unwrap();
        current_version(&conn).unwrap();
        conn.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (1, 0)",
            [],
        )
        .unwrap();

        migrate(&mut conn).unwrap();
        let audit_rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))
            .unwrap();
        assert_eq!(audit_rows, 0);
        assert_eq!(current_version(&conn).unwrap(), 2);
    }

    #[test]
    fn test_token_indexes_exist() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let indexes: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='index'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert!(indexes.iter().any(|i| i == "idx_search_token"));
        assert!(indexes.iter().any(|i| i == "idx_ngram_token"));
    }
}
