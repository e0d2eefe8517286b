//! Table definitions and schema versioning.
//!
//! Every table is created with `IF NOT EXISTS`, so [`init_schema`] is safe on
//! every open.  Embedding tables reference their parent with
//! `ON DELETE CASCADE`; `foreign_keys = ON` is set per connection.

use rusqlite::Connection;

use crate::error::{AppError, db_err};

/// Schema version stored in `PRAGMA user_version`.
pub(crate) const SCHEMA_VERSION: i64 = 1;

pub(crate) const DOCUMENTS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS "documents" (
    "id" INTEGER PRIMARY KEY AUTOINCREMENT,
    "doi" TEXT NOT NULL UNIQUE,
    "url" TEXT NOT NULL,
    "title" TEXT NOT NULL,
    "authors" TEXT NOT NULL DEFAULT '[]',
    "content" TEXT NOT NULL,
    "abstract" TEXT NOT NULL,
    "citations" INTEGER NOT NULL,
    "source" TEXT NOT NULL,
    "date" TEXT NOT NULL,
    "references" TEXT NOT NULL DEFAULT '[]',
    "ngrams" TEXT NOT NULL DEFAULT '{}'
);
"#;

pub(crate) const DOCUMENTS_EMBEDDINGS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS "documents_embeddings" (
    "id" INTEGER PRIMARY KEY AUTOINCREMENT,
    "document_id" INTEGER NOT NULL UNIQUE
        REFERENCES "documents"("id") ON DELETE CASCADE,
    "embedding" BLOB NOT NULL
);
"#;

pub(crate) const NGRAMS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS "ngrams" (
    "id" TEXT PRIMARY KEY,
    "ngram" TEXT NOT NULL UNIQUE,
    "frequency" INTEGER NOT NULL DEFAULT 0,
    "occurrence" INTEGER NOT NULL DEFAULT 0,
    CHECK ("occurrence" >= 0 AND "frequency" >= "occurrence")
);
CREATE INDEX IF NOT EXISTS "ngrams_occurrence" ON "ngrams"("occurrence");
"#;

pub(crate) const NGRAMS_EMBEDDINGS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS "ngrams_embeddings" (
    "id" INTEGER PRIMARY KEY AUTOINCREMENT,
    "ngram_id" TEXT NOT NULL UNIQUE
        REFERENCES "ngrams"("id") ON DELETE CASCADE,
    "embedding" BLOB NOT NULL
);
"#;

pub(crate) const SETTINGS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS "database_settings" (
    "key" TEXT PRIMARY KEY,
    "value" TEXT NOT NULL
);
"#;

/// Create every table and stamp the schema version.  Refuses databases
/// written by a newer schema.
pub(crate) fn init_schema(conn: &Connection) -> Result<(), AppError> {
    let version: i64 = conn
        .query_row("PRAGMA user_version;", [], |row| row.get(0))
        .map_err(db_err("schema: read version"))?;

    if version != 0 && version != SCHEMA_VERSION {
        return Err(AppError::Storage(format!(
            "schema: unsupported version {version}, expected {SCHEMA_VERSION}"
        )));
    }

    for ddl in [
        DOCUMENTS_DDL,
        DOCUMENTS_EMBEDDINGS_DDL,
        NGRAMS_DDL,
        NGRAMS_EMBEDDINGS_DDL,
        SETTINGS_DDL,
    ] {
        conn.execute_batch(ddl).map_err(db_err("schema: create table"))?;
    }

    if version == 0 {
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .map_err(db_err("schema: set version"))?;
    }
    Ok(())
}
