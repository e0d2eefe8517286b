//! Application-wide error types.

use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection or transaction infrastructure failure. Fatal to the
    /// current unit of work.
    #[error("storage unavailable: {0}")]
    Storage(String),

    /// Transient optimistic-concurrency failure (busy/locked database or a
    /// racing insert of the same identity). Safe to retry.
    #[error("write conflict: {0}")]
    WriteConflict(String),

    #[error("table {table} doesn't have a '{field}' field")]
    InvalidField { table: &'static str, field: String },

    #[error("invalid indexer: {0}")]
    InvalidIndexer(String),

    #[error("'{0}' is not a valid setting key")]
    InvalidSetting(String),

    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The embedding model ran out of a resource (memory, quota). The same
    /// batch may be resubmitted.
    #[error("embedding model exhausted: {0}")]
    EmbeddingExhausted(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    /// `target` names what kept conflicting: an n-gram or a document.
    #[error("{target} still conflicting after {attempts} attempts")]
    MergeRetriesExhausted { target: String, attempts: u32 },
}

impl AppError {
    /// Classify a rusqlite failure. Busy/locked databases and primary-key
    /// collisions are write conflicts; everything else is a storage failure.
    pub fn from_sqlite(context: &str, err: rusqlite::Error) -> Self {
        let conflict = match &err {
            rusqlite::Error::SqliteFailure(e, _) => match e.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => true,
                ErrorCode::ConstraintViolation => {
                    e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                }
                _ => false,
            },
            _ => false,
        };
        if conflict {
            AppError::WriteConflict(format!("{context}: {err}"))
        } else {
            AppError::Storage(format!("{context}: {err}"))
        }
    }

    pub fn is_write_conflict(&self) -> bool {
        matches!(self, AppError::WriteConflict(_))
    }
}

/// `map_err` adapter: `.map_err(db_err("collection: count"))`.
pub(crate) fn db_err(context: &'static str) -> impl FnOnce(rusqlite::Error) -> AppError {
    move |e| AppError::from_sqlite(context, e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn config_error_display() {
        let e = AppError::Config("missing field".into());
        assert!(e.to_string().contains("missing field"));
    }

    #[test]
    fn invalid_field_names_table_and_field() {
        let e = AppError::InvalidField { table: "ngrams", field: "colour".into() };
        let msg = e.to_string();
        assert!(msg.contains("ngrams"));
        assert!(msg.contains("colour"));
    }

    #[test]
    fn busy_is_write_conflict() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".into()),
        );
        assert!(AppError::from_sqlite("merge", err).is_write_conflict());
    }

    #[test]
    fn primary_key_violation_is_write_conflict() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY),
            None,
        );
        assert!(AppError::from_sqlite("insert", err).is_write_conflict());
    }

    #[test]
    fn unique_violation_is_storage_error() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE),
            None,
        );
        let e = AppError::from_sqlite("insert", err);
        assert!(matches!(e, AppError::Storage(_)));
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let e: AppError = io_err.into();
        assert!(e.to_string().contains("io error"));
        let _: &dyn Error = &e;
    }
}
