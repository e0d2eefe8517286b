//! Relational store access.
//!
//! [`Store`] is a cheap, cloneable handle to one SQLite file.  It never keeps
//! a connection open: every unit of work opens a connection, runs inside one
//! transaction, and commits or rolls back before the connection is dropped.
//! That keeps lock hold times short and lets any number of threads (the merge
//! pool in particular) share a `Store` without coordination.
//!
//! ## Layout
//! - `value`, `entity` — scalar values and the per-table record contract.
//! - `filter`, `slice` — query predicates and sequence-style indexers.
//! - `cursor` — lazy, paged result sequences.
//! - `collection`, `view` — the indexed collection and its restricted view,
//!   both behind the [`Indexed`] trait.
//! - `settings` — persisted pipeline checkpoint.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::debug;

use crate::error::{AppError, db_err};

pub mod collection;
pub mod cursor;
pub mod entity;
pub mod filter;
mod indexed;
pub(crate) mod schema;
pub mod settings;
pub mod slice;
pub mod value;
pub mod view;

pub use collection::Collection;
pub use cursor::Cursor;
pub use entity::Entity;
pub use filter::{Filter, Page, Sort};
pub use indexed::{Indexed, Selection};
pub use settings::{SettingKey, Settings};
pub use slice::{Indexer, SliceSpec};
pub use value::{Projection, Record, Value};
pub use view::RestrictedView;

/// Connection tuning shared by every unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// How long a connection waits on a locked database before reporting a
    /// write conflict.
    pub busy_timeout_ms: u64,
    /// Rows fetched per page by lazy cursors.
    pub page_size: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self { busy_timeout_ms: 5000, page_size: 1000 }
    }
}

#[derive(Debug)]
struct StoreInner {
    db_path: PathBuf,
    options: StoreOptions,
}

#[derive(Debug, Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Open (creating if needed) the database at `db_path` and bring its
    /// schema up to date.
    pub fn open(db_path: impl AsRef<Path>, options: StoreOptions) -> Result<Self, AppError> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let options = StoreOptions { page_size: options.page_size.max(1), ..options };
        let store = Self { inner: Arc::new(StoreInner { db_path, options }) };

        let conn = store.connect()?;
        schema::init_schema(&conn)?;
        debug!(path = %store.path().display(), "store: opened");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.inner.db_path
    }

    pub fn page_size(&self) -> usize {
        self.inner.options.page_size
    }

    pub fn options(&self) -> StoreOptions {
        self.inner.options
    }

    /// Open a fresh connection with the standard pragmas applied:
    /// - `journal_mode = WAL`, so readers don't block the writer.
    /// - `foreign_keys = ON`, for embedding cascades.
    /// - `busy_timeout`, after which a locked database is a write conflict.
    pub fn connect(&self) -> Result<Connection, AppError> {
        let path = self.path();
        let conn = Connection::open(path).map_err(|e| {
            AppError::Storage(format!("store: open {}: {e}", path.display()))
        })?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(db_err("store: set journal_mode WAL"))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(db_err("store: set foreign_keys ON"))?;
        conn.pragma_update(None, "busy_timeout", self.inner.options.busy_timeout_ms as i64)
            .map_err(db_err("store: set busy_timeout"))?;
        Ok(conn)
    }

    /// Run `f` in a read transaction.
    pub fn read<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        self.unit_of_work(TransactionBehavior::Deferred, f)
    }

    /// Run `f` in a write transaction.  The write lock is taken up front, so
    /// a concurrent writer surfaces as [`AppError::WriteConflict`] here rather
    /// than halfway through `f`.
    pub fn write<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        self.unit_of_work(TransactionBehavior::Immediate, f)
    }

    fn unit_of_work<T>(
        &self,
        behavior: TransactionBehavior,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let mut conn = self.connect()?;
        let tx = conn
            .transaction_with_behavior(behavior)
            .map_err(db_err("store: begin transaction"))?;
        match f(&tx) {
            Ok(out) => {
                tx.commit().map_err(db_err("store: commit"))?;
                Ok(out)
            }
            Err(e) => {
                debug!(error = %e, "store: rolling back unit of work");
                // Dropping the transaction rolls it back.
                drop(tx);
                Err(e)
            }
        }
    }

    pub fn collection<E: Entity>(&self) -> Collection<E> {
        Collection::new(self.clone())
    }

    pub fn settings(&self) -> Settings {
        Settings::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_store() -> (TempDir, Store) {
        let tmp = TempDir::new().unwrap();
        let store = Store::open(tmp.path().join("nested/corpus.db"), StoreOptions::default()).unwrap();
        (tmp, store)
    }

    #[test]
    fn open_creates_parent_dirs_and_schema() {
        let (_tmp, store) = make_store();
        assert!(store.path().exists());
        let version: i64 = store
            .read(|tx| tx.query_row("PRAGMA user_version;", [], |r| r.get(0)).map_err(db_err("t")))
            .unwrap();
        assert_eq!(version, schema::SCHEMA_VERSION);
    }

    #[test]
    fn reopen_is_idempotent() {
        let (tmp, _store) = make_store();
        Store::open(tmp.path().join("nested/corpus.db"), StoreOptions::default()).unwrap();
    }

    #[test]
    fn failed_unit_of_work_rolls_back() {
        let (_tmp, store) = make_store();
        let result: Result<(), AppError> = store.write(|tx| {
            tx.execute(
                "INSERT INTO database_settings (key, value) VALUES ('k', '1')",
                [],
            )
            .map_err(db_err("t"))?;
            Err(AppError::Storage("boom".into()))
        });
        assert!(result.is_err());

        let n: i64 = store
            .read(|tx| {
                tx.query_row("SELECT COUNT(*) FROM database_settings", [], |r| r.get(0))
                    .map_err(db_err("t"))
            })
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn newer_schema_version_is_rejected() {
        let (tmp, store) = make_store();
        store
            .write(|tx| tx.pragma_update(None, "user_version", 99).map_err(db_err("t")))
            .unwrap();
        let err = Store::open(tmp.path().join("nested/corpus.db"), StoreOptions::default())
            .unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
    }
}
