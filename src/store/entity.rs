//! [`Entity`] — the contract a record type implements to live in an
//! indexed collection.
//!
//! An entity maps to exactly one table.  `FIELDS` is the ordered set of names
//! callers may project or filter on; the first field is always the identity.
//! Fields need not be physical columns: a field may be computed by
//! [`Entity::field_expr`] (the `embedding` sibling lookup, for instance).
//! `COLUMNS` lists what is actually written on insert/update, aligned with
//! [`Entity::values`].

use std::fmt::Debug;
use std::hash::Hash;

use rusqlite::Row;
use rusqlite::types::FromSql;

use super::value::Value;
use crate::error::AppError;

pub trait Entity: Clone + Debug + Send + Sync + 'static {
    /// Identity type: a surrogate integer or a content hash.
    type Key: Clone + Debug + Ord + Hash + Send + Sync + FromSql + Into<Value> + 'static;

    const TABLE: &'static str;

    /// Ordered field names.  `FIELDS[0]` is the identity column.
    const FIELDS: &'static [&'static str];

    /// Physical columns written on insert/update, identity excluded.
    const COLUMNS: &'static [&'static str];

    /// DDL for this entity's table and indexes.
    const CREATE_SQL: &'static str;

    /// Optional `ON CONFLICT ...` clause appended to inserts.  Content-addressed
    /// entities use it to fold a colliding insert into the existing row.
    const ON_CONFLICT: Option<&'static str> = None;

    /// Persisted identity, `None` until the record has been inserted.
    fn key(&self) -> Option<&Self::Key>;

    fn set_key(&mut self, key: Self::Key);

    /// Identity to write explicitly on insert.  `None` lets the store assign
    /// one (sequential integer keys).
    fn insert_key(&self) -> Option<Self::Key> {
        None
    }

    /// Values for `COLUMNS`, in order.
    fn values(&self) -> Result<Vec<Value>, AppError>;

    /// Decode a row selected with [`select_list`], i.e. one column per
    /// `FIELDS` entry in order.
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;

    /// SQL expression producing `field`.  Defaults to the table column.
    fn field_expr(field: &str) -> String {
        qualified(Self::TABLE, field)
    }
}

/// Name of the identity field.
pub(crate) fn key_field<E: Entity>() -> &'static str {
    E::FIELDS[0]
}

pub(crate) fn key_expr<E: Entity>() -> String {
    E::field_expr(key_field::<E>())
}

/// Full select list: every field, in `FIELDS` order.
pub(crate) fn select_list<E: Entity>() -> String {
    E::FIELDS
        .iter()
        .map(|f| E::field_expr(f))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Reject `field` eagerly if the entity doesn't declare it.
pub(crate) fn check_field<E: Entity>(field: &str) -> Result<(), AppError> {
    if E::FIELDS.contains(&field) {
        Ok(())
    } else {
        Err(AppError::InvalidField { table: E::TABLE, field: field.to_string() })
    }
}

pub(crate) fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub(crate) fn qualified(table: &str, column: &str) -> String {
    format!("{}.{}", quote(table), quote(column))
}

/// Wrap a decode failure so it surfaces through `rusqlite::Row::get` paths.
pub(crate) fn decode_err(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}
