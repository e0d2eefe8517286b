//! Lazy result sequences.
//!
//! A [`Cursor`] pulls one page at a time from a fetch closure and buffers it.
//! Pages are read in their own short unit of work, so a half-consumed cursor
//! holds no connection or lock.  After the first error the cursor is fused.
//!
//! [`Scan`] is the page source used by collections.  With identity order it
//! paginates by key set (`key > last`), which stays cheap deep into a table;
//! with a caller-supplied order it falls back to `LIMIT/OFFSET`.

use std::collections::VecDeque;
use std::sync::Arc;

use rusqlite::{Row, params_from_iter};

use super::Store;
use super::filter::Conditions;
use super::value::Value;
use crate::error::{AppError, db_err};

type FetchFn<T> = Box<dyn FnMut() -> Result<Option<Vec<T>>, AppError> + Send>;

pub struct Cursor<T> {
    fetch: Option<FetchFn<T>>,
    buffer: VecDeque<T>,
}

impl<T: Send + 'static> Cursor<T> {
    /// A cursor over pages produced by `fetch`; `Ok(None)` ends the sequence.
    pub(crate) fn new(
        fetch: impl FnMut() -> Result<Option<Vec<T>>, AppError> + Send + 'static,
    ) -> Self {
        Self { fetch: Some(Box::new(fetch)), buffer: VecDeque::new() }
    }

    pub fn empty() -> Self {
        Self { fetch: None, buffer: VecDeque::new() }
    }

    /// A cursor over already-materialized items.
    pub fn from_vec(items: Vec<T>) -> Self {
        Self { fetch: None, buffer: items.into() }
    }

    /// Drain the cursor, stopping at the first error.
    pub fn into_vec(self) -> Result<Vec<T>, AppError> {
        self.collect()
    }
}

impl<T> Iterator for Cursor<T> {
    type Item = Result<T, AppError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Some(Ok(item));
            }
            let fetch = self.fetch.as_mut()?;
            match fetch() {
                Ok(Some(page)) => self.buffer.extend(page),
                Ok(None) => self.fetch = None,
                Err(e) => {
                    self.fetch = None;
                    return Some(Err(e));
                }
            }
        }
    }
}

impl<T> std::fmt::Debug for Cursor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("buffered", &self.buffer.len())
            .field("exhausted", &self.fetch.is_none())
            .finish()
    }
}

// ── Scan ──────────────────────────────────────────────────────────────────────

pub(crate) type RowDecoder<T> = Arc<dyn Fn(&Row<'_>) -> rusqlite::Result<T> + Send + Sync>;

#[derive(Debug, Clone)]
pub(crate) enum ScanOrder {
    /// Identity order; enables key-set pagination.
    Key { descending: bool },
    /// Full `ORDER BY` body (already validated).
    Custom(String),
}

/// One paged `SELECT`.  Column 0 of `select` must be the identity.
pub(crate) struct Scan<T> {
    pub store: Store,
    /// `SELECT ... FROM ...` without a `WHERE` clause.
    pub select: String,
    pub key_expr: String,
    pub conditions: Conditions,
    pub order: ScanOrder,
    /// Raw rows to skip before the first one read.
    pub offset: usize,
    /// Raw rows to read in total (stride gaps included).
    pub limit: Option<usize>,
    /// Keep every `stride`-th raw row, starting with the first.
    pub stride: usize,
    pub decode: RowDecoder<T>,
}

struct ScanState {
    last_key: Option<Value>,
    raw_read: usize,
    exhausted: bool,
}

impl<T: Send + 'static> Scan<T> {
    pub fn into_cursor(self) -> Cursor<T> {
        let mut state = ScanState { last_key: None, raw_read: 0, exhausted: false };
        Cursor::new(move || self.next_page(&mut state))
    }

    fn next_page(&self, state: &mut ScanState) -> Result<Option<Vec<T>>, AppError> {
        if state.exhausted {
            return Ok(None);
        }
        let page_size = self.store.page_size();
        let want = match self.limit {
            Some(limit) => page_size.min(limit.saturating_sub(state.raw_read)),
            None => page_size,
        };
        if want == 0 {
            state.exhausted = true;
            return Ok(None);
        }

        let mut conditions = self.conditions.clone();
        let (order_by, offset) = match &self.order {
            ScanOrder::Key { descending } => {
                let dir = if *descending { "DESC" } else { "ASC" };
                if let Some(last) = &state.last_key {
                    let cmp = if *descending { "<" } else { ">" };
                    conditions.push(format!("{} {cmp} ?", self.key_expr), [last.clone()]);
                }
                let offset = if state.last_key.is_none() { self.offset } else { 0 };
                (format!("{} {dir}", self.key_expr), offset)
            }
            ScanOrder::Custom(order_by) => (order_by.clone(), self.offset + state.raw_read),
        };
        let sql = format!(
            "{}{} ORDER BY {order_by} LIMIT {want} OFFSET {offset}",
            self.select,
            conditions.where_clause(),
        );

        let stride = self.stride.max(1);
        let first_raw = state.raw_read;
        let (rows, last_key) = self.store.read(|tx| {
            let mut stmt = tx.prepare(&sql).map_err(db_err("scan: prepare"))?;
            let mut rows = stmt
                .query(params_from_iter(conditions.params.iter()))
                .map_err(db_err("scan: query"))?;
            let mut kept = Vec::new();
            let mut seen = 0usize;
            let mut last_key = None;
            while let Some(row) = rows.next().map_err(db_err("scan: step"))? {
                if (first_raw + seen) % stride == 0 {
                    kept.push((self.decode)(row).map_err(db_err("scan: decode"))?);
                }
                last_key = Some(row.get::<_, Value>(0).map_err(db_err("scan: key"))?);
                seen += 1;
            }
            Ok(((kept, seen), last_key))
        })?;

        let (kept, seen) = rows;
        state.raw_read += seen;
        if last_key.is_some() {
            state.last_key = last_key;
        }
        if seen < want {
            state.exhausted = true;
        }
        Ok(Some(kept))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_are_flattened_in_order() {
        let mut pages = vec![vec![1, 2], vec![], vec![3]].into_iter();
        let cursor = Cursor::new(move || Ok(pages.next()));
        assert_eq!(cursor.into_vec().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn cursor_is_fused_after_error() {
        let mut calls = 0;
        let mut cursor = Cursor::<i32>::new(move || {
            calls += 1;
            if calls == 1 {
                Ok(Some(vec![7]))
            } else {
                Err(AppError::Storage("gone".into()))
            }
        });
        assert_eq!(cursor.next().unwrap().unwrap(), 7);
        assert!(cursor.next().unwrap().is_err());
        assert!(cursor.next().is_none());
    }

    #[test]
    fn empty_and_materialized_cursors() {
        assert_eq!(Cursor::<u8>::empty().count(), 0);
        assert_eq!(Cursor::from_vec(vec!["a", "b"]).into_vec().unwrap(), vec!["a", "b"]);
    }
}
