//! [`Collection`] — one entity table presented as an ordered sequence.
//!
//! Order is always identity ascending.  Tail access (`by_position(-1)`,
//! negative-step slices) scans the identity index descending instead of
//! counting from the front.  Reads return owned records; nothing stays tied
//! to a connection once a call returns.

use std::collections::HashMap;
use std::iter;
use std::marker::PhantomData;
use std::sync::Arc;

use rusqlite::{OptionalExtension, Transaction, params_from_iter};
use tracing::{debug, info};

use super::Store;
use super::cursor::{Cursor, RowDecoder, Scan, ScanOrder};
use super::entity::{Entity, check_field, key_expr, key_field, quote, select_list};
use super::filter::{Conditions, Filter, Page, Sort, membership, render_filters, render_sort};
use super::indexed::Indexed;
use super::slice::SliceSpec;
use super::value::{Projection, Record, Value};
use super::view::RestrictedView;
use crate::error::{AppError, db_err};

pub struct Collection<E: Entity> {
    store: Store,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for Collection<E> {
    fn clone(&self) -> Self {
        Self { store: self.store.clone(), _entity: PhantomData }
    }
}

impl<E: Entity> std::fmt::Debug for Collection<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection").field("table", &E::TABLE).finish()
    }
}

impl<E: Entity> Collection<E> {
    pub(crate) fn new(store: Store) -> Self {
        Self { store, _entity: PhantomData }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// A view restricted to `keys`.  See [`RestrictedView::new`].
    pub fn restrict(&self, keys: impl IntoIterator<Item = E::Key>) -> Result<RestrictedView<E>, AppError> {
        RestrictedView::new(self.clone(), keys)
    }

    /// [`Indexed::columns`] starting at position `skip`.  The skipped rows
    /// are never decoded.
    pub fn columns_from(&self, fields: &[&str], skip: usize) -> Result<Cursor<Projection>, AppError> {
        self.columns_in(&Conditions::default(), fields, skip)
    }

    // ── Writes ───────────────────────────────────────────────────────────────

    /// Insert records without an identity and update those with one, all in
    /// one transaction.  Returns the stored rows in input order.
    ///
    /// A record whose identity no longer exists is re-inserted under that
    /// identity.  Inserts colliding with an existing identity go through the
    /// entity's `ON CONFLICT` clause, so content-addressed rows fold their
    /// counters together instead of duplicating.
    pub fn bulk_merge(&self, records: Vec<E>) -> Result<Vec<E>, AppError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let table = quote(E::TABLE);
        let key_col = quote(key_field::<E>());
        let columns: Vec<String> = E::COLUMNS.iter().map(|c| quote(c)).collect();
        let assignments = columns
            .iter()
            .map(|c| format!("{c} = ?"))
            .collect::<Vec<_>>()
            .join(", ");
        let update_sql = format!("UPDATE {table} SET {assignments} WHERE {key_col} = ?");
        let on_conflict = E::ON_CONFLICT.unwrap_or("");
        let insert_sql = |with_key: bool| {
            let mut cols = columns.clone();
            if with_key {
                cols.insert(0, key_col.clone());
            }
            let marks = vec!["?"; cols.len()].join(", ");
            format!(
                "INSERT INTO {table} ({}) VALUES ({marks}) {on_conflict} RETURNING {key_col}",
                cols.join(", ")
            )
        };

        let (updated, inserted, stored) = self.store.write(|tx| {
            let mut keys = Vec::with_capacity(records.len());
            let (mut updated, mut inserted) = (0usize, 0usize);
            for record in &records {
                let values = record.values()?;
                let explicit = match record.key() {
                    Some(key) => {
                        let key_value: Value = key.clone().into();
                        let changed = tx
                            .prepare_cached(&update_sql)
                            .and_then(|mut stmt| {
                                stmt.execute(params_from_iter(values.iter().chain(iter::once(&key_value))))
                            })
                            .map_err(db_err("collection: update"))?;
                        if changed > 0 {
                            updated += 1;
                            keys.push(key.clone());
                            continue;
                        }
                        Some(key.clone())
                    }
                    None => record.insert_key(),
                };

                let key: E::Key = match explicit {
                    Some(key) => {
                        let key_value: Value = key.into();
                        tx.prepare_cached(&insert_sql(true))
                            .and_then(|mut stmt| {
                                stmt.query_row(
                                    params_from_iter(iter::once(&key_value).chain(values.iter())),
                                    |row| row.get(0),
                                )
                            })
                            .map_err(db_err("collection: insert"))?
                    }
                    None => tx
                        .prepare_cached(&insert_sql(false))
                        .and_then(|mut stmt| stmt.query_row(params_from_iter(values.iter()), |row| row.get(0)))
                        .map_err(db_err("collection: insert"))?,
                };
                inserted += 1;
                keys.push(key);
            }

            let loaded: HashMap<E::Key, E> = Self::load_many(tx, &keys)?
                .into_iter()
                .filter_map(|e| e.key().cloned().map(|k| (k, e)))
                .collect();
            let stored = keys
                .iter()
                .map(|k| {
                    loaded.get(k).cloned().ok_or_else(|| {
                        AppError::Storage(format!("collection: {k:?} vanished from {}", E::TABLE))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok((updated, inserted, stored))
        })?;

        debug!(table = E::TABLE, updated, inserted, "collection: bulk merge committed");
        Ok(stored)
    }

    /// Delete every row matching all `filters` in one statement.  An empty
    /// filter list deletes nothing.
    pub fn delete_where(&self, filters: &[Filter]) -> Result<usize, AppError> {
        if filters.is_empty() {
            debug!(table = E::TABLE, "collection: delete_where with no filters ignored");
            return Ok(0);
        }
        let conditions = render_filters::<E>(filters)?;
        let sql = format!("DELETE FROM {}{}", quote(E::TABLE), conditions.where_clause());
        let deleted = self.store.write(|tx| {
            tx.execute(&sql, params_from_iter(conditions.params.iter()))
                .map_err(db_err("collection: delete"))
        })?;
        debug!(table = E::TABLE, deleted, "collection: rows deleted");
        Ok(deleted)
    }

    /// Drop the table.  Dependent rows go with it through their cascade.
    pub fn drop_table(&self) -> Result<(), AppError> {
        let sql = format!("DROP TABLE IF EXISTS {}", quote(E::TABLE));
        self.store
            .write(|tx| tx.execute_batch(&sql).map_err(db_err("collection: drop table")))?;
        info!(table = E::TABLE, "collection: table dropped");
        Ok(())
    }

    pub fn create_table(&self) -> Result<(), AppError> {
        self.store.write(|tx| {
            tx.execute_batch(E::CREATE_SQL)
                .map_err(db_err("collection: create table"))
        })
    }

    // ── Shared read paths (also used by restricted views) ────────────────────

    fn from_clause() -> String {
        format!(" FROM {}", quote(E::TABLE))
    }

    fn entity_decoder() -> RowDecoder<E> {
        Arc::new(|row| E::from_row(row))
    }

    fn entity_scan(&self, conditions: Conditions, order: ScanOrder) -> Scan<E> {
        Scan {
            store: self.store.clone(),
            select: format!("SELECT {}{}", select_list::<E>(), Self::from_clause()),
            key_expr: key_expr::<E>(),
            conditions,
            order,
            offset: 0,
            limit: None,
            stride: 1,
            decode: Self::entity_decoder(),
        }
    }

    pub(crate) fn load_many(tx: &Transaction<'_>, keys: &[E::Key]) -> Result<Vec<E>, AppError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let values: Vec<Value> = keys.iter().cloned().map(Into::into).collect();
        let (term, param) = membership(&key_expr::<E>(), &values);
        let sql = format!(
            "SELECT {}{} WHERE {term} ORDER BY {} ASC",
            select_list::<E>(),
            Self::from_clause(),
            key_expr::<E>(),
        );
        let mut stmt = tx.prepare(&sql).map_err(db_err("collection: prepare find"))?;
        let rows = stmt
            .query_map(params_from_iter(param.iter()), |row| E::from_row(row))
            .map_err(db_err("collection: find"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("collection: decode"))
    }

    pub(crate) fn count_in(&self, base: &Conditions, filters: &[Filter]) -> Result<usize, AppError> {
        let mut conditions = render_filters::<E>(filters)?;
        conditions.terms.extend(base.terms.iter().cloned());
        conditions.params.extend(base.params.iter().cloned());
        let sql = format!("SELECT COUNT(*){}{}", Self::from_clause(), conditions.where_clause());
        let n: i64 = self.store.read(|tx| {
            tx.query_row(&sql, params_from_iter(conditions.params.iter()), |row| row.get(0))
                .map_err(db_err("collection: count"))
        })?;
        Ok(n as usize)
    }

    pub(crate) fn find_where_in(
        &self,
        base: &Conditions,
        filters: &[Filter],
        sort: &[Sort],
        page: Option<Page>,
    ) -> Result<Cursor<E>, AppError> {
        let mut conditions = render_filters::<E>(filters)?;
        conditions.terms.extend(base.terms.iter().cloned());
        conditions.params.extend(base.params.iter().cloned());
        let order = if sort.is_empty() {
            ScanOrder::Key { descending: false }
        } else {
            ScanOrder::Custom(render_sort::<E>(sort)?)
        };
        let mut scan = self.entity_scan(conditions, order);
        if let Some(page) = page {
            if page.size == 0 {
                return Ok(Cursor::empty());
            }
            scan.offset = page.offset();
            scan.limit = Some(page.size);
        }
        Ok(scan.into_cursor())
    }

    pub(crate) fn columns_in(
        &self,
        base: &Conditions,
        fields: &[&str],
        skip: usize,
    ) -> Result<Cursor<Projection>, AppError> {
        if fields.is_empty() {
            return Err(AppError::InvalidIndexer("empty field list".into()));
        }
        for field in fields {
            check_field::<E>(field)?;
        }
        let names: Arc<[String]> = fields.iter().map(|f| f.to_string()).collect();
        let exprs = fields.iter().map(|f| E::field_expr(f)).collect::<Vec<_>>().join(", ");
        let width = fields.len();
        let decode: RowDecoder<Projection> = Arc::new(move |row| {
            if width == 1 {
                return Ok(Projection::Single(row.get(1)?));
            }
            let values = (1..=width)
                .map(|i| row.get::<_, Value>(i))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(Projection::Tuple(Record::new(names.clone(), values)))
        });
        Ok(Scan {
            store: self.store.clone(),
            select: format!("SELECT {}, {exprs}{}", key_expr::<E>(), Self::from_clause()),
            key_expr: key_expr::<E>(),
            conditions: base.clone(),
            order: ScanOrder::Key { descending: false },
            offset: skip,
            limit: None,
            stride: 1,
            decode,
        }
        .into_cursor())
    }

    pub(crate) fn ids_in(&self, base: &Conditions) -> Cursor<E::Key> {
        Scan {
            store: self.store.clone(),
            select: format!("SELECT {}{}", key_expr::<E>(), Self::from_clause()),
            key_expr: key_expr::<E>(),
            conditions: base.clone(),
            order: ScanOrder::Key { descending: false },
            offset: 0,
            limit: None,
            stride: 1,
            decode: Arc::new(|row| row.get::<_, E::Key>(0)),
        }
        .into_cursor()
    }

    pub(crate) fn aggregate_in(
        &self,
        base: &Conditions,
        func: &str,
        field: &str,
    ) -> Result<Option<Value>, AppError> {
        check_field::<E>(field)?;
        let sql = format!(
            "SELECT {func}({}){}{}",
            E::field_expr(field),
            Self::from_clause(),
            base.where_clause()
        );
        let value: Value = self.store.read(|tx| {
            tx.query_row(&sql, params_from_iter(base.params.iter()), |row| row.get(0))
                .map_err(db_err("collection: aggregate"))
        })?;
        Ok((!value.is_null()).then_some(value))
    }
}

impl<E: Entity> Indexed<E> for Collection<E> {
    fn len(&self) -> Result<usize, AppError> {
        self.count_in(&Conditions::default(), &[])
    }

    fn by_position(&self, index: i64) -> Result<Option<E>, AppError> {
        let (dir, offset) = if index >= 0 {
            ("ASC", index)
        } else {
            ("DESC", -(index + 1))
        };
        let sql = format!(
            "SELECT {}{} ORDER BY {} {dir} LIMIT 1 OFFSET ?",
            select_list::<E>(),
            Self::from_clause(),
            key_expr::<E>(),
        );
        self.store.read(|tx| {
            tx.query_row(&sql, [offset], |row| E::from_row(row))
                .optional()
                .map_err(db_err("collection: by position"))
        })
    }

    fn by_slice(&self, slice: SliceSpec) -> Result<Cursor<E>, AppError> {
        let len = self.len()?;
        let resolved = slice.resolve(len)?;
        if resolved.is_empty() {
            return Ok(Cursor::empty());
        }
        let start = resolved.start as usize;
        let (descending, offset) = if resolved.step > 0 {
            (false, start)
        } else {
            (true, len - 1 - start)
        };
        let mut scan = self.entity_scan(Conditions::default(), ScanOrder::Key { descending });
        scan.offset = offset;
        scan.limit = Some(resolved.span());
        scan.stride = resolved.step.unsigned_abs() as usize;
        Ok(scan.into_cursor())
    }

    fn columns(&self, fields: &[&str]) -> Result<Cursor<Projection>, AppError> {
        self.columns_in(&Conditions::default(), fields, 0)
    }

    fn ids(&self) -> Result<Cursor<E::Key>, AppError> {
        Ok(self.ids_in(&Conditions::default()))
    }

    fn find(&self, key: &E::Key) -> Result<Option<E>, AppError> {
        Ok(self.find_many(std::slice::from_ref(key))?.pop())
    }

    fn find_many(&self, keys: &[E::Key]) -> Result<Vec<E>, AppError> {
        self.store.read(|tx| Self::load_many(tx, keys))
    }

    fn find_where(
        &self,
        filters: &[Filter],
        sort: &[Sort],
        page: Option<Page>,
    ) -> Result<Cursor<E>, AppError> {
        self.find_where_in(&Conditions::default(), filters, sort, page)
    }

    fn count_where(&self, filters: &[Filter]) -> Result<usize, AppError> {
        self.count_in(&Conditions::default(), filters)
    }

    fn min(&self, field: &str) -> Result<Option<Value>, AppError> {
        self.aggregate_in(&Conditions::default(), "MIN", field)
    }

    fn max(&self, field: &str) -> Result<Option<Value>, AppError> {
        self.aggregate_in(&Conditions::default(), "MAX", field)
    }
}
