//! [`RestrictedView`] — a collection narrowed to a fixed set of identities.
//!
//! The identity set is captured once, sorted and de-duplicated, and never
//! changes afterwards: rows inserted into the backing table later are not
//! visible through the view.  Positions index into that set, so `len()` is
//! its cardinality and `by_position(0)` is the row with the lowest identity.
//! Every query through the view ANDs `identity ∈ set` into its predicate.

use std::collections::HashMap;
use std::sync::Arc;

use super::collection::Collection;
use super::cursor::Cursor;
use super::entity::{Entity, key_expr};
use super::filter::{Conditions, Filter, Page, Sort, membership};
use super::indexed::Indexed;
use super::slice::{SliceSpec, resolve_position};
use super::value::{Projection, Value};
use crate::error::AppError;

pub struct RestrictedView<E: Entity> {
    collection: Collection<E>,
    keys: Arc<[E::Key]>,
    restriction: Conditions,
    complete: bool,
}

impl<E: Entity> Clone for RestrictedView<E> {
    fn clone(&self) -> Self {
        Self {
            collection: self.collection.clone(),
            keys: self.keys.clone(),
            restriction: self.restriction.clone(),
            complete: self.complete,
        }
    }
}

impl<E: Entity> std::fmt::Debug for RestrictedView<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestrictedView")
            .field("table", &E::TABLE)
            .field("keys", &self.keys.len())
            .field("complete", &self.complete)
            .finish()
    }
}

impl<E: Entity> RestrictedView<E> {
    pub fn new(
        collection: Collection<E>,
        keys: impl IntoIterator<Item = E::Key>,
    ) -> Result<Self, AppError> {
        let mut keys: Vec<E::Key> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let values: Vec<Value> = keys.iter().cloned().map(Into::into).collect();
        let (term, param) = membership(&key_expr::<E>(), &values);
        let mut restriction = Conditions::default();
        restriction.push(term, param);

        let complete = !keys.is_empty() && {
            let covered = collection.count_in(&restriction, &[])?;
            covered == keys.len() && covered == collection.len()?
        };

        Ok(Self { collection, keys: keys.into(), restriction, complete })
    }

    /// The restriction set, ascending.
    pub fn keys(&self) -> &[E::Key] {
        &self.keys
    }

    /// Whether the restriction covered every row of the table when the view
    /// was built.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn collection(&self) -> &Collection<E> {
        &self.collection
    }

    fn contains(&self, key: &E::Key) -> bool {
        self.keys.binary_search(key).is_ok()
    }

    /// Load `keys` in the given order, skipping rows deleted since the view
    /// was built.
    fn load_ordered(collection: &Collection<E>, keys: &[E::Key]) -> Result<Vec<E>, AppError> {
        let mut found: HashMap<E::Key, E> = collection
            .find_many(keys)?
            .into_iter()
            .filter_map(|e| e.key().cloned().map(|k| (k, e)))
            .collect();
        Ok(keys.iter().filter_map(|k| found.remove(k)).collect())
    }
}

impl<E: Entity> Indexed<E> for RestrictedView<E> {
    fn len(&self) -> Result<usize, AppError> {
        Ok(self.keys.len())
    }

    fn by_position(&self, index: i64) -> Result<Option<E>, AppError> {
        match resolve_position(index, self.keys.len()) {
            Some(pos) => self.collection.find(&self.keys[pos]),
            None => Ok(None),
        }
    }

    fn by_slice(&self, slice: SliceSpec) -> Result<Cursor<E>, AppError> {
        let resolved = slice.resolve(self.keys.len())?;
        if resolved.is_empty() {
            return Ok(Cursor::empty());
        }
        let selected: Vec<E::Key> = resolved.positions().map(|p| self.keys[p].clone()).collect();
        let page_size = self.collection.store().page_size();
        let collection = self.collection.clone();
        let mut next = 0usize;
        Ok(Cursor::new(move || {
            if next >= selected.len() {
                return Ok(None);
            }
            let end = (next + page_size).min(selected.len());
            let page = Self::load_ordered(&collection, &selected[next..end])?;
            next = end;
            Ok(Some(page))
        }))
    }

    fn columns(&self, fields: &[&str]) -> Result<Cursor<Projection>, AppError> {
        self.collection.columns_in(&self.restriction, fields, 0)
    }

    fn ids(&self) -> Result<Cursor<E::Key>, AppError> {
        Ok(Cursor::from_vec(self.keys.to_vec()))
    }

    fn find(&self, key: &E::Key) -> Result<Option<E>, AppError> {
        if !self.contains(key) {
            return Ok(None);
        }
        self.collection.find(key)
    }

    fn find_many(&self, keys: &[E::Key]) -> Result<Vec<E>, AppError> {
        let inside: Vec<E::Key> = keys.iter().filter(|k| self.contains(k)).cloned().collect();
        self.collection.find_many(&inside)
    }

    fn find_where(
        &self,
        filters: &[Filter],
        sort: &[Sort],
        page: Option<Page>,
    ) -> Result<Cursor<E>, AppError> {
        self.collection.find_where_in(&self.restriction, filters, sort, page)
    }

    fn count_where(&self, filters: &[Filter]) -> Result<usize, AppError> {
        self.collection.count_in(&self.restriction, filters)
    }

    fn min(&self, field: &str) -> Result<Option<Value>, AppError> {
        self.collection.aggregate_in(&self.restriction, "MIN", field)
    }

    fn max(&self, field: &str) -> Result<Option<Value>, AppError> {
        self.collection.aggregate_in(&self.restriction, "MAX", field)
    }
}
