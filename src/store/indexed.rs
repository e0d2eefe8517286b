//! The sequence contract shared by full collections and restricted views.

use super::cursor::Cursor;
use super::entity::Entity;
use super::filter::{Filter, Page, Sort};
use super::slice::{Indexer, SliceSpec};
use super::value::{Projection, Value};
use crate::error::AppError;

/// What [`Indexed::select`] yields for each indexer form.
#[derive(Debug)]
pub enum Selection<E> {
    /// A single position; `None` when out of range.
    One(Option<E>),
    /// A slice.
    Many(Cursor<E>),
    /// A field projection.
    Columns(Cursor<Projection>),
}

impl<E> Selection<E> {
    pub fn into_one(self) -> Option<E> {
        match self {
            Selection::One(item) => item,
            _ => None,
        }
    }
}

/// List-like access to the rows of one entity table, ordered by identity.
///
/// Out-of-range positions and unknown identities are `Ok(None)` rather than
/// errors.  Unknown field names are rejected with
/// [`AppError::InvalidField`] before any statement runs.
pub trait Indexed<E: Entity> {
    fn len(&self) -> Result<usize, AppError>;

    fn is_empty(&self) -> Result<bool, AppError> {
        Ok(self.len()? == 0)
    }

    /// Python-style position: `0` is the first row, `-1` the last.
    fn by_position(&self, index: i64) -> Result<Option<E>, AppError>;

    fn by_slice(&self, slice: SliceSpec) -> Result<Cursor<E>, AppError>;

    /// Project `fields` for every row, in identity order.  A single field
    /// yields bare values; several yield named records.
    fn columns(&self, fields: &[&str]) -> Result<Cursor<Projection>, AppError>;

    /// All identities, ascending.
    fn ids(&self) -> Result<Cursor<E::Key>, AppError>;

    fn find(&self, key: &E::Key) -> Result<Option<E>, AppError>;

    /// Batch lookup.  Unknown identities are dropped; the rest come back in
    /// ascending identity order.
    fn find_many(&self, keys: &[E::Key]) -> Result<Vec<E>, AppError>;

    fn find_where(
        &self,
        filters: &[Filter],
        sort: &[Sort],
        page: Option<Page>,
    ) -> Result<Cursor<E>, AppError>;

    fn count_where(&self, filters: &[Filter]) -> Result<usize, AppError>;

    /// `None` for an empty column.
    fn min(&self, field: &str) -> Result<Option<Value>, AppError>;

    fn max(&self, field: &str) -> Result<Option<Value>, AppError>;

    /// Exact-match lookup on named fields; first match by identity.
    fn find_one_by(&self, fields: &[(&str, Value)]) -> Result<Option<E>, AppError> {
        let filters: Vec<Filter> = fields
            .iter()
            .map(|(name, value)| Filter::eq(*name, value.clone()))
            .collect();
        self.find_where(&filters, &[], Some(Page::new(0, 1)))?.next().transpose()
    }

    fn iter(&self) -> Result<Cursor<E>, AppError> {
        self.by_slice(SliceSpec::full())
    }

    /// The subscript operator: position, slice, field or field list.
    fn select(&self, indexer: impl Into<Indexer>) -> Result<Selection<E>, AppError>
    where
        Self: Sized,
    {
        match indexer.into() {
            Indexer::Position(i) => Ok(Selection::One(self.by_position(i)?)),
            Indexer::Slice(s) => Ok(Selection::Many(self.by_slice(s)?)),
            Indexer::Field(f) => Ok(Selection::Columns(self.columns(&[f.as_str()])?)),
            Indexer::Fields(fs) => {
                if fs.is_empty() {
                    return Err(AppError::InvalidIndexer("empty field list".into()));
                }
                let names: Vec<&str> = fs.iter().map(String::as_str).collect();
                Ok(Selection::Columns(self.columns(&names)?))
            }
        }
    }
}
