//! Predicates, sort keys and paging for collection queries.
//!
//! Filters name entity fields, never raw SQL; every name is checked against
//! [`Entity::FIELDS`] before any statement is prepared.  A filter list is
//! AND-combined.  Membership tests bind the whole set as one JSON parameter
//! and expand it with `json_each`, so identity sets of any size stay within
//! SQLite's bound-parameter limit.

use super::entity::{Entity, check_field, key_expr};
use super::value::Value;
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Ne(String, Value),
    Lt(String, Value),
    Le(String, Value),
    Gt(String, Value),
    Ge(String, Value),
    /// Inclusive range.
    Between(String, Value, Value),
    /// Substring match on a text field, ASCII case-insensitive.
    Contains(String, String),
    In(String, Vec<Value>),
    IsNull(String),
    NotNull(String),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ne(field.into(), value.into())
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lt(field.into(), value.into())
    }

    pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Le(field.into(), value.into())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gt(field.into(), value.into())
    }

    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ge(field.into(), value.into())
    }

    pub fn between(
        field: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        Filter::Between(field.into(), low.into(), high.into())
    }

    pub fn contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Filter::Contains(field.into(), needle.into())
    }

    pub fn is_in<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In(field.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Filter::IsNull(field.into())
    }

    pub fn not_null(field: impl Into<String>) -> Self {
        Filter::NotNull(field.into())
    }

    pub fn field(&self) -> &str {
        match self {
            Filter::Eq(f, _)
            | Filter::Ne(f, _)
            | Filter::Lt(f, _)
            | Filter::Le(f, _)
            | Filter::Gt(f, _)
            | Filter::Ge(f, _)
            | Filter::Between(f, _, _)
            | Filter::Contains(f, _)
            | Filter::In(f, _)
            | Filter::IsNull(f)
            | Filter::NotNull(f) => f,
        }
    }
}

/// Sort key.  Identity ascending is always appended as the final tie-break.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub descending: bool,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Self { field: field.into(), descending: false }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self { field: field.into(), descending: true }
    }
}

/// Zero-based page number and page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: usize,
    pub size: usize,
}

impl Page {
    pub fn new(number: usize, size: usize) -> Self {
        Self { number, size }
    }

    pub fn offset(&self) -> usize {
        self.number.saturating_mul(self.size)
    }
}

// ── SQL rendering ─────────────────────────────────────────────────────────────

/// A rendered `WHERE` body (without the keyword) plus its bound values.
#[derive(Debug, Clone, Default)]
pub(crate) struct Conditions {
    pub terms: Vec<String>,
    pub params: Vec<Value>,
}

impl Conditions {
    pub fn push(&mut self, term: String, params: impl IntoIterator<Item = Value>) {
        self.terms.push(term);
        self.params.extend(params);
    }

    /// `" WHERE a AND b"` or the empty string.
    pub fn where_clause(&self) -> String {
        if self.terms.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.terms.join(" AND "))
        }
    }
}

pub(crate) fn render_filters<E: Entity>(filters: &[Filter]) -> Result<Conditions, AppError> {
    let mut out = Conditions::default();
    for filter in filters {
        check_field::<E>(filter.field())?;
        let expr = E::field_expr(filter.field());
        match filter {
            Filter::Eq(_, v) => out.push(format!("{expr} = ?"), [v.clone()]),
            Filter::Ne(_, v) => out.push(format!("{expr} <> ?"), [v.clone()]),
            Filter::Lt(_, v) => out.push(format!("{expr} < ?"), [v.clone()]),
            Filter::Le(_, v) => out.push(format!("{expr} <= ?"), [v.clone()]),
            Filter::Gt(_, v) => out.push(format!("{expr} > ?"), [v.clone()]),
            Filter::Ge(_, v) => out.push(format!("{expr} >= ?"), [v.clone()]),
            Filter::Between(_, lo, hi) => {
                out.push(format!("{expr} BETWEEN ? AND ?"), [lo.clone(), hi.clone()])
            }
            Filter::Contains(_, needle) => out.push(
                format!("{expr} LIKE '%' || ? || '%' ESCAPE '\\'"),
                [Value::Str(escape_like(needle))],
            ),
            Filter::In(_, values) => {
                let (term, param) = membership(&expr, values);
                out.push(term, param);
            }
            Filter::IsNull(_) => out.push(format!("{expr} IS NULL"), []),
            Filter::NotNull(_) => out.push(format!("{expr} IS NOT NULL"), []),
        }
    }
    Ok(out)
}

/// Make `%`, `_` and `\` match themselves in a `LIKE ... ESCAPE '\'` pattern.
fn escape_like(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len());
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// `expr IN (json_each(?))` with the set bound as a JSON array.
pub(crate) fn membership(expr: &str, values: &[Value]) -> (String, Option<Value>) {
    if values.is_empty() {
        return ("0".to_string(), None);
    }
    let array = serde_json::Value::Array(values.iter().map(Value::to_json).collect());
    (
        format!("{expr} IN (SELECT value FROM json_each(?))"),
        Some(Value::Str(array.to_string())),
    )
}

pub(crate) fn render_sort<E: Entity>(sort: &[Sort]) -> Result<String, AppError> {
    let mut terms = Vec::with_capacity(sort.len() + 1);
    for s in sort {
        check_field::<E>(&s.field)?;
        let dir = if s.descending { "DESC" } else { "ASC" };
        terms.push(format!("{} {dir}", E::field_expr(&s.field)));
    }
    terms.push(format!("{} ASC", key_expr::<E>()));
    Ok(terms.join(", "))
}
