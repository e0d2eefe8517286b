//! Column values exchanged with the relational store.
//!
//! * [`Value`] — one SQL scalar (null, integer, real, text, blob).  Used for
//!   filter operands, projected columns and key-set pagination cursors.
//! * [`Record`] — a light named tuple produced by column projection.
//! * [`Projection`] — what a projection yields per row: the bare value when
//!   exactly one field was requested, a [`Record`] otherwise.
//!
//! `Float` equality and hashing use `f64::to_bits()`, so NaN equals itself.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

// ── Value ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Str(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) => Some(b),
            _ => None,
        }
    }

    /// JSON form, used to hand identity sets to SQLite's `json_each`.
    pub(crate) fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Str(s) => serde_json::Value::from(s.as_str()),
            Value::Blob(b) => serde_json::Value::from(hex::encode(b)),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Blob(a), Value::Blob(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => 0u8.hash(state),
            Value::Int(i) => { 1u8.hash(state); i.hash(state); }
            Value::Float(f) => { 2u8.hash(state); f.to_bits().hash(state); }
            Value::Str(s) => { 3u8.hash(state); s.hash(state); }
            Value::Blob(b) => { 4u8.hash(state); b.hash(state); }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Blob(b) => write!(f, "<Blob {} bytes>", b.len()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self { Value::Int(v as i64) }
}
impl From<i32> for Value {
    fn from(v: i32) -> Self { Value::Int(v as i64) }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self { Value::Int(v) }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self { Value::Float(v) }
}
impl From<String> for Value {
    fn from(v: String) -> Self { Value::Str(v) }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self { Value::Str(v.to_string()) }
}
impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self { Value::Blob(v) }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Int(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Float(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Value::Str(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl FromSql for Value {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Int(i),
            ValueRef::Real(f) => Value::Float(f),
            ValueRef::Text(t) => Value::Str(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        })
    }
}

// ── Record / Projection ──────────────────────────────────────────────────────

/// A named tuple of projected columns.  Field names are shared between all
/// records of one projection.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    fields: Arc<[String]>,
    values: Vec<Value>,
}

impl Record {
    pub(crate) fn new(fields: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { fields, values }
    }

    /// Value of `field`, or `None` when the projection didn't include it.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .position(|f| f == field)
            .and_then(|i| self.values.get(i))
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One row of a column projection.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Single(Value),
    Tuple(Record),
}

impl Projection {
    /// The bare value of a single-field projection.
    pub fn into_single(self) -> Option<Value> {
        match self {
            Projection::Single(v) => Some(v),
            Projection::Tuple(_) => None,
        }
    }

    pub fn into_record(self) -> Option<Record> {
        match self {
            Projection::Tuple(r) => Some(r),
            Projection::Single(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn value_equality_and_hash() {
        assert_eq!(Value::Int(1), Value::from(1i64));
        assert_ne!(Value::Int(1), Value::Str("1".into()));
        assert_eq!(Value::Float(0.5), Value::from(0.5f64));

        let mut set = HashSet::new();
        set.insert(Value::from("a"));
        set.insert(Value::from("a"));
        set.insert(Value::Null);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn option_maps_to_null() {
        let none: Option<i64> = None;
        assert!(Value::from(none).is_null());
        assert_eq!(Value::from(Some("x")), Value::Str("x".into()));
    }

    #[test]
    fn record_lookup_by_name() {
        let fields: Arc<[String]> = vec!["id".to_string(), "title".to_string()].into();
        let r = Record::new(fields, vec![Value::Int(3), Value::from("Rust")]);
        assert_eq!(r.get("title"), Some(&Value::from("Rust")));
        assert_eq!(r.get("doi"), None);
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn json_form_of_keys() {
        assert_eq!(Value::Int(7).to_json(), serde_json::json!(7));
        assert_eq!(Value::from("ab").to_json(), serde_json::json!("ab"));
    }
}
