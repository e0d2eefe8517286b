//! [`Document`] — one corpus entry.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::Row;
use serde::{Deserialize, Deserializer, Serialize};

use super::embedding::{Embedding, embedding_column, embedding_lookup};
use crate::error::AppError;
use crate::store::entity::{Entity, decode_err, qualified};
use crate::store::schema::DOCUMENTS_DDL;
use crate::store::value::Value;

/// N-gram text → count within one document.
pub type NgramCounts = BTreeMap<String, i64>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub id: Option<i64>,
    pub doi: String,
    #[serde(default)]
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    pub content: String,
    #[serde(rename = "abstract", default)]
    pub abstract_text: String,
    #[serde(default)]
    pub citations: i64,
    #[serde(default)]
    pub source: String,
    #[serde(deserialize_with = "deserialize_date")]
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub ngrams: NgramCounts,
    #[serde(skip)]
    pub embedding: Option<Embedding>,
}

impl Document {
    pub fn new(
        doi: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            doi: doi.into(),
            url: String::new(),
            title: title.into(),
            authors: Vec::new(),
            content: content.into(),
            abstract_text: String::new(),
            citations: 0,
            source: String::new(),
            date,
            references: Vec::new(),
            ngrams: NgramCounts::new(),
            embedding: None,
        }
    }

    pub fn with_ngrams<K: Into<String>>(mut self, ngrams: impl IntoIterator<Item = (K, i64)>) -> Self {
        self.ngrams = ngrams.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self
    }
}

/// Stored form of a timestamp: RFC 3339, UTC, second precision.  Sorts
/// lexicographically in time order.
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Accepts full RFC 3339 timestamps or bare `YYYY-MM-DD` dates.
pub fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn deserialize_date<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
    let text = String::deserialize(d)?;
    parse_date(&text).ok_or_else(|| serde::de::Error::custom(format!("invalid date '{text}'")))
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| decode_err(idx, e))
}

impl Entity for Document {
    type Key = i64;

    const TABLE: &'static str = "documents";
    const FIELDS: &'static [&'static str] = &[
        "id", "doi", "url", "title", "authors", "content", "embedding", "abstract",
        "citations", "source", "date", "references", "ngrams",
    ];
    const COLUMNS: &'static [&'static str] = &[
        "doi", "url", "title", "authors", "content", "abstract", "citations", "source",
        "date", "references", "ngrams",
    ];
    const CREATE_SQL: &'static str = DOCUMENTS_DDL;

    fn key(&self) -> Option<&i64> {
        self.id.as_ref()
    }

    fn set_key(&mut self, key: i64) {
        self.id = Some(key);
    }

    fn values(&self) -> Result<Vec<Value>, AppError> {
        Ok(vec![
            Value::Str(self.doi.clone()),
            Value::Str(self.url.clone()),
            Value::Str(self.title.clone()),
            Value::Str(serde_json::to_string(&self.authors)?),
            Value::Str(self.content.clone()),
            Value::Str(self.abstract_text.clone()),
            Value::Int(self.citations),
            Value::Str(self.source.clone()),
            Value::Str(format_date(&self.date)),
            Value::Str(serde_json::to_string(&self.references)?),
            Value::Str(serde_json::to_string(&self.ngrams)?),
        ])
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let date_text: String = row.get(10)?;
        let date = parse_date(&date_text).ok_or_else(|| {
            decode_err(10, AppError::Storage(format!("document date '{date_text}'")))
        })?;
        Ok(Self {
            id: Some(row.get(0)?),
            doi: row.get(1)?,
            url: row.get(2)?,
            title: row.get(3)?,
            authors: json_column(row, 4)?,
            content: row.get(5)?,
            embedding: embedding_column(row, 6)?,
            abstract_text: row.get(7)?,
            citations: row.get(8)?,
            source: row.get(9)?,
            date,
            references: json_column(row, 11)?,
            ngrams: json_column(row, 12)?,
        })
    }

    fn field_expr(field: &str) -> String {
        match field {
            "embedding" => embedding_lookup("documents_embeddings", "document_id", Self::TABLE),
            _ => qualified(Self::TABLE, field),
        }
    }
}
