//! [`NGram`] — one vocabulary term, keyed by the SHA-256 of its text.

use rusqlite::Row;
use sha2::{Digest, Sha256};

use super::embedding::{Embedding, embedding_column, embedding_lookup};
use crate::error::AppError;
use crate::store::entity::{Entity, qualified};
use crate::store::schema::NGRAMS_DDL;
use crate::store::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct NGram {
    /// Lowercase hex SHA-256 of `ngram`; `None` until stored.
    pub id: Option<String>,
    pub ngram: String,
    /// Sum of per-document counts.
    pub frequency: i64,
    /// Number of documents that contributed to `frequency`.
    pub occurrence: i64,
    pub embedding: Option<Embedding>,
}

impl NGram {
    pub fn new(ngram: impl Into<String>, frequency: i64, occurrence: i64) -> Self {
        Self { id: None, ngram: ngram.into(), frequency, occurrence, embedding: None }
    }

    /// Identity of `text`: the same string always maps to the same row.
    pub fn hash_id(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl Entity for NGram {
    type Key = String;

    const TABLE: &'static str = "ngrams";
    const FIELDS: &'static [&'static str] = &["id", "ngram", "frequency", "embedding", "occurrence"];
    const COLUMNS: &'static [&'static str] = &["ngram", "frequency", "occurrence"];
    const CREATE_SQL: &'static str = NGRAMS_DDL;
    const ON_CONFLICT: Option<&'static str> = Some(
        r#"ON CONFLICT("id") DO UPDATE SET "frequency" = "frequency" + excluded."frequency", "occurrence" = "occurrence" + excluded."occurrence""#,
    );

    fn key(&self) -> Option<&String> {
        self.id.as_ref()
    }

    fn set_key(&mut self, key: String) {
        self.id = Some(key);
    }

    fn insert_key(&self) -> Option<String> {
        Some(Self::hash_id(&self.ngram))
    }

    fn values(&self) -> Result<Vec<Value>, AppError> {
        Ok(vec![
            Value::Str(self.ngram.clone()),
            Value::Int(self.frequency),
            Value::Int(self.occurrence),
        ])
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            ngram: row.get(1)?,
            frequency: row.get(2)?,
            embedding: embedding_column(row, 3)?,
            occurrence: row.get(4)?,
        })
    }

    fn field_expr(field: &str) -> String {
        match field {
            "embedding" => embedding_lookup("ngrams_embeddings", "ngram_id", Self::TABLE),
            _ => qualified(Self::TABLE, field),
        }
    }
}
