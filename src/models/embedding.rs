//! Embedding vectors and their sibling tables.
//!
//! On disk a vector is a bare little-endian `f32` array: `dims × 4` bytes, no
//! header.  It round-trips bit-exactly.

use rusqlite::Row;

use crate::error::AppError;
use crate::store::entity::{Entity, decode_err};
use crate::store::schema::{DOCUMENTS_EMBEDDINGS_DDL, NGRAMS_EMBEDDINGS_DDL};
use crate::store::value::Value;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Embedding(pub Vec<f32>);

impl Embedding {
    pub fn dims(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.0.len() * 4);
        for v in &self.0 {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    pub fn unpack(bytes: &[u8]) -> Result<Self, AppError> {
        if bytes.len() % 4 != 0 {
            return Err(AppError::InvalidEmbedding(format!(
                "blob of {} bytes is not a whole number of f32 values",
                bytes.len()
            )));
        }
        Ok(Self(
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ))
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(v: Vec<f32>) -> Self {
        Self(v)
    }
}

/// Decode an optional packed embedding column.
pub(crate) fn embedding_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Embedding>> {
    let blob: Option<Vec<u8>> = row.get(idx)?;
    blob.map(|b| Embedding::unpack(&b).map_err(|e| decode_err(idx, e)))
        .transpose()
}

/// Correlated sub-select exposing a sibling table's vector as a field of the
/// parent row.
pub(crate) fn embedding_lookup(sibling: &str, parent_fk: &str, parent_table: &str) -> String {
    format!(
        "(SELECT \"embedding\" FROM \"{sibling}\" WHERE \"{sibling}\".\"{parent_fk}\" = \"{parent_table}\".\"id\")"
    )
}

// ── Sibling records ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentEmbedding {
    pub id: Option<i64>,
    pub document_id: i64,
    pub embedding: Embedding,
}

impl DocumentEmbedding {
    pub fn new(document_id: i64, embedding: Embedding) -> Self {
        Self { id: None, document_id, embedding }
    }
}

impl Entity for DocumentEmbedding {
    type Key = i64;

    const TABLE: &'static str = "documents_embeddings";
    const FIELDS: &'static [&'static str] = &["id", "document_id", "embedding"];
    const COLUMNS: &'static [&'static str] = &["document_id", "embedding"];
    const CREATE_SQL: &'static str = DOCUMENTS_EMBEDDINGS_DDL;
    const ON_CONFLICT: Option<&'static str> =
        Some(r#"ON CONFLICT("document_id") DO UPDATE SET "embedding" = excluded."embedding""#);

    fn key(&self) -> Option<&i64> {
        self.id.as_ref()
    }

    fn set_key(&mut self, key: i64) {
        self.id = Some(key);
    }

    fn values(&self) -> Result<Vec<Value>, AppError> {
        Ok(vec![Value::Int(self.document_id), Value::Blob(self.embedding.pack())])
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            document_id: row.get(1)?,
            embedding: embedding_column(row, 2)?.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NGramEmbedding {
    pub id: Option<i64>,
    pub ngram_id: String,
    pub embedding: Embedding,
}

impl NGramEmbedding {
    pub fn new(ngram_id: impl Into<String>, embedding: Embedding) -> Self {
        Self { id: None, ngram_id: ngram_id.into(), embedding }
    }
}

impl Entity for NGramEmbedding {
    type Key = i64;

    const TABLE: &'static str = "ngrams_embeddings";
    const FIELDS: &'static [&'static str] = &["id", "ngram_id", "embedding"];
    const COLUMNS: &'static [&'static str] = &["ngram_id", "embedding"];
    const CREATE_SQL: &'static str = NGRAMS_EMBEDDINGS_DDL;
    const ON_CONFLICT: Option<&'static str> =
        Some(r#"ON CONFLICT("ngram_id") DO UPDATE SET "embedding" = excluded."embedding""#);

    fn key(&self) -> Option<&i64> {
        self.id.as_ref()
    }

    fn set_key(&mut self, key: i64) {
        self.id = Some(key);
    }

    fn values(&self) -> Result<Vec<Value>, AppError> {
        Ok(vec![Value::Str(self.ngram_id.clone()), Value::Blob(self.embedding.pack())])
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            ngram_id: row.get(1)?,
            embedding: embedding_column(row, 2)?.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_is_little_endian_without_header() {
        let e = Embedding(vec![1.0, -2.5]);
        let bytes = e.pack();
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[4..], &(-2.5f32).to_le_bytes());
    }

    #[test]
    fn unpack_restores_exact_bits() {
        let original = Embedding(vec![0.1, f32::MIN_POSITIVE, -0.0, 1e-30, 3.4e38]);
        let restored = Embedding::unpack(&original.pack()).unwrap();
        let bits = |e: &Embedding| e.0.iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&original), bits(&restored));
    }

    #[test]
    fn ragged_blob_is_rejected() {
        let err = Embedding::unpack(&[0, 0, 128]).unwrap_err();
        assert!(matches!(err, AppError::InvalidEmbedding(_)));
    }

    #[test]
    fn empty_vector_packs_to_empty_blob() {
        assert!(Embedding::default().pack().is_empty());
        assert_eq!(Embedding::unpack(&[]).unwrap().dims(), 0);
    }
}
