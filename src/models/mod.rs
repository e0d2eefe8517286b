//! Record types stored in the corpus database.

pub mod document;
pub mod embedding;
pub mod ngram;

pub use document::{Document, NgramCounts};
pub use embedding::{DocumentEmbedding, Embedding, NGramEmbedding};
pub use ngram::NGram;
