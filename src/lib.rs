//! Document corpus and n-gram vocabulary over SQLite.
//!
//! Documents and n-grams live in relational tables but read like Python
//! sequences: positions, slices and field projections through
//! [`store::Indexed`], lazily paged.  The vocabulary is built by folding each
//! document's n-gram counts into the `ngrams` table with a checkpoint after
//! every document, so an interrupted build resumes where it stopped.
//!
//! ## Layout
//! - [`store`] — connection handling, indexed collections, restricted views,
//!   settings.
//! - [`models`] — `Document`, `NGram` and their embeddings.
//! - [`corpus`] — the `Corpus` / `Vocab` facades and sampled views.
//! - [`pipeline`] — the resumable build and its merge worker pool.
//! - [`text`], [`embed`] — pluggable n-gram extraction and embedding.

pub mod config;
pub mod corpus;
pub mod embed;
pub mod error;
pub mod logger;
pub mod models;
pub mod pipeline;
pub mod retry;
pub mod store;
pub mod text;

pub use corpus::{Corpus, CorpusView, DocumentQuery, SampleSize, Vocab, VocabView};
pub use error::AppError;
pub use models::{Document, Embedding, NGram};
pub use pipeline::{BuildOptions, BuildReport, VocabBuilder};
pub use store::{Indexed, SliceSpec, Store, StoreOptions};
