//! The n-gram vocabulary and its restricted views.

use tracing::info;

use super::backfill_embeddings;
use crate::embed::{EmbedOptions, Embedder};
use crate::error::AppError;
use crate::models::{NGram, NGramEmbedding};
use crate::store::{
    Collection, Cursor, Filter, Indexed, Indexer, RestrictedView, Selection, Settings, Store,
};

#[derive(Debug, Clone)]
pub struct Vocab {
    ngrams: Collection<NGram>,
    embeddings: Collection<NGramEmbedding>,
    settings: Settings,
}

impl Vocab {
    pub fn new(store: &Store) -> Self {
        Self {
            ngrams: store.collection(),
            embeddings: store.collection(),
            settings: store.settings(),
        }
    }

    pub fn ngrams(&self) -> &Collection<NGram> {
        &self.ngrams
    }

    pub fn len(&self) -> Result<usize, AppError> {
        self.ngrams.len()
    }

    pub fn is_empty(&self) -> Result<bool, AppError> {
        self.ngrams.is_empty()
    }

    pub fn select(&self, indexer: impl Into<Indexer>) -> Result<Selection<NGram>, AppError> {
        self.ngrams.select(indexer)
    }

    pub fn iter(&self) -> Result<Cursor<NGram>, AppError> {
        self.ngrams.iter()
    }

    /// Look an n-gram up by its text.
    pub fn get(&self, text: &str) -> Result<Option<NGram>, AppError> {
        self.ngrams.find(&NGram::hash_id(text))
    }

    pub fn contains(&self, text: &str) -> Result<bool, AppError> {
        Ok(self.get(text)?.is_some())
    }

    /// Drop and recreate the n-gram and embedding tables, and rewind the
    /// build checkpoint so the next resume starts from the first document.
    pub fn clear(&self) -> Result<(), AppError> {
        self.embeddings.drop_table()?;
        self.ngrams.drop_table()?;
        self.ngrams.create_table()?;
        self.embeddings.create_table()?;
        self.settings.set_last_document_processed(0)?;
        info!("vocab: cleared");
        Ok(())
    }

    /// Delete n-grams seen in a single document.  Their embeddings go with
    /// them.
    pub fn prune(&self) -> Result<usize, AppError> {
        let pruned = self.ngrams.delete_where(&[Filter::eq("occurrence", 1)])?;
        info!(pruned, "vocab: pruned single-document n-grams");
        Ok(pruned)
    }

    /// Embed every n-gram that doesn't have a vector yet.
    pub fn calculate_embeddings(
        &self,
        embedder: &dyn Embedder,
        options: &EmbedOptions,
    ) -> Result<usize, AppError> {
        let written = backfill_embeddings(
            &self.ngrams,
            &self.embeddings,
            embedder,
            options,
            |n: &NGram| n.ngram.clone(),
            |id, vector| NGramEmbedding::new(id, vector),
        )?;
        info!(written, "vocab: embeddings backfilled");
        Ok(written)
    }

    /// A view over `ids` (n-gram hashes).
    pub fn restrict(&self, ids: impl IntoIterator<Item = String>) -> Result<VocabView, AppError> {
        Ok(VocabView { ngrams: self.ngrams.restrict(ids)? })
    }
}

/// A vocabulary narrowed to a fixed set of n-grams.
#[derive(Debug, Clone)]
pub struct VocabView {
    ngrams: RestrictedView<NGram>,
}

impl VocabView {
    pub fn ngrams(&self) -> &RestrictedView<NGram> {
        &self.ngrams
    }

    pub fn len(&self) -> Result<usize, AppError> {
        self.ngrams.len()
    }

    pub fn is_empty(&self) -> Result<bool, AppError> {
        self.ngrams.is_empty()
    }

    pub fn select(&self, indexer: impl Into<Indexer>) -> Result<Selection<NGram>, AppError> {
        self.ngrams.select(indexer)
    }

    pub fn iter(&self) -> Result<Cursor<NGram>, AppError> {
        self.ngrams.iter()
    }

    /// Look an n-gram up by its text; `None` outside the view.
    pub fn get(&self, text: &str) -> Result<Option<NGram>, AppError> {
        self.ngrams.find(&NGram::hash_id(text))
    }

    pub fn contains(&self, text: &str) -> Result<bool, AppError> {
        Ok(self.get(text)?.is_some())
    }
}
