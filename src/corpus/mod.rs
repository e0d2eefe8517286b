//! The document corpus, its vocabulary, and sampled views of both.
//!
//! A [`Corpus`] owns the full document table.  A [`CorpusView`] is a fixed
//! subset of it (a sample, say) paired with the slice of the vocabulary its
//! documents reference, and answers the same read operations.

pub mod vocab;

use std::collections::BTreeSet;
use std::path::Path;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info};

use crate::embed::{EmbedOptions, Embedder, encode_batch};
use crate::error::AppError;
use crate::models::{Document, DocumentEmbedding, Embedding, NGram};
use crate::pipeline::{BuildOptions, BuildReport, VocabBuilder};
use crate::store::{
    Collection, Cursor, Entity, Filter, Indexed, Indexer, Page, RestrictedView, Selection,
    Settings, Sort, Store, StoreOptions, Value,
};
use crate::text::NgramExtractor;

pub use vocab::{Vocab, VocabView};

// ── Queries ───────────────────────────────────────────────────────────────────

/// Document search: substring filters, inclusive ranges, sort and paging.
/// Unset criteria don't constrain the result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentQuery {
    pub doi: Option<String>,
    pub url: Option<String>,
    pub title: Option<String>,
    pub abstract_text: Option<String>,
    /// Inclusive citation-count range.
    pub citations: Option<(i64, i64)>,
    /// Inclusive publication-year range.
    pub years: Option<(i32, i32)>,
    pub sort: Vec<Sort>,
    pub page: Option<Page>,
}

impl DocumentQuery {
    pub fn filters(&self) -> Vec<Filter> {
        let mut filters = Vec::new();
        let substrings = [
            ("doi", &self.doi),
            ("url", &self.url),
            ("title", &self.title),
            ("abstract", &self.abstract_text),
        ];
        for (field, needle) in substrings {
            if let Some(needle) = needle.as_ref().filter(|n| !n.is_empty()) {
                filters.push(Filter::contains(field, needle.clone()));
            }
        }
        if let Some((lo, hi)) = self.citations {
            filters.push(Filter::between("citations", lo, hi));
        }
        if let Some((lo, hi)) = self.years {
            filters.push(Filter::between(
                "date",
                format!("{lo:04}-01-01T00:00:00Z"),
                format!("{hi:04}-12-31T23:59:59Z"),
            ));
        }
        filters
    }

    /// Run against any document collection.
    pub fn run(&self, documents: &impl Indexed<Document>) -> Result<Cursor<Document>, AppError> {
        documents.find_where(&self.filters(), &self.sort, self.page)
    }
}

/// How many documents a sample draws.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleSize {
    /// An absolute count, capped at the corpus size.
    Count(usize),
    /// A share of the corpus in `0.0..=1.0`, rounded down.
    Fraction(f64),
}

impl SampleSize {
    fn resolve(self, len: usize) -> Result<usize, AppError> {
        match self {
            SampleSize::Count(n) => Ok(n.min(len)),
            SampleSize::Fraction(f) if (0.0..=1.0).contains(&f) => Ok((len as f64 * f) as usize),
            SampleSize::Fraction(f) => Err(AppError::InvalidIndexer(format!(
                "sample fraction {f} is outside 0..=1"
            ))),
        }
    }
}

/// Year of a stored timestamp value.
fn year_of(value: Option<Value>) -> Option<i32> {
    value
        .as_ref()
        .and_then(Value::as_str)
        .and_then(|text| text.get(..4))
        .and_then(|year| year.parse().ok())
}

/// Embed every row of `source` lacking a vector, `options.batch_size` rows at
/// a time, writing the vectors into `sink`.
pub(crate) fn backfill_embeddings<E: Entity, S: Entity>(
    source: &impl Indexed<E>,
    sink: &Collection<S>,
    embedder: &dyn Embedder,
    options: &EmbedOptions,
    text: impl Fn(&E) -> String,
    make: impl Fn(E::Key, Embedding) -> S,
) -> Result<usize, AppError> {
    let batch_size = options.batch_size.max(1);
    let mut written = 0;
    loop {
        let batch = source
            .find_where(&[Filter::is_null("embedding")], &[], Some(Page::new(0, batch_size)))?
            .into_vec()?;
        if batch.is_empty() {
            return Ok(written);
        }
        let texts: Vec<String> = batch.iter().map(&text).collect();
        let vectors = encode_batch(embedder, &texts, &options.retry)?;
        let rows = batch
            .iter()
            .zip(vectors)
            .filter_map(|(row, vector)| row.key().cloned().map(|k| make(k, vector)))
            .collect::<Vec<_>>();
        let stored = sink.bulk_merge(rows)?.len();
        if stored == 0 {
            return Ok(written);
        }
        written += stored;
        debug!(table = E::TABLE, written, "embeddings: batch stored");
    }
}

// ── Corpus ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Corpus {
    store: Store,
    documents: Collection<Document>,
    embeddings: Collection<DocumentEmbedding>,
    vocab: Vocab,
    settings: Settings,
}

impl Corpus {
    pub fn open(db_path: impl AsRef<Path>, options: StoreOptions) -> Result<Self, AppError> {
        Ok(Self::new(Store::open(db_path, options)?))
    }

    pub fn new(store: Store) -> Self {
        Self {
            documents: store.collection(),
            embeddings: store.collection(),
            vocab: Vocab::new(&store),
            settings: store.settings(),
            store,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn documents(&self) -> &Collection<Document> {
        &self.documents
    }

    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn len(&self) -> Result<usize, AppError> {
        self.documents.len()
    }

    pub fn is_empty(&self) -> Result<bool, AppError> {
        self.documents.is_empty()
    }

    pub fn select(&self, indexer: impl Into<Indexer>) -> Result<Selection<Document>, AppError> {
        self.documents.select(indexer)
    }

    pub fn iter(&self) -> Result<Cursor<Document>, AppError> {
        self.documents.iter()
    }

    pub fn find(&self, id: i64) -> Result<Option<Document>, AppError> {
        self.documents.find(&id)
    }

    pub fn find_where(&self, query: &DocumentQuery) -> Result<Cursor<Document>, AppError> {
        query.run(&self.documents)
    }

    /// Store new documents; returns them with identities assigned.
    pub fn add_documents(&self, documents: Vec<Document>) -> Result<Vec<Document>, AppError> {
        let stored = self.documents.bulk_merge(documents)?;
        info!(added = stored.len(), "corpus: documents stored");
        Ok(stored)
    }

    /// Fill in the n-gram map of every document that doesn't have one.
    pub fn attach_ngrams(&self, extractor: &dyn NgramExtractor) -> Result<usize, AppError> {
        let page_size = self.store.page_size();
        let pending = self.documents.find_where(&[Filter::eq("ngrams", "{}")], &[], None)?;
        let mut batch = Vec::with_capacity(page_size);
        let mut updated = 0;
        for document in pending {
            let mut document = document?;
            document.ngrams = extractor.extract(&document.content);
            batch.push(document);
            if batch.len() >= page_size {
                updated += self.documents.bulk_merge(std::mem::take(&mut batch))?.len();
            }
        }
        if !batch.is_empty() {
            updated += self.documents.bulk_merge(batch)?.len();
        }
        info!(updated, "corpus: n-gram maps attached");
        Ok(updated)
    }

    pub fn min_year(&self) -> Result<Option<i32>, AppError> {
        Ok(year_of(self.documents.min("date")?))
    }

    pub fn max_year(&self) -> Result<Option<i32>, AppError> {
        Ok(year_of(self.documents.max("date")?))
    }

    /// Draw documents without replacement.  The same seed over the same
    /// corpus always draws the same documents.
    pub fn sample(&self, size: SampleSize, seed: Option<u64>) -> Result<CorpusView, AppError> {
        let ids = self.documents.ids()?.into_vec()?;
        let amount = size.resolve(ids.len())?;
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let picked = rand::seq::index::sample(&mut rng, ids.len(), amount)
            .into_iter()
            .map(|i| ids[i]);
        debug!(amount, total = ids.len(), "corpus: sampled");
        self.view(picked)
    }

    /// A view over the documents with the given identities.
    pub fn view(&self, ids: impl IntoIterator<Item = i64>) -> Result<CorpusView, AppError> {
        CorpusView::new(self, self.documents.restrict(ids)?)
    }

    pub fn build_vocab(
        &self,
        options: &BuildOptions,
        embedding: Option<(&dyn Embedder, &EmbedOptions)>,
    ) -> Result<BuildReport, AppError> {
        VocabBuilder::new(self.store.clone(), options.clone()).run(embedding)
    }

    /// Embed every document that doesn't have a vector yet.
    pub fn calculate_document_embeddings(
        &self,
        embedder: &dyn Embedder,
        options: &EmbedOptions,
    ) -> Result<usize, AppError> {
        let written = backfill_embeddings(
            &self.documents,
            &self.embeddings,
            embedder,
            options,
            |d: &Document| d.content.clone(),
            DocumentEmbedding::new,
        )?;
        info!(written, "corpus: document embeddings backfilled");
        Ok(written)
    }

    /// Drop and recreate the document tables.  Build ordinals refer to the
    /// old documents, so the checkpoint is rewound as well.
    pub fn clear_corpus(&self) -> Result<(), AppError> {
        self.embeddings.drop_table()?;
        self.documents.drop_table()?;
        self.documents.create_table()?;
        self.embeddings.create_table()?;
        self.settings.set_last_document_processed(0)?;
        info!("corpus: cleared");
        Ok(())
    }

    pub fn clear_vocab(&self) -> Result<(), AppError> {
        self.vocab.clear()
    }
}

// ── CorpusView ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CorpusView {
    documents: RestrictedView<Document>,
    vocab: VocabView,
}

impl CorpusView {
    fn new(corpus: &Corpus, documents: RestrictedView<Document>) -> Result<Self, AppError> {
        let mut referenced = BTreeSet::new();
        for projection in documents.columns(&["ngrams"])? {
            if let Some(Value::Str(json)) = projection?.into_single() {
                let counts: crate::models::NgramCounts = serde_json::from_str(&json)?;
                referenced.extend(counts.into_keys().map(|text| NGram::hash_id(&text)));
            }
        }

        let ngrams = corpus.vocab.ngrams();
        let page_size = corpus.store.page_size();
        let referenced: Vec<String> = referenced.into_iter().collect();
        let mut present = Vec::new();
        for chunk in referenced.chunks(page_size) {
            present.extend(ngrams.find_many(chunk)?.into_iter().filter_map(|n| n.id));
        }
        debug!(
            documents = documents.keys().len(),
            ngrams = present.len(),
            "corpus: view built"
        );
        Ok(Self { documents, vocab: corpus.vocab.restrict(present)? })
    }

    pub fn documents(&self) -> &RestrictedView<Document> {
        &self.documents
    }

    pub fn vocab(&self) -> &VocabView {
        &self.vocab
    }

    /// Identities of the documents in the view, ascending.
    pub fn ids(&self) -> &[i64] {
        self.documents.keys()
    }

    pub fn len(&self) -> Result<usize, AppError> {
        self.documents.len()
    }

    pub fn is_empty(&self) -> Result<bool, AppError> {
        self.documents.is_empty()
    }

    pub fn select(&self, indexer: impl Into<Indexer>) -> Result<Selection<Document>, AppError> {
        self.documents.select(indexer)
    }

    pub fn iter(&self) -> Result<Cursor<Document>, AppError> {
        self.documents.iter()
    }

    pub fn find(&self, id: i64) -> Result<Option<Document>, AppError> {
        self.documents.find(&id)
    }

    pub fn find_where(&self, query: &DocumentQuery) -> Result<Cursor<Document>, AppError> {
        query.run(&self.documents)
    }

    pub fn min_year(&self) -> Result<Option<i32>, AppError> {
        Ok(year_of(self.documents.min("date")?))
    }

    pub fn max_year(&self) -> Result<Option<i32>, AppError> {
        Ok(year_of(self.documents.max("date")?))
    }
}
