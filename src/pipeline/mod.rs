//! Resumable vocabulary build.
//!
//! Documents are folded into the n-gram table one at a time, in identity
//! order.  For each document:
//!
//! 1. terms below `min_ngram_frequency` are dropped,
//! 2. the rest are merged in parallel by the [`MergePool`],
//! 3. the merged rows are written in one `bulk_merge` transaction,
//! 4. only then does the checkpoint advance to the document's ordinal.
//!
//! A write conflict in 2–3 repeats both steps, so the retried write folds
//! into freshly read rows.  The checkpoint write is retried on its own.
//! A resumed build starts reading after the checkpoint.
//!
//! A crash between 3 and 4 re-merges that one document on resume; a crash
//! anywhere else loses nothing.  After the pass, terms seen in a single
//! document are pruned, and n-grams without an embedding are optionally
//! backfilled.

pub mod merge;

use tracing::{debug, info, warn};

pub use merge::{MergePool, MergeWorker};

use crate::corpus::Vocab;
use crate::embed::{EmbedOptions, Embedder};
use crate::error::AppError;
use crate::models::{Document, NgramCounts};
use crate::retry::RetryPolicy;
use crate::store::{Collection, Indexed, Settings, Store, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Continue from the stored checkpoint instead of starting over.
    pub resume: bool,
    /// Per-document counts below this are not merged.  Counts below 1 never
    /// are.
    pub min_ngram_frequency: i64,
    /// Merge threads; `0` uses the available parallelism.
    pub workers: usize,
    pub merge_retry: RetryPolicy,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            resume: false,
            min_ngram_frequency: 2,
            workers: 0,
            merge_retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub documents_total: usize,
    pub documents_processed: usize,
    /// Documents at or below the checkpoint a resumed build started from.
    pub documents_skipped: usize,
    /// Merged (n-gram, document) contributions.
    pub ngrams_merged: usize,
    pub ngrams_pruned: usize,
    pub embeddings_written: usize,
}

pub struct VocabBuilder {
    store: Store,
    options: BuildOptions,
}

impl VocabBuilder {
    pub fn new(store: Store, options: BuildOptions) -> Self {
        Self { store, options }
    }

    pub fn run(
        &self,
        embedding: Option<(&dyn Embedder, &EmbedOptions)>,
    ) -> Result<BuildReport, AppError> {
        let vocab = Vocab::new(&self.store);
        let settings = self.store.settings();
        let documents: Collection<Document> = self.store.collection();

        let checkpoint =
            self.retrying("build start", || self.starting_checkpoint(&vocab, &settings))?;
        let pool = MergePool::new(
            self.store.clone(),
            self.options.workers,
            self.options.merge_retry,
        )?;

        let mut report = BuildReport { documents_total: documents.len()?, ..BuildReport::default() };
        report.documents_skipped = checkpoint.min(report.documents_total);
        info!(
            total = report.documents_total,
            checkpoint,
            resume = self.options.resume,
            threads = pool.threads(),
            "vocab build: starting"
        );

        let rows = documents.columns_from(&["id", "ngrams"], report.documents_skipped)?;
        for (index, row) in rows.enumerate() {
            let ordinal = report.documents_skipped + index + 1;
            let record = row?.into_record().ok_or_else(|| {
                AppError::Storage("vocab build: expected an (id, ngrams) projection".into())
            })?;
            let document_id = record.get("id").and_then(Value::as_i64).unwrap_or_default();
            let counts: NgramCounts = match record.get("ngrams").and_then(Value::as_str) {
                Some(json) => serde_json::from_str(json)?,
                None => NgramCounts::new(),
            };

            let pairs: Vec<(String, i64)> = counts
                .into_iter()
                .filter(|(_, frequency)| *frequency >= self.options.min_ngram_frequency.max(1))
                .collect();

            // A conflicting commit re-reads every row before writing again.
            self.retrying(&format!("merge of document {ordinal}"), || {
                let merged = pool.merge_all(&pairs)?;
                vocab.ngrams().bulk_merge(merged)?;
                Ok(())
            })?;
            self.retrying(&format!("checkpoint after document {ordinal}"), || {
                settings.set_last_document_processed(ordinal)
            })?;

            report.documents_processed += 1;
            report.ngrams_merged += pairs.len();
            info!(
                document = ordinal,
                total = report.documents_total,
                document_id,
                ngrams = pairs.len(),
                "vocab build: document merged"
            );
        }

        report.ngrams_pruned = self.retrying("vocab prune", || vocab.prune())?;
        if let Some((embedder, embed_options)) = embedding {
            report.embeddings_written = vocab.calculate_embeddings(embedder, embed_options)?;
        }

        info!(
            processed = report.documents_processed,
            skipped = report.documents_skipped,
            merged = report.ngrams_merged,
            pruned = report.ngrams_pruned,
            embedded = report.embeddings_written,
            "vocab build: finished"
        );
        Ok(report)
    }

    /// Run `step` again from the top while it fails with a write conflict.
    fn retrying<T>(
        &self,
        label: &str,
        mut step: impl FnMut() -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        self.options.merge_retry.run(
            label,
            AppError::is_write_conflict,
            |_, attempts| AppError::MergeRetriesExhausted { target: label.to_string(), attempts },
            |attempt| {
                if attempt > 1 {
                    debug!(step = label, attempt, "vocab build: write conflict, retrying");
                }
                step()
            },
        )
    }

    /// Where this run starts.  A fresh build clears the vocabulary.  A resume
    /// trusts the checkpoint unless the vocabulary is empty while the
    /// checkpoint says documents were merged, in which case the two are out
    /// of step and the build starts over.
    fn starting_checkpoint(&self, vocab: &Vocab, settings: &Settings) -> Result<usize, AppError> {
        if !self.options.resume {
            vocab.clear()?;
            return Ok(0);
        }
        let checkpoint = settings.last_document_processed()?;
        if checkpoint > 0 && vocab.is_empty()? {
            warn!(checkpoint, "vocab build: checkpoint set but vocabulary empty, starting over");
            vocab.clear()?;
            return Ok(0);
        }
        Ok(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashingEmbedder;
    use crate::models::NGram;
    use crate::store::StoreOptions;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn seeded_store(docs: &[&[(&str, i64)]]) -> (TempDir, Store) {
        let tmp = TempDir::new().unwrap();
        let store = Store::open(tmp.path().join("corpus.db"), StoreOptions::default()).unwrap();
        let date = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let records = docs
            .iter()
            .enumerate()
            .map(|(i, counts)| {
                Document::new(format!("10.1/{i}"), "t", "c", date).with_ngrams(counts.iter().copied())
            })
            .collect();
        store.collection::<Document>().bulk_merge(records).unwrap();
        (tmp, store)
    }

    fn options(resume: bool, min_ngram_frequency: i64) -> BuildOptions {
        BuildOptions { resume, min_ngram_frequency, workers: 2, ..BuildOptions::default() }
    }

    #[test]
    fn default_threshold_skips_single_counts() {
        let (_tmp, store) = seeded_store(&[&[("graph", 2), ("tree", 1)], &[("graph", 3)]]);
        let report = VocabBuilder::new(store.clone(), BuildOptions::default()).run(None).unwrap();
        assert_eq!(report.documents_processed, 2);
        assert_eq!(report.ngrams_merged, 2);

        let vocab = Vocab::new(&store);
        let graph = vocab.get("graph").unwrap().unwrap();
        assert_eq!((graph.frequency, graph.occurrence), (5, 2));
        assert!(vocab.get("tree").unwrap().is_none());
        assert_eq!(store.settings().last_document_processed().unwrap(), 2);
    }

    #[test]
    fn zero_counts_are_never_merged() {
        let (_tmp, store) = seeded_store(&[&[("a", 1), ("z", 0)], &[("a", 1), ("z", 0)]]);
        let report = VocabBuilder::new(store.clone(), options(false, 0)).run(None).unwrap();
        assert_eq!(report.ngrams_merged, 2);
        let vocab = Vocab::new(&store);
        assert!(vocab.get("z").unwrap().is_none());
        let a = vocab.get("a").unwrap().unwrap();
        assert_eq!((a.frequency, a.occurrence), (2, 2));
    }

    #[test]
    fn single_document_terms_are_pruned() {
        let (_tmp, store) = seeded_store(&[&[("a", 2), ("b", 1)], &[("a", 1), ("c", 5)], &[("a", 1)]]);
        let report = VocabBuilder::new(store.clone(), options(false, 1)).run(None).unwrap();
        assert_eq!(report.ngrams_pruned, 2);

        let vocab = Vocab::new(&store);
        assert_eq!(vocab.len().unwrap(), 1);
        let a = vocab.get("a").unwrap().unwrap();
        assert_eq!((a.frequency, a.occurrence), (4, 3));
    }

    #[test]
    fn resume_skips_processed_documents() {
        let (_tmp, store) = seeded_store(&[&[("a", 2)], &[("a", 2)], &[("a", 2)]]);
        // Simulate a build that stopped after the second document.
        let vocab = Vocab::new(&store);
        vocab.ngrams().bulk_merge(vec![NGram::new("a", 4, 2)]).unwrap();
        store.settings().set_last_document_processed(2).unwrap();

        let report = VocabBuilder::new(store.clone(), options(true, 2)).run(None).unwrap();
        assert_eq!(report.documents_skipped, 2);
        assert_eq!(report.documents_processed, 1);
        let a = vocab.get("a").unwrap().unwrap();
        assert_eq!((a.frequency, a.occurrence), (6, 3));
        assert_eq!(store.settings().last_document_processed().unwrap(), 3);
    }

    #[test]
    fn resume_never_reads_documents_before_the_checkpoint() {
        let (_tmp, store) = seeded_store(&[&[("a", 2)], &[("a", 2)], &[("a", 2)]]);
        let vocab = Vocab::new(&store);
        vocab.ngrams().bulk_merge(vec![NGram::new("a", 4, 2)]).unwrap();
        store.settings().set_last_document_processed(2).unwrap();
        // Undecodable maps behind the checkpoint must not fail the build.
        store
            .connect()
            .unwrap()
            .execute("UPDATE documents SET ngrams = 'not json' WHERE id <= 2", [])
            .unwrap();

        let report = VocabBuilder::new(store.clone(), options(true, 2)).run(None).unwrap();
        assert_eq!((report.documents_skipped, report.documents_processed), (2, 1));
        let a = vocab.get("a").unwrap().unwrap();
        assert_eq!((a.frequency, a.occurrence), (6, 3));
    }

    #[test]
    fn resume_with_empty_vocab_starts_over() {
        let (_tmp, store) = seeded_store(&[&[("a", 2)], &[("a", 2)]]);
        store.settings().set_last_document_processed(2).unwrap();

        let report = VocabBuilder::new(store.clone(), options(true, 2)).run(None).unwrap();
        assert_eq!(report.documents_skipped, 0);
        let a = Vocab::new(&store).get("a").unwrap().unwrap();
        assert_eq!((a.frequency, a.occurrence), (4, 2));
    }

    #[test]
    fn checkpoint_past_the_end_is_a_no_op() {
        let (_tmp, store) = seeded_store(&[&[("a", 2)], &[("a", 2)]]);
        VocabBuilder::new(store.clone(), options(false, 2)).run(None).unwrap();
        store.settings().set_last_document_processed(10).unwrap();

        let report = VocabBuilder::new(store.clone(), options(true, 2)).run(None).unwrap();
        assert_eq!(report.documents_processed, 0);
        let a = Vocab::new(&store).get("a").unwrap().unwrap();
        assert_eq!((a.frequency, a.occurrence), (4, 2));
    }

    #[test]
    fn fresh_build_replaces_previous_vocab() {
        let (_tmp, store) = seeded_store(&[&[("a", 2)], &[("a", 2)]]);
        VocabBuilder::new(store.clone(), options(false, 2)).run(None).unwrap();
        VocabBuilder::new(store.clone(), options(false, 2)).run(None).unwrap();
        let a = Vocab::new(&store).get("a").unwrap().unwrap();
        assert_eq!((a.frequency, a.occurrence), (4, 2));
    }

    #[test]
    fn embeddings_follow_the_build() {
        let (_tmp, store) = seeded_store(&[&[("a", 2), ("b", 2)], &[("a", 2), ("b", 3)]]);
        let embedder = HashingEmbedder::new(8).unwrap();
        let report = VocabBuilder::new(store.clone(), options(false, 2))
            .run(Some((&embedder, &EmbedOptions::default())))
            .unwrap();
        assert_eq!(report.embeddings_written, 2);
        let b = Vocab::new(&store).get("b").unwrap().unwrap();
        assert_eq!(b.embedding.map(|e| e.dims()), Some(8));
    }
}
