//! Per-n-gram merge step and the worker pool that runs it.
//!
//! A merge reads the current row for an n-gram's hash identity in its own
//! unit of work and folds one document's contribution into it: `frequency`
//! grows by the document's count and `occurrence` by one.  Unknown n-grams
//! start at `occurrence = 1`.  The merged records are written back by the
//! caller's `bulk_merge`, which re-runs the reads if its commit conflicts.
//!
//! Merges within one document touch distinct rows, so their order does not
//! matter.  Busy or locked reads are retried with backoff; running out of
//! attempts is [`AppError::MergeRetriesExhausted`].

use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::AppError;
use crate::models::NGram;
use crate::retry::RetryPolicy;
use crate::store::{Collection, Indexed, Store};

#[derive(Debug, Clone)]
pub struct MergeWorker {
    ngrams: Collection<NGram>,
    policy: RetryPolicy,
}

impl MergeWorker {
    pub fn new(store: Store, policy: RetryPolicy) -> Self {
        Self { ngrams: store.collection(), policy }
    }

    /// Fold `(ngram, frequency)` into the stored row, if any.
    pub fn merge(&self, ngram: &str, frequency: i64) -> Result<NGram, AppError> {
        let id = NGram::hash_id(ngram);
        self.policy.run(
            "merge",
            AppError::is_write_conflict,
            |_, attempts| AppError::MergeRetriesExhausted {
                target: format!("merge of n-gram '{ngram}'"),
                attempts,
            },
            |attempt| {
                if attempt > 1 {
                    debug!(ngram, attempt, "merge: retrying");
                }
                self.merge_once(&id, ngram, frequency)
            },
        )
    }

    fn merge_once(&self, id: &String, ngram: &str, frequency: i64) -> Result<NGram, AppError> {
        Ok(match self.ngrams.find(id)? {
            Some(mut existing) => {
                existing.frequency += frequency;
                existing.occurrence += 1;
                existing
            }
            None => NGram::new(ngram, frequency, 1),
        })
    }
}

pub struct MergePool {
    pool: rayon::ThreadPool,
    worker: MergeWorker,
}

impl MergePool {
    /// `workers == 0` sizes the pool to the available parallelism.
    pub fn new(store: Store, workers: usize, policy: RetryPolicy) -> Result<Self, AppError> {
        let threads = if workers == 0 {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        } else {
            workers
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("merge-{i}"))
            .build()
            .map_err(|e| AppError::Config(format!("merge pool: {e}")))?;
        info!(threads, "merge pool: started");
        Ok(Self { pool, worker: MergeWorker::new(store, policy) })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Merge every pair in parallel and wait for all of them.  The first
    /// failure wins; results are in input order.
    pub fn merge_all(&self, pairs: &[(String, i64)]) -> Result<Vec<NGram>, AppError> {
        self.pool.install(|| {
            pairs
                .par_iter()
                .map(|(ngram, frequency)| self.worker.merge(ngram, *frequency))
                .collect()
        })
    }
}

impl std::fmt::Debug for MergePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergePool").field("threads", &self.threads()).finish()
    }
}
