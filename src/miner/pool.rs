//! The bounded processing pool and the extraction task handed to the host.
//!
//! A pool entry exists from the moment the scheduler dequeues a
//! created/updated item until the job's store update completes (or the job
//! is cancelled). The pool never grows past its configured limit; the
//! scheduler checks [`ProcessingPool::is_full`] before every dispatch.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::file_ref::FileRef;
use crate::miner::message::Completion;
use crate::store::sparql::SparqlBuilder;

/// Error the extractor reports through [`ExtractionTask::notify`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExtractError {
  /// The file disappeared before it could be read. Logged quietly; a later
  /// monitor event will resurface the path if it comes back.
  #[error("file not found: {0}")]
  NotFound(String),

  /// Anything else. The job is dropped and not retried.
  #[error("{0}")]
  Failed(String),
}

/// A single file handed to the extractor.
///
/// The task owns the mutation buffer; calling [`notify`](Self::notify)
/// consumes the task, so a job can complete at most once. Dropping the task
/// without notifying leaks the pool slot until the parent directory is
/// removed, so hosts that accept a file must always notify.
#[derive(Debug)]
pub struct ExtractionTask {
  file: FileRef,
  builder: SparqlBuilder,
  cancel: CancellationToken,
  completions: mpsc::UnboundedSender<Completion>,
}

impl ExtractionTask {
  /// The file to extract metadata for.
  pub fn file(&self) -> &FileRef {
    &self.file
  }

  /// The buffer to accumulate this file's triples in.
  pub fn builder(&mut self) -> &mut SparqlBuilder {
    &mut self.builder
  }

  /// Token fired when the job is no longer wanted (its directory was
  /// removed or the miner is shutting down). Async extractors should abort
  /// their work when it trips.
  pub fn cancellation(&self) -> &CancellationToken {
    &self.cancel
  }

  /// Reports that processing finished: `None` on success (the buffer is
  /// submitted to the store), `Some` on failure (the buffer is discarded).
  ///
  /// After cancellation this is a silent no-op.
  pub fn notify(self, error: Option<ExtractError>) {
    if self.cancel.is_cancelled() {
      return;
    }
    let outcome = match error {
      None => Ok(self.builder),
      Some(err) => Err(err),
    };
    let _ = self.completions.send(Completion::Notified {
      file: self.file,
      outcome,
    });
  }
}

#[derive(Debug)]
struct PoolJob {
  cancel: CancellationToken,
}

/// In-flight extraction jobs, keyed by file. At most one job per file.
#[derive(Debug)]
pub(crate) struct ProcessingPool {
  jobs: HashMap<FileRef, PoolJob>,
  limit: usize,
}

impl ProcessingPool {
  pub fn new(limit: usize) -> Self {
    Self {
      jobs: HashMap::new(),
      limit: limit.max(1),
    }
  }

  pub fn len(&self) -> usize {
    self.jobs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.jobs.is_empty()
  }

  pub fn is_full(&self) -> bool {
    self.jobs.len() >= self.limit
  }

  pub fn contains(&self, file: &FileRef) -> bool {
    self.jobs.contains_key(file)
  }

  /// Opens a job for `file` and returns the task to hand to the extractor.
  /// The job's token is a child of `parent`, so miner shutdown cancels it.
  pub fn begin(
    &mut self,
    file: FileRef,
    parent: &CancellationToken,
    completions: &mpsc::UnboundedSender<Completion>,
  ) -> ExtractionTask {
    let cancel = parent.child_token();
    self.jobs.insert(file.clone(), PoolJob { cancel: cancel.clone() });
    ExtractionTask {
      file,
      builder: SparqlBuilder::new(),
      cancel,
      completions: completions.clone(),
    }
  }

  /// Removes the job for `file`, returning whether one existed.
  pub fn finish(&mut self, file: &FileRef) -> bool {
    self.jobs.remove(file).is_some()
  }

  /// The cancellation token of an in-flight job.
  pub fn cancel_token(&self, file: &FileRef) -> Option<CancellationToken> {
    self.jobs.get(file).map(|job| job.cancel.clone())
  }

  /// Cancels and removes every job equal to or below `root`. Returns how
  /// many were cancelled.
  pub fn cancel_under(&mut self, root: &FileRef) -> usize {
    let doomed: Vec<FileRef> = self
      .jobs
      .keys()
      .filter(|file| *file == root || file.has_prefix(root))
      .cloned()
      .collect();
    for file in &doomed {
      if let Some(job) = self.jobs.remove(file) {
        job.cancel.cancel();
      }
    }
    doomed.len()
  }

  /// Cancels everything still in flight (shutdown grace expired).
  pub fn cancel_all(&mut self) {
    for (_, job) in self.jobs.drain() {
      job.cancel.cancel();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn pool_fixture(limit: usize) -> (ProcessingPool, CancellationToken, mpsc::UnboundedSender<Completion>) {
    let (tx, _rx) = mpsc::unbounded_channel();
    (ProcessingPool::new(limit), CancellationToken::new(), tx)
  }

  #[test]
  fn test_limit_is_observable() {
    let (mut pool, cancel, tx) = pool_fixture(2);
    assert!(!pool.is_full());

    let _a = pool.begin(FileRef::new("/d/a"), &cancel, &tx);
    assert!(!pool.is_full());
    let _b = pool.begin(FileRef::new("/d/b"), &cancel, &tx);
    assert!(pool.is_full());

    assert!(pool.finish(&FileRef::new("/d/a")));
    assert!(!pool.is_full());
    assert!(!pool.finish(&FileRef::new("/d/a")));
  }

  #[test]
  fn test_cancel_under_fires_tokens_below_root() {
    let (mut pool, cancel, tx) = pool_fixture(8);
    let inside = pool.begin(FileRef::new("/d/sub/a"), &cancel, &tx);
    let outside = pool.begin(FileRef::new("/d/other/b"), &cancel, &tx);

    let cancelled = pool.cancel_under(&FileRef::new("/d/sub"));

    assert_eq!(cancelled, 1);
    assert!(inside.cancellation().is_cancelled());
    assert!(!outside.cancellation().is_cancelled());
    assert_eq!(pool.len(), 1);
  }

  #[tokio::test]
  async fn test_notify_after_cancel_is_silent() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let mut pool = ProcessingPool::new(1);

    let task = pool.begin(FileRef::new("/d/a"), &cancel, &tx);
    pool.cancel_under(&FileRef::new("/d/a"));
    task.notify(None);

    drop(tx);
    assert!(rx.recv().await.is_none(), "no completion should be delivered");
  }
}
