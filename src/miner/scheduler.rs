//! Queue dispatch: what actually happens to a dequeued event.
//!
//! One item is handled per scheduler pass, highest-priority queue first.
//! Deletes and moves run inline on the event loop (their store round-trips
//! serialize naturally); creates and updates open a pool job and hand the
//! file to the extractor, which may finish asynchronously.

use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{debug, error, info, trace, warn};

use crate::config::MAX_TIMEOUT_INTERVAL_MS;
use crate::file_ref::FileRef;
use crate::miner::FsMiner;
use crate::miner::crawler::mtime_matches_store;
use crate::miner::message::{Completion, MonitorEvent};
use crate::miner::pool::ExtractError;
use crate::miner::queues::{ItemMoved, QueuedItem};
use crate::store::{StoreError, sparql};

/// Minimum delay before retrying a locked file, independent of the
/// throttle. The locked item sits at the head of its queue, so an
/// immediate re-dispatch would pop it straight back.
const LOCKED_RETRY_FLOOR: Duration = Duration::from_millis(MAX_TIMEOUT_INTERVAL_MS);

impl FsMiner {
  // ==========================================================================
  // Event source adapter: monitor events into the queues
  // ==========================================================================

  fn should_check(&self, file: &FileRef, is_directory: bool) -> bool {
    if is_directory {
      self.hooks.check_directory(file)
    } else {
      self.hooks.check_file(file)
    }
  }

  /// Policy acceptance plus the store freshness check.
  async fn should_process(&self, file: &FileRef, is_directory: bool) -> bool {
    self.should_check(file, is_directory) && !mtime_matches_store(self.store.as_ref(), file).await
  }

  async fn query_exists(&self, file: &FileRef) -> bool {
    match self.store.query(&sparql::resource_exists(&file.uri())).await {
      Ok(rows) => rows.len() == 1,
      Err(error) => {
        error!(file = %file, error = %error, "could not query resource existence");
        false
      }
    }
  }

  pub(crate) async fn on_monitor_event(&mut self, event: MonitorEvent) {
    match event {
      MonitorEvent::Created { file, is_directory } => {
        if self.should_process(&file, is_directory).await {
          debug!(file = %file, is_directory, "found (create event)");
          if is_directory {
            self.add_directory(file, true);
          } else {
            self.queues.push_created(file);
            self.arm_tick();
          }
        } else {
          debug!(file = %file, is_directory, "ignored (create event)");
        }
      }

      MonitorEvent::Updated { file, is_directory } => {
        if self.should_process(&file, is_directory).await {
          debug!(file = %file, is_directory, "found (update event)");
          self.queues.push_updated(file);
          self.arm_tick();
        } else {
          debug!(file = %file, is_directory, "ignored (update event)");
        }
      }

      MonitorEvent::Deleted { file, is_directory } => {
        if self.should_check(&file, is_directory) {
          debug!(file = %file, is_directory, "found (delete event)");
          self.queues.push_deleted(file);
          self.arm_tick();
        } else {
          debug!(file = %file, is_directory, "ignored (delete event)");
        }
      }

      MonitorEvent::Moved {
        from,
        to,
        is_directory,
        source_monitored,
      } => {
        if !source_monitored {
          // The source was never ours; the target is effectively new.
          debug!(to = %to, is_directory, "move event, source unmonitored");
          if is_directory {
            self.add_directory(to, true);
          } else if self.should_process(&to, false).await {
            self.queues.push_created(to);
            self.arm_tick();
          }
          return;
        }

        let source_stored = self.query_exists(&from).await;
        let target_wanted = self.should_check(&to, is_directory);
        debug!(
          from = %from,
          to = %to,
          source_stored,
          target_wanted,
          is_directory,
          "move event"
        );

        match (source_stored, target_wanted) {
          (false, false) => {}
          (false, true) => {
            if is_directory {
              self.add_directory(to, true);
            } else {
              self.queues.push_created(to);
              self.arm_tick();
            }
          }
          (true, false) => {
            self.queues.push_deleted(from);
            self.arm_tick();
          }
          (true, true) => {
            self.queues.push_moved(ItemMoved { from, to, is_directory });
            self.arm_tick();
          }
        }
      }
    }
  }

  // ==========================================================================
  // Scheduler pass
  // ==========================================================================

  /// Handles one queued item. Re-arms itself while work remains; goes idle
  /// through [`FsMiner::process_stop`] once crawler, queues, and pool have
  /// all drained.
  pub(crate) async fn process_next_item(&mut self) {
    // State may have shifted between arming and firing.
    if self.paused || self.pool.is_full() {
      return;
    }

    let Some(item) = self.queues.next() else {
      if !self.is_crawling && self.pool.is_empty() {
        self.process_stop();
      }
      return;
    };

    if self.hooks.is_locked(item.file()) {
      // Leave it at the head and come back on a later pass.
      trace!(file = %item.file(), "file is locked, retrying later");
      self.queues.requeue_front(item);
      self.arm_tick_after(LOCKED_RETRY_FLOOR);
      return;
    }

    if self.timer.is_none() {
      self.timer = Some(std::time::Instant::now());
    }
    self.maybe_report_progress();

    let keep_processing = match item {
      QueuedItem::Deleted(file) => self.item_remove(file).await,
      QueuedItem::Created(file) | QueuedItem::Updated(file) => self.item_add_or_update(file),
      QueuedItem::Moved(moved) => self.item_move(moved).await,
    };

    if keep_processing {
      self.arm_tick();
    }
  }

  // ==========================================================================
  // Item handlers
  // ==========================================================================

  /// Removes a deleted file from the store: everything contained below it,
  /// then the resource itself, in one batch.
  async fn item_remove(&mut self, file: FileRef) -> bool {
    let uri = file.uri();
    debug!(uri = %uri, "removing item (deleted from filesystem)");

    if !self.query_exists(&file).await {
      debug!(uri = %uri, "file does not exist in the store anyway");
      return true;
    }

    match self.store.batch_update(&sparql::delete_resource(&uri)).await {
      Err(error) => error!(uri = %uri, error = %error, "could not execute delete"),
      Ok(()) => {
        self.updates_since_commit += 1;
        if self.been_crawled {
          self.commit_soon();
        }
      }
    }
    true
  }

  /// Opens a pool job for a created/updated file and hands it to the
  /// extractor. Returns false when the pool just filled up; dispatch then
  /// resumes on the next job completion.
  fn item_add_or_update(&mut self, file: FileRef) -> bool {
    if self.pool.contains(&file) {
      // The in-flight job reads current file contents anyway.
      debug!(file = %file, "already being processed");
      return true;
    }

    debug!(file = %file, "processing item");
    let task = self.pool.begin(file.clone(), &self.cancel, &self.completions_tx);

    if !self.hooks.process_file(task) {
      trace!(file = %file, "file declined by extractor");
      self.pool.finish(&file);
      return true;
    }

    !self.pool.is_full()
  }

  /// In-place rename: both endpoints are tracked, so instead of a delete
  /// and reindex the source keeps its metadata and every descendant URI is
  /// rewritten by string substitution.
  async fn item_move(&mut self, moved: ItemMoved) -> bool {
    let source_uri = moved.from.uri();
    let target_uri = moved.to.uri();

    if !self.query_exists(&moved.from).await {
      info!(
        source = %source_uri,
        target = %target_uri,
        "move source not in store, indexing target from scratch"
      );
      return self.item_add_or_update(moved.to);
    }

    if tokio::fs::symlink_metadata(moved.to.path()).await.is_err() {
      // Target vanished again; all that is left to do is drop the source.
      return self.item_remove(moved.from).await;
    }

    debug!(source = %source_uri, target = %target_uri, "moving item");

    let rewrites = match self.collect_uri_rewrites(source_uri.clone(), target_uri.clone()).await {
      Ok(rewrites) => rewrites,
      Err(error) => {
        error!(source = %source_uri, error = %error, "could not query children, abandoning move");
        return true;
      }
    };

    let sparql = sparql::rename_batch(&source_uri, &target_uri, &moved.to.display_name(), &rewrites);
    match self.store.batch_update(&sparql).await {
      Err(error) => error!(source = %source_uri, error = %error, "could not execute move"),
      Ok(()) => {
        self.updates_since_commit += 1;
        if self.been_crawled {
          self.commit_soon();
        }
      }
    }
    true
  }

  /// Depth-first walk over `nfo:belongsToContainer`, collecting one
  /// `(old, new)` URI pair per resource, outermost first. New URIs are
  /// built by substituting the source prefix; a child that does not carry
  /// the prefix is skipped with a warning rather than guessed at.
  fn collect_uri_rewrites(
    &self,
    source_uri: String,
    target_uri: String,
  ) -> BoxFuture<'_, Result<Vec<(String, String)>, StoreError>> {
    Box::pin(async move {
      let mut rewrites = vec![(source_uri.clone(), target_uri.clone())];

      let rows = self.store.query(&sparql::children_of(&source_uri)).await?;
      for row in rows {
        let Some(child) = row.first() else {
          continue;
        };
        if !child.starts_with(&source_uri) {
          warn!(child = %child, parent = %source_uri, "child URI does not start with parent URI");
          continue;
        }
        let child_target = format!("{target_uri}{}", &child[source_uri.len()..]);
        let nested = self.collect_uri_rewrites(child.clone(), child_target).await?;
        rewrites.extend(nested);
      }

      Ok(rewrites)
    })
  }

  // ==========================================================================
  // Job completions
  // ==========================================================================

  pub(crate) async fn on_completion(&mut self, completion: Completion) {
    match completion {
      Completion::Notified { file, outcome } => self.on_file_notified(file, outcome),
      Completion::UpdateDone { file, result } => {
        if self.pool.finish(&file) {
          match result {
            Err(error) => error!(file = %file, error = %error, "could not execute sparql update"),
            Ok(()) => {
              self.updates_since_commit += 1;
              if self.been_crawled {
                self.commit_soon();
              }
            }
          }
        }
        self.arm_tick();
      }
    }
  }

  fn on_file_notified(&mut self, file: FileRef, outcome: Result<sparql::SparqlBuilder, ExtractError>) {
    if !self.pool.contains(&file) {
      error!(
        file = %file,
        "notified that file has been processed, but it was not in the processing pool; \
         either notify was called on the wrong file or process_file declined it. \
         This is an implementation error in the host"
      );
      return;
    }

    match outcome {
      Err(ExtractError::NotFound(message)) => {
        info!(file = %file, message = %message, "could not process file");
        self.pool.finish(&file);
        self.arm_tick();
      }
      Err(error) => {
        error!(file = %file, error = %error, "could not process file");
        self.pool.finish(&file);
        self.arm_tick();
      }
      Ok(builder) => {
        let uri = file.uri();
        debug!(uri = %uri, "adding item");
        let update = sparql::replace_graph(&uri, builder);

        // The job keeps its pool slot until the update lands; firing its
        // token aborts the update without a completion.
        let cancel = self.pool.cancel_token(&file).unwrap_or_default();
        let store = self.store.clone();
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
          let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = store.batch_update(&update) => result,
          };
          let _ = completions.send(Completion::UpdateDone { file, result });
        });
      }
    }
  }
}
