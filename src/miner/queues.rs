//! The four per-kind work queues and crawl statistics.
//!
//! Deletes dequeue before creates, creates before updates, updates before
//! moves. The hard case this ordering exists for: a file created and then
//! deleted while queued must never produce a spurious insert.

use std::collections::VecDeque;

use crate::file_ref::FileRef;

/// A pending move with both endpoints tracked.
#[derive(Debug, Clone)]
pub(crate) struct ItemMoved {
  pub from: FileRef,
  pub to: FileRef,
  pub is_directory: bool,
}

/// One dequeued work item.
#[derive(Debug)]
pub(crate) enum QueuedItem {
  Deleted(FileRef),
  Created(FileRef),
  Updated(FileRef),
  Moved(ItemMoved),
}

impl QueuedItem {
  /// The file the scheduler acts on; for moves that is the target.
  pub fn file(&self) -> &FileRef {
    match self {
      QueuedItem::Deleted(file) | QueuedItem::Created(file) | QueuedItem::Updated(file) => file,
      QueuedItem::Moved(moved) => &moved.to,
    }
  }
}

/// The deleted/created/updated/moved FIFOs.
#[derive(Debug, Default)]
pub(crate) struct EventQueues {
  deleted: VecDeque<FileRef>,
  created: VecDeque<FileRef>,
  updated: VecDeque<FileRef>,
  moved: VecDeque<ItemMoved>,
}

impl EventQueues {
  pub fn push_deleted(&mut self, file: FileRef) {
    self.deleted.push_back(file);
  }

  pub fn push_created(&mut self, file: FileRef) {
    self.created.push_back(file);
  }

  pub fn push_updated(&mut self, file: FileRef) {
    self.updated.push_back(file);
  }

  pub fn push_moved(&mut self, moved: ItemMoved) {
    self.moved.push_back(moved);
  }

  /// Pops the next item in strict priority order:
  /// deleted, then created, then updated, then moved.
  pub fn next(&mut self) -> Option<QueuedItem> {
    if let Some(file) = self.deleted.pop_front() {
      return Some(QueuedItem::Deleted(file));
    }
    if let Some(file) = self.created.pop_front() {
      return Some(QueuedItem::Created(file));
    }
    if let Some(file) = self.updated.pop_front() {
      return Some(QueuedItem::Updated(file));
    }
    self.moved.pop_front().map(QueuedItem::Moved)
  }

  /// Returns an item to the head of its queue, preserving its dequeue
  /// priority. Used when a file turns out to be locked at dispatch time.
  pub fn requeue_front(&mut self, item: QueuedItem) {
    match item {
      QueuedItem::Deleted(file) => self.deleted.push_front(file),
      QueuedItem::Created(file) => self.created.push_front(file),
      QueuedItem::Updated(file) => self.updated.push_front(file),
      QueuedItem::Moved(moved) => self.moved.push_front(moved),
    }
  }

  pub fn len(&self) -> usize {
    self.deleted.len() + self.created.len() + self.updated.len() + self.moved.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Drops every created/updated entry equal to or below `root`. Deletes
  /// and moves stay queued; the scheduler tolerates them going stale.
  pub fn purge_under(&mut self, root: &FileRef) {
    let keep = |file: &FileRef| !(file == root || file.has_prefix(root));
    self.created.retain(keep);
    self.updated.retain(keep);
  }
}

/// Cumulative crawl counters, reset at each idle transition.
#[derive(Debug, Default)]
pub(crate) struct MinerStats {
  pub directories_found: usize,
  pub directories_ignored: usize,
  pub files_found: usize,
  pub files_ignored: usize,
}

impl MinerStats {
  pub fn total_items(&self) -> usize {
    self.directories_found + self.files_found
  }

  pub fn reset(&mut self) {
    *self = Self::default();
  }
}

/// Raw completion ratio for the current run, in `[0, 1]`.
///
/// A zero total means nothing is known to be pending, which reads as
/// complete; the caller gates the still-crawling case where totals simply
/// have not been reported yet. More items queued than counted (monitor
/// events arriving mid-drain) clamps to zero; the caller's high-water mark
/// keeps reported progress from regressing.
pub(crate) fn raw_progress(remaining: usize, total: usize) -> f64 {
  if total == 0 {
    return 1.0;
  }
  if remaining >= total {
    return 0.0;
  }
  (total - remaining) as f64 / total as f64
}
