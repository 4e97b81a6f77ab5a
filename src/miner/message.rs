//! Message types for the miner's event loop.
//!
//! Everything that happens to the miner arrives as a [`MinerMessage`]:
//! host control calls, normalized monitor events, and crawl results. Job
//! completions travel on a separate unbounded channel (see
//! [`Completion`]) so an extractor can notify from any context without
//! blocking.

use tokio::sync::mpsc;

use crate::file_ref::FileRef;
use crate::miner::pool::ExtractError;
use crate::store::StoreError;
use crate::store::sparql::SparqlBuilder;

/// Inbox message for the miner actor.
#[derive(Debug)]
pub(crate) enum MinerMessage {
  AddDirectory {
    root: FileRef,
    recurse: bool,
  },
  RemoveDirectory {
    root: FileRef,
    reply: mpsc::Sender<bool>,
  },
  SetThrottle(f64),
  GetThrottle {
    reply: mpsc::Sender<f64>,
  },
  GetProgress {
    reply: mpsc::Sender<f64>,
  },
  Pause,
  Resume,
  Shutdown,
  Monitor(MonitorEvent),
  CrawlFinished(CrawlOutcome),
}

/// A filesystem change, normalized from the monitor backend.
#[derive(Debug, Clone)]
pub(crate) enum MonitorEvent {
  Created {
    file: FileRef,
    is_directory: bool,
  },
  Updated {
    file: FileRef,
    is_directory: bool,
  },
  Deleted {
    file: FileRef,
    is_directory: bool,
  },
  Moved {
    from: FileRef,
    to: FileRef,
    is_directory: bool,
    /// Whether the move source lay inside monitored space. When it did not,
    /// the target is brand new to us and is treated as a create.
    source_monitored: bool,
  },
}

/// Result of crawling one directory task.
#[derive(Debug)]
pub(crate) struct CrawlOutcome {
  /// Files and directories to enqueue as created, in discovery order.
  /// Entries flagged contents-only during the crawl are already excluded.
  pub found: Vec<FileRef>,
  pub was_interrupted: bool,
  pub directories_found: usize,
  pub directories_ignored: usize,
  pub files_found: usize,
  pub files_ignored: usize,
}

/// Completion message from an extraction job or its store update.
#[derive(Debug)]
pub(crate) enum Completion {
  /// The extractor finished with `file`; on success the mutation buffer
  /// comes back for submission.
  Notified {
    file: FileRef,
    outcome: Result<SparqlBuilder, ExtractError>,
  },
  /// The spawned store update for `file` finished.
  UpdateDone {
    file: FileRef,
    result: Result<(), StoreError>,
  },
}
