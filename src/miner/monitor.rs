//! Live filesystem monitoring.
//!
//! Bridges notify's synchronous callbacks into the miner's event loop and
//! normalizes raw events into [`MonitorEvent`]s. Watches are per-directory
//! and non-recursive; the crawl subscribes each accepted directory as it
//! goes, so the watched set mirrors what the miner actually indexes.
//!
//! # Renames
//!
//! Backends report renames in three shapes: a paired event carrying both
//! paths, or split from/to halves correlated by a tracker id. Halves are
//! held briefly for pairing; a from-half that never finds its to-half
//! degrades to a delete (the file left monitored space), an unpaired
//! to-half to a create (it arrived from unmonitored space).

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::file_ref::FileRef;
use crate::miner::message::{MinerMessage, MonitorEvent};

/// How long a split rename half waits for its counterpart.
const RENAME_PAIR_WINDOW: Duration = Duration::from_millis(500);

/// Errors that can occur while setting up the monitor.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
  #[error("failed to initialize watcher: {0}")]
  Init(#[source] notify::Error),
}

/// Control messages for the monitor task.
#[derive(Debug)]
pub(crate) enum MonitorControl {
  Add(FileRef),
  Remove(FileRef),
}

/// Handle for subscribing and unsubscribing directories.
#[derive(Clone, Debug)]
pub(crate) struct MonitorHandle {
  tx: mpsc::Sender<MonitorControl>,
}

impl MonitorHandle {
  pub(crate) fn from_sender(tx: mpsc::Sender<MonitorControl>) -> Self {
    Self { tx }
  }

  /// Subscribes a directory for change notifications.
  pub async fn add(&self, directory: FileRef) {
    let _ = self.tx.send(MonitorControl::Add(directory)).await;
  }

  /// Drops every watch at or below `root`.
  pub async fn remove(&self, root: FileRef) {
    let _ = self.tx.send(MonitorControl::Remove(root)).await;
  }
}

/// A rename half waiting for its counterpart.
#[derive(Debug)]
struct PendingRename {
  from: FileRef,
  is_directory: bool,
  at: Instant,
}

/// The monitor task. Owns the platform watcher and the watched set.
pub(crate) struct MonitorTask {
  // Held to keep the platform watcher alive.
  watcher: RecommendedWatcher,
  raw_rx: mpsc::Receiver<Result<Event, notify::Error>>,
  control_rx: mpsc::Receiver<MonitorControl>,
  events_tx: mpsc::Sender<MinerMessage>,
  watched: HashSet<PathBuf>,
  pending_renames: HashMap<usize, PendingRename>,
  cancel: CancellationToken,
}

impl MonitorTask {
  /// Creates the watcher and spawns the monitor loop.
  pub fn spawn(
    capacity: usize,
    events_tx: mpsc::Sender<MinerMessage>,
    cancel: CancellationToken,
  ) -> Result<MonitorHandle, MonitorError> {
    let (raw_tx, raw_rx) = mpsc::channel::<Result<Event, notify::Error>>(capacity);

    // The callback runs on notify's thread; blocking_send applies
    // backpressure instead of dropping events on a full channel.
    let watcher = RecommendedWatcher::new(
      move |res| {
        let _ = raw_tx.blocking_send(res);
      },
      Config::default(),
    )
    .map_err(MonitorError::Init)?;

    let (control_tx, control_rx) = mpsc::channel(capacity);

    let task = Self {
      watcher,
      raw_rx,
      control_rx,
      events_tx,
      watched: HashSet::new(),
      pending_renames: HashMap::new(),
      cancel,
    };
    tokio::spawn(task.run());

    Ok(MonitorHandle { tx: control_tx })
  }

  async fn run(mut self) {
    debug!("monitor started");

    let mut sweep = tokio::time::interval(RENAME_PAIR_WINDOW);

    loop {
      tokio::select! {
        biased;

        _ = self.cancel.cancelled() => {
          debug!("monitor shutting down (cancelled)");
          break;
        }

        ctrl = self.control_rx.recv() => {
          match ctrl {
            Some(ctrl) => self.handle_control(ctrl),
            None => {
              debug!("monitor shutting down (control channel closed)");
              break;
            }
          }
        }

        raw = self.raw_rx.recv() => {
          match raw {
            Some(Ok(event)) => self.translate(event).await,
            Some(Err(error)) => warn!(error = %error, "watcher error"),
            None => {
              debug!("monitor shutting down (watcher gone)");
              break;
            }
          }
        }

        _ = sweep.tick() => {
          self.flush_stale_renames().await;
        }
      }
    }

    debug!("monitor stopped");
  }

  fn handle_control(&mut self, ctrl: MonitorControl) {
    match ctrl {
      MonitorControl::Add(directory) => {
        let path = directory.path().to_path_buf();
        if !self.watched.insert(path.clone()) {
          return;
        }
        if let Err(error) = self.watcher.watch(&path, RecursiveMode::NonRecursive) {
          warn!(directory = %directory, error = %error, "could not monitor directory");
          self.watched.remove(&path);
        } else {
          trace!(directory = %directory, "monitoring directory");
        }
      }
      MonitorControl::Remove(root) => {
        let doomed: Vec<PathBuf> = self
          .watched
          .iter()
          .filter(|path| {
            let candidate = FileRef::new(path);
            candidate == root || candidate.has_prefix(&root)
          })
          .cloned()
          .collect();
        for path in doomed {
          let _ = self.watcher.unwatch(&path);
          self.watched.remove(&path);
        }
      }
    }
  }

  /// Whether `file` lay inside monitored space: either it is a watched
  /// directory itself or its parent directory is watched.
  fn is_monitored(&self, file: &FileRef) -> bool {
    if self.watched.contains(file.path()) {
      return true;
    }
    file
      .path()
      .parent()
      .map(|parent| self.watched.contains(parent))
      .unwrap_or(false)
  }

  async fn translate(&mut self, event: Event) {
    let Some(path) = event.paths.first() else {
      return;
    };
    let file = FileRef::new(path);

    match event.kind {
      EventKind::Access(_) => {}
      EventKind::Create(kind) => {
        let is_directory = kind == CreateKind::Folder || path.is_dir();
        self.emit(MonitorEvent::Created { file, is_directory }).await;
      }
      EventKind::Remove(kind) => {
        let is_directory = kind == RemoveKind::Folder || self.watched.contains(path.as_path());
        self.emit(MonitorEvent::Deleted { file, is_directory }).await;
      }
      EventKind::Modify(ModifyKind::Name(mode)) => self.translate_rename(mode, &event).await,
      EventKind::Modify(_) => {
        let is_directory = path.is_dir();
        self.emit(MonitorEvent::Updated { file, is_directory }).await;
      }
      EventKind::Any | EventKind::Other => {
        trace!(file = %file, kind = ?event.kind, "ignoring event");
      }
    }
  }

  async fn translate_rename(&mut self, mode: RenameMode, event: &Event) {
    let tracker = event.attrs.tracker();
    let path = &event.paths[0];
    let file = FileRef::new(path);

    match mode {
      RenameMode::Both if event.paths.len() >= 2 => {
        let to = FileRef::new(&event.paths[1]);
        self.emit_moved(file, to).await;
      }
      RenameMode::From => match tracker {
        Some(id) => {
          let is_directory = self.watched.contains(path.as_path());
          self.pending_renames.insert(
            id,
            PendingRename {
              from: file,
              is_directory,
              at: Instant::now(),
            },
          );
        }
        // No way to pair it; the file left our view.
        None => {
          let is_directory = self.watched.contains(path.as_path());
          self.emit(MonitorEvent::Deleted { file, is_directory }).await;
        }
      },
      RenameMode::To | RenameMode::Both => {
        let paired = tracker.and_then(|id| self.pending_renames.remove(&id));
        match paired {
          Some(pending) => self.emit_moved(pending.from, file).await,
          None => {
            let is_directory = path.is_dir();
            self.emit(MonitorEvent::Created { file, is_directory }).await;
          }
        }
      }
      RenameMode::Any | RenameMode::Other => {
        // MOVE_SELF style events carry the stale pre-move path; the watch
        // on the parent already reported the rename, so only a still-valid
        // path is worth an update.
        if path.exists() {
          let is_directory = path.is_dir();
          self.emit(MonitorEvent::Updated { file, is_directory }).await;
        } else {
          trace!(file = %file, "ignoring rename event for vanished path");
        }
      }
    }
  }

  async fn emit_moved(&mut self, from: FileRef, to: FileRef) {
    let source_monitored = self.is_monitored(&from);
    let is_directory = to.path().is_dir();

    // A moved directory keeps generating events under its new path; keep
    // the watch set in step so source_monitored stays accurate.
    if is_directory && self.watched.remove(from.path()) {
      let _ = self.watcher.unwatch(from.path());
    }

    self
      .emit(MonitorEvent::Moved {
        from,
        to,
        is_directory,
        source_monitored,
      })
      .await;
  }

  async fn flush_stale_renames(&mut self) {
    let now = Instant::now();
    let expired: Vec<usize> = self
      .pending_renames
      .iter()
      .filter(|(_, pending)| now.duration_since(pending.at) >= RENAME_PAIR_WINDOW)
      .map(|(id, _)| *id)
      .collect();

    for id in expired {
      if let Some(pending) = self.pending_renames.remove(&id) {
        debug!(file = %pending.from, "rename pair never completed, treating as delete");
        self
          .emit(MonitorEvent::Deleted {
            file: pending.from,
            is_directory: pending.is_directory,
          })
          .await;
      }
    }
  }

  async fn emit(&self, event: MonitorEvent) {
    let _ = self.events_tx.send(MinerMessage::Monitor(event)).await;
  }
}
