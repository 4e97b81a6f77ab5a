//! The mining coordinator.
//!
//! [`FsMiner`] fuses a bulk crawler and a live filesystem monitor into one
//! ordered stream of per-file events, paces dispatch with a throttle, keeps
//! extraction concurrency bounded, and drives the resulting mutations into
//! the store.
//!
//! # Concurrency model
//!
//! The miner is a single actor: all queue, pool, and counter mutations
//! happen on its event loop, so they never overlap. External work (store
//! queries and updates, the host's extractor) is asynchronous; while one
//! is in flight, monitor events and control calls simply accumulate in the
//! inbox and are handled on the next loop turn. Queue lengths and pool
//! occupancy are re-checked after every await for exactly that reason.
//!
//! # Lifecycle
//!
//! The actor runs until its `CancellationToken` trips, a shutdown is
//! requested, or every handle is dropped. In-flight jobs then get a grace
//! period to finish before being abandoned.

pub mod handle;
pub mod pool;

pub(crate) mod crawler;
pub(crate) mod message;
pub(crate) mod monitor;
pub(crate) mod queues;
mod scheduler;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::time::Instant as TokioInstant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{MAX_TIMEOUT_INTERVAL_MS, MinerConfig};
use crate::file_ref::FileRef;
use crate::hooks::{CrawlSummary, MinerHooks};
use crate::store::Store;

use self::crawler::{CrawlContext, DirectoryTask};
use self::handle::MinerHandle;
use self::message::{Completion, CrawlOutcome, MinerMessage};
use self::monitor::{MonitorHandle, MonitorTask};
use self::pool::ProcessingPool;
use self::queues::{EventQueues, MinerStats};

pub use self::monitor::MonitorError;

/// Errors that can occur while spawning the miner.
#[derive(Debug, thiserror::Error)]
pub enum MinerError {
  #[error("monitor error: {0}")]
  Monitor(#[from] MonitorError),
}

/// The filesystem mining coordinator. See the module docs.
pub struct FsMiner {
  config: MinerConfig,
  hooks: Arc<dyn MinerHooks>,
  store: Arc<dyn Store>,

  inbox_tx: mpsc::Sender<MinerMessage>,
  inbox_rx: mpsc::Receiver<MinerMessage>,
  completions_tx: mpsc::UnboundedSender<Completion>,
  completions_rx: mpsc::UnboundedReceiver<Completion>,

  monitor: MonitorHandle,
  cancel: CancellationToken,

  queues: EventQueues,
  pool: ProcessingPool,
  stats: MinerStats,

  // Crawl driver: one directory task in flight at a time.
  directories: VecDeque<DirectoryTask>,
  current_directory: Option<DirectoryTask>,
  crawl_cancel: Option<CancellationToken>,
  // Roots removed while their crawl was still running; the late outcome
  // must not resurrect entries below them.
  pending_crawl_purges: Vec<FileRef>,
  is_crawling: bool,

  throttle: f64,
  tick_at: Option<TokioInstant>,
  paused: bool,
  paused_tx: watch::Sender<bool>,
  paused_rx: watch::Receiver<bool>,

  timer: Option<Instant>,
  been_crawled: bool,
  shown_totals: bool,
  updates_since_commit: usize,
  progress_hwm: f64,
  last_progress_report: Option<Instant>,
  status_processing: bool,
}

impl FsMiner {
  /// Spawns the miner and its monitor, returning the control handle.
  pub fn spawn(
    config: MinerConfig,
    hooks: Arc<dyn MinerHooks>,
    store: Arc<dyn Store>,
    cancel: CancellationToken,
  ) -> Result<MinerHandle, MinerError> {
    let (inbox_tx, inbox_rx) = mpsc::channel(config.event_capacity);
    let (completions_tx, completions_rx) = mpsc::unbounded_channel();
    let monitor = MonitorTask::spawn(config.monitor_capacity, inbox_tx.clone(), cancel.child_token())?;
    let (paused_tx, paused_rx) = watch::channel(false);

    let miner = Self {
      throttle: config.throttle.clamp(0.0, 1.0),
      pool: ProcessingPool::new(config.effective_pool_limit()),
      config,
      hooks,
      store,
      inbox_tx: inbox_tx.clone(),
      inbox_rx,
      completions_tx,
      completions_rx,
      monitor,
      cancel,
      queues: EventQueues::default(),
      stats: MinerStats::default(),
      directories: VecDeque::new(),
      current_directory: None,
      crawl_cancel: None,
      pending_crawl_purges: Vec::new(),
      is_crawling: false,
      tick_at: None,
      paused: false,
      paused_tx,
      paused_rx,
      timer: None,
      been_crawled: false,
      shown_totals: false,
      updates_since_commit: 0,
      progress_hwm: 0.0,
      last_progress_report: None,
      status_processing: false,
    };
    tokio::spawn(miner.run());

    Ok(MinerHandle::new(inbox_tx))
  }

  /// Main event loop.
  async fn run(mut self) {
    info!(pool_limit = self.config.effective_pool_limit(), "miner started");

    loop {
      tokio::select! {
        // Check cancellation first (biased)
        biased;

        _ = self.cancel.cancelled() => {
          info!("miner shutting down (cancelled)");
          break;
        }

        Some(completion) = self.completions_rx.recv() => {
          self.on_completion(completion).await;
        }

        msg = self.inbox_rx.recv() => {
          match msg {
            Some(MinerMessage::Shutdown) => {
              info!("miner shutting down (requested)");
              break;
            }
            Some(msg) => self.handle_message(msg).await,
            None => {
              info!("miner shutting down (handles dropped)");
              break;
            }
          }
        }

        _ = tokio::time::sleep_until(self.tick_at.unwrap_or_else(TokioInstant::now)), if self.tick_at.is_some() => {
          self.tick_at = None;
          self.process_next_item().await;
        }
      }
    }

    self.drain().await;
    info!("miner stopped");
  }

  async fn handle_message(&mut self, msg: MinerMessage) {
    match msg {
      MinerMessage::AddDirectory { root, recurse } => self.add_directory(root, recurse),
      MinerMessage::RemoveDirectory { root, reply } => {
        let removed = self.remove_directory(root).await;
        let _ = reply.try_send(removed);
      }
      MinerMessage::SetThrottle(throttle) => self.set_throttle(throttle),
      MinerMessage::GetThrottle { reply } => {
        let _ = reply.try_send(self.throttle);
      }
      MinerMessage::GetProgress { reply } => {
        let progress = self.current_progress();
        let _ = reply.try_send(progress);
      }
      MinerMessage::Pause => self.pause(),
      MinerMessage::Resume => self.resume(),
      MinerMessage::Shutdown => {} // handled in the main loop
      MinerMessage::Monitor(event) => self.on_monitor_event(event).await,
      MinerMessage::CrawlFinished(outcome) => self.on_crawl_finished(outcome),
    }
  }

  // ==========================================================================
  // Crawl driver
  // ==========================================================================

  fn add_directory(&mut self, root: FileRef, recurse: bool) {
    debug!(root = %root, recurse, "directory added");
    self.directories.push_back(DirectoryTask { root, recurse });
    self.crawl_directories_start();
  }

  fn crawl_directories_start(&mut self) {
    if self.current_directory.is_some() {
      // One directory is already being crawled; it will chain to the next.
      return;
    }

    let Some(task) = self.directories.pop_front() else {
      // Directory queue exhausted; queue handling takes over.
      self.is_crawling = false;
      self.arm_tick();
      return;
    };

    if self.timer.is_none() {
      // A fresh run: the progress floor starts over.
      self.timer = Some(Instant::now());
      self.progress_hwm = 0.0;
    }

    info!(root = %task.root, recurse = task.recurse, "crawling directory");
    self.is_crawling = true;

    let cancel = self.cancel.child_token();
    self.crawl_cancel = Some(cancel.clone());

    let ctx = CrawlContext {
      hooks: self.hooks.clone(),
      store: self.store.clone(),
      monitor: self.monitor.clone(),
      events_tx: self.inbox_tx.clone(),
      cancel,
      paused: self.paused_rx.clone(),
    };
    let root = task.root.clone();
    let recurse = task.recurse;
    self.current_directory = Some(task);

    tokio::spawn(crawler::run_crawl(ctx, root, recurse));
  }

  fn on_crawl_finished(&mut self, mut outcome: CrawlOutcome) {
    if !self.pending_crawl_purges.is_empty() {
      let purges = std::mem::take(&mut self.pending_crawl_purges);
      outcome
        .found
        .retain(|file| !purges.iter().any(|root| file == root || file.has_prefix(root)));
    }

    for file in outcome.found {
      self.queues.push_created(file);
    }

    self.is_crawling = false;

    self.stats.directories_found += outcome.directories_found;
    self.stats.directories_ignored += outcome.directories_ignored;
    self.stats.files_found += outcome.files_found;
    self.stats.files_ignored += outcome.files_ignored;

    let elapsed = self.timer.map(|started| started.elapsed()).unwrap_or_default();
    info!(
      interrupted = outcome.was_interrupted,
      elapsed_secs = elapsed.as_secs_f64(),
      directories_found = outcome.directories_found,
      directories_ignored = outcome.directories_ignored,
      files_found = outcome.files_found,
      files_ignored = outcome.files_ignored,
      "crawl finished"
    );

    self.current_directory = None;
    self.crawl_cancel = None;

    // Proceed to the next directory task, or hand over to the queues.
    self.crawl_directories_start();
  }

  async fn remove_directory(&mut self, root: FileRef) -> bool {
    let mut removed = false;

    if let Some(current) = &self.current_directory
      && (current.root == root || current.root.has_prefix(&root))
    {
      if let Some(cancel) = &self.crawl_cancel {
        cancel.cancel();
      }
      self.pending_crawl_purges.push(root.clone());
      removed = true;
    }

    let before = self.directories.len();
    self
      .directories
      .retain(|task| !(task.root == root || task.root.has_prefix(&root)));
    removed |= self.directories.len() != before;

    self.queues.purge_under(&root);
    let cancelled = self.pool.cancel_under(&root);
    if cancelled > 0 {
      debug!(root = %root, cancelled, "cancelled in-flight jobs under removed directory");
      // Cancelled jobs produce no completion, so the slots they freed must
      // re-arm dispatch here.
      self.arm_tick();
    }

    self.monitor.remove(root).await;
    removed
  }

  // ==========================================================================
  // Scheduling
  // ==========================================================================

  fn tick_interval(&self) -> Duration {
    Duration::from_millis((MAX_TIMEOUT_INTERVAL_MS as f64 * self.throttle) as u64)
  }

  /// Installs the dispatch timer unless one is already pending, the miner
  /// is paused, or the pool has no room. Exactly one timer exists at a
  /// time; completions re-arm it when a slot frees up.
  pub(crate) fn arm_tick(&mut self) {
    self.arm_tick_after(Duration::ZERO);
  }

  /// [`arm_tick`](Self::arm_tick) with a minimum delay. Retries that would
  /// otherwise re-dispatch the same head item (a locked file at throttle
  /// zero) use the floor so they never spin the event loop.
  pub(crate) fn arm_tick_after(&mut self, floor: Duration) {
    if self.tick_at.is_some() || self.paused || self.pool.is_full() {
      return;
    }
    if !self.status_processing {
      info!("processing files");
      self.status_processing = true;
    }
    self.tick_at = Some(TokioInstant::now() + self.tick_interval().max(floor));
  }

  fn set_throttle(&mut self, throttle: f64) {
    let throttle = throttle.clamp(0.0, 1.0);
    if throttle == self.throttle {
      return;
    }
    info!(throttle, "throttle changed");
    self.throttle = throttle;

    // A pending dispatch keeps its old delay otherwise.
    if self.tick_at.is_some() {
      self.tick_at = Some(TokioInstant::now() + self.tick_interval());
    }
  }

  fn pause(&mut self) {
    if self.paused {
      return;
    }
    info!("paused");
    self.paused = true;
    let _ = self.paused_tx.send(true);
    self.tick_at = None;
  }

  fn resume(&mut self) {
    if !self.paused {
      return;
    }
    info!("resumed");
    self.paused = false;
    let _ = self.paused_tx.send(false);
    if !self.queues.is_empty() {
      self.arm_tick();
    }
  }

  // ==========================================================================
  // Progress & idle transition
  // ==========================================================================

  pub(crate) fn current_progress(&mut self) -> f64 {
    let total = self.stats.total_items();
    if total == 0 && (self.is_crawling || !self.directories.is_empty()) {
      // No crawl has reported counters yet; hold the floor instead of
      // claiming completion for a run that is still walking the tree.
      return self.progress_hwm;
    }
    let raw = queues::raw_progress(self.queues.len(), total);
    if raw > self.progress_hwm {
      self.progress_hwm = raw;
    }
    self.progress_hwm
  }

  pub(crate) fn maybe_report_progress(&mut self) {
    let interval = Duration::from_secs(self.config.progress_interval_secs);
    let due = self
      .last_progress_report
      .map(|at| at.elapsed() >= interval)
      .unwrap_or(true);
    if due {
      self.last_progress_report = Some(Instant::now());
      let progress = self.current_progress();
      debug!(progress, "progress");
    }
  }

  /// Commits pending batches in the background and resets the dirty count.
  pub(crate) fn commit_soon(&mut self) {
    self.updates_since_commit = 0;
    let store = self.store.clone();
    tokio::spawn(async move {
      if let Err(error) = store.commit().await {
        error!(error = %error, "could not commit");
      }
    });
  }

  /// Crawling is done and every queue and the pool have drained: commit,
  /// report, and go idle.
  pub(crate) fn process_stop(&mut self) {
    self.print_stats_once();

    if self.updates_since_commit > 0 {
      self.commit_soon();
    }

    info!("idle");
    self.progress_hwm = 1.0;

    let elapsed = self.timer.take().map(|started| started.elapsed()).unwrap_or_default();
    let summary = CrawlSummary {
      elapsed,
      directories_found: self.stats.directories_found,
      directories_ignored: self.stats.directories_ignored,
      files_found: self.stats.files_found,
      files_ignored: self.stats.files_ignored,
    };
    self.hooks.finished(&summary);

    self.stats.reset();
    self.been_crawled = true;
    self.status_processing = false;
  }

  fn print_stats_once(&mut self) {
    // Only the first idle transition; after that directories come and go
    // and the totals stop meaning much.
    if self.shown_totals {
      return;
    }
    self.shown_totals = true;

    info!("--------------------------------------------------");
    info!(
      "total directories : {} ({} ignored)",
      self.stats.directories_found, self.stats.directories_ignored
    );
    info!(
      "total files       : {} ({} ignored)",
      self.stats.files_found, self.stats.files_ignored
    );
    info!("--------------------------------------------------");
  }

  // ==========================================================================
  // Shutdown
  // ==========================================================================

  /// Lets in-flight jobs finish within the grace period, then abandons the
  /// rest and commits whatever made it into the store.
  async fn drain(&mut self) {
    if let Some(cancel) = &self.crawl_cancel {
      cancel.cancel();
    }

    let grace = Duration::from_secs(self.config.shutdown_grace_secs);
    let deadline = TokioInstant::now() + grace;

    while !self.pool.is_empty() {
      let completion = tokio::select! {
        completion = self.completions_rx.recv() => completion,
        _ = tokio::time::sleep_until(deadline) => None,
      };
      match completion {
        Some(completion) => self.on_completion(completion).await,
        None => {
          warn!(jobs = self.pool.len(), "shutdown grace period elapsed, abandoning in-flight jobs");
          self.pool.cancel_all();
          break;
        }
      }
    }

    if self.updates_since_commit > 0 {
      if let Err(error) = self.store.commit().await {
        error!(error = %error, "could not commit");
      }
      self.updates_since_commit = 0;
    }
  }
}
