//! Bulk directory crawling.
//!
//! One [`DirectoryTask`] is crawled at a time. The crawl runs as its own
//! task so monitor events keep flowing through the miner while a large tree
//! is being walked; its result comes back as a single
//! [`CrawlOutcome`](crate::miner::message::CrawlOutcome) message.
//!
//! A directory whose recorded mtime still matches the store is enumerated
//! anyway (children change without the parent's mtime changing recursively)
//! but excluded from the found list, so no event is emitted for the
//! directory itself. The same applies to files whose mtime matches: they
//! count as found, but nothing is enqueued for them.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::file_ref::FileRef;
use crate::hooks::MinerHooks;
use crate::miner::message::{CrawlOutcome, MinerMessage};
use crate::miner::monitor::MonitorHandle;
use crate::store::{Store, sparql};

/// A directory the host asked the miner to inspect.
#[derive(Debug, Clone)]
pub(crate) struct DirectoryTask {
  pub root: FileRef,
  pub recurse: bool,
}

/// Everything a crawl run needs from the miner.
pub(crate) struct CrawlContext {
  pub hooks: Arc<dyn MinerHooks>,
  pub store: Arc<dyn Store>,
  pub monitor: MonitorHandle,
  pub events_tx: mpsc::Sender<MinerMessage>,
  pub cancel: CancellationToken,
  pub paused: watch::Receiver<bool>,
}

/// Does the store's recorded last-modified time for `file` match the
/// filesystem, rounded to seconds? Query errors count as "no" so the
/// pipeline keeps going and the file simply gets reindexed.
pub(crate) async fn mtime_matches_store(store: &dyn Store, file: &FileRef) -> bool {
  let Ok(metadata) = tokio::fs::symlink_metadata(file.path()).await else {
    return false;
  };
  let Ok(mtime) = metadata.modified() else {
    return false;
  };
  match store.query(&sparql::mtime_matches(&file.uri(), mtime)).await {
    Ok(rows) => rows.len() == 1,
    Err(error) => {
      error!(file = %file, error = %error, "could not query last-modified time");
      false
    }
  }
}

/// Crawls one directory task and reports the outcome to the miner.
pub(crate) async fn run_crawl(mut ctx: CrawlContext, root: FileRef, recurse: bool) {
  let mut found: Vec<FileRef> = Vec::new();
  let mut contents_only: HashSet<FileRef> = HashSet::new();
  let mut directories_found = 0;
  let mut directories_ignored = 0;
  let mut files_found = 0;
  let mut files_ignored = 0;
  let mut was_interrupted = false;

  if ctx.hooks.check_directory(&root) {
    directories_found += 1;
    if mtime_matches_store(ctx.store.as_ref(), &root).await {
      contents_only.insert(root.clone());
    }
    if ctx.hooks.monitor_directory(&root) {
      ctx.monitor.add(root.clone()).await;
    }
    found.push(root.clone());

    let mut pending: VecDeque<FileRef> = VecDeque::from([root]);

    'walk: while let Some(dir) = pending.pop_front() {
      wait_while_paused(&mut ctx.paused).await;
      if ctx.cancel.is_cancelled() {
        was_interrupted = true;
        break;
      }

      let children = match list_children(&dir).await {
        Ok(children) => children,
        Err(error) => {
          warn!(directory = %dir, error = %error, "could not enumerate directory");
          continue;
        }
      };

      let child_refs: Vec<FileRef> = children.iter().map(|(child, _)| child.clone()).collect();
      if !ctx.hooks.check_directory_contents(&dir, &child_refs) {
        debug!(directory = %dir, "directory contents vetoed");
        continue;
      }

      for (child, is_directory) in children {
        if ctx.cancel.is_cancelled() {
          was_interrupted = true;
          break 'walk;
        }

        if is_directory {
          if ctx.hooks.check_directory(&child) {
            directories_found += 1;
            if mtime_matches_store(ctx.store.as_ref(), &child).await {
              contents_only.insert(child.clone());
            }
            if ctx.hooks.monitor_directory(&child) {
              ctx.monitor.add(child.clone()).await;
            }
            found.push(child.clone());
            if recurse {
              pending.push_back(child);
            }
          } else {
            directories_ignored += 1;
          }
        } else if ctx.hooks.check_file(&child) {
          files_found += 1;
          if !mtime_matches_store(ctx.store.as_ref(), &child).await {
            found.push(child);
          }
        } else {
          files_ignored += 1;
        }
      }
    }
  } else {
    directories_ignored += 1;
  }

  found.retain(|file| !contents_only.contains(file));

  let outcome = CrawlOutcome {
    found,
    was_interrupted,
    directories_found,
    directories_ignored,
    files_found,
    files_ignored,
  };
  let _ = ctx.events_tx.send(MinerMessage::CrawlFinished(outcome)).await;
}

/// Lists a directory's direct children, sorted by name for deterministic
/// enqueue order. Symlinks are not followed.
async fn list_children(dir: &FileRef) -> std::io::Result<Vec<(FileRef, bool)>> {
  let mut entries = tokio::fs::read_dir(dir.path()).await?;
  let mut children = Vec::new();
  while let Some(entry) = entries.next_entry().await? {
    let is_directory = entry.file_type().await.map(|ft| ft.is_dir()).unwrap_or(false);
    children.push((FileRef::new(entry.path()), is_directory));
  }
  children.sort_by(|(a, _), (b, _)| a.path().cmp(b.path()));
  Ok(children)
}

async fn wait_while_paused(paused: &mut watch::Receiver<bool>) {
  while *paused.borrow() {
    if paused.changed().await.is_err() {
      return;
    }
  }
}
