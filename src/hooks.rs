//! Host integration surface.
//!
//! The miner is policy-free: which files matter, which directories deserve a
//! monitor, and how metadata gets extracted are all decisions of the host,
//! supplied as a [`MinerHooks`] implementation at construction time. Check
//! hooks are synchronous and should be cheap; extraction may complete
//! asynchronously through [`ExtractionTask::notify`].

use std::path::Path;
use std::time::Duration;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use tracing::warn;

use crate::file_ref::FileRef;
use crate::miner::pool::ExtractionTask;

/// Counters reported when the miner transitions to idle.
#[derive(Debug, Clone, Default)]
pub struct CrawlSummary {
  /// Time since mining work started.
  pub elapsed: Duration,
  pub directories_found: usize,
  pub directories_ignored: usize,
  pub files_found: usize,
  pub files_ignored: usize,
}

/// Callbacks the host supplies to drive indexing policy and extraction.
///
/// The check hooks default to accepting everything, mirroring a miner that
/// indexes all it sees. [`process_file`](Self::process_file) has no default:
/// extraction is the whole point of embedding the miner.
pub trait MinerHooks: Send + Sync + 'static {
  /// Whether `file` must be inspected. Called during crawling and for every
  /// monitor event on a non-directory.
  fn check_file(&self, file: &FileRef) -> bool {
    let _ = file;
    true
  }

  /// Whether `directory` must be inspected. Declining prunes the subtree.
  fn check_directory(&self, directory: &FileRef) -> bool {
    let _ = directory;
    true
  }

  /// Veto over a directory after its direct children are known. Useful to
  /// discard backup or cache directories wholesale.
  fn check_directory_contents(&self, directory: &FileRef, children: &[FileRef]) -> bool {
    let _ = (directory, children);
    true
  }

  /// Whether `directory` should be subscribed for filesystem change
  /// notifications.
  fn monitor_directory(&self, directory: &FileRef) -> bool {
    let _ = directory;
    true
  }

  /// Whether `file` is currently locked by another process. Locked files
  /// stay queued and are retried on a later scheduler pass.
  fn is_locked(&self, file: &FileRef) -> bool {
    let _ = file;
    false
  }

  /// Extract metadata for one file.
  ///
  /// Return `true` to accept the file; the implementation then must call
  /// [`ExtractionTask::notify`] exactly once, synchronously or later from
  /// any task. Return `false` to decline, dropping the task unused.
  fn process_file(&self, task: ExtractionTask) -> bool;

  /// All pending processing has finished and the miner is idle.
  fn finished(&self, summary: &CrawlSummary) {
    let _ = summary;
  }
}

/// Ready-made check policy: skips hidden entries and well-known junk
/// directories, plus anything matched by custom ignore patterns.
///
/// Intended as a building block for host [`MinerHooks`] implementations.
pub struct StandardFilter {
  matcher: Option<Gitignore>,
}

/// Patterns that are never worth indexing.
const JUNK_PATTERNS: &[&str] = &[".git/", "node_modules/", "target/", "__pycache__/", "*~", "#*#"];

impl StandardFilter {
  /// Builds the filter for a tree rooted at `root`, honoring a `.gitignore`
  /// there if present.
  pub fn new(root: &Path) -> Self {
    let mut builder = GitignoreBuilder::new(root);

    let gitignore_path = root.join(".gitignore");
    if gitignore_path.exists()
      && let Some(err) = builder.add(&gitignore_path)
    {
      warn!(error = %err, "error parsing .gitignore, continuing with partial rules");
    }

    for pattern in JUNK_PATTERNS {
      let _ = builder.add_line(None, pattern);
    }

    let matcher = match builder.build() {
      Ok(matcher) => Some(matcher),
      Err(err) => {
        warn!(error = %err, "failed to build ignore matcher, filter passes everything");
        None
      }
    };

    Self { matcher }
  }

  /// Whether `file` passes the filter.
  pub fn allows(&self, file: &FileRef, is_dir: bool) -> bool {
    if file.display_name().starts_with('.') {
      return false;
    }
    match &self.matcher {
      Some(matcher) => !matcher.matched(file.path(), is_dir).is_ignore(),
      None => true,
    }
  }
}
