//! Handle for controlling a running miner.
//!
//! Cheap to clone; every method is a message send into the miner's event
//! loop. Queries use a reply channel and resolve once the loop gets to
//! them, so a reply may lag behind a long store await.

use tokio::sync::mpsc;

use crate::file_ref::FileRef;
use crate::miner::message::MinerMessage;

/// Error when talking to the miner.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SendError {
  #[error("miner has shut down")]
  MinerGone,
}

/// Handle to a spawned [`FsMiner`](crate::FsMiner).
#[derive(Clone, Debug)]
pub struct MinerHandle {
  tx: mpsc::Sender<MinerMessage>,
}

impl MinerHandle {
  pub(crate) fn new(tx: mpsc::Sender<MinerMessage>) -> Self {
    Self { tx }
  }

  async fn send(&self, msg: MinerMessage) -> Result<(), SendError> {
    self.tx.send(msg).await.map_err(|_| SendError::MinerGone)
  }

  /// Tells the miner to inspect a directory, optionally recursively.
  pub async fn add_directory(&self, root: FileRef, recurse: bool) -> Result<(), SendError> {
    self.send(MinerMessage::AddDirectory { root, recurse }).await
  }

  /// Removes a directory from inspection: pending crawl tasks below it are
  /// dropped, queued events purged, and in-flight jobs cancelled. Returns
  /// whether a crawl task was actually removed.
  pub async fn remove_directory(&self, root: FileRef) -> Result<bool, SendError> {
    let (reply_tx, mut reply_rx) = mpsc::channel(1);
    self
      .send(MinerMessage::RemoveDirectory {
        root,
        reply: reply_tx,
      })
      .await?;
    reply_rx.recv().await.ok_or(SendError::MinerGone)
  }

  /// Sets the indexing speed modifier: 0 is full speed, 1 the slowest.
  /// Values are clamped to `[0, 1]`; a pending dispatch timer is re-armed
  /// with the new interval immediately.
  pub async fn set_throttle(&self, throttle: f64) -> Result<(), SendError> {
    self.send(MinerMessage::SetThrottle(throttle)).await
  }

  /// The current throttle value.
  pub async fn throttle(&self) -> Result<f64, SendError> {
    let (reply_tx, mut reply_rx) = mpsc::channel(1);
    self.send(MinerMessage::GetThrottle { reply: reply_tx }).await?;
    reply_rx.recv().await.ok_or(SendError::MinerGone)
  }

  /// Completion ratio of the current run, in `[0, 1]`. Nondecreasing until
  /// the miner goes idle.
  pub async fn progress(&self) -> Result<f64, SendError> {
    let (reply_tx, mut reply_rx) = mpsc::channel(1);
    self.send(MinerMessage::GetProgress { reply: reply_tx }).await?;
    reply_rx.recv().await.ok_or(SendError::MinerGone)
  }

  /// Pauses crawling and dispatching. In-flight jobs drain naturally.
  pub async fn pause(&self) -> Result<(), SendError> {
    self.send(MinerMessage::Pause).await
  }

  /// Resumes after [`pause`](Self::pause).
  pub async fn resume(&self) -> Result<(), SendError> {
    self.send(MinerMessage::Resume).await
  }

  /// Asks the miner to stop. In-flight jobs get a grace period to finish.
  pub async fn shutdown(&self) -> Result<(), SendError> {
    self.send(MinerMessage::Shutdown).await
  }
}
