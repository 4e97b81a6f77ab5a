//! The backing semantic store boundary.
//!
//! The miner never talks to a database directly; it issues SPARQL-like
//! updates and queries through the [`Store`] trait and leaves durability to
//! the implementation. Each batch update is atomic at the store; the miner
//! decides when to commit.

pub mod sparql;

use async_trait::async_trait;

/// Errors surfaced by a [`Store`] implementation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
  #[error("query failed: {0}")]
  Query(String),

  #[error("update failed: {0}")]
  Update(String),

  #[error("commit failed: {0}")]
  Commit(String),
}

/// A SPARQL-like endpoint.
///
/// URIs refer to files as `file:///…` (see [`FileRef::uri`](crate::FileRef::uri)).
/// All triples describing one file live in the named graph keyed by that
/// file's URI, so replacing a file's metadata is a `DROP GRAPH` plus one
/// insert.
#[async_trait]
pub trait Store: Send + Sync + 'static {
  /// Runs a `SELECT` query and returns the result rows, one `Vec<String>`
  /// of bound values per row.
  async fn query(&self, sparql: &str) -> Result<Vec<Vec<String>>, StoreError>;

  /// Applies an update batch atomically.
  async fn batch_update(&self, sparql: &str) -> Result<(), StoreError>;

  /// Makes previously applied batches durable.
  async fn commit(&self) -> Result<(), StoreError>;
}
