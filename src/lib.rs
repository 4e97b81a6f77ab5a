//! Filesystem metadata mining engine.
//!
//! `fsmine` is the indexing core of a desktop search engine: it discovers
//! files and directories under configured roots, reacts to live filesystem
//! changes, and converts per-file events into metadata mutations on a
//! SPARQL-like semantic store. What to index and how to extract metadata
//! are host decisions, supplied through [`MinerHooks`]; the store is
//! whatever implements [`Store`].
//!
//! # Architecture
//!
//! The miner is a single actor owning four per-kind work queues
//! (deleted/created/updated/moved, drained in that priority order), a
//! bounded pool of in-flight extraction jobs, and a throttle-paced
//! dispatch timer. A crawler task walks one directory at a time; a monitor
//! task watches accepted directories for live changes. Both feed the same
//! inbox, so every mutation of miner state happens on one event loop.
//!
//! ```text
//! Crawler ─┐                       ┌─> extractor (host) ─┐
//!          ├─> queues ─> scheduler ┤                     ├─> store
//! Monitor ─┘                       └─> delete/move ──────┘
//! ```

pub mod config;
pub mod file_ref;
pub mod hooks;
pub mod miner;
pub mod store;

pub use config::MinerConfig;
pub use file_ref::FileRef;
pub use hooks::{CrawlSummary, MinerHooks, StandardFilter};
pub use miner::handle::{MinerHandle, SendError};
pub use miner::pool::{ExtractError, ExtractionTask};
pub use miner::{FsMiner, MinerError, MonitorError};
pub use store::sparql::SparqlBuilder;
pub use store::{Store, StoreError};
