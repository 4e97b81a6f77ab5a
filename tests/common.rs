//! Shared fixtures for miner integration tests.
//!
//! `MemoryStore` is a fake semantic store that understands exactly the
//! query and update templates the miner emits, enough to answer existence,
//! mtime, and containment queries and to apply deletes, graph replacements,
//! and `tracker:uri` renames. `TestHooks` is an instrumented extractor that
//! can run immediately or hold tasks for manual release.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use fsmine::store::sparql;
use fsmine::{
  CrawlSummary, ExtractError, ExtractionTask, FileRef, FsMiner, MinerConfig, MinerHandle, MinerHooks, StandardFilter,
  Store, StoreError,
};

// ============================================================================
// MemoryStore
// ============================================================================

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StoreData {
  pub resources: BTreeSet<String>,
  pub mtimes: BTreeMap<String, String>,
  pub containers: BTreeMap<String, String>,
  pub file_names: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct StoreState {
  data: StoreData,
  updates: Vec<String>,
  commits: usize,
}

/// In-memory stand-in for the SPARQL endpoint.
#[derive(Debug, Default)]
pub struct MemoryStore {
  state: Mutex<StoreState>,
}

impl MemoryStore {
  pub fn update_count(&self) -> usize {
    self.state.lock().unwrap().updates.len()
  }

  pub fn commit_count(&self) -> usize {
    self.state.lock().unwrap().commits
  }

  pub fn updates(&self) -> Vec<String> {
    self.state.lock().unwrap().updates.clone()
  }

  pub fn resources(&self) -> BTreeSet<String> {
    self.state.lock().unwrap().data.resources.clone()
  }

  pub fn contains(&self, uri: &str) -> bool {
    self.state.lock().unwrap().data.resources.contains(uri)
  }

  pub fn data(&self) -> StoreData {
    self.state.lock().unwrap().data.clone()
  }
}

fn between(s: &str, start: &str, end: &str) -> Option<String> {
  let from = s.find(start)? + start.len();
  let to = s[from..].find(end)? + from;
  Some(s[from..to].to_string())
}

fn rename_resource(data: &mut StoreData, from: &str, to: &str) {
  if data.resources.remove(from) {
    data.resources.insert(to.to_string());
  }
  if let Some(v) = data.mtimes.remove(from) {
    data.mtimes.insert(to.to_string(), v);
  }
  if let Some(v) = data.file_names.remove(from) {
    data.file_names.insert(to.to_string(), v);
  }
  if let Some(v) = data.containers.remove(from) {
    data.containers.insert(to.to_string(), v);
  }
  for value in data.containers.values_mut() {
    if value == from {
      *value = to.to_string();
    }
  }
}

fn apply_insert(data: &mut StoreData, body: &str) {
  for raw in body.split(" . ") {
    let triple = raw.trim().trim_end_matches('.').trim();
    if triple.is_empty() {
      continue;
    }
    let Some(subject) = between(triple, "<", ">") else {
      continue;
    };
    let Some(close) = triple.find('>') else { continue };
    let rest = triple[close + 1..].trim();
    let Some((predicate, object)) = rest.split_once(' ') else {
      continue;
    };

    if predicate == "tracker:uri" {
      if let Some(to) = between(object, "<", ">") {
        rename_resource(data, &subject, &to);
      }
      continue;
    }

    data.resources.insert(subject.clone());
    if let Some(literal) = between(object, "\"", "\"") {
      match predicate {
        "nfo:fileLastModified" => {
          data.mtimes.insert(subject, literal);
        }
        "nfo:fileName" => {
          data.file_names.insert(subject, literal);
        }
        _ => {}
      }
    } else if predicate == "nfo:belongsToContainer"
      && let Some(container) = between(object, "<", ">")
    {
      data.containers.insert(subject, container);
    }
  }
}

fn apply_delete(data: &mut StoreData, uri: &str) {
  let slash = format!("{uri}/");
  let mut doomed: Vec<String> = data
    .containers
    .iter()
    .filter(|(_, parent)| parent.as_str() == uri || parent.starts_with(&slash))
    .map(|(child, _)| child.clone())
    .collect();
  doomed.push(uri.to_string());

  for gone in doomed {
    data.resources.remove(&gone);
    data.mtimes.remove(&gone);
    data.file_names.remove(&gone);
    data.containers.remove(&gone);
  }
}

#[async_trait]
impl Store for MemoryStore {
  async fn query(&self, sparql: &str) -> Result<Vec<Vec<String>>, StoreError> {
    let state = self.state.lock().unwrap();
    let data = &state.data;

    if sparql.starts_with("SELECT ?s WHERE") {
      let uri = between(sparql, "FILTER (?s = <", ">").ok_or_else(|| StoreError::Query("bad query".into()))?;
      if data.resources.contains(&uri) {
        return Ok(vec![vec![uri]]);
      }
      return Ok(Vec::new());
    }

    if sparql.starts_with("SELECT ?file") {
      let ts = between(sparql, "nfo:fileLastModified \"", "\"").ok_or_else(|| StoreError::Query("bad query".into()))?;
      let uri = between(sparql, "FILTER (?file = <", ">").ok_or_else(|| StoreError::Query("bad query".into()))?;
      if data.mtimes.get(&uri) == Some(&ts) {
        return Ok(vec![vec![uri]]);
      }
      return Ok(Vec::new());
    }

    if sparql.starts_with("SELECT ?child") {
      let uri = between(sparql, "belongsToContainer <", ">").ok_or_else(|| StoreError::Query("bad query".into()))?;
      let rows = data
        .containers
        .iter()
        .filter(|(_, parent)| **parent == uri)
        .map(|(child, _)| vec![child.clone()])
        .collect();
      return Ok(rows);
    }

    Err(StoreError::Query(format!("unrecognized query: {sparql}")))
  }

  async fn batch_update(&self, sparql: &str) -> Result<(), StoreError> {
    let mut state = self.state.lock().unwrap();
    state.updates.push(sparql.to_string());

    if sparql.starts_with("DROP GRAPH <") {
      let graph = between(sparql, "DROP GRAPH <", ">").ok_or_else(|| StoreError::Update("bad update".into()))?;
      state.data.resources.remove(&graph);
      state.data.mtimes.remove(&graph);
      state.data.file_names.remove(&graph);
      state.data.containers.remove(&graph);
      if let Some(body) = between(sparql, "{ ", " }") {
        apply_insert(&mut state.data, &body);
      }
      return Ok(());
    }

    if sparql.starts_with("DELETE FROM <") && sparql.contains("nfo:belongsToContainer ?p") {
      let uri = between(sparql, "DELETE FROM <", ">").ok_or_else(|| StoreError::Update("bad update".into()))?;
      apply_delete(&mut state.data, &uri);
      return Ok(());
    }

    if sparql.starts_with("DELETE FROM <") && sparql.contains("nfo:fileName ?o") {
      let source = between(sparql, "DELETE FROM <", ">").ok_or_else(|| StoreError::Update("bad update".into()))?;
      state.data.file_names.remove(&source);
      let body = between(sparql, "INSERT INTO <", " }").and_then(|rest| rest.find("{ ").map(|i| rest[i + 2..].to_string()));
      if let Some(body) = body {
        apply_insert(&mut state.data, &body);
      }
      return Ok(());
    }

    Err(StoreError::Update(format!("unrecognized update: {sparql}")))
  }

  async fn commit(&self) -> Result<(), StoreError> {
    self.state.lock().unwrap().commits += 1;
    Ok(())
  }
}

// ============================================================================
// TestHooks
// ============================================================================

/// Instrumented `MinerHooks` implementation.
///
/// By default, files are extracted immediately (name, mtime, container
/// triples) and directories are declined. `holding()` keeps accepted tasks
/// until [`release_one`](Self::release_one) so tests can observe pool
/// occupancy.
pub struct TestHooks {
  pub index_directories: bool,
  pub hold_tasks: bool,
  pub filter: Option<StandardFilter>,
  pub held: Mutex<Vec<ExtractionTask>>,
  pub in_flight: AtomicUsize,
  pub max_in_flight: AtomicUsize,
  pub summaries: Mutex<Vec<CrawlSummary>>,
}

impl TestHooks {
  pub fn new() -> Self {
    Self {
      index_directories: false,
      hold_tasks: false,
      filter: None,
      held: Mutex::new(Vec::new()),
      in_flight: AtomicUsize::new(0),
      max_in_flight: AtomicUsize::new(0),
      summaries: Mutex::new(Vec::new()),
    }
  }

  pub fn indexing_directories() -> Self {
    Self {
      index_directories: true,
      ..Self::new()
    }
  }

  pub fn holding() -> Self {
    Self {
      hold_tasks: true,
      ..Self::new()
    }
  }

  pub fn with_filter(root: &Path) -> Self {
    Self {
      filter: Some(StandardFilter::new(root)),
      ..Self::new()
    }
  }

  pub fn finished_count(&self) -> usize {
    self.summaries.lock().unwrap().len()
  }

  pub fn last_summary(&self) -> Option<CrawlSummary> {
    self.summaries.lock().unwrap().last().cloned()
  }

  pub fn held_count(&self) -> usize {
    self.held.lock().unwrap().len()
  }

  /// Completes the oldest held task. Returns false when none are held.
  pub fn release_one(&self) -> bool {
    let task = self.held.lock().unwrap().pop();
    match task {
      Some(task) => {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        complete_task(task);
        true
      }
      None => false,
    }
  }
}

impl MinerHooks for TestHooks {
  fn check_file(&self, file: &FileRef) -> bool {
    self.filter.as_ref().map(|f| f.allows(file, false)).unwrap_or(true)
  }

  fn check_directory(&self, directory: &FileRef) -> bool {
    self.filter.as_ref().map(|f| f.allows(directory, true)).unwrap_or(true)
  }

  fn process_file(&self, task: ExtractionTask) -> bool {
    let is_dir = task.file().path().is_dir();
    if is_dir && !self.index_directories {
      return false;
    }

    let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

    if self.hold_tasks {
      self.held.lock().unwrap().push(task);
      return true;
    }

    complete_task(task);
    self.in_flight.fetch_sub(1, Ordering::SeqCst);
    true
  }

  fn finished(&self, summary: &CrawlSummary) {
    self.summaries.lock().unwrap().push(summary.clone());
  }
}

/// Fills the task's buffer with name/mtime/container triples and notifies.
pub fn complete_task(mut task: ExtractionTask) {
  match std::fs::symlink_metadata(task.file().path()) {
    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
      task.notify(Some(ExtractError::NotFound(err.to_string())));
    }
    Err(err) => {
      task.notify(Some(ExtractError::Failed(err.to_string())));
    }
    Ok(metadata) => {
      let uri = task.file().uri();
      let name = task.file().display_name();
      let parent = task.file().parent().map(|p| p.uri());
      let mtime = metadata.modified().expect("mtime available");

      let builder = task.builder();
      builder.insert_literal(&uri, "nfo:fileName", &name);
      builder.insert_literal(&uri, "nfo:fileLastModified", &sparql::format_mtime(mtime));
      if let Some(parent) = parent {
        builder.insert_uri(&uri, "nfo:belongsToContainer", &parent);
      }
      task.notify(None);
    }
  }
}

// ============================================================================
// Fixture
// ============================================================================

pub struct MinerFixture {
  pub handle: MinerHandle,
  pub hooks: std::sync::Arc<TestHooks>,
  pub store: std::sync::Arc<MemoryStore>,
  pub cancel: CancellationToken,
}

impl Drop for MinerFixture {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}

pub fn spawn_miner(config: MinerConfig, hooks: TestHooks) -> MinerFixture {
  init_tracing();
  let hooks = std::sync::Arc::new(hooks);
  let store = std::sync::Arc::new(MemoryStore::default());
  let cancel = CancellationToken::new();
  let handle = FsMiner::spawn(config, hooks.clone(), store.clone(), cancel.clone()).expect("spawn miner");
  MinerFixture {
    handle,
    hooks,
    store,
    cancel,
  }
}

pub fn init_tracing() {
  use tracing_subscriber::EnvFilter;
  let _ = tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .try_init();
}

/// Polls `check` until it holds or `timeout` elapses.
pub async fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
  let start = std::time::Instant::now();
  while start.elapsed() < timeout {
    if check() {
      return true;
    }
    tokio::time::sleep(Duration::from_millis(25)).await;
  }
  false
}

/// A tempdir whose name passes hidden-file filters.
pub fn visible_tempdir() -> tempfile::TempDir {
  tempfile::Builder::new()
    .prefix("fsmine-test-")
    .tempdir()
    .expect("create temp dir")
}
