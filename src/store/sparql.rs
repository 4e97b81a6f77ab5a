//! SPARQL text: the mutation buffer the extractor writes into, and the
//! query/update templates the miner issues.
//!
//! Timestamps are second-rounded UTC (`YYYY-MM-DDTHH:MM:SSZ`), matching what
//! the store records in `nfo:fileLastModified`.

use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat, Utc};

/// Write-once buffer where the extractor accumulates triples for one file.
///
/// The miner turns the finished buffer into a `DROP GRAPH` + insert batch,
/// replacing the file's graph atomically.
#[derive(Debug, Default)]
pub struct SparqlBuilder {
  triples: Vec<String>,
}

impl SparqlBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Adds a triple whose object is a resource URI.
  pub fn insert_uri(&mut self, subject: &str, predicate: &str, object: &str) {
    self.triples.push(format!("<{subject}> {predicate} <{object}> ."));
  }

  /// Adds a triple whose object is a string literal; the literal is escaped.
  pub fn insert_literal(&mut self, subject: &str, predicate: &str, literal: &str) {
    self
      .triples
      .push(format!("<{subject}> {predicate} \"{}\" .", escape_literal(literal)));
  }

  pub fn is_empty(&self) -> bool {
    self.triples.is_empty()
  }

  /// Renders the buffer as an insert into `graph`.
  pub fn into_insert(self, graph: &str) -> String {
    format!("INSERT INTO <{graph}> {{ {} }}", self.triples.join(" "))
  }
}

/// Escapes a string for use inside a double-quoted SPARQL literal.
pub fn escape_literal(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  for c in s.chars() {
    match c {
      '"' => out.push_str("\\\""),
      '\\' => out.push_str("\\\\"),
      '\n' => out.push_str("\\n"),
      '\r' => out.push_str("\\r"),
      '\t' => out.push_str("\\t"),
      other => out.push(other),
    }
  }
  out
}

/// Formats a filesystem mtime as the store's second-rounded UTC literal.
pub fn format_mtime(mtime: SystemTime) -> String {
  DateTime::<Utc>::from(mtime).to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// The full replacement batch for one file: drop its graph, insert the
/// extracted triples.
pub fn replace_graph(uri: &str, builder: SparqlBuilder) -> String {
  format!("DROP GRAPH <{uri}> {}", builder.into_insert(uri))
}

/// Two-statement delete: every resource contained below `uri`, then the
/// resource itself.
pub fn delete_resource(uri: &str) -> String {
  let slash_uri = if uri.ends_with('/') {
    uri.to_string()
  } else {
    format!("{uri}/")
  };
  format!(
    "DELETE FROM <{uri}> {{ ?u a rdfs:Resource }} \
     WHERE {{ ?u nfo:belongsToContainer ?p . FILTER (fn:starts-with (?p, \"{slash_uri}\")) }} \
     DELETE FROM <{uri}> {{ <{uri}> a rdfs:Resource }}"
  )
}

/// Is there a resource with this URI at all?
pub fn resource_exists(uri: &str) -> String {
  format!("SELECT ?s WHERE {{ ?s a rdfs:Resource . FILTER (?s = <{uri}>) }}")
}

/// Does the store's recorded mtime for this URI equal `mtime`?
pub fn mtime_matches(uri: &str, mtime: SystemTime) -> String {
  format!(
    "SELECT ?file {{ ?file nfo:fileLastModified \"{}\" . FILTER (?file = <{uri}>) }}",
    format_mtime(mtime)
  )
}

/// Direct children of a container.
pub fn children_of(uri: &str) -> String {
  format!("SELECT ?child WHERE {{ ?child nfo:belongsToContainer <{uri}> }}")
}

/// The in-place rename batch: drop the source's `fileName`, then insert the
/// new name plus one `tracker:uri` rewrite per (source, target) pair,
/// outermost resource first.
pub fn rename_batch(source_uri: &str, target_uri: &str, display_name: &str, rewrites: &[(String, String)]) -> String {
  let mut sparql = format!(
    "DELETE FROM <{source_uri}> {{ <{source_uri}> nfo:fileName ?o }} \
     WHERE {{ <{source_uri}> nfo:fileName ?o }}"
  );
  sparql.push_str(&format!(" INSERT INTO <{target_uri}> {{"));
  sparql.push_str(&format!(
    " <{source_uri}> nfo:fileName \"{}\" .",
    escape_literal(display_name)
  ));
  for (from, to) in rewrites {
    sparql.push_str(&format!(" <{from}> tracker:uri <{to}> ."));
  }
  sparql.push_str(" }");
  sparql
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[test]
  fn test_escape_literal() {
    assert_eq!(escape_literal(r#"a "quoted" name"#), r#"a \"quoted\" name"#);
    assert_eq!(escape_literal("back\\slash"), "back\\\\slash");
    assert_eq!(escape_literal("line\nbreak"), "line\\nbreak");
  }

  #[test]
  fn test_format_mtime_is_second_rounded_utc() {
    // 2021-03-04T05:06:07.9Z truncates to whole seconds.
    let mtime = SystemTime::UNIX_EPOCH + Duration::new(1_614_834_367, 900_000_000);
    assert_eq!(format_mtime(mtime), "2021-03-04T05:06:07Z");
  }

  #[test]
  fn test_replace_graph_shape() {
    let mut builder = SparqlBuilder::new();
    builder.insert_literal("file:///d/a.txt", "nfo:fileName", "a.txt");
    let sparql = replace_graph("file:///d/a.txt", builder);
    assert!(sparql.starts_with("DROP GRAPH <file:///d/a.txt> INSERT INTO <file:///d/a.txt> {"));
    assert!(sparql.contains("<file:///d/a.txt> nfo:fileName \"a.txt\" ."));
  }

  #[test]
  fn test_delete_resource_has_both_statements() {
    let sparql = delete_resource("file:///d/sub");
    assert!(sparql.contains("FILTER (fn:starts-with (?p, \"file:///d/sub/\"))"));
    assert!(sparql.contains("DELETE FROM <file:///d/sub> { <file:///d/sub> a rdfs:Resource }"));
  }

  #[test]
  fn test_rename_batch_orders_rewrites() {
    let rewrites = vec![
      ("file:///d/sub".to_string(), "file:///d/new".to_string()),
      ("file:///d/sub/c.txt".to_string(), "file:///d/new/c.txt".to_string()),
    ];
    let sparql = rename_batch("file:///d/sub", "file:///d/new", "new", &rewrites);
    let name_at = sparql.find("nfo:fileName \"new\"").unwrap();
    let top_at = sparql.find("<file:///d/sub> tracker:uri <file:///d/new>").unwrap();
    let child_at = sparql
      .find("<file:///d/sub/c.txt> tracker:uri <file:///d/new/c.txt>")
      .unwrap();
    assert!(name_at < top_at && top_at < child_at);
    assert!(sparql.ends_with(" }"));
  }
}
