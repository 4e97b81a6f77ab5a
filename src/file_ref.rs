//! File handles with canonical-path identity.
//!
//! A [`FileRef`] denotes a filesystem path independently of whether the file
//! currently exists. Equality and hashing are by lexically normalized path,
//! so the same file referenced through `.` or `..` segments compares equal
//! without touching the filesystem.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use url::Url;

/// An opaque handle for a filesystem path.
///
/// Cheap to clone; queues and the processing pool each own their copy.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FileRef {
  path: PathBuf,
}

impl FileRef {
  /// Creates a handle for `path`, normalizing `.` and `..` segments.
  pub fn new(path: impl AsRef<Path>) -> Self {
    Self {
      path: normalize(path.as_ref()),
    }
  }

  /// The normalized path.
  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Whether `self` lies strictly below `ancestor` (path-segment
  /// containment; a path is not its own prefix).
  pub fn has_prefix(&self, ancestor: &FileRef) -> bool {
    self.path != ancestor.path && self.path.starts_with(&ancestor.path)
  }

  /// The `file://` URI for this path.
  pub fn uri(&self) -> String {
    Url::from_file_path(&self.path)
      .map(String::from)
      .unwrap_or_else(|_| format!("file://{}", self.path.display()))
  }

  /// The final path segment, lossily decoded.
  pub fn display_name(&self) -> String {
    self
      .path
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_else(|| self.path.display().to_string())
  }

  /// The containing directory, if any.
  pub fn parent(&self) -> Option<FileRef> {
    self.path.parent().map(FileRef::new)
  }
}

impl fmt::Display for FileRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.path.display().fmt(f)
  }
}

impl fmt::Debug for FileRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "FileRef({})", self.path.display())
  }
}

impl From<PathBuf> for FileRef {
  fn from(path: PathBuf) -> Self {
    Self::new(path)
  }
}

impl From<&Path> for FileRef {
  fn from(path: &Path) -> Self {
    Self::new(path)
  }
}

/// Lexical normalization: resolves `.` and `..` without hitting the
/// filesystem, so handles to deleted files keep a stable identity.
fn normalize(path: &Path) -> PathBuf {
  let mut out = PathBuf::new();
  for component in path.components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir => {
        if !out.pop() {
          out.push(Component::ParentDir);
        }
      }
      other => out.push(other),
    }
  }
  out
}
