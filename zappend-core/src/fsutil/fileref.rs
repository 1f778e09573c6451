//! File Reference: a uniform (filesystem, path) handle with URI + storage
//! options, path arithmetic, and basic file/dir operations.
//!
//! The only backend implemented is the local filesystem — a storage layer
//! built against URIs can support arbitrary remote protocols through its
//! storage-options map; here the map is retained on the type (and folded
//! into equality) so chained-URI semantics and storage-option comparisons
//! can be exercised even though a single local backend services every URI.

use crate::error::{Result, ZappendError};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Opaque, order-independent bag of backend options (credentials, endpoint
/// overrides, …). Normalised to a sorted map so equality is well-defined.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StorageOptions(BTreeMap<String, String>);

impl StorageOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I: IntoIterator<Item = (String, String)>>(pairs: I) -> Self {
        Self(pairs.into_iter().collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Write mode covering the handful of write shapes a chunk store needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    Text,
    TextAppend,
    Binary,
    BinaryAppend,
}

impl WriteMode {
    fn is_append(self) -> bool {
        matches!(self, WriteMode::TextAppend | WriteMode::BinaryAppend)
    }
}

/// A chained URI like `zip://inner.zarr::memory://outer.zip` is split on
/// `::`; only the first (innermost, left-most) segment is mutated by
/// `parent`/`join`. A plain URI is a chain of length one.
#[derive(Clone, Debug, PartialEq, Eq)]
struct ChainedUri {
    segments: Vec<String>,
}

impl ChainedUri {
    fn parse(uri: &str) -> Self {
        Self {
            segments: uri.split("::").map(|s| s.to_string()).collect(),
        }
    }

    fn render(&self) -> String {
        self.segments.join("::")
    }

    fn first_path(&self) -> &str {
        protocol_split(&self.segments[0]).1
    }

    fn with_first_path(&self, new_path: &str) -> Self {
        let (proto, _) = protocol_split(&self.segments[0]);
        let mut segments = self.segments.clone();
        segments[0] = match proto {
            Some(p) => format!("{p}://{new_path}"),
            None => new_path.to_string(),
        };
        Self { segments }
    }
}

/// Splits `proto://path` into `(Some(proto), path)`, or `(None, uri)` when
/// there is no `://` separator.
fn protocol_split(uri: &str) -> (Option<&str>, &str) {
    match uri.find("://") {
        Some(idx) => (Some(&uri[..idx]), &uri[idx + 3..]),
        None => (None, uri),
    }
}

#[derive(Clone, Debug)]
pub struct FileRef {
    chain: ChainedUri,
    options: StorageOptions,
}

impl PartialEq for FileRef {
    fn eq(&self, other: &Self) -> bool {
        self.chain == other.chain && self.options == other.options
    }
}
impl Eq for FileRef {}

impl FileRef {
    pub fn new(uri: impl Into<String>, options: StorageOptions) -> Self {
        Self {
            chain: ChainedUri::parse(&uri.into()),
            options,
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Self::new(path.as_ref().to_string_lossy().into_owned(), StorageOptions::new())
    }

    pub fn uri(&self) -> String {
        self.chain.render()
    }

    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    /// The first chain segment's path, resolved to a local filesystem path.
    /// Every operation in this module ultimately bottoms out here, since the
    /// only backend is local disk.
    pub fn local_path(&self) -> PathBuf {
        PathBuf::from(self.chain.first_path())
    }

    pub fn parent(&self) -> Result<FileRef> {
        let path = self.chain.first_path();
        if path.is_empty() {
            return Err(ZappendError::configuration(
                "cannot get parent of empty path",
            ));
        }
        let trimmed = path.trim_end_matches('/');
        let parent = match trimmed.rfind('/') {
            Some(idx) => &trimmed[..idx],
            None => "",
        };
        Ok(FileRef {
            chain: self.chain.with_first_path(parent),
            options: self.options.clone(),
        })
    }

    pub fn join(&self, rel: &str) -> Result<FileRef> {
        if rel.is_empty() {
            return Ok(self.clone());
        }
        if rel.starts_with('/') {
            return Err(ZappendError::configuration(format!(
                "join() expects a relative path, got absolute path {rel:?}"
            )));
        }
        let base = self.chain.first_path().trim_end_matches('/');
        let joined = if base.is_empty() {
            rel.to_string()
        } else {
            format!("{base}/{rel}")
        };
        Ok(FileRef {
            chain: self.chain.with_first_path(&joined),
            options: self.options.clone(),
        })
    }

    pub fn exists(&self) -> bool {
        self.local_path().exists()
    }

    pub fn mkdir(&self) -> Result<()> {
        fs::create_dir_all(self.local_path())?;
        Ok(())
    }

    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        Ok(fs::read(self.local_path())?)
    }

    pub fn read_str(&self) -> Result<String> {
        Ok(fs::read_to_string(self.local_path())?)
    }

    pub fn write_bytes(&self, data: &[u8], mode: WriteMode) -> Result<()> {
        use std::io::Write;
        if let Some(parent) = self.local_path().parent() {
            fs::create_dir_all(parent)?;
        }
        let mut f = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .append(mode.is_append())
            .truncate(!mode.is_append())
            .open(self.local_path())?;
        f.write_all(data)?;
        Ok(())
    }

    pub fn write_str(&self, data: &str, mode: WriteMode) -> Result<()> {
        self.write_bytes(data.as_bytes(), mode)
    }

    pub fn delete(&self, recursive: bool) -> Result<()> {
        let path = self.local_path();
        if !path.exists() {
            return Ok(());
        }
        if path.is_dir() {
            let non_empty = fs::read_dir(&path)?.next().is_some();
            if non_empty && !recursive {
                return Err(ZappendError::configuration(format!(
                    "cannot delete non-empty directory {} without recursive=true",
                    path.display()
                )));
            }
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_of_simple_path() {
        let r = FileRef::new("/a/b/c.zarr", StorageOptions::new());
        assert_eq!(r.parent().unwrap().uri(), "/a/b");
    }

    #[test]
    fn parent_of_empty_fails() {
        let r = FileRef::new("", StorageOptions::new());
        assert!(r.parent().is_err());
    }

    #[test]
    fn join_then_parent_roundtrips() {
        let r = FileRef::new("/a/b", StorageOptions::new());
        let joined = r.join("child").unwrap();
        assert_eq!(joined.uri(), "/a/b/child");
        assert_eq!(joined.parent().unwrap(), r);
    }

    #[test]
    fn join_empty_returns_self() {
        let r = FileRef::new("/a/b", StorageOptions::new());
        assert_eq!(r.join("").unwrap(), r);
    }

    #[test]
    fn join_absolute_fails() {
        let r = FileRef::new("/a/b", StorageOptions::new());
        assert!(r.join("/etc").is_err());
    }

    #[test]
    fn chained_uri_edits_only_first_segment() {
        let r = FileRef::new("memory://a/b::file:///tmp/x", StorageOptions::new());
        let joined = r.join("c").unwrap();
        assert_eq!(joined.uri(), "memory://a/b/c::file:///tmp/x");
        assert_eq!(joined.parent().unwrap().uri(), "memory://a/b::file:///tmp/x");
    }

    #[test]
    fn equality_considers_storage_options() {
        let a = FileRef::new("/a", StorageOptions::new());
        let b = FileRef::new(
            "/a",
            StorageOptions::from_pairs([("key".to_string(), "v".to_string())]),
        );
        assert_ne!(a, b);
    }

    #[test]
    fn delete_non_recursive_fails_on_nonempty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("f.txt"), b"x").unwrap();
        let r = FileRef::from_path(&sub);
        assert!(r.delete(false).is_err());
        assert!(r.delete(true).is_ok());
        assert!(!sub.exists());
    }

    #[test]
    fn write_append_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let r = FileRef::from_path(dir.path().join("f.txt"));
        r.write_str("a", WriteMode::Text).unwrap();
        r.write_str("b", WriteMode::TextAppend).unwrap();
        assert_eq!(r.read_str().unwrap(), "ab");
    }
}
