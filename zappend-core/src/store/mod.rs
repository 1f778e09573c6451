//! A chunk store is a mapping from string keys (relative paths) to byte
//! values, backed by a directory tree. This is the "chunk-store" the
//! rollback store wraps, and the mini Zarr encoding below writes through it.

pub mod zarr;

use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};

/// A mapping from string keys to byte blobs, backed by files under `root`.
/// Listing, length, iteration and bulk `get` are plain filesystem walks —
/// they never go through the rollback store's logging.
pub trait ChunkStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn set(&mut self, key: &str, value: &[u8]) -> Result<()>;
    fn del(&mut self, key: &str) -> Result<()>;
    fn rename(&mut self, src: &str, dst: &str) -> Result<()>;
    fn rmdir(&mut self, path: &str) -> Result<()>;
    fn exists(&self, key: &str) -> bool;
    fn list_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

/// A [`ChunkStore`] rooted at a directory on the local filesystem.
pub struct FsChunkStore {
    root: PathBuf,
}

impl FsChunkStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn abs(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl ChunkStore for FsChunkStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.abs(key);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read(path)?))
    }

    fn set(&mut self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.abs(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, value)?;
        Ok(())
    }

    fn del(&mut self, key: &str) -> Result<()> {
        let path = self.abs(key);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn rename(&mut self, src: &str, dst: &str) -> Result<()> {
        let src_path = self.abs(src);
        let dst_path = self.abs(dst);
        if let Some(parent) = dst_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(src_path, dst_path)?;
        Ok(())
    }

    fn rmdir(&mut self, path: &str) -> Result<()> {
        let abs = self.abs(path);
        if abs.exists() {
            fs::remove_dir_all(abs)?;
        }
        Ok(())
    }

    fn exists(&self, key: &str) -> bool {
        self.abs(key).exists()
    }

    fn list_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let base = self.abs(prefix);
        if !base.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in walkdir::WalkDir::new(&base).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file() {
                if let Ok(rel) = entry.path().strip_prefix(&self.root) {
                    out.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
        }
        out.sort();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_del_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = FsChunkStore::new(dir.path());
        assert_eq!(s.get("a/b").unwrap(), None);
        s.set("a/b", b"hello").unwrap();
        assert_eq!(s.get("a/b").unwrap(), Some(b"hello".to_vec()));
        s.del("a/b").unwrap();
        assert_eq!(s.get("a/b").unwrap(), None);
    }

    #[test]
    fn rename_moves_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = FsChunkStore::new(dir.path());
        s.set("a", b"1").unwrap();
        s.rename("a", "b").unwrap();
        assert!(!s.exists("a"));
        assert_eq!(s.get("b").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn list_prefix_finds_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = FsChunkStore::new(dir.path());
        s.set("v/0.0", b"x").unwrap();
        s.set("v/0.1", b"y").unwrap();
        let keys = s.list_prefix("v").unwrap();
        assert_eq!(keys, vec!["v/0.0".to_string(), "v/0.1".to_string()]);
    }
}
