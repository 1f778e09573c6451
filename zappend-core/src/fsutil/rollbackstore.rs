//! Rollback store: wraps a [`ChunkStore`] so every mutation first logs
//! its own inverse onto the transaction's rollback log, then performs the
//! mutation. `RollbackAction` unifies every inverse this crate ever needs to
//! replay: deleting a freshly created directory tree or file, recreating a
//! deleted file, restoring an overwritten file's previous bytes, and undoing
//! a rename.

use crate::error::Result;
use crate::fsutil::fileref::{FileRef, WriteMode};
use crate::fsutil::transaction::Transaction;
use crate::store::ChunkStore;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RollbackAction {
    /// Undoes a freshly created directory tree. Logged once, before any
    /// write, when a brand-new target is being built. Deleting a directory
    /// recursively is idempotent regardless of how far construction got
    /// before a crash, so one record up front is enough to undo the whole
    /// thing.
    DeleteDir { path: String },
    /// Undoes a freshly created file: delete it.
    DeleteFile { path: String },
    /// Undoes a deleted file: recreate it with the bytes it had before.
    CreateFile { path: String, content: Vec<u8> },
    /// Undoes an overwritten file: restore the bytes it had before.
    ReplaceFile { path: String, content: Vec<u8> },
    /// Undoes a rename: rename back.
    RenameFile { from: String, to: String },
}

impl RollbackAction {
    /// Applies the inverse, resolving `path`/`from`/`to` relative to
    /// `target_dir`. Tolerant of a target that is already in the undone
    /// state (a previous partial rollback, or a record for something that
    /// was never actually written before the crash).
    pub fn undo(&self, target_dir: &FileRef) -> Result<()> {
        match self {
            RollbackAction::DeleteDir { path } => target_dir.join(path)?.delete(true),
            RollbackAction::DeleteFile { path } => target_dir.join(path)?.delete(false),
            RollbackAction::CreateFile { path, content } => {
                target_dir.join(path)?.write_bytes(content, WriteMode::Binary)
            }
            RollbackAction::ReplaceFile { path, content } => {
                target_dir.join(path)?.write_bytes(content, WriteMode::Binary)
            }
            RollbackAction::RenameFile { from, to } => {
                let src = target_dir.join(from)?;
                if src.exists() {
                    let dst = target_dir.join(to)?;
                    std::fs::rename(src.local_path(), dst.local_path())?;
                }
                Ok(())
            }
        }
    }
}

/// A [`ChunkStore`] decorator that logs the inverse of every mutation to a
/// [`Transaction`] before performing it.
pub struct RollbackStore<'a> {
    store: &'a mut dyn ChunkStore,
    txn: &'a Transaction,
}

impl<'a> RollbackStore<'a> {
    pub fn new(store: &'a mut dyn ChunkStore, txn: &'a Transaction) -> Self {
        Self { store, txn }
    }

    /// Logs the single up-front `DeleteDir` record for a brand-new target.
    /// Must be called before any write when creating a target.
    pub fn begin_fresh_target(&self, root: &str) -> Result<()> {
        self.txn.log(&RollbackAction::DeleteDir { path: root.to_string() })
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.store.get(key)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.store.exists(key)
    }

    pub fn list_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.store.list_prefix(prefix)
    }

    pub fn set(&mut self, key: &str, value: &[u8]) -> Result<()> {
        match self.store.get(key)? {
            Some(old) => self.txn.log(&RollbackAction::ReplaceFile {
                path: key.to_string(),
                content: old,
            })?,
            None => self.txn.log(&RollbackAction::DeleteFile { path: key.to_string() })?,
        }
        self.store.set(key, value)
    }

    pub fn del(&mut self, key: &str) -> Result<()> {
        if let Some(old) = self.store.get(key)? {
            self.txn.log(&RollbackAction::CreateFile {
                path: key.to_string(),
                content: old,
            })?;
        }
        self.store.del(key)
    }

    pub fn rename(&mut self, src: &str, dst: &str) -> Result<()> {
        self.txn.log(&RollbackAction::RenameFile {
            from: dst.to_string(),
            to: src.to_string(),
        })?;
        self.store.rename(src, dst)
    }

    /// Removes scratch state that is not itself part of the rollback-tracked
    /// target tree (e.g. the transaction's own temp dir); not logged.
    pub fn rmdir_untracked(&mut self, path: &str) -> Result<()> {
        self.store.rmdir(path)
    }
}

impl<'a> ChunkStore for RollbackStore<'a> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        RollbackStore::get(self, key)
    }

    fn set(&mut self, key: &str, value: &[u8]) -> Result<()> {
        RollbackStore::set(self, key, value)
    }

    fn del(&mut self, key: &str) -> Result<()> {
        RollbackStore::del(self, key)
    }

    fn rename(&mut self, src: &str, dst: &str) -> Result<()> {
        RollbackStore::rename(self, src, dst)
    }

    fn rmdir(&mut self, path: &str) -> Result<()> {
        self.rmdir_untracked(path)
    }

    fn exists(&self, key: &str) -> bool {
        RollbackStore::exists(self, key)
    }

    fn list_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        RollbackStore::list_prefix(self, prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FsChunkStore;

    #[test]
    fn set_over_existing_logs_replace_then_undo_restores() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FsChunkStore::new(dir.path());
        store.set("a", b"orig").unwrap();

        let target = FileRef::from_path(dir.path());
        let txn = Transaction::begin(&target, false).unwrap();
        {
            let mut rb = RollbackStore::new(&mut store, &txn);
            rb.set("a", b"new").unwrap();
        }
        assert_eq!(store.get("a").unwrap(), Some(b"new".to_vec()));

        txn.rollback().unwrap();
        assert_eq!(store.get("a").unwrap(), Some(b"orig".to_vec()));
        txn.end().unwrap();
    }

    #[test]
    fn set_new_key_logs_delete_then_undo_removes() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FsChunkStore::new(dir.path());
        let target = FileRef::from_path(dir.path());
        let txn = Transaction::begin(&target, false).unwrap();
        {
            let mut rb = RollbackStore::new(&mut store, &txn);
            rb.set("fresh", b"x").unwrap();
        }
        assert!(store.exists("fresh"));
        txn.rollback().unwrap();
        assert!(!store.exists("fresh"));
        txn.end().unwrap();
    }

    #[test]
    fn fresh_target_rollback_deletes_whole_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FsChunkStore::new(dir.path());
        let target = FileRef::from_path(dir.path());
        let txn = Transaction::begin(&target, false).unwrap();
        {
            let rb = RollbackStore::new(&mut store, &txn);
            rb.begin_fresh_target("").unwrap();
        }
        {
            let mut rb = RollbackStore::new(&mut store, &txn);
            rb.set("v/.zarray", b"{}").unwrap();
            rb.set("v/0", b"chunk").unwrap();
        }
        txn.rollback().unwrap();
        assert!(!dir.path().join("v").exists());
        txn.end().unwrap();
    }
}
