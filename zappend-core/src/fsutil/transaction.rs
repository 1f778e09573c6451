//! Transaction: owns the target lock file and the rollback log for one
//! `process_slices` call. The rollback log is a newline-delimited-JSON file
//! of [`RollbackAction`] records, appended to as writes happen and replayed
//! in reverse if the call fails partway through — the same length-delimited,
//! append-only log shape the archive format's own write journal uses,
//! adapted here to line-delimited JSON since there is no need for binary
//! framing or encryption.

use crate::error::{Result, ZappendError};
use crate::fsutil::fileref::{FileRef, WriteMode};
use crate::fsutil::rollbackstore::RollbackAction;
use uuid::Uuid;

const LOCK_SUFFIX: &str = ".lock";
const ROLLBACK_SUFFIX: &str = ".zappend-rollback.jsonl";

pub struct Transaction {
    target_dir: FileRef,
    lock_file: FileRef,
    rollback_file: FileRef,
    disabled: bool,
    id: String,
}

impl Transaction {
    /// The lock file `{target}.lock` sits next to `target_dir` and is
    /// acquired for the lifetime of one transaction. Exposed so callers
    /// (e.g. `force_new`) can remove a stale lock outside the normal
    /// begin/end lifecycle.
    pub fn lock_file_ref(target_dir: &FileRef) -> Result<FileRef> {
        sibling(target_dir, LOCK_SUFFIX)
    }

    /// Acquires the target lock and opens a fresh rollback log. Fails if the
    /// lock is already held: one writer per target at a time.
    pub fn begin(target_dir: &FileRef, disable_rollback: bool) -> Result<Transaction> {
        let lock_file = sibling(target_dir, LOCK_SUFFIX)?;
        if lock_file.exists() {
            return Err(ZappendError::lock(format!(
                "Target is locked: {}",
                lock_file.uri()
            )));
        }
        let id = Uuid::new_v4().to_string();

        let rollback_file = sibling(target_dir, ROLLBACK_SUFFIX)?;
        if !disable_rollback {
            rollback_file.write_str("", WriteMode::Text)?;
        }
        lock_file.write_str(&rollback_file.uri(), WriteMode::Text)?;

        Ok(Transaction {
            target_dir: target_dir.clone(),
            lock_file,
            rollback_file,
            disabled: disable_rollback,
            id,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Appends one rollback record. A no-op when rollback is disabled
    /// (`disable_rollback`) — the caller accepts a torn target on
    /// failure in exchange for not paying the logging cost.
    pub fn log(&self, action: &RollbackAction) -> Result<()> {
        if self.disabled {
            return Ok(());
        }
        let mut line = serde_json::to_string(action)?;
        line.push('\n');
        self.rollback_file.write_str(&line, WriteMode::TextAppend)
    }

    /// Replays the rollback log in reverse, undoing every recorded action.
    /// Individual replay failures are logged and skipped rather than
    /// propagated — a rollback failure must never shadow the write failure
    /// that triggered it.
    pub fn rollback(&self) -> Result<()> {
        if self.disabled || !self.rollback_file.exists() {
            return Ok(());
        }
        let text = self.rollback_file.read_str()?;
        let mut actions = Vec::new();
        for line in text.lines().filter(|l| !l.is_empty()) {
            match serde_json::from_str::<RollbackAction>(line) {
                Ok(a) => actions.push(a),
                Err(e) => tracing::warn!("skipping malformed rollback record: {e}"),
            }
        }
        for action in actions.into_iter().rev() {
            if let Err(e) = action.undo(&self.target_dir) {
                tracing::warn!("rollback step failed, continuing: {e}");
            }
        }
        Ok(())
    }

    /// Releases the lock and discards the rollback log. Called once a call
    /// has either succeeded outright, or failed and been rolled back.
    pub fn end(&self) -> Result<()> {
        if self.rollback_file.exists() {
            self.rollback_file.delete(false)?;
        }
        if self.lock_file.exists() {
            self.lock_file.delete(false)?;
        }
        Ok(())
    }
}

fn sibling(target_dir: &FileRef, suffix: &str) -> Result<FileRef> {
    let parent = target_dir.parent()?;
    let name = target_dir
        .local_path()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    parent.join(&format!("{name}{suffix}"))
}
