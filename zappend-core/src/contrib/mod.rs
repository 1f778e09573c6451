//! Optional, ambient supplements that live outside the core transactional
//! path. Nothing here participates in rollback: a contrib hook runs
//! only after the guarding [`crate::fsutil::transaction::Transaction`] has
//! already committed, and its own failures are logged rather than undone.

pub mod levels;
