//! The trivial slice source: a [`Dataset`] already sitting in memory.
//! Resolution is just taking ownership of it (see
//! [`crate::slice::resolve_slice_item`]); this module exists to hold the one
//! piece of behaviour specific to in-memory slices — deciding whether one
//! should be flushed to a [`TemporarySlice`] before use.

use crate::config::Config;

/// `persist_mem_slices`: whether an in-memory slice should be written
/// to scratch storage and reopened before the engine touches it, instead of
/// being used in place. A memory-pressure escape hatch for slices built by
/// a user callable that are too large to hold onto twice over (once as
/// returned, once while the processor reads it back for chunk writes).
pub fn should_persist(config: &Config) -> bool {
    config.persist_mem_slices
}
