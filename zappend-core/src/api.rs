//! The library's top-level entry point: build a [`Processor`] from a
//! [`Config`] and run it over a batch of slices in one call.

use crate::config::Config;
use crate::error::Result;
use crate::processor::Processor;
use crate::slice::SliceItem;

/// Appends `slices` to the target described by `config`, in order, inside
/// one rollback-protected run.
///
/// Equivalent to `Processor::new(config)?.process_slices(slices)`; most
/// callers that only need a single batch can use this instead of
/// constructing a `Processor` themselves.
pub fn process_slices(config: Config, slices: Vec<SliceItem>) -> Result<()> {
    Processor::new(config)?.process_slices(slices)
}
