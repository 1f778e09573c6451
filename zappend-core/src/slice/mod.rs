//! Slice source abstraction: a slice is one of a closed set of
//! resource kinds — an already-open in-memory dataset, a URI, a file
//! reference, or a user-supplied callable that produces one of the other
//! three (possibly after doing its own I/O). [`SliceItem`] is a closed,
//! statically typed enum rather than runtime reflection over callback
//! signatures: a [`SliceCallable`] declares up front, via
//! [`SliceCallable::wants_ctx`], whether it wants the [`ProcessingContext`]
//! passed to it, instead of being inspected for its call signature.

pub mod callable;
pub mod factory;
pub mod memory;
pub mod persistent;
pub mod temporary;

pub use callable::{FnSliceCallable, SliceCallable};
pub use factory::open_slice_dataset;
pub use temporary::TemporarySlice;

use crate::config::Config;
use crate::context::ProcessingContext;
use crate::dataset::Dataset;
use crate::error::{Result, ZappendError};
use crate::fsutil::fileref::FileRef;

/// Anything a [`SliceItem::Source`] can hold: engine-facing, resolved by
/// calling [`open`](SliceSource::open) with the current context. Every
/// [`SliceCallable`] is automatically a `SliceSource` (see the blanket impl
/// below) — the split exists so a callable only has to implement the
/// simpler, non-recursive `call`/`wants_ctx` pair.
pub trait SliceSource: Send + Sync {
    fn open(&self, ctx: &ProcessingContext<'_>) -> Result<SliceItem>;
}

impl<T: SliceCallable> SliceSource for T {
    fn open(&self, ctx: &ProcessingContext<'_>) -> Result<SliceItem> {
        if self.wants_ctx() {
            self.call(Some(ctx))
        } else {
            self.call(None)
        }
    }
}

/// One slice, in whichever form it arrived.
pub enum SliceItem {
    Uri(String),
    FileRef(FileRef),
    Dataset(Dataset),
    Source(Box<dyn SliceSource>),
}

const MAX_RESOLUTION_DEPTH: usize = 8;

/// Resolves a [`SliceItem`] down to a [`Dataset`], recursing through
/// `Source` items (a callable may itself return another callable) up to
/// [`MAX_RESOLUTION_DEPTH`] times before giving up — guards against a
/// misbehaving callable that resolves to itself forever.
pub fn resolve_slice_item(item: SliceItem, ctx: &ProcessingContext<'_>, config: &Config) -> Result<Dataset> {
    resolve_depth(item, ctx, config, 0)
}

fn resolve_depth(item: SliceItem, ctx: &ProcessingContext<'_>, config: &Config, depth: usize) -> Result<Dataset> {
    if depth >= MAX_RESOLUTION_DEPTH {
        return Err(ZappendError::configuration(
            "slice source resolution exceeded the maximum depth (8); a callable is probably resolving to itself",
        ));
    }
    match item {
        SliceItem::Dataset(ds) => Ok(ds),
        SliceItem::FileRef(file_ref) => persistent::open(&file_ref, config.slice_polling),
        SliceItem::Uri(uri) => {
            let file_ref = FileRef::new(uri, config.slice_storage_options.clone());
            persistent::open(&file_ref, config.slice_polling)
        }
        SliceItem::Source(source) => {
            let next = source.open(ctx)?;
            resolve_depth(next, ctx, config, depth + 1)
        }
    }
}
