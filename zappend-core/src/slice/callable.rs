//! User-supplied slice callables.

use crate::context::ProcessingContext;
use crate::error::Result;
use crate::slice::SliceItem;

/// A user-supplied function that produces a slice, optionally driven by the
/// current [`ProcessingContext`]. `wants_ctx` lets the implementor state
/// once, statically, whether it wants the context, rather than the engine
/// inspecting its parameter list at call time.
pub trait SliceCallable: Send + Sync {
    fn call(&self, ctx: Option<&ProcessingContext<'_>>) -> Result<SliceItem>;
    fn wants_ctx(&self) -> bool;
}

/// Adapts a plain closure into a [`SliceCallable`].
pub struct FnSliceCallable<F> {
    func: F,
    wants_ctx: bool,
}

impl<F> FnSliceCallable<F>
where
    F: Fn(Option<&ProcessingContext<'_>>) -> Result<SliceItem> + Send + Sync,
{
    pub fn new(func: F, wants_ctx: bool) -> Self {
        Self { func, wants_ctx }
    }
}

impl<F> SliceCallable for FnSliceCallable<F>
where
    F: Fn(Option<&ProcessingContext<'_>>) -> Result<SliceItem> + Send + Sync,
{
    fn call(&self, ctx: Option<&ProcessingContext<'_>>) -> Result<SliceItem> {
        (self.func)(ctx)
    }

    fn wants_ctx(&self) -> bool {
        self.wants_ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{DataArray, Dataset, Variable};

    fn sample() -> Dataset {
        let mut ds = Dataset::new();
        ds.dim_sizes.insert("time".into(), 1);
        ds.coords
            .insert("time".into(), Variable::new(vec!["time".into()], DataArray::I64(vec![1], vec![1])));
        ds
    }

    #[test]
    fn callable_without_ctx_is_invoked_with_none() {
        let callable = FnSliceCallable::new(
            |ctx| {
                assert!(ctx.is_none());
                Ok(SliceItem::Dataset(sample()))
            },
            false,
        );
        assert!(!callable.wants_ctx());
        assert!(callable.call(None).is_ok());
    }
}
