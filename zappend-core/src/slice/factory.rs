//! Top-level slice opening: resolves a [`SliceItem`] to a [`Dataset`],
//! applying the `persist_mem_slices` policy to directly-supplied
//! in-memory datasets before anything downstream reads them.

use crate::config::Config;
use crate::context::ProcessingContext;
use crate::dataset::Dataset;
use crate::error::Result;
use crate::slice::{memory, persistent, resolve_slice_item, SliceItem, TemporarySlice};

/// Opens `item` into a [`Dataset`]. When the item is an in-memory dataset
/// and `persist_mem_slices` is enabled, it is first flushed to scratch
/// storage and reopened from there; the returned [`TemporarySlice`] guard
/// must be kept alive for as long as the dataset is in use; returns `None`
/// when no scratch directory was needed.
pub fn open_slice_dataset(
    item: SliceItem,
    ctx: &ProcessingContext<'_>,
    config: &Config,
) -> Result<(Dataset, Option<TemporarySlice>)> {
    if let SliceItem::Dataset(ds) = &item {
        if memory::should_persist(config) {
            let tmp = TemporarySlice::create(ds, config.temp_dir.as_deref())?;
            let reopened = persistent::open(&tmp.file_ref(), config.slice_polling)?;
            return Ok((reopened, Some(tmp)));
        }
    }
    let ds = resolve_slice_item(item, ctx, config)?;
    Ok((ds, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{DataArray, Variable};

    fn sample() -> Dataset {
        let mut ds = Dataset::new();
        ds.dim_sizes.insert("time".into(), 1);
        ds.coords.insert(
            "time".into(),
            Variable::new(vec!["time".into()], DataArray::I64(vec![1], vec![1])),
        );
        ds
    }

    #[test]
    fn in_memory_slice_passes_through_without_persisting() {
        let config = Config {
            target_dir: "/tmp/t.zarr".into(),
            ..Default::default()
        };
        let ctx = ProcessingContext::new(&config, 0);
        let (ds, tmp) = open_slice_dataset(SliceItem::Dataset(sample()), &ctx, &config).unwrap();
        assert_eq!(ds.dim_sizes["time"], 1);
        assert!(tmp.is_none());
    }

    #[test]
    fn persist_mem_slices_materialises_to_disk() {
        let mut config = Config {
            target_dir: "/tmp/t.zarr".into(),
            ..Default::default()
        };
        config.persist_mem_slices = true;
        let ctx = ProcessingContext::new(&config, 0);
        let (ds, tmp) = open_slice_dataset(SliceItem::Dataset(sample()), &ctx, &config).unwrap();
        assert_eq!(ds.dim_sizes["time"], 1);
        assert!(tmp.is_some());
    }
}
