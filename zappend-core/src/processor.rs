//! Processor: orchestrates one `process_slices` call end to end —
//! acquiring the target lock, reconciling the outline, and for each slice in
//! turn either creating the target fresh or appending to it, all under a
//! rollback-log-backed transaction.

use crate::append::verify_append_labels;
use crate::attrs::resolve_attrs;
use crate::config::Config;
use crate::context::ProcessingContext;
use crate::contrib::levels;
use crate::dataset::Dataset;
use crate::error::{Result, ZappendError};
use crate::fsutil::chunkutil::get_chunk_update_range;
use crate::fsutil::fileref::FileRef;
use crate::fsutil::rollbackstore::RollbackStore;
use crate::fsutil::transaction::Transaction;
use crate::metadata::DatasetMetadata;
use crate::slice::{open_slice_dataset, SliceItem};
use crate::store::{zarr, ChunkStore, FsChunkStore};
use crate::tailoring::{tailor_slice_dataset, tailor_target_attrs, tailor_target_dataset};
use tracing::{info, warn};

pub struct Processor {
    config: Config,
}

impl Processor {
    pub fn new(config: Config) -> Result<Processor> {
        config.validate()?;
        Ok(Processor { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs the full pipeline for one invocation: acquires the lock, opens
    /// (or creates) the target, folds every slice into it in order, and
    /// releases the lock. On failure, rolls back whatever was written before
    /// propagating the original error.
    pub fn process_slices(&self, slices: Vec<SliceItem>) -> Result<()> {
        if self.config.dry_run {
            return self.dry_run(slices);
        }

        let target_file_ref = FileRef::new(
            self.config.target_dir.clone(),
            self.config.target_storage_options.clone(),
        );

        if self.config.force_new {
            if target_file_ref.exists() {
                target_file_ref.delete(true)?;
            }
            let lock_file = Transaction::lock_file_ref(&target_file_ref)?;
            if lock_file.exists() {
                lock_file.delete(false)?;
            }
        }

        let txn = Transaction::begin(&target_file_ref, self.config.disable_rollback)?;
        let result = self.run(&target_file_ref, slices, &txn);
        if let Err(e) = &result {
            warn!("process_slices failed ({e}), rolling back");
            if let Err(rollback_err) = txn.rollback() {
                warn!("rollback itself failed, target may be left in a partial state: {rollback_err}");
            }
        }
        txn.end()?;
        result?;

        if let Some(num_levels) = self.config.levels.filter(|n| *n > 0) {
            self.write_levels(&target_file_ref, num_levels);
        }
        Ok(())
    }

    /// Best-effort post-commit pyramid-level write: runs after the
    /// transaction above has already committed, so failures here are logged
    /// and otherwise ignored rather than propagated or rolled back.
    fn write_levels(&self, target_file_ref: &FileRef, num_levels: u32) {
        let store = FsChunkStore::new(target_file_ref.local_path());
        match zarr::read_dataset(&store) {
            Ok(ds) => levels::write_levels(
                &self.config.target_dir,
                &self.config.target_storage_options,
                &ds,
                &self.config.append_dim,
                num_levels,
            ),
            Err(e) => warn!("skipping pyramid levels: failed to reopen target: {e}"),
        }
    }

    fn run(&self, target_file_ref: &FileRef, slices: Vec<SliceItem>, txn: &Transaction) -> Result<()> {
        let mut store = FsChunkStore::new(target_file_ref.local_path());
        let mut target_md = self.open_existing_outline(&store)?;

        for (index, item) in slices.into_iter().enumerate() {
            let ctx = match &target_md {
                Some(md) => ProcessingContext::new(&self.config, index).with_target_metadata(md),
                None => ProcessingContext::new(&self.config, index),
            };
            let (slice_ds, _scratch) = open_slice_dataset(item, &ctx, &self.config)?;

            target_md = Some(match target_md {
                None => {
                    info!(slice = index, "creating target");
                    self.create_target(&mut store, slice_ds, txn)?
                }
                Some(md) => {
                    info!(slice = index, "appending to target");
                    self.append_slice(&mut store, md, slice_ds, txn)?
                }
            });
        }
        Ok(())
    }

    fn open_existing_outline(&self, store: &FsChunkStore) -> Result<Option<DatasetMetadata>> {
        if !store.exists(".zgroup") {
            return Ok(None);
        }
        let ds = zarr::read_dataset(store)?;
        Ok(Some(DatasetMetadata::from_dataset(&ds, &self.config)?))
    }

    fn create_target(&self, store: &mut FsChunkStore, slice_ds: Dataset, txn: &Transaction) -> Result<DatasetMetadata> {
        let mut ds = slice_ds;
        ds.attrs = tailor_target_attrs(None, &ds.attrs, &self.config);
        ds.attrs = resolve_attrs(&ds.attrs, &ds)?;

        let md = DatasetMetadata::from_dataset(&ds, &self.config)?;
        let ds = tailor_target_dataset(ds, &md, &self.config)?;

        let mut rb = RollbackStore::new(store, txn);
        rb.begin_fresh_target("")?;
        zarr::write_dataset(&mut rb, &ds)?;
        Ok(md)
    }

    fn append_slice(
        &self,
        store: &mut FsChunkStore,
        mut target_md: DatasetMetadata,
        slice_ds: Dataset,
        txn: &Transaction,
    ) -> Result<DatasetMetadata> {
        let append_dim = self.config.append_dim.clone();
        let slice_ds = tailor_slice_dataset(slice_ds, &target_md, &self.config)?;
        let slice_md = DatasetMetadata::from_dataset(&slice_ds, &self.config)?;
        target_md.assert_compatible_slice(&slice_md, &append_dim)?;

        let old_size = *target_md.sizes.get(&append_dim).ok_or_else(|| {
            ZappendError::metadata(format!("target has no append dim {append_dim:?}"))
        })? as u64;
        let append_size = *slice_md.sizes.get(&append_dim).unwrap_or(&0) as u64;

        if let Some(new_labels) = slice_ds.append_coord_values(&append_dim) {
            let previous_last = self.read_existing_append_coord_last(store, &append_dim)?;
            verify_append_labels(previous_last, &new_labels, self.config.append_step.as_ref())?;
        }

        target_md.attrs = tailor_target_attrs(Some(&target_md.attrs), &slice_ds.attrs, &self.config);
        target_md.attrs = resolve_attrs(&target_md.attrs, &slice_ds)?;

        let mut rb = RollbackStore::new(store, txn);
        for (name, vm) in target_md.variables.clone() {
            let Some(axis) = vm.dims.iter().position(|d| *d == append_dim) else {
                continue;
            };
            let Some(var) = slice_ds.variable(&name) else {
                continue;
            };
            let Some(new_data) = &var.data else {
                continue;
            };

            let mut meta = zarr::read_array_meta(&rb, &name)?;
            let chunk_size = meta.chunks[axis];
            let (_first_is_update, range) = get_chunk_update_range(old_size, chunk_size, append_size);

            let existing = zarr::read_full_array(&rb, &name, &meta)?;
            let combined = existing.concat(new_data, axis).ok_or_else(|| {
                ZappendError::metadata(format!(
                    "variable {name:?}: slice data is incompatible with the existing target array"
                ))
            })?;
            meta.shape[axis] = old_size + append_size;
            zarr::write_chunk_range(&mut rb, &name, &meta, axis, range, &combined)?;
            zarr::write_array_meta(&mut rb, &name, &meta)?;
        }

        target_md.sizes.insert(append_dim, (old_size + append_size) as usize);
        rb.set(".zattrs", &serde_json::to_vec_pretty(&target_md.attrs)?)?;

        Ok(target_md)
    }

    fn read_existing_append_coord_last(&self, store: &FsChunkStore, append_dim: &str) -> Result<Option<i64>> {
        if !store.exists(&format!("{append_dim}/.zarray")) {
            return Ok(None);
        }
        let meta = zarr::read_array_meta(store, append_dim)?;
        let data = zarr::read_full_array(store, append_dim, &meta)?;
        Ok(data.as_i64_vec().last().copied())
    }

    /// Validates every slice against the (possibly already-existing) target
    /// outline without writing anything (the `dry_run` option).
    fn dry_run(&self, slices: Vec<SliceItem>) -> Result<()> {
        info!(count = slices.len(), "dry run: validating slices without writing");
        let target_file_ref = FileRef::new(
            self.config.target_dir.clone(),
            self.config.target_storage_options.clone(),
        );
        let store = FsChunkStore::new(target_file_ref.local_path());
        let mut target_md = if self.config.force_new {
            None
        } else {
            self.open_existing_outline(&store)?
        };

        for (index, item) in slices.into_iter().enumerate() {
            let ctx = match &target_md {
                Some(md) => ProcessingContext::new(&self.config, index).with_target_metadata(md),
                None => ProcessingContext::new(&self.config, index),
            };
            let (slice_ds, _scratch) = open_slice_dataset(item, &ctx, &self.config)?;
            target_md = Some(match target_md {
                None => DatasetMetadata::from_dataset(&slice_ds, &self.config)?,
                Some(md) => {
                    let tailored = tailor_slice_dataset(slice_ds, &md, &self.config)?;
                    let slice_md = DatasetMetadata::from_dataset(&tailored, &self.config)?;
                    md.assert_compatible_slice(&slice_md, &self.config.append_dim)?;
                    md
                }
            });
        }
        Ok(())
    }
}
