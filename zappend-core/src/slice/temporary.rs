//! A slice materialised to scratch storage (the `persist_mem_slices`
//! option). Owns the temp directory for as long as the slice is in use; the
//! directory (and everything written under it) is removed when this value
//! is dropped.

use crate::dataset::Dataset;
use crate::error::Result;
use crate::fsutil::fileref::FileRef;
use crate::store::{zarr, FsChunkStore};

pub struct TemporarySlice {
    dir: tempfile::TempDir,
}

impl TemporarySlice {
    pub fn create(dataset: &Dataset, temp_dir: Option<&str>) -> Result<Self> {
        let dir = match temp_dir {
            Some(base) => tempfile::Builder::new().prefix("zappend-slice-").tempdir_in(base)?,
            None => tempfile::Builder::new().prefix("zappend-slice-").tempdir()?,
        };
        let mut store = FsChunkStore::new(dir.path());
        zarr::write_dataset(&mut store, dataset)?;
        Ok(Self { dir })
    }

    pub fn file_ref(&self) -> FileRef {
        FileRef::from_path(self.dir.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{DataArray, Variable};
    use crate::slice::persistent;

    #[test]
    fn materialised_slice_can_be_reopened() {
        let mut ds = Dataset::new();
        ds.dim_sizes.insert("time".into(), 1);
        ds.coords.insert(
            "time".into(),
            Variable::new(vec!["time".into()], DataArray::I64(vec![42], vec![1])),
        );
        let tmp = TemporarySlice::create(&ds, None).unwrap();
        let back = persistent::open(&tmp.file_ref(), crate::config::SlicePolling::Disabled).unwrap();
        assert_eq!(back.dim_sizes["time"], 1);
    }
}
