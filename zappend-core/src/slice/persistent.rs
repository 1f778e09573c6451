//! Opens a slice that already lives on storage (a Zarr-like directory) —
//! `SliceItem::Uri`/`SliceItem::FileRef`.

use crate::config::SlicePolling;
use crate::dataset::Dataset;
use crate::error::{Result, ZappendError};
use crate::fsutil::fileref::FileRef;
use crate::store::{zarr, FsChunkStore};
use std::thread;
use std::time::{Duration, Instant};

/// Opens the dataset at `file_ref`. When `polling` is enabled and the path
/// does not exist yet, retries every `interval_secs` until either it
/// appears or `timeout_secs` elapses, to tolerate a slice producer that is
/// still writing when `process_slices` is invoked (the `slice_polling` option).
pub fn open(file_ref: &FileRef, polling: SlicePolling) -> Result<Dataset> {
    wait_until_exists(file_ref, polling)?;
    let store = FsChunkStore::new(file_ref.local_path());
    zarr::read_dataset(&store)
}

fn wait_until_exists(file_ref: &FileRef, polling: SlicePolling) -> Result<()> {
    if file_ref.exists() {
        return Ok(());
    }
    let SlicePolling::Enabled { interval_secs, timeout_secs } = polling else {
        return Err(not_found(file_ref));
    };
    let deadline = Instant::now() + Duration::from_secs(timeout_secs);
    loop {
        thread::sleep(Duration::from_secs(interval_secs.max(1)));
        if file_ref.exists() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(not_found(file_ref));
        }
    }
}

fn not_found(file_ref: &FileRef) -> ZappendError {
    ZappendError::not_found(format!("slice source {:?} does not exist", file_ref.uri()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{DataArray, Variable};
    use crate::error::ZappendError;

    #[test]
    fn open_missing_path_fails_without_polling() {
        let dir = tempfile::tempdir().unwrap();
        let fr = FileRef::from_path(dir.path().join("nope"));
        let err = open(&fr, SlicePolling::Disabled).unwrap_err();
        assert!(matches!(err, ZappendError::NotFound(_)));
    }

    #[test]
    fn open_roundtrips_written_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FsChunkStore::new(dir.path());
        let mut ds = Dataset::new();
        ds.dim_sizes.insert("time".into(), 2);
        ds.coords.insert(
            "time".into(),
            Variable::new(vec!["time".into()], DataArray::I64(vec![1, 2], vec![2])),
        );
        zarr::write_dataset(&mut store, &ds).unwrap();

        let fr = FileRef::from_path(dir.path());
        let back = open(&fr, SlicePolling::Disabled).unwrap();
        assert_eq!(back.dim_sizes["time"], 2);
    }

    #[test]
    fn polling_gives_up_after_the_timeout_when_the_path_never_appears() {
        let dir = tempfile::tempdir().unwrap();
        let fr = FileRef::from_path(dir.path().join("nope"));
        let polling = SlicePolling::Enabled {
            interval_secs: 1,
            timeout_secs: 1,
        };
        let err = open(&fr, polling).unwrap_err();
        assert!(matches!(err, ZappendError::NotFound(_)));
    }
}
