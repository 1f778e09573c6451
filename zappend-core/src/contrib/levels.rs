//! Multi-resolution pyramid levels: an optional, best-effort
//! post-commit hook that writes `{target}.levels/{n}/`, each holding a 2×
//! block-averaged copy of the target along every non-append dimension.
//!
//! This runs after the owning [`crate::fsutil::transaction::Transaction`]
//! has already committed and is not itself transactional: a failure here is
//! logged and otherwise ignored, never rolled back, and never fails the
//! surrounding `process_slices` call.

use crate::dataset::{Attrs, DataArray, Dataset, Variable};
use crate::error::Result;
use crate::fsutil::fileref::FileRef;
use crate::fsutil::StorageOptions;
use crate::store::{zarr, FsChunkStore};
use tracing::warn;

/// Writes `num_levels` coarsened copies of `dataset` under
/// `{target_dir}.levels/1/`, `{target_dir}.levels/2/`, … Each level is
/// block-averaged by a further factor of 2 from the previous one (or from
/// `dataset` itself for level 1). Errors writing any one level are logged
/// and the remaining levels are still attempted.
pub fn write_levels(
    target_dir: &str,
    target_storage_options: &StorageOptions,
    dataset: &Dataset,
    append_dim: &str,
    num_levels: u32,
) {
    let mut current = dataset.clone();
    for level in 1..=num_levels {
        let coarsened = coarsen_dataset(&current, append_dim);
        if let Err(e) = write_level(target_dir, target_storage_options, level, &coarsened) {
            warn!(level, "failed to write pyramid level: {e}");
        }
        current = coarsened;
    }
}

fn write_level(
    target_dir: &str,
    target_storage_options: &StorageOptions,
    level: u32,
    dataset: &Dataset,
) -> Result<()> {
    let level_root = format!("{target_dir}.levels/{level}");
    let file_ref = FileRef::new(level_root, target_storage_options.clone());
    if !file_ref.exists() {
        file_ref.mkdir()?;
    }
    let mut store = FsChunkStore::new(file_ref.local_path());
    zarr::write_dataset(&mut store, dataset)
}

fn coarsen_dataset(ds: &Dataset, append_dim: &str) -> Dataset {
    let mut out = Dataset::new();
    out.attrs = ds.attrs.clone();
    for (name, var) in &ds.coords {
        let coarsened = coarsen_variable(var, append_dim);
        out.dim_sizes.insert(name.clone(), dim_size(&coarsened, name));
        out.coords.insert(name.clone(), coarsened);
    }
    for (name, size) in &ds.dim_sizes {
        if !out.dim_sizes.contains_key(name) {
            out.dim_sizes.insert(name.clone(), halved(*size));
        }
    }
    for (name, var) in &ds.data_vars {
        out.data_vars.insert(name.clone(), coarsen_variable(var, append_dim));
    }
    out
}

fn dim_size(var: &Variable, dim: &str) -> usize {
    var.dims
        .iter()
        .position(|d| d == dim)
        .and_then(|i| var.shape().get(i).copied())
        .unwrap_or(0)
}

fn halved(n: usize) -> usize {
    (n / 2).max(1)
}

fn coarsen_variable(var: &Variable, append_dim: &str) -> Variable {
    let Some(data) = &var.data else {
        return Variable {
            dims: var.dims.clone(),
            data: None,
            encoding: var.encoding.clone(),
            attrs: var.attrs.clone(),
        };
    };
    let shape = data.shape().to_vec();
    let axes: Vec<usize> = var
        .dims
        .iter()
        .enumerate()
        .filter(|(_, d)| d.as_str() != append_dim)
        .map(|(i, _)| i)
        .collect();
    let (values, out_shape) = block_average(&data.as_f64_vec(), &shape, &axes);
    Variable {
        dims: var.dims.clone(),
        data: Some(DataArray::F64(values, out_shape)),
        encoding: var.encoding.clone(),
        attrs: strip_fill_value(&var.attrs),
    }
}

/// `_FillValue` is dropped on coarsened copies: the averaged dtype is always
/// `f64` regardless of the source encoding, so a source fill encoded for a
/// narrower dtype would no longer be meaningful.
fn strip_fill_value(attrs: &Attrs) -> Attrs {
    let mut out = attrs.clone();
    out.remove("_FillValue");
    out
}

/// Averages `values` (row-major, shape `shape`) in 2-wide blocks along every
/// axis in `axes`, dropping a trailing odd element along any halved axis.
fn block_average(values: &[f64], shape: &[usize], axes: &[usize]) -> (Vec<f64>, Vec<usize>) {
    if shape.is_empty() || axes.is_empty() {
        return (values.to_vec(), shape.to_vec());
    }
    let out_shape: Vec<usize> = shape
        .iter()
        .enumerate()
        .map(|(i, &s)| if axes.contains(&i) { halved(s) } else { s })
        .collect();
    let strides = strides_for(shape);
    let out_strides = strides_for(&out_shape);
    let out_len: usize = out_shape.iter().product();
    let mut sums = vec![0.0f64; out_len];
    let mut counts = vec![0u32; out_len];

    for (flat, &value) in values.iter().enumerate() {
        let mut rem = flat;
        let mut out_flat = 0usize;
        let mut in_bounds = true;
        for d in 0..shape.len() {
            let idx = rem / strides[d];
            rem %= strides[d];
            let out_idx = if axes.contains(&d) {
                if idx >= out_shape[d] * 2 {
                    in_bounds = false;
                    break;
                }
                idx / 2
            } else {
                idx
            };
            out_flat += out_idx * out_strides[d];
        }
        if in_bounds {
            sums[out_flat] += value;
            counts[out_flat] += 1;
        }
    }

    for i in 0..out_len {
        if counts[i] > 0 {
            sums[i] /= counts[i] as f64;
        }
    }
    (sums, out_shape)
}

fn strides_for(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_average_halves_a_2d_array() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let (out, shape) = block_average(&values, &[2, 4], &[0, 1]);
        assert_eq!(shape, vec![1, 2]);
        assert_eq!(out, vec![(1.0 + 2.0 + 5.0 + 6.0) / 4.0, (3.0 + 4.0 + 7.0 + 8.0) / 4.0]);
    }

    #[test]
    fn append_axis_is_left_untouched() {
        // shape (time=3, lat=4): only lat (axis 1) is in `axes`.
        let values = (0..12).map(|n| n as f64).collect::<Vec<_>>();
        let (out, shape) = block_average(&values, &[3, 4], &[1]);
        assert_eq!(shape, vec![3, 2]);
        assert_eq!(out.len(), 6);
    }

    #[test]
    fn coarsening_a_dataset_halves_non_append_dims() {
        let mut ds = Dataset::new();
        ds.dim_sizes.insert("time".into(), 2);
        ds.dim_sizes.insert("lat".into(), 4);
        ds.coords.insert(
            "time".into(),
            Variable::new(vec!["time".into()], DataArray::I64(vec![0, 1], vec![2])),
        );
        ds.data_vars.insert(
            "chl".into(),
            Variable::new(
                vec!["time".into(), "lat".into()],
                DataArray::F64((0..8).map(|n| n as f64).collect(), vec![2, 4]),
            ),
        );
        let coarsened = coarsen_dataset(&ds, "time");
        assert_eq!(coarsened.dim_sizes["time"], 2);
        assert_eq!(coarsened.dim_sizes["lat"], 2);
        let chl = coarsened.data_vars.get("chl").unwrap();
        assert_eq!(chl.shape(), vec![2, 2]);
    }
}
