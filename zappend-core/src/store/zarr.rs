//! The mini Zarr encoding: `.zgroup` / `.zattrs` / `.zarray` JSON plus chunk
//! files, laid out the way a real Zarr v2 store is, written and read
//! through a [`ChunkStore`]. This crate implements only the subset of the
//! format the rest of the system actually needs — it is not a general Zarr
//! reader/writer.

use crate::codec::{decode_chunk, encode_chunk, CodecDescriptor};
use crate::dataset::{DataArray, Dataset, Variable};
use crate::error::{Result, ZappendError};
use crate::metadata::variable::{ChunkLen, DType, FillValue, VariableEncoding};
use crate::store::ChunkStore;
use indexmap::IndexMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

const DIM_SEP: char = '.';
const ARRAY_DIMENSIONS_KEY: &str = "_ARRAY_DIMENSIONS";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArrayMeta {
    pub zarr_format: u32,
    pub shape: Vec<u64>,
    pub chunks: Vec<u64>,
    pub dtype: String,
    pub fill_value: Value,
    pub order: String,
    pub compressor: Option<CodecDescriptor>,
    pub filters: Option<Vec<CodecDescriptor>>,
}

impl ArrayMeta {
    fn dtype(&self) -> Result<DType> {
        match self.dtype.as_str() {
            "<i2" => Ok(DType::I16),
            "<u2" => Ok(DType::U16),
            "<i4" => Ok(DType::I32),
            "<u4" => Ok(DType::U32),
            "<i8" => Ok(DType::I64),
            "<f4" => Ok(DType::F32),
            "<f8" => Ok(DType::F64),
            other => Err(ZappendError::metadata(format!("unsupported zarr dtype {other:?}"))),
        }
    }

    fn fill_f64(&self) -> f64 {
        match &self.fill_value {
            Value::Number(n) => n.as_f64().unwrap_or(0.0),
            Value::String(s) if s.eq_ignore_ascii_case("nan") => f64::NAN,
            _ => 0.0,
        }
    }
}

fn chunk_key(var: &str, idx: &[u64]) -> String {
    let parts: Vec<String> = idx.iter().map(|i| i.to_string()).collect();
    format!("{var}/{}", parts.join(&DIM_SEP.to_string()))
}

fn array_meta_key(var: &str) -> String {
    format!("{var}/.zarray")
}

fn attrs_key(var: &str) -> String {
    format!("{var}/.zattrs")
}

/// Derives the on-disk [`ArrayMeta`] for a variable from its metadata.
pub fn array_meta_for(var: &Variable, shape: &[u64]) -> ArrayMeta {
    let dtype = var
        .encoding
        .dtype
        .flatten()
        .unwrap_or_else(|| var.data.as_ref().map(|d| d.dtype()).unwrap_or(DType::F64));
    let chunks = var
        .encoding
        .resolved_chunks(&shape.iter().map(|&s| s as usize).collect::<Vec<_>>())
        .unwrap_or_else(|| shape.to_vec());
    let fill_value = match var.encoding.fill_value.flatten() {
        Some(FillValue::NaN) => json!("NaN"),
        Some(FillValue::Number(n)) => json!(n),
        None => Value::Null,
    };
    ArrayMeta {
        zarr_format: 2,
        shape: shape.to_vec(),
        chunks,
        dtype: dtype.zarr_descr().to_string(),
        fill_value,
        order: "C".to_string(),
        compressor: var.encoding.compressor.clone().flatten(),
        filters: var.encoding.filters.clone().flatten(),
    }
}

fn strides_for(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

fn get_f64(data: &DataArray, flat: usize) -> f64 {
    match data {
        DataArray::I16(v, _) => v[flat] as f64,
        DataArray::U16(v, _) => v[flat] as f64,
        DataArray::I32(v, _) => v[flat] as f64,
        DataArray::U32(v, _) => v[flat] as f64,
        DataArray::I64(v, _) => v[flat] as f64,
        DataArray::F32(v, _) => v[flat] as f64,
        DataArray::F64(v, _) => v[flat],
    }
}

fn push_le(dtype: DType, value: f64, out: &mut Vec<u8>) {
    match dtype {
        DType::I16 => out.extend_from_slice(&(value as i16).to_le_bytes()),
        DType::U16 => out.extend_from_slice(&(value as u16).to_le_bytes()),
        DType::I32 => out.extend_from_slice(&(value as i32).to_le_bytes()),
        DType::U32 => out.extend_from_slice(&(value as u32).to_le_bytes()),
        DType::I64 => out.extend_from_slice(&(value as i64).to_le_bytes()),
        DType::F32 => out.extend_from_slice(&(value as f32).to_le_bytes()),
        DType::F64 => out.extend_from_slice(&value.to_le_bytes()),
    }
}

fn read_le(dtype: DType, bytes: &[u8]) -> f64 {
    match dtype {
        DType::I16 => i16::from_le_bytes(bytes.try_into().unwrap()) as f64,
        DType::U16 => u16::from_le_bytes(bytes.try_into().unwrap()) as f64,
        DType::I32 => i32::from_le_bytes(bytes.try_into().unwrap()) as f64,
        DType::U32 => u32::from_le_bytes(bytes.try_into().unwrap()) as f64,
        DType::I64 => i64::from_le_bytes(bytes.try_into().unwrap()) as f64,
        DType::F32 => f32::from_le_bytes(bytes.try_into().unwrap()) as f64,
        DType::F64 => f64::from_le_bytes(bytes.try_into().unwrap()),
    }
}

fn build_from_f64(dtype: DType, values: Vec<f64>, shape: Vec<usize>) -> DataArray {
    match dtype {
        DType::I16 => DataArray::I16(values.iter().map(|&v| v as i16).collect(), shape),
        DType::U16 => DataArray::U16(values.iter().map(|&v| v as u16).collect(), shape),
        DType::I32 => DataArray::I32(values.iter().map(|&v| v as i32).collect(), shape),
        DType::U32 => DataArray::U32(values.iter().map(|&v| v as u32).collect(), shape),
        DType::I64 => DataArray::I64(values.iter().map(|&v| v as i64).collect(), shape),
        DType::F32 => DataArray::F32(values.iter().map(|&v| v as f32).collect(), shape),
        DType::F64 => DataArray::F64(values, shape),
    }
}

/// Extracts the bytes for one full-size chunk of `data` (whose logical
/// extent is `region_shape`, with the append axis locally re-based at 0) at
/// local chunk index `local_idx`, padding out-of-bounds elements with
/// `fill`.
fn extract_chunk_bytes(
    data: &DataArray,
    region_shape: &[usize],
    chunk_shape: &[u64],
    local_idx: &[u64],
    dtype: DType,
    fill: f64,
) -> Vec<u8> {
    let strides = strides_for(region_shape);
    let chunk_shape_usize: Vec<usize> = chunk_shape.iter().map(|&c| c as usize).collect();
    let origin: Vec<usize> = local_idx
        .iter()
        .zip(chunk_shape.iter())
        .map(|(&i, &c)| (i * c) as usize)
        .collect();

    let total: usize = chunk_shape_usize.iter().product();
    let mut out = Vec::with_capacity(total * dtype.itemsize());
    let mut coord = vec![0usize; chunk_shape_usize.len()];
    for _ in 0..total {
        let mut in_bounds = true;
        let mut flat = 0usize;
        for d in 0..coord.len() {
            let global = origin[d] + coord[d];
            if global >= region_shape[d] {
                in_bounds = false;
                break;
            }
            flat += global * strides[d];
        }
        let value = if in_bounds { get_f64(data, flat) } else { fill };
        push_le(dtype, value, &mut out);

        // Odometer increment over `coord` within `chunk_shape_usize`.
        for d in (0..coord.len()).rev() {
            coord[d] += 1;
            if coord[d] < chunk_shape_usize[d] {
                break;
            }
            coord[d] = 0;
        }
    }
    out
}

/// Scatters a decoded chunk's bytes back into `out` (shape = `region_shape`)
/// at `local_idx`, clipping at the region boundary (the last chunk along any
/// axis may be only partially within the region).
fn scatter_chunk_bytes(
    out: &mut [f64],
    region_shape: &[usize],
    chunk_shape: &[u64],
    local_idx: &[u64],
    dtype: DType,
    bytes: &[u8],
) {
    let strides = strides_for(region_shape);
    let chunk_shape_usize: Vec<usize> = chunk_shape.iter().map(|&c| c as usize).collect();
    let origin: Vec<usize> = local_idx
        .iter()
        .zip(chunk_shape.iter())
        .map(|(&i, &c)| (i * c) as usize)
        .collect();
    let itemsize = dtype.itemsize();
    let total: usize = chunk_shape_usize.iter().product();
    let mut coord = vec![0usize; chunk_shape_usize.len()];
    for i in 0..total {
        let mut in_bounds = true;
        let mut flat = 0usize;
        for d in 0..coord.len() {
            let global = origin[d] + coord[d];
            if global >= region_shape[d] {
                in_bounds = false;
                break;
            }
            flat += global * strides[d];
        }
        if in_bounds {
            let off = i * itemsize;
            out[flat] = read_le(dtype, &bytes[off..off + itemsize]);
        }
        for d in (0..coord.len()).rev() {
            coord[d] += 1;
            if coord[d] < chunk_shape_usize[d] {
                break;
            }
            coord[d] = 0;
        }
    }
}

/// Writes every chunk of `data` (full array, shape = `meta.shape`) fresh.
/// Used when creating the target. Chunks are independent, so
/// extraction+encoding fans out across a rayon pool; only the sequential
/// `store.set` calls that follow touch shared state.
pub fn write_full_array(
    store: &mut dyn ChunkStore,
    var_name: &str,
    meta: &ArrayMeta,
    data: &DataArray,
) -> Result<()> {
    let dtype = meta.dtype()?;
    let fill = meta.fill_f64();
    let region_shape: Vec<usize> = meta.shape.iter().map(|&s| s as usize).collect();
    let n_chunks: Vec<u64> = meta
        .shape
        .iter()
        .zip(meta.chunks.iter())
        .map(|(&s, &c)| s.div_ceil(c))
        .collect();
    let encoded = encode_chunks_parallel(&cartesian(&n_chunks), data, &region_shape, meta, dtype, fill)?;
    for (idx, bytes) in encoded {
        store.set(&chunk_key(var_name, &idx), &bytes)?;
    }
    Ok(())
}

fn encode_chunks_parallel(
    indices: &[Vec<u64>],
    data: &DataArray,
    region_shape: &[usize],
    meta: &ArrayMeta,
    dtype: DType,
    fill: f64,
) -> Result<Vec<(Vec<u64>, Vec<u8>)>> {
    indices
        .par_iter()
        .map(|idx| {
            let raw = extract_chunk_bytes(data, region_shape, &meta.chunks, idx, dtype, fill);
            let encoded = encode_chunk(&raw, meta.filters.as_deref().unwrap_or(&[]), meta.compressor.as_ref())?;
            Ok((idx.clone(), encoded))
        })
        .collect()
}

fn cartesian(dims: &[u64]) -> Vec<Vec<u64>> {
    let mut out: Vec<Vec<u64>> = vec![Vec::new()];
    for &n in dims {
        let mut next = Vec::with_capacity(out.len() * n.max(1) as usize);
        for prefix in &out {
            for i in 0..n {
                let mut p = prefix.clone();
                p.push(i);
                next.push(p);
            }
        }
        out = next;
    }
    out
}

/// Writes the chunks covering `[range.0, range.1)` along `axis` from the
/// full, already-combined (post-append) array `full_data` — whose shape
/// must equal `meta.shape`. Only the touched tail chunk and the freshly
/// appended chunks are actually written to storage; the in-memory array
/// itself spans the whole variable, since building the full combined array
/// in memory is within this crate's scope (out-of-core compute is excluded,
/// not in-memory datasets of ordinary size).
pub fn write_chunk_range(
    store: &mut dyn ChunkStore,
    var_name: &str,
    meta: &ArrayMeta,
    axis: usize,
    range: (u64, u64),
    full_data: &DataArray,
) -> Result<()> {
    let dtype = meta.dtype()?;
    let fill = meta.fill_f64();
    let region_shape: Vec<usize> = meta.shape.iter().map(|&s| s as usize).collect();
    let n_chunks: Vec<u64> = meta
        .shape
        .iter()
        .zip(meta.chunks.iter())
        .map(|(&s, &c)| s.div_ceil(c))
        .collect();
    let idx_sets: Vec<Vec<u64>> = n_chunks
        .iter()
        .enumerate()
        .map(|(d, &n)| if d == axis { (range.0..range.1).collect() } else { (0..n).collect() })
        .collect();
    let touched = cartesian_ragged(&idx_sets);
    let encoded = encode_chunks_parallel(&touched, full_data, &region_shape, meta, dtype, fill)?;
    for (idx, bytes) in encoded {
        store.set(&chunk_key(var_name, &idx), &bytes)?;
    }
    Ok(())
}

fn cartesian_ragged(sets: &[Vec<u64>]) -> Vec<Vec<u64>> {
    let mut out: Vec<Vec<u64>> = vec![Vec::new()];
    for set in sets {
        let mut next = Vec::with_capacity(out.len() * set.len().max(1));
        for prefix in &out {
            for &v in set {
                let mut p = prefix.clone();
                p.push(v);
                next.push(p);
            }
        }
        out = next;
    }
    out
}

/// Reads back a full array from the store (used by the Zarr engine opening a
/// persisted slice directory, and by tests asserting on target contents).
pub fn read_full_array(store: &dyn ChunkStore, var_name: &str, meta: &ArrayMeta) -> Result<DataArray> {
    let dtype = meta.dtype()?;
    let shape: Vec<usize> = meta.shape.iter().map(|&s| s as usize).collect();
    let total: usize = shape.iter().product();
    let mut values = vec![meta.fill_f64(); total];
    let n_chunks: Vec<u64> = meta
        .shape
        .iter()
        .zip(meta.chunks.iter())
        .map(|(&s, &c)| s.div_ceil(c))
        .collect();
    for idx in cartesian(&n_chunks) {
        let key = chunk_key(var_name, &idx);
        if let Some(bytes) = store.get(&key)? {
            let raw = decode_chunk(&bytes, meta.filters.as_deref().unwrap_or(&[]), meta.compressor.as_ref())?;
            scatter_chunk_bytes(&mut values, &shape, &meta.chunks, &idx, dtype, &raw);
        }
    }
    Ok(build_from_f64(dtype, values, shape))
}

pub fn read_array_meta(store: &dyn ChunkStore, var_name: &str) -> Result<ArrayMeta> {
    let bytes = store
        .get(&array_meta_key(var_name))?
        .ok_or_else(|| ZappendError::not_found(format!("{var_name}/.zarray")))?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub fn write_array_meta(store: &mut dyn ChunkStore, var_name: &str, meta: &ArrayMeta) -> Result<()> {
    store.set(&array_meta_key(var_name), &serde_json::to_vec_pretty(meta)?)
}

fn read_var_attrs(store: &dyn ChunkStore, var_name: &str) -> Result<(Map<String, Value>, Vec<String>)> {
    let bytes = store.get(&attrs_key(var_name))?.unwrap_or_else(|| b"{}".to_vec());
    let mut obj: Map<String, Value> = serde_json::from_slice(&bytes)?;
    let dims = obj
        .remove(ARRAY_DIMENSIONS_KEY)
        .and_then(|v| v.as_array().cloned())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    Ok((obj, dims))
}

fn write_var_attrs(store: &mut dyn ChunkStore, var_name: &str, attrs: &Map<String, Value>, dims: &[String]) -> Result<()> {
    let mut obj = attrs.clone();
    obj.insert(
        ARRAY_DIMENSIONS_KEY.to_string(),
        Value::Array(dims.iter().map(|d| Value::String(d.clone())).collect()),
    );
    store.set(&attrs_key(var_name), &serde_json::to_vec_pretty(&obj)?)
}

/// Writes a whole dataset fresh: `.zgroup`, global `.zattrs`, and every
/// variable's `.zarray` + `.zattrs` + chunk files.
pub fn write_dataset(store: &mut dyn ChunkStore, ds: &Dataset) -> Result<()> {
    store.set(".zgroup", &serde_json::to_vec(&json!({"zarr_format": 2}))?)?;
    store.set(".zattrs", &serde_json::to_vec_pretty(&ds.attrs)?)?;

    for (name, var) in ds.coords.iter().chain(ds.data_vars.iter()) {
        let Some(data) = &var.data else { continue };
        let shape: Vec<u64> = data.shape().iter().map(|&s| s as u64).collect();
        let meta = array_meta_for(var, &shape);
        write_array_meta(store, name, &meta)?;
        write_var_attrs(store, name, &var.attrs, &var.dims)?;
        write_full_array(store, name, &meta, data)?;
    }
    Ok(())
}

/// Reads a whole dataset back, inferring `dim_sizes` from each variable's
/// `_ARRAY_DIMENSIONS` + `.zarray` shape.
pub fn read_dataset(store: &dyn ChunkStore) -> Result<Dataset> {
    let mut ds = Dataset::new();
    if let Some(bytes) = store.get(".zattrs")? {
        ds.attrs = serde_json::from_slice(&bytes)?;
    }
    let mut var_names: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
    for key in store.list_prefix("")? {
        if let Some((var, rest)) = key.split_once('/') {
            if rest == ".zarray" {
                var_names.insert(var.to_string());
            }
        }
    }
    let mut dim_sizes: IndexMap<String, usize> = IndexMap::new();
    let mut loaded: Vec<(String, Variable, bool)> = Vec::new();
    for name in &var_names {
        let meta = read_array_meta(store, name)?;
        let (attrs, dims) = read_var_attrs(store, name)?;
        for (d, &s) in dims.iter().zip(meta.shape.iter()) {
            dim_sizes.entry(d.clone()).or_insert(s as usize);
        }
        let data = read_full_array(store, name, &meta)?;
        let encoding = encoding_from_meta(&meta);
        let is_coord = dims.len() == 1 && dims[0] == *name;
        loaded.push((
            name.clone(),
            Variable {
                dims,
                data: Some(data),
                encoding,
                attrs,
            },
            is_coord,
        ));
    }
    ds.dim_sizes = dim_sizes;
    for (name, var, is_coord) in loaded {
        ds.set_variable(name, is_coord, var);
    }
    Ok(ds)
}

fn encoding_from_meta(meta: &ArrayMeta) -> VariableEncoding {
    VariableEncoding {
        dtype: Some(meta.dtype().ok()),
        chunks: Some(Some(meta.chunks.iter().map(|&c| ChunkLen::Fixed(c)).collect())),
        fill_value: Some(match &meta.fill_value {
            Value::Null => None,
            Value::String(s) if s.eq_ignore_ascii_case("nan") => Some(FillValue::NaN),
            v => v.as_f64().map(FillValue::Number),
        }),
        scale_factor: None,
        add_offset: None,
        units: None,
        calendar: None,
        compressor: Some(meta.compressor.clone()),
        filters: Some(meta.filters.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FsChunkStore;

    fn sample_dataset() -> Dataset {
        let mut ds = Dataset::new();
        ds.dim_sizes.insert("time".into(), 3);
        ds.dim_sizes.insert("y".into(), 2);
        let mut time_var = Variable::new(vec!["time".into()], DataArray::I64(vec![1, 2, 3], vec![3]));
        time_var.encoding.chunks = Some(Some(vec![ChunkLen::Fixed(2)]));
        ds.coords.insert("time".into(), time_var);
        let mut chl = Variable::new(
            vec!["time".into(), "y".into()],
            DataArray::F64(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![3, 2]),
        );
        chl.encoding.chunks = Some(Some(vec![ChunkLen::Fixed(2), ChunkLen::Fixed(2)]));
        ds.data_vars.insert("chl".into(), chl);
        ds.attrs.insert("title".into(), json!("test"));
        ds
    }

    #[test]
    fn write_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FsChunkStore::new(dir.path());
        let ds = sample_dataset();
        write_dataset(&mut store, &ds).unwrap();

        let back = read_dataset(&store).unwrap();
        assert_eq!(back.dim_sizes["time"], 3);
        assert_eq!(back.dim_sizes["y"], 2);
        assert_eq!(back.attrs["title"], json!("test"));
        let chl = back.data_vars.get("chl").unwrap();
        assert_eq!(chl.data.as_ref().unwrap().as_f64_vec(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let time = back.coords.get("time").unwrap();
        assert_eq!(time.data.as_ref().unwrap().as_i64_vec(), vec![1, 2, 3]);
    }

    #[test]
    fn append_region_writes_only_touched_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FsChunkStore::new(dir.path());
        let ds = sample_dataset();
        write_dataset(&mut store, &ds).unwrap();

        // Append one more time step to `chl`.
        let mut meta = read_array_meta(&store, "chl").unwrap();
        let old_size = meta.shape[0];
        // size=3, chunk=2 -> start=1 (partial), end=ceil(4/2)=2
        let (first_is_update, (start, end)) =
            crate::fsutil::chunkutil::get_chunk_update_range(old_size, meta.chunks[0], 1);
        assert!(first_is_update);
        assert_eq!((start, end), (1, 2));

        let old = DataArray::F64(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![3, 2]);
        let new_row = DataArray::F64(vec![9.0, 9.0], vec![1, 2]);
        let combined = old.concat(&new_row, 0).unwrap();
        meta.shape[0] = old_size + 1;
        write_chunk_range(&mut store, "chl", &meta, 0, (start, end), &combined).unwrap();
        write_array_meta(&mut store, "chl", &meta).unwrap();

        let back_meta = read_array_meta(&store, "chl").unwrap();
        let back = read_full_array(&store, "chl", &back_meta).unwrap();
        assert_eq!(back.shape(), &[4, 2]);
        assert_eq!(back.as_f64_vec(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 9.0, 9.0]);
    }
}
