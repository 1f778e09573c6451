//! In-memory dataset model every other component operates on. Deliberately
//! minimal: it supports fill-initialised construction, axis
//! slicing/concatenation along the append dimension, and coordinate bounds
//! lookups — not general array computation.

use crate::metadata::variable::{DType, VariableEncoding};
use indexmap::IndexMap;
use serde_json::{Map, Value};

pub type Attrs = Map<String, Value>;

/// A flat, row-major, shaped array over one primitive element type.
#[derive(Clone, Debug, PartialEq)]
pub enum DataArray {
    I16(Vec<i16>, Vec<usize>),
    U16(Vec<u16>, Vec<usize>),
    I32(Vec<i32>, Vec<usize>),
    U32(Vec<u32>, Vec<usize>),
    I64(Vec<i64>, Vec<usize>),
    F32(Vec<f32>, Vec<usize>),
    F64(Vec<f64>, Vec<usize>),
}

impl DataArray {
    pub fn shape(&self) -> &[usize] {
        match self {
            DataArray::I16(_, s)
            | DataArray::U16(_, s)
            | DataArray::I32(_, s)
            | DataArray::U32(_, s)
            | DataArray::I64(_, s)
            | DataArray::F32(_, s)
            | DataArray::F64(_, s) => s,
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            DataArray::I16(..) => DType::I16,
            DataArray::U16(..) => DType::U16,
            DataArray::I32(..) => DType::I32,
            DataArray::U32(..) => DType::U32,
            DataArray::I64(..) => DType::I64,
            DataArray::F32(..) => DType::F32,
            DataArray::F64(..) => DType::F64,
        }
    }

    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Builds a fill-initialised array of `dtype` with the given `shape`.
    pub fn filled(dtype: DType, shape: Vec<usize>, fill: f64) -> Self {
        let n: usize = shape.iter().product();
        match dtype {
            DType::I16 => DataArray::I16(vec![fill as i16; n], shape),
            DType::U16 => DataArray::U16(vec![fill as u16; n], shape),
            DType::I32 => DataArray::I32(vec![fill as i32; n], shape),
            DType::U32 => DataArray::U32(vec![fill as u32; n], shape),
            DType::I64 => DataArray::I64(vec![fill as i64; n], shape),
            DType::F32 => DataArray::F32(vec![fill as f32; n], shape),
            DType::F64 => DataArray::F64(vec![fill; n], shape),
        }
    }

    /// Reads every element as `f64`, in row-major order. Used by the
    /// attribute resolver and by 1-D coordinate bounds lookups; not meant for
    /// bulk numeric work.
    pub fn as_f64_vec(&self) -> Vec<f64> {
        match self {
            DataArray::I16(v, _) => v.iter().map(|&x| x as f64).collect(),
            DataArray::U16(v, _) => v.iter().map(|&x| x as f64).collect(),
            DataArray::I32(v, _) => v.iter().map(|&x| x as f64).collect(),
            DataArray::U32(v, _) => v.iter().map(|&x| x as f64).collect(),
            DataArray::I64(v, _) => v.iter().map(|&x| x as f64).collect(),
            DataArray::F32(v, _) => v.iter().map(|&x| x as f64).collect(),
            DataArray::F64(v, _) => v.clone(),
        }
    }

    pub fn as_i64_vec(&self) -> Vec<i64> {
        match self {
            DataArray::I16(v, _) => v.iter().map(|&x| x as i64).collect(),
            DataArray::U16(v, _) => v.iter().map(|&x| x as i64).collect(),
            DataArray::I32(v, _) => v.iter().map(|&x| x as i64).collect(),
            DataArray::U32(v, _) => v.iter().map(|&x| x as i64).collect(),
            DataArray::I64(v, _) => v.clone(),
            DataArray::F32(v, _) => v.iter().map(|&x| x as i64).collect(),
            DataArray::F64(v, _) => v.iter().map(|&x| x as i64).collect(),
        }
    }

    /// Concatenates `self` and `other` along `axis`; both must share every
    /// other dimension's extent and dtype.
    pub fn concat(&self, other: &DataArray, axis: usize) -> Option<DataArray> {
        if self.dtype() != other.dtype() {
            return None;
        }
        let (sa, sb) = (self.shape(), other.shape());
        if sa.len() != sb.len() || axis >= sa.len() {
            return None;
        }
        for i in 0..sa.len() {
            if i != axis && sa[i] != sb[i] {
                return None;
            }
        }
        let mut new_shape = sa.to_vec();
        new_shape[axis] = sa[axis] + sb[axis];

        macro_rules! do_concat {
            ($va:expr, $vb:expr) => {{
                concat_rowmajor($va, sa, $vb, sb, axis)
            }};
        }

        Some(match (self, other) {
            (DataArray::I16(a, _), DataArray::I16(b, _)) => {
                DataArray::I16(do_concat!(a, b), new_shape)
            }
            (DataArray::U16(a, _), DataArray::U16(b, _)) => {
                DataArray::U16(do_concat!(a, b), new_shape)
            }
            (DataArray::I32(a, _), DataArray::I32(b, _)) => {
                DataArray::I32(do_concat!(a, b), new_shape)
            }
            (DataArray::U32(a, _), DataArray::U32(b, _)) => {
                DataArray::U32(do_concat!(a, b), new_shape)
            }
            (DataArray::I64(a, _), DataArray::I64(b, _)) => {
                DataArray::I64(do_concat!(a, b), new_shape)
            }
            (DataArray::F32(a, _), DataArray::F32(b, _)) => {
                DataArray::F32(do_concat!(a, b), new_shape)
            }
            (DataArray::F64(a, _), DataArray::F64(b, _)) => {
                DataArray::F64(do_concat!(a, b), new_shape)
            }
            _ => unreachable!("dtype equality checked above"),
        })
    }
}

fn concat_rowmajor<T: Clone>(a: &[T], sa: &[usize], b: &[T], sb: &[usize], axis: usize) -> Vec<T> {
    if axis == 0 {
        // Row-major concatenation along the leading axis is a plain append.
        let mut out = Vec::with_capacity(a.len() + b.len());
        out.extend_from_slice(a);
        out.extend_from_slice(b);
        return out;
    }
    // General case: walk both arrays' outer (pre-axis) blocks in lockstep.
    let outer: usize = sa[..axis].iter().product();
    let a_inner = a.len() / outer.max(1);
    let b_inner = b.len() / outer.max(1);
    let mut out = Vec::with_capacity(a.len() + b.len());
    for i in 0..outer {
        out.extend_from_slice(&a[i * a_inner..(i + 1) * a_inner]);
        out.extend_from_slice(&b[i * b_inner..(i + 1) * b_inner]);
    }
    out
}

#[derive(Clone, Debug, Default)]
pub struct Variable {
    pub dims: Vec<String>,
    pub data: Option<DataArray>,
    pub encoding: VariableEncoding,
    pub attrs: Attrs,
}

impl Variable {
    pub fn new(dims: Vec<String>, data: DataArray) -> Self {
        Self {
            dims,
            data: Some(data),
            encoding: VariableEncoding::default(),
            attrs: Attrs::new(),
        }
    }

    pub fn shape(&self) -> Vec<usize> {
        self.data.as_ref().map(|d| d.shape().to_vec()).unwrap_or_default()
    }
}

/// A dataset: named dimensions, coordinate variables, data variables, and
/// global attributes, all in insertion order — dimension insertion order
/// must stay observable for outline reconciliation.
#[derive(Clone, Debug, Default)]
pub struct Dataset {
    pub dim_sizes: IndexMap<String, usize>,
    pub coords: IndexMap<String, Variable>,
    pub data_vars: IndexMap<String, Variable>,
    pub attrs: Attrs,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.coords.get(name).or_else(|| self.data_vars.get(name))
    }

    pub fn variable_mut(&mut self, name: &str) -> Option<&mut Variable> {
        if self.coords.contains_key(name) {
            self.coords.get_mut(name)
        } else {
            self.data_vars.get_mut(name)
        }
    }

    pub fn contains_variable(&self, name: &str) -> bool {
        self.coords.contains_key(name) || self.data_vars.contains_key(name)
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.coords
            .keys()
            .chain(self.data_vars.keys())
            .cloned()
            .collect()
    }

    pub fn set_variable(&mut self, name: impl Into<String>, is_coord: bool, var: Variable) {
        let name = name.into();
        if is_coord {
            self.coords.insert(name, var);
        } else {
            self.data_vars.insert(name, var);
        }
    }

    pub fn remove_variable(&mut self, name: &str) {
        self.coords.shift_remove(name);
        self.data_vars.shift_remove(name);
    }

    /// The append-dim coordinate's raw values as `i64`, if that coordinate
    /// exists in this dataset.
    pub fn append_coord_values(&self, append_dim: &str) -> Option<Vec<i64>> {
        self.coords
            .get(append_dim)
            .and_then(|v| v.data.as_ref())
            .map(|d| d.as_i64_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concat_leading_axis() {
        let a = DataArray::I64(vec![1, 2, 3], vec![3]);
        let b = DataArray::I64(vec![4, 5], vec![2]);
        let c = a.concat(&b, 0).unwrap();
        assert_eq!(c.shape(), &[5]);
        assert_eq!(c.as_i64_vec(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn concat_non_leading_axis() {
        // shape (2,2) concatenated with (2,1) along axis=1 -> (2,3)
        let a = DataArray::F64(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
        let b = DataArray::F64(vec![5.0, 6.0], vec![2, 1]);
        let c = a.concat(&b, 1).unwrap();
        assert_eq!(c.shape(), &[2, 3]);
        assert_eq!(c.as_f64_vec(), vec![1.0, 2.0, 5.0, 3.0, 4.0, 6.0]);
    }

    #[test]
    fn concat_rejects_dtype_mismatch() {
        let a = DataArray::I64(vec![1], vec![1]);
        let b = DataArray::F64(vec![1.0], vec![1]);
        assert!(a.concat(&b, 0).is_none());
    }
}
