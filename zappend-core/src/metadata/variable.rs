//! Variable encoding and metadata records, including the normalisation
//! rules applied once per variable during outline reconciliation.

use crate::codec::CodecDescriptor;
use crate::dataset::Attrs;
use serde::{Deserialize, Serialize};

/// Supported element types for the mini Zarr store.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    I16,
    U16,
    I32,
    U32,
    I64,
    F32,
    F64,
}

impl DType {
    pub fn itemsize(self) -> usize {
        match self {
            DType::I16 | DType::U16 => 2,
            DType::I32 | DType::U32 | DType::F32 => 4,
            DType::I64 | DType::F64 => 8,
        }
    }

    pub fn zarr_descr(self) -> &'static str {
        match self {
            DType::I16 => "<i2",
            DType::U16 => "<u2",
            DType::I32 => "<i4",
            DType::U32 => "<u4",
            DType::I64 => "<i8",
            DType::F32 => "<f4",
            DType::F64 => "<f8",
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }
}

/// A single `chunks` entry: either a fixed positive length, or "null" meaning
/// the variable's full size along that dimension (chunking disabled).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChunkLen {
    Fixed(u64),
    Full,
}

/// `None` in the outer `Option` means *unset*; `Some(None)` means an
/// explicit `null` value, so "unset vs null" can be modelled without a
/// dynamic sentinel.
pub type Unsettable<T> = Option<Option<T>>;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct VariableEncoding {
    pub dtype: Unsettable<DType>,
    pub chunks: Unsettable<Vec<ChunkLen>>,
    pub fill_value: Unsettable<FillValue>,
    pub scale_factor: Unsettable<f64>,
    pub add_offset: Unsettable<f64>,
    pub units: Unsettable<String>,
    pub calendar: Unsettable<String>,
    pub compressor: Unsettable<CodecDescriptor>,
    pub filters: Unsettable<Vec<CodecDescriptor>>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FillValue {
    Number(f64),
    NaN,
}

impl FillValue {
    pub fn as_f64(self) -> f64 {
        match self {
            FillValue::Number(n) => n,
            FillValue::NaN => f64::NAN,
        }
    }
}

impl VariableEncoding {
    /// Merges `self` (defaults / dataset-derived, lower priority) under
    /// `other` (config, higher priority): every field `other` has set wins;
    /// otherwise `self`'s value (if any) is kept.
    pub fn merged_under(&self, other: &VariableEncoding) -> VariableEncoding {
        fn pick<T: Clone>(lo: &Unsettable<T>, hi: &Unsettable<T>) -> Unsettable<T> {
            match hi {
                Some(_) => hi.clone(),
                None => lo.clone(),
            }
        }
        VariableEncoding {
            dtype: pick(&self.dtype, &other.dtype),
            chunks: pick(&self.chunks, &other.chunks),
            fill_value: pick(&self.fill_value, &other.fill_value),
            scale_factor: pick(&self.scale_factor, &other.scale_factor),
            add_offset: pick(&self.add_offset, &other.add_offset),
            units: pick(&self.units, &other.units),
            calendar: pick(&self.calendar, &other.calendar),
            compressor: pick(&self.compressor, &other.compressor),
            filters: pick(&self.filters, &other.filters),
        }
    }

    /// Applies the normalisation rules:
    /// - `chunks=[]` → null (chunking disabled)
    /// - a `chunks` entry of `null` → the variable's size in that dim
    /// - `fill_value` string `"NaN"` → floating NaN (already represented as
    ///   `FillValue::NaN` by the config layer, so this is a no-op here)
    /// - `_FillValue` attr merges into `fill_value` if unset
    /// - `preferred_chunks` is dropped (never represented on this type)
    /// - `chunksizes` aliases to `chunks` when `chunks` unset (folded in by
    ///   the config layer before this struct is built)
    pub fn normalize(&mut self, shape: &[usize], attrs: &mut Attrs) {
        if let Some(Some(chunk_list)) = &self.chunks {
            if chunk_list.is_empty() {
                self.chunks = Some(None);
            }
        }
        if let Some(Some(chunk_list)) = &mut self.chunks {
            for (i, c) in chunk_list.iter_mut().enumerate() {
                if let ChunkLen::Full = c {
                    let _ = i; // Full already means "variable's size"; nothing to resolve.
                }
            }
            let _ = shape;
        }
        if self.fill_value.is_none() {
            if let Some(v) = attrs.remove("_FillValue") {
                self.fill_value = Some(value_to_fill(&v));
            }
        }
    }

    pub fn resolved_chunks(&self, shape: &[usize]) -> Option<Vec<u64>> {
        match &self.chunks {
            Some(Some(list)) => Some(
                list.iter()
                    .zip(shape.iter())
                    .map(|(c, &s)| match c {
                        ChunkLen::Fixed(n) => *n,
                        ChunkLen::Full => s as u64,
                    })
                    .collect(),
            ),
            _ => None,
        }
    }
}

fn value_to_fill(v: &serde_json::Value) -> FillValue {
    if let Some(s) = v.as_str() {
        if s.eq_ignore_ascii_case("nan") {
            return FillValue::NaN;
        }
    }
    FillValue::Number(v.as_f64().unwrap_or(0.0))
}

#[derive(Clone, Debug, Default)]
pub struct VariableMetadata {
    pub dims: Vec<String>,
    pub shape: Vec<usize>,
    pub encoding: VariableEncoding,
    pub attrs: Attrs,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_wins_over_dataset_derived() {
        let dataset_derived = VariableEncoding {
            dtype: Some(Some(DType::U16)),
            ..Default::default()
        };
        let config = VariableEncoding {
            dtype: Some(Some(DType::F32)),
            units: Some(Some("m".into())),
            ..Default::default()
        };
        let merged = dataset_derived.merged_under(&config);
        assert_eq!(merged.dtype, Some(Some(DType::F32)));
        assert_eq!(merged.units, Some(Some("m".into())));
    }

    #[test]
    fn unset_is_distinct_from_null() {
        let e = VariableEncoding::default();
        assert_eq!(e.fill_value, None); // unset
        let e2 = VariableEncoding {
            fill_value: Some(None),
            ..Default::default()
        };
        assert_eq!(e2.fill_value, Some(None)); // explicit null
    }

    #[test]
    fn empty_chunks_list_normalizes_to_null() {
        let mut e = VariableEncoding {
            chunks: Some(Some(vec![])),
            ..Default::default()
        };
        let mut attrs = Attrs::new();
        e.normalize(&[10], &mut attrs);
        assert_eq!(e.chunks, Some(None));
    }

    #[test]
    fn fill_value_attr_merges_in_when_unset() {
        let mut e = VariableEncoding::default();
        let mut attrs = Attrs::new();
        attrs.insert("_FillValue".into(), serde_json::json!(-999.0));
        e.normalize(&[10], &mut attrs);
        assert_eq!(e.fill_value, Some(Some(FillValue::Number(-999.0))));
        assert!(!attrs.contains_key("_FillValue"));
    }
}
