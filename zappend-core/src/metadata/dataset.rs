//! Dataset metadata — outline reconciliation: deriving an authoritative
//! target outline from configuration and a first slice, and verifying every
//! subsequent slice against it.

use crate::config::Config;
use crate::dataset::{Attrs, Dataset};
use crate::error::{Result, ZappendError};
use crate::metadata::variable::VariableMetadata;
use indexmap::{IndexMap, IndexSet};

#[derive(Clone, Debug, Default)]
pub struct DatasetMetadata {
    pub sizes: IndexMap<String, usize>,
    pub variables: IndexMap<String, VariableMetadata>,
    pub attrs: Attrs,
}

impl DatasetMetadata {
    /// Builds an outline from an open dataset and the processing config.
    /// Does not perform the compatibility check — that is
    /// [`DatasetMetadata::assert_compatible_slice`], run only when a target
    /// outline already exists.
    pub fn from_dataset(ds: &Dataset, config: &Config) -> Result<DatasetMetadata> {
        let sizes = derive_sizes(ds, config)?;
        let selected = select_variables(ds, config)?;

        let mut variables = IndexMap::new();
        for name in selected {
            let vm = build_variable_metadata(ds, config, &name, &sizes)?;
            variables.insert(name, vm);
        }

        Ok(DatasetMetadata {
            sizes,
            variables,
            attrs: ds.attrs.clone(),
        })
    }

    /// Verifies a later slice is compatible with this (already-established)
    /// target outline.
    pub fn assert_compatible_slice(&self, slice_md: &DatasetMetadata, append_dim: &str) -> Result<()> {
        for (dim, &size) in &self.sizes {
            let Some(&slice_size) = slice_md.sizes.get(dim) else {
                return Err(ZappendError::metadata(format!(
                    "slice is missing dimension {dim:?} present in the target"
                )));
            };
            if dim != append_dim && slice_size != size {
                return Err(ZappendError::metadata(format!(
                    "slice dimension {dim:?} has size {slice_size}, expected {size} (append dim is {append_dim:?})"
                )));
            }
        }
        for (name, target_var) in &self.variables {
            if let Some(slice_var) = slice_md.variables.get(name) {
                if slice_var.dims != target_var.dims {
                    return Err(ZappendError::metadata(format!(
                        "variable {name:?} has dims {:?} in the slice, expected {:?}",
                        slice_var.dims, target_var.dims
                    )));
                }
            }
        }
        Ok(())
    }
}

fn derive_sizes(ds: &Dataset, config: &Config) -> Result<IndexMap<String, usize>> {
    for (dim, &want) in &config.fixed_dims {
        match ds.dim_sizes.get(dim) {
            Some(&have) if have == want => {}
            Some(&have) => {
                return Err(ZappendError::metadata(format!(
                    "fixed dim {dim:?} has size {have} in the slice, configured size is {want}"
                )));
            }
            None => {
                return Err(ZappendError::metadata(format!(
                    "fixed dim {dim:?} is not present in the dataset"
                )));
            }
        }
    }
    if !ds.dim_sizes.contains_key(&config.append_dim) {
        return Err(ZappendError::metadata(format!(
            "append dim {:?} is not present in the dataset",
            config.append_dim
        )));
    }
    if config.fixed_dims.contains_key(&config.append_dim) {
        return Err(ZappendError::metadata(format!(
            "append dim {:?} must not also be a fixed dim",
            config.append_dim
        )));
    }
    Ok(ds.dim_sizes.clone())
}

fn select_variables(ds: &Dataset, config: &Config) -> Result<IndexSet<String>> {
    let mut selected: IndexSet<String> = if let Some(included) = &config.included_variables {
        for name in included {
            if !ds.contains_variable(name) && config.variable_config(name).is_none() {
                return Err(ZappendError::configuration(format!(
                    "included_variables references unknown variable {name:?}"
                )));
            }
        }
        included.iter().cloned().collect()
    } else {
        let mut s: IndexSet<String> = ds.variable_names().into_iter().collect();
        for name in config.variables.keys() {
            if name != "*" {
                s.insert(name.clone());
            }
        }
        s
    };
    for name in &config.excluded_variables {
        selected.shift_remove(name);
    }
    Ok(selected)
}

fn build_variable_metadata(
    ds: &Dataset,
    config: &Config,
    name: &str,
    sizes: &IndexMap<String, usize>,
) -> Result<VariableMetadata> {
    let defaults = config.variable_defaults().cloned().unwrap_or_default();
    let configured = config.variable_config(name).cloned();

    let mut encoding = defaults.encoding.merged_under(
        &configured
            .as_ref()
            .map(|c| c.encoding.clone())
            .unwrap_or_default(),
    );
    let mut attrs = defaults.attrs.clone();
    if let Some(c) = &configured {
        for (k, v) in &c.attrs {
            attrs.insert(k.clone(), v.clone());
        }
    }

    let mut vm = if let Some(var) = ds.variable(name) {
        let dataset_derived = VariableMetadata {
            dims: var.dims.clone(),
            shape: var.shape(),
            encoding: var.encoding.clone(),
            attrs: var.attrs.clone(),
        };
        // Config wins where it has opinions; dataset fills the gaps.
        encoding = dataset_derived.encoding.merged_under(&encoding);
        for (k, v) in &dataset_derived.attrs {
            attrs.entry(k.clone()).or_insert_with(|| v.clone());
        }
        VariableMetadata {
            dims: dataset_derived.dims,
            shape: dataset_derived.shape,
            encoding,
            attrs,
        }
    } else {
        let dims = configured
            .as_ref()
            .and_then(|c| c.dims.clone())
            .ok_or_else(|| {
                ZappendError::metadata(format!(
                    "variable {name:?} is absent from the slice and configuration supplies no dims"
                ))
            })?;
        for d in &dims {
            if !sizes.contains_key(d) {
                return Err(ZappendError::metadata(format!(
                    "variable {name:?}'s configured dim {d:?} is not a known dataset dim"
                )));
            }
        }
        if encoding.dtype.flatten().is_none() {
            return Err(ZappendError::metadata(format!(
                "variable {name:?} is absent from the slice and configuration supplies no encoding.dtype"
            )));
        }
        let shape = dims.iter().map(|d| sizes[d]).collect();
        VariableMetadata {
            dims,
            shape,
            encoding,
            attrs,
        }
    };

    vm.encoding.normalize(&vm.shape, &mut vm.attrs);
    Ok(vm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{DataArray, Variable};
    use crate::metadata::variable::{DType, VariableEncoding};

    fn sample_dataset() -> Dataset {
        let mut ds = Dataset::new();
        ds.dim_sizes.insert("time".into(), 3);
        ds.dim_sizes.insert("y".into(), 2);
        ds.dim_sizes.insert("x".into(), 2);
        ds.coords.insert(
            "time".into(),
            Variable::new(vec!["time".into()], DataArray::I64(vec![1, 2, 3], vec![3])),
        );
        ds.data_vars.insert(
            "chl".into(),
            Variable::new(
                vec!["time".into(), "y".into(), "x".into()],
                DataArray::F64(vec![0.0; 12], vec![3, 2, 2]),
            ),
        );
        ds
    }

    #[test]
    fn derives_outline_from_first_slice() {
        let ds = sample_dataset();
        let config = Config {
            target_dir: "/tmp/t.zarr".into(),
            ..Default::default()
        };
        let md = DatasetMetadata::from_dataset(&ds, &config).unwrap();
        assert_eq!(md.sizes["time"], 3);
        assert!(md.variables.contains_key("chl"));
        assert!(md.variables.contains_key("time"));
    }

    #[test]
    fn fixed_dim_mismatch_is_rejected() {
        let ds = sample_dataset();
        let mut config = Config {
            target_dir: "/tmp/t.zarr".into(),
            ..Default::default()
        };
        config.fixed_dims.insert("y".into(), 99);
        assert!(DatasetMetadata::from_dataset(&ds, &config).is_err());
    }

    #[test]
    fn missing_variable_needs_configured_dtype() {
        let ds = sample_dataset();
        let mut config = Config {
            target_dir: "/tmp/t.zarr".into(),
            ..Default::default()
        };
        config.included_variables = Some(vec!["ghost".into()]);
        config.variables.insert(
            "ghost".into(),
            crate::config::VariableConfig {
                dims: Some(vec!["time".into()]),
                encoding: VariableEncoding::default(),
                attrs: Default::default(),
            },
        );
        let err = DatasetMetadata::from_dataset(&ds, &config).unwrap_err();
        assert!(matches!(err, ZappendError::Metadata(_)));
    }

    #[test]
    fn missing_variable_succeeds_with_configured_dtype() {
        let ds = sample_dataset();
        let mut config = Config {
            target_dir: "/tmp/t.zarr".into(),
            ..Default::default()
        };
        config.included_variables = Some(vec!["ghost".into()]);
        config.variables.insert(
            "ghost".into(),
            crate::config::VariableConfig {
                dims: Some(vec!["time".into()]),
                encoding: VariableEncoding {
                    dtype: Some(Some(DType::F32)),
                    ..Default::default()
                },
                attrs: Default::default(),
            },
        );
        let md = DatasetMetadata::from_dataset(&ds, &config).unwrap();
        assert_eq!(md.variables["ghost"].shape, vec![3]);
    }

    #[test]
    fn compatible_slice_passes() {
        let ds = sample_dataset();
        let config = Config {
            target_dir: "/tmp/t.zarr".into(),
            ..Default::default()
        };
        let md = DatasetMetadata::from_dataset(&ds, &config).unwrap();
        // A same-shaped next slice (different time length) is compatible.
        let mut ds2 = sample_dataset();
        ds2.dim_sizes.insert("time".into(), 1);
        let md2 = DatasetMetadata::from_dataset(&ds2, &config).unwrap();
        assert!(md.assert_compatible_slice(&md2, "time").is_ok());
    }

    #[test]
    fn incompatible_non_append_dim_fails() {
        let ds = sample_dataset();
        let config = Config {
            target_dir: "/tmp/t.zarr".into(),
            ..Default::default()
        };
        let md = DatasetMetadata::from_dataset(&ds, &config).unwrap();
        let mut ds2 = sample_dataset();
        ds2.dim_sizes.insert("y".into(), 99);
        let md2 = DatasetMetadata::from_dataset(&ds2, &config).unwrap();
        assert!(md.assert_compatible_slice(&md2, "time").is_err());
    }
}
