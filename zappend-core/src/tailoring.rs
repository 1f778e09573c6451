//! Tailoring: shaping an incoming slice to the target outline, and
//! the attrs-update policy (`keep`/`replace`/`update`/`ignore`) governing how
//! a slice's dataset-level attributes affect the target's once a target
//! already exists.

use crate::attrs::resolve_attrs;
use crate::config::{AttrsUpdateMode, Config};
use crate::dataset::{Attrs, DataArray, Dataset, Variable};
use crate::error::Result;
use crate::metadata::{DType, DatasetMetadata};

/// Restricts `slice` to exactly the variables the target outline selected
/// AND that vary along the append dimension: a variable the outline
/// carries but that has no append-dim axis is constant across slices and is
/// assumed already correct on the target, so a slice never overwrites it.
/// Per-variable encoding and attrs are cleared too — both already live on
/// the target outline by this point, so the slice only still needs to
/// contribute data. Finally expands any `{{ }}` attribute templates in the
/// slice's own (dataset-level) attrs against itself.
pub fn tailor_slice_dataset(mut slice: Dataset, target_md: &DatasetMetadata, config: &Config) -> Result<Dataset> {
    let append_dim = &config.append_dim;
    for name in slice.variable_names() {
        let keep = target_md
            .variables
            .get(&name)
            .is_some_and(|vm| vm.dims.iter().any(|d| d == append_dim));
        if !keep {
            slice.remove_variable(&name);
        }
    }
    for name in slice.variable_names() {
        if let Some(var) = slice.variable_mut(&name) {
            var.encoding = Default::default();
            var.attrs = Attrs::new();
        }
    }
    slice.attrs = resolve_attrs(&slice.attrs, &slice)?;
    Ok(slice)
}

/// Shapes a newly-created target's first dataset to exactly the reconciled
/// outline `target_md`: variables the outline did not select are dropped,
/// variables the outline selected but that are absent from `ds` (declared
/// purely via `variables.*.dims`/`dtype` config, with no first-slice data)
/// are added as lazily fill-initialised arrays, and every surviving
/// variable's encoding and attrs are set from the outline (which already
/// folds in config overrides and dataset-derived values).
pub fn tailor_target_dataset(mut ds: Dataset, target_md: &DatasetMetadata, _config: &Config) -> Result<Dataset> {
    for name in ds.variable_names() {
        if !target_md.variables.contains_key(&name) {
            ds.remove_variable(&name);
        }
    }
    for (name, vm) in &target_md.variables {
        if ds.contains_variable(name) {
            continue;
        }
        let is_coord = vm.dims.len() == 1 && vm.dims[0] == *name;
        let dtype = vm.encoding.dtype.flatten().unwrap_or(DType::F64);
        let fill = vm.encoding.fill_value.flatten().map(|f| f.as_f64()).unwrap_or(0.0);
        let mem_dtype = if fill.is_nan() { DType::F64 } else { dtype };
        let data = DataArray::filled(mem_dtype, vm.shape.clone(), fill);
        ds.set_variable(name.clone(), is_coord, Variable::new(vm.dims.clone(), data));
    }
    for (name, vm) in &target_md.variables {
        if let Some(var) = ds.variable_mut(name) {
            var.encoding = vm.encoding.clone();
            var.attrs = vm.attrs.clone();
        }
    }
    ds.dim_sizes = target_md.sizes.clone();
    Ok(ds)
}

/// Computes the target's global attrs after folding in one slice's attrs.
/// `existing` is `None` when the target is being created fresh, in which
/// case the policy is immaterial: a new target's attrs are always the first
/// slice's attrs with `config.attrs` layered on top.
pub fn tailor_target_attrs(existing: Option<&Attrs>, slice_attrs: &Attrs, config: &Config) -> Attrs {
    let Some(existing) = existing else {
        return layer(slice_attrs, &config.attrs);
    };
    match config.attrs_update_mode {
        AttrsUpdateMode::Keep | AttrsUpdateMode::Ignore => existing.clone(),
        AttrsUpdateMode::Replace => layer(slice_attrs, &config.attrs),
        AttrsUpdateMode::Update => layer(&layer(existing, slice_attrs), &config.attrs),
    }
}

fn layer(base: &Attrs, overlay: &Attrs) -> Attrs {
    let mut out = base.clone();
    for (k, v) in overlay {
        out.insert(k.clone(), v.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::VariableMetadata;
    use serde_json::json;

    fn target_md_with(vars: &[&str]) -> DatasetMetadata {
        let mut md = DatasetMetadata::default();
        for v in vars {
            md.variables.insert(
                v.to_string(),
                VariableMetadata {
                    dims: vec!["time".into()],
                    ..Default::default()
                },
            );
        }
        md
    }

    fn slice_with(vars: &[&str]) -> Dataset {
        let mut ds = Dataset::new();
        for v in vars {
            ds.data_vars.insert(
                v.to_string(),
                Variable::new(vec!["time".into()], DataArray::F64(vec![1.0], vec![1])),
            );
        }
        ds
    }

    #[test]
    fn tailoring_drops_variables_not_in_the_target_outline() {
        let md = target_md_with(&["chl"]);
        let config = Config::default();
        let slice = slice_with(&["chl", "extra"]);
        let tailored = tailor_slice_dataset(slice, &md, &config).unwrap();
        assert!(tailored.contains_variable("chl"));
        assert!(!tailored.contains_variable("extra"));
    }

    #[test]
    fn tailoring_drops_variables_without_the_append_dim() {
        let mut md = target_md_with(&["chl"]);
        md.variables.insert(
            "region".to_string(),
            VariableMetadata {
                dims: vec!["y".into()],
                ..Default::default()
            },
        );
        let config = Config::default();
        let mut slice = slice_with(&["chl"]);
        slice
            .data_vars
            .insert("region".into(), Variable::new(vec!["y".into()], DataArray::F64(vec![1.0], vec![1])));
        let tailored = tailor_slice_dataset(slice, &md, &config).unwrap();
        assert!(tailored.contains_variable("chl"));
        assert!(!tailored.contains_variable("region"));
    }

    #[test]
    fn tailor_target_dataset_adds_missing_configured_variables() {
        let mut md = DatasetMetadata::default();
        md.sizes.insert("time".into(), 1);
        md.variables.insert(
            "chl".to_string(),
            VariableMetadata {
                dims: vec!["time".into()],
                shape: vec![1],
                ..Default::default()
            },
        );
        md.variables.insert(
            "flags".to_string(),
            VariableMetadata {
                dims: vec!["time".into()],
                shape: vec![1],
                ..Default::default()
            },
        );
        let config = Config::default();
        let slice = slice_with(&["chl"]);
        let tailored = tailor_target_dataset(slice, &md, &config).unwrap();
        assert!(tailored.contains_variable("chl"));
        let flags = tailored.data_vars.get("flags").unwrap();
        assert_eq!(flags.shape(), vec![1]);
    }

    #[test]
    fn keep_mode_preserves_existing_attrs() {
        let mut existing = Attrs::new();
        existing.insert("title".into(), json!("v1"));
        let mut slice_attrs = Attrs::new();
        slice_attrs.insert("title".into(), json!("v2"));
        let config = Config {
            attrs_update_mode: AttrsUpdateMode::Keep,
            ..Default::default()
        };
        let result = tailor_target_attrs(Some(&existing), &slice_attrs, &config);
        assert_eq!(result["title"], json!("v1"));
    }

    #[test]
    fn update_mode_merges_slice_over_existing() {
        let mut existing = Attrs::new();
        existing.insert("title".into(), json!("v1"));
        existing.insert("keep_me".into(), json!(true));
        let mut slice_attrs = Attrs::new();
        slice_attrs.insert("title".into(), json!("v2"));
        let config = Config {
            attrs_update_mode: AttrsUpdateMode::Update,
            ..Default::default()
        };
        let result = tailor_target_attrs(Some(&existing), &slice_attrs, &config);
        assert_eq!(result["title"], json!("v2"));
        assert_eq!(result["keep_me"], json!(true));
    }

    #[test]
    fn config_attrs_always_win_on_replace() {
        let existing = Attrs::new();
        let mut slice_attrs = Attrs::new();
        slice_attrs.insert("title".into(), json!("from slice"));
        let mut config = Config {
            attrs_update_mode: AttrsUpdateMode::Replace,
            ..Default::default()
        };
        config.attrs.insert("title".into(), json!("from config"));
        let result = tailor_target_attrs(Some(&existing), &slice_attrs, &config);
        assert_eq!(result["title"], json!("from config"));
    }
}
