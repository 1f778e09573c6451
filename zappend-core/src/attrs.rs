//! Attribute resolution: expands `{{ ... }}` templates embedded in
//! configured attribute values against the dataset currently being written.
//! The grammar is deliberately narrow: `<ident-path> [ "[" index
//! "]" ] [ "|" func ]` — not a general template language: only `ds.<var>`
//! paths, a single optional integer index (negative indexes from the end),
//! and a single optional formatting function are recognised.

use crate::dataset::{Attrs, Dataset};
use crate::error::{Result, ZappendError};
use serde_json::Value;
use time::OffsetDateTime;

#[derive(Debug, PartialEq)]
struct TemplateExpr {
    path: Vec<String>,
    index: Option<i64>,
    func: Option<String>,
}

/// Resolves every `{{ ... }}` template found in `attrs` (recursively, inside
/// nested arrays/objects) against `ds`. Plain values pass through unchanged.
pub fn resolve_attrs(attrs: &Attrs, ds: &Dataset) -> Result<Attrs> {
    let mut out = Attrs::new();
    for (k, v) in attrs {
        out.insert(k.clone(), resolve_value(v, ds)?);
    }
    Ok(out)
}

fn resolve_value(value: &Value, ds: &Dataset) -> Result<Value> {
    match value {
        Value::String(s) => match extract_template(s) {
            Some(inner) => eval_template(&parse_template(inner)?, ds),
            None => Ok(value.clone()),
        },
        Value::Array(items) => Ok(Value::Array(
            items.iter().map(|v| resolve_value(v, ds)).collect::<Result<Vec<_>>>()?,
        )),
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), resolve_value(v, ds)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Recognises a value that, once trimmed, is *entirely* one `{{ ... }}`
/// block. The grammar has no string interpolation, so a value containing a
/// template alongside literal text is left untouched rather than partially
/// expanded.
fn extract_template(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    trimmed.strip_prefix("{{")?.strip_suffix("}}").map(str::trim)
}

fn parse_template(expr: &str) -> Result<TemplateExpr> {
    let (head, func) = match expr.split_once('|') {
        Some((h, f)) => (h.trim(), Some(f.trim().to_string())),
        None => (expr.trim(), None),
    };
    let (path_part, index) = match head.find('[') {
        Some(open) => {
            let close = head.find(']').ok_or_else(|| {
                ZappendError::configuration(format!("attribute template {expr:?}: unterminated '['"))
            })?;
            let idx_str = head[open + 1..close].trim();
            let idx: i64 = idx_str.parse().map_err(|_| {
                ZappendError::configuration(format!(
                    "attribute template {expr:?}: invalid index {idx_str:?}"
                ))
            })?;
            (&head[..open], Some(idx))
        }
        None => (head, None),
    };
    let path: Vec<String> = path_part.split('.').map(str::to_string).collect();
    if path.len() != 2 || path[0] != "ds" {
        return Err(ZappendError::configuration(format!(
            "attribute template {expr:?}: expected 'ds.<variable>', got {path_part:?}"
        )));
    }
    Ok(TemplateExpr { path, index, func })
}

/// Evaluates one parsed template against `ds`. A `func` ignores `index`
/// entirely and operates on the whole named array (it computes a cell
/// boundary, for which a single element is meaningless); without a `func`,
/// `index` selects one element (defaulting to the last) and the result is
/// formatted as an ISO-8601 timestamp when the variable is a dimension
/// coordinate, or passed through as a plain number otherwise.
fn eval_template(expr: &TemplateExpr, ds: &Dataset) -> Result<Value> {
    let var_name = &expr.path[1];
    let var = ds
        .variable(var_name)
        .ok_or_else(|| ZappendError::configuration(format!("attribute template references unknown variable {var_name:?}")))?;
    let data = var
        .data
        .as_ref()
        .ok_or_else(|| ZappendError::configuration(format!("variable {var_name:?} has no data for an attribute template")))?;
    let values = data.as_f64_vec();
    if values.is_empty() {
        return Err(ZappendError::configuration(format!(
            "variable {var_name:?} is empty; cannot evaluate an attribute template against it"
        )));
    }

    if let Some(func) = &expr.func {
        let bound = apply_bound_func(&values, func, var_name)?;
        return Ok(json_number(bound));
    }

    let raw = match expr.index {
        Some(i) => {
            let len = values.len() as i64;
            let resolved = if i < 0 { len + i } else { i };
            if resolved < 0 || resolved >= len {
                return Err(ZappendError::configuration(format!(
                    "attribute template index {i} out of range for variable {var_name:?} of length {len}"
                )));
            }
            values[resolved as usize]
        }
        None => values[values.len() - 1],
    };

    if ds.coords.contains_key(var_name.as_str()) {
        format_timestamp(raw)
    } else {
        Ok(json_number(raw))
    }
}

/// `lower_bound`/`center_bound`/`upper_bound`: the cell boundary of the
/// named array's first/last element, using the (assumed uniform) spacing
/// between its first two elements as the cell width.
fn apply_bound_func(values: &[f64], func: &str, var_name: &str) -> Result<f64> {
    if values.len() < 2 {
        return Err(ZappendError::configuration(format!(
            "{func}: variable {var_name:?} needs at least two elements to determine cell width"
        )));
    }
    let first = values[0];
    let last = values[values.len() - 1];
    let half_step = (values[1] - values[0]) / 2.0;
    match func {
        "lower_bound" => Ok(first - half_step),
        "center_bound" => Ok((first + last) / 2.0),
        "upper_bound" => Ok(last + half_step),
        other => Err(ZappendError::configuration(format!(
            "attribute template: unknown function {other:?}"
        ))),
    }
}

fn format_timestamp(raw: f64) -> Result<Value> {
    let dt = OffsetDateTime::from_unix_timestamp(raw as i64)
        .map_err(|e| ZappendError::configuration(format!("invalid timestamp {raw}: {e}")))?;
    let format = time::macros::format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");
    let formatted = dt
        .format(&format)
        .map_err(|e| ZappendError::configuration(format!("invalid timestamp {raw}: {e}")))?;
    Ok(Value::String(formatted))
}

/// Renders a raw `f64` as JSON, preferring an integer representation for
/// whole numbers; non-finite values (`NaN`/`inf`/`-inf`, which JSON has no
/// literal for) are rendered as their string form rather than dropped.
fn json_number(raw: f64) -> Value {
    if !raw.is_finite() {
        let s = if raw.is_nan() {
            "NaN"
        } else if raw.is_sign_positive() {
            "Infinity"
        } else {
            "-Infinity"
        };
        return Value::String(s.to_string());
    }
    if raw.fract() == 0.0 && raw.abs() < 1e15 {
        Value::Number((raw as i64).into())
    } else {
        serde_json::Number::from_f64(raw)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(raw.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{DataArray, Variable};
    use serde_json::json;

    fn sample_dataset() -> Dataset {
        let mut ds = Dataset::new();
        ds.dim_sizes.insert("time".into(), 3);
        ds.coords.insert(
            "time".into(),
            Variable::new(vec!["time".into()], DataArray::I64(vec![0, 86400, 172800], vec![3])),
        );
        ds
    }

    #[test]
    fn plain_values_pass_through() {
        let ds = sample_dataset();
        let mut attrs = Attrs::new();
        attrs.insert("title".into(), json!("my dataset"));
        let resolved = resolve_attrs(&attrs, &ds).unwrap();
        assert_eq!(resolved["title"], json!("my dataset"));
    }

    #[test]
    fn negative_index_selects_from_the_end() {
        let mut ds = sample_dataset();
        ds.data_vars.insert(
            "chl".into(),
            Variable::new(vec!["time".into()], DataArray::F64(vec![1.0, 2.0, 3.0], vec![3])),
        );
        let mut attrs = Attrs::new();
        attrs.insert("last_chl".into(), json!("{{ ds.chl[-1] }}"));
        let resolved = resolve_attrs(&attrs, &ds).unwrap();
        assert_eq!(resolved["last_chl"], json!(3));
    }

    #[test]
    fn default_with_no_index_is_the_last_element() {
        let ds = sample_dataset();
        let mut attrs = Attrs::new();
        attrs.insert("t".into(), json!("{{ ds.time }}"));
        let resolved = resolve_attrs(&attrs, &ds).unwrap();
        assert_eq!(resolved["t"], json!("1970-01-03T00:00:00Z"));
    }

    #[test]
    fn default_serialization_of_a_coordinate_is_a_timestamp() {
        let ds = sample_dataset();
        let mut attrs = Attrs::new();
        attrs.insert("start".into(), json!("{{ ds.time[0] }}"));
        let resolved = resolve_attrs(&attrs, &ds).unwrap();
        assert_eq!(resolved["start"], json!("1970-01-01T00:00:00Z"));
    }

    #[test]
    fn data_var_default_serialization_stays_numeric() {
        let mut ds = sample_dataset();
        ds.data_vars.insert(
            "chl".into(),
            Variable::new(vec!["time".into()], DataArray::F64(vec![1.0, 2.0, 3.0], vec![3])),
        );
        let mut attrs = Attrs::new();
        attrs.insert("last_chl".into(), json!("{{ ds.chl }}"));
        let resolved = resolve_attrs(&attrs, &ds).unwrap();
        assert_eq!(resolved["last_chl"], json!(3));
    }

    #[test]
    fn bound_funcs_compute_cell_edges_from_the_whole_array() {
        let ds = sample_dataset();
        let mut attrs = Attrs::new();
        attrs.insert("lower".into(), json!("{{ ds.time|lower_bound }}"));
        attrs.insert("center".into(), json!("{{ ds.time|center_bound }}"));
        attrs.insert("upper".into(), json!("{{ ds.time|upper_bound }}"));
        let resolved = resolve_attrs(&attrs, &ds).unwrap();
        assert_eq!(resolved["lower"], json!(-43200));
        assert_eq!(resolved["center"], json!(86400));
        assert_eq!(resolved["upper"], json!(216000));
    }

    #[test]
    fn bound_func_ignores_an_accompanying_index() {
        let ds = sample_dataset();
        let mut attrs = Attrs::new();
        attrs.insert("upper".into(), json!("{{ ds.time[0]|upper_bound }}"));
        let resolved = resolve_attrs(&attrs, &ds).unwrap();
        assert_eq!(resolved["upper"], json!(216000));
    }

    #[test]
    fn non_finite_values_serialize_as_their_string() {
        assert_eq!(json_number(f64::NAN), json!("NaN"));
        assert_eq!(json_number(f64::INFINITY), json!("Infinity"));
        assert_eq!(json_number(f64::NEG_INFINITY), json!("-Infinity"));
    }

    #[test]
    fn unknown_variable_is_an_error() {
        let ds = sample_dataset();
        let mut attrs = Attrs::new();
        attrs.insert("x".into(), json!("{{ ds.nope }}"));
        assert!(resolve_attrs(&attrs, &ds).is_err());
    }

    #[test]
    fn nested_containers_are_walked() {
        let mut ds = sample_dataset();
        ds.data_vars.insert(
            "chl".into(),
            Variable::new(vec!["time".into()], DataArray::F64(vec![1.0, 2.0, 3.0], vec![3])),
        );
        let mut attrs = Attrs::new();
        attrs.insert("nested".into(), json!({"a": "{{ ds.chl[0] }}", "b": [1, "{{ ds.chl[1] }}"]}));
        let resolved = resolve_attrs(&attrs, &ds).unwrap();
        assert_eq!(resolved["nested"]["a"], json!(1));
        assert_eq!(resolved["nested"]["b"][1], json!(2));
    }
}
