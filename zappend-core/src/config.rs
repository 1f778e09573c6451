//! Configuration. Loading config from YAML/JSON files, CLI flags and
//! environment-variable interpolation is an external collaborator; this
//! module owns the recognized-options table itself, a best-effort structural
//! validator standing in for full JSON-Schema, and the "deep-merge a list of
//! partial configs" behaviour callers are expected to layer configs with.

use crate::error::{Result, ZappendError};
use crate::fsutil::StorageOptions;
use crate::metadata::variable::{ChunkLen, DType, FillValue, VariableEncoding};
use indexmap::IndexMap;
use serde_json::{Map, Value};

/// `keep` / `replace` / `update` / `ignore`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AttrsUpdateMode {
    #[default]
    Keep,
    Replace,
    Update,
    Ignore,
}

impl AttrsUpdateMode {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "keep" => Ok(Self::Keep),
            "replace" => Ok(Self::Replace),
            "update" => Ok(Self::Update),
            "ignore" => Ok(Self::Ignore),
            other => Err(ZappendError::configuration(format!(
                "attrs_update_mode: expected one of keep/replace/update/ignore, got {other:?}"
            ))),
        }
    }
}

/// `null` / `"+"` / `"-"` / timedelta string / number.
#[derive(Clone, Debug, PartialEq)]
pub enum AppendStep {
    Increasing,
    Decreasing,
    Fixed(i64),
}

impl AppendStep {
    /// Parses `"+"`, `"-"`, or a timedelta string of the form
    /// `[<int>]<unit>` (unit one of `s`/`m`/`h`/`D`/`W`, count defaulting to
    /// 1, sign carried by a leading `-`) into a step.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "+" => Ok(Self::Increasing),
            "-" => Ok(Self::Decreasing),
            other => Ok(Self::Fixed(parse_timedelta(other)?)),
        }
    }
}

/// Parses a timedelta string `[<int>]<unit>` into a count of seconds. `unit`
/// is one of `s` (seconds), `m` (minutes), `h` (hours), `D` (days), or `W`
/// (weeks); the integer count defaults to 1 and may be negative.
fn parse_timedelta(s: &str) -> Result<i64> {
    let s = s.trim();
    let invalid = || {
        ZappendError::configuration(format!(
            "invalid timedelta string {s:?}: expected [<int>]<unit> with unit in s/m/h/D/W"
        ))
    };
    if s.is_empty() {
        return Err(invalid());
    }
    let bytes = s.as_bytes();
    let mut i = 0;
    if bytes[0] == b'-' || bytes[0] == b'+' {
        i = 1;
    }
    let digits_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let count: i64 = if i > digits_start {
        s[..i].parse().map_err(|_| invalid())?
    } else if bytes[0] == b'-' {
        -1
    } else {
        1
    };
    let unit = &s[i..];
    let unit_secs: i64 = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "D" => 86400,
        "W" => 604800,
        _ => return Err(invalid()),
    };
    Ok(count * unit_secs)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SlicePolling {
    #[default]
    Disabled,
    Enabled {
        interval_secs: u64,
        timeout_secs: u64,
    },
}

#[derive(Clone, Debug, Default)]
pub struct VariableConfig {
    pub dims: Option<Vec<String>>,
    pub encoding: VariableEncoding,
    pub attrs: Map<String, Value>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub target_dir: String,
    pub target_storage_options: StorageOptions,
    pub force_new: bool,
    pub temp_dir: Option<String>,
    pub temp_storage_options: StorageOptions,
    pub disable_rollback: bool,
    pub dry_run: bool,
    pub zarr_version: u32,
    pub fixed_dims: IndexMap<String, usize>,
    pub append_dim: String,
    pub append_step: Option<AppendStep>,
    pub variables: IndexMap<String, VariableConfig>,
    pub included_variables: Option<Vec<String>>,
    pub excluded_variables: Vec<String>,
    pub attrs: Map<String, Value>,
    pub attrs_update_mode: AttrsUpdateMode,
    pub permit_eval: bool,
    pub persist_mem_slices: bool,
    pub slice_engine: Option<String>,
    pub slice_storage_options: StorageOptions,
    pub slice_polling: SlicePolling,
    pub slice_source: Option<String>,
    pub slice_source_kwargs: Map<String, Value>,
    pub levels: Option<u32>,
    pub profiling: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_dir: String::new(),
            target_storage_options: StorageOptions::new(),
            force_new: false,
            temp_dir: None,
            temp_storage_options: StorageOptions::new(),
            disable_rollback: false,
            dry_run: false,
            zarr_version: 2,
            fixed_dims: IndexMap::new(),
            append_dim: "time".to_string(),
            append_step: None,
            variables: IndexMap::new(),
            included_variables: None,
            excluded_variables: Vec::new(),
            attrs: Map::new(),
            attrs_update_mode: AttrsUpdateMode::default(),
            permit_eval: false,
            persist_mem_slices: false,
            slice_engine: None,
            slice_storage_options: StorageOptions::new(),
            slice_polling: SlicePolling::default(),
            slice_source: None,
            slice_source_kwargs: Map::new(),
            levels: None,
            profiling: false,
        }
    }
}

impl Config {
    /// Variable-default overrides (`variables["*"]`), if configured.
    pub fn variable_defaults(&self) -> Option<&VariableConfig> {
        self.variables.get("*")
    }

    pub fn variable_config(&self, name: &str) -> Option<&VariableConfig> {
        self.variables.get(name)
    }

    /// Best-effort structural validation standing in for full JSON-Schema
    /// (schema validation proper is an external collaborator). Checks
    /// only the handful of constraints the rest of this crate relies on:
    /// `target_dir` is present and non-empty, `zarr_version` is the one
    /// supported major version, and `append_dim` is not also a fixed dim.
    pub fn validate(&self) -> Result<()> {
        if self.target_dir.is_empty() {
            return Err(ZappendError::configuration("target_dir is required"));
        }
        if self.zarr_version != 2 {
            return Err(ZappendError::configuration(format!(
                "unsupported zarr_version {}, expected 2",
                self.zarr_version
            )));
        }
        if self.fixed_dims.contains_key(&self.append_dim) {
            return Err(ZappendError::metadata(format!(
                "append_dim {:?} must not be a fixed dim",
                self.append_dim
            )));
        }
        if let Some(included) = &self.included_variables {
            for name in &self.excluded_variables {
                if included.contains(name) {
                    return Err(ZappendError::configuration(format!(
                        "variable {name:?} is both included and excluded"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Deep-merges `patch` over `self`: scalar/collection fields in `patch`
    /// replace `self`'s; `variables`, `attrs`, and `fixed_dims` are merged
    /// key-by-key (patch wins on conflicting keys). Mirrors the original
    /// config loader's "list of partial configs merged in order" behaviour.
    pub fn merge(mut self, patch: Config) -> Config {
        let default = Config::default();
        if patch.target_dir != default.target_dir {
            self.target_dir = patch.target_dir;
        }
        if !patch.target_storage_options.is_empty() {
            self.target_storage_options = patch.target_storage_options;
        }
        self.force_new = self.force_new || patch.force_new;
        if patch.temp_dir.is_some() {
            self.temp_dir = patch.temp_dir;
        }
        self.disable_rollback = self.disable_rollback || patch.disable_rollback;
        self.dry_run = self.dry_run || patch.dry_run;
        if patch.zarr_version != default.zarr_version {
            self.zarr_version = patch.zarr_version;
        }
        for (k, v) in patch.fixed_dims {
            self.fixed_dims.insert(k, v);
        }
        if patch.append_dim != default.append_dim {
            self.append_dim = patch.append_dim;
        }
        if patch.append_step.is_some() {
            self.append_step = patch.append_step;
        }
        for (k, v) in patch.variables {
            self.variables.insert(k, v);
        }
        if patch.included_variables.is_some() {
            self.included_variables = patch.included_variables;
        }
        for name in patch.excluded_variables {
            if !self.excluded_variables.contains(&name) {
                self.excluded_variables.push(name);
            }
        }
        for (k, v) in patch.attrs {
            self.attrs.insert(k, v);
        }
        if patch.attrs_update_mode != default.attrs_update_mode {
            self.attrs_update_mode = patch.attrs_update_mode;
        }
        self.permit_eval = self.permit_eval || patch.permit_eval;
        self.persist_mem_slices = self.persist_mem_slices || patch.persist_mem_slices;
        if patch.slice_engine.is_some() {
            self.slice_engine = patch.slice_engine;
        }
        if patch.slice_polling != default.slice_polling {
            self.slice_polling = patch.slice_polling;
        }
        if patch.slice_source.is_some() {
            self.slice_source = patch.slice_source;
        }
        for (k, v) in patch.slice_source_kwargs {
            self.slice_source_kwargs.insert(k, v);
        }
        if patch.levels.is_some() {
            self.levels = patch.levels;
        }
        self.profiling = self.profiling || patch.profiling;
        self
    }

    /// Parses the subset of `attrs_update_mode` recognised values from a
    /// loosely-typed JSON config (used by [`Config::from_value`]).
    pub fn attrs_update_mode_from_str(s: &str) -> Result<AttrsUpdateMode> {
        AttrsUpdateMode::parse(s)
    }

    /// Builds a [`Config`] from a single loosely-typed JSON object, as read
    /// from a `--config` file or an in-process override map. Fields absent
    /// from `value` keep [`Config::default`]'s value; callers that need
    /// several partial configs merged in order should fold successive
    /// [`Config::from_value`] results with [`Config::merge`].
    pub fn from_value(value: Value) -> Result<Config> {
        let obj = match value {
            Value::Object(m) => m,
            Value::Null => Map::new(),
            other => {
                return Err(ZappendError::configuration(format!(
                    "config must be a JSON object, got {other:?}"
                )));
            }
        };
        let mut config = Config::default();

        if let Some(v) = get_str(&obj, "target_dir")? {
            config.target_dir = v;
        }
        if let Some(v) = obj.get("target_storage_options") {
            config.target_storage_options = parse_storage_options(v)?;
        }
        if let Some(v) = get_bool(&obj, "force_new")? {
            config.force_new = v;
        }
        if let Some(v) = obj.get("temp_dir") {
            config.temp_dir = if v.is_null() { None } else { Some(as_string(v, "temp_dir")?) };
        }
        if let Some(v) = obj.get("temp_storage_options") {
            config.temp_storage_options = parse_storage_options(v)?;
        }
        if let Some(v) = get_bool(&obj, "disable_rollback")? {
            config.disable_rollback = v;
        }
        if let Some(v) = get_bool(&obj, "dry_run")? {
            config.dry_run = v;
        }
        if let Some(v) = obj.get("zarr_version") {
            config.zarr_version = v.as_u64().ok_or_else(|| invalid_field("zarr_version"))? as u32;
        }
        if let Some(Value::Object(m)) = obj.get("fixed_dims") {
            for (k, v) in m {
                let n = v.as_u64().ok_or_else(|| invalid_field("fixed_dims"))? as usize;
                config.fixed_dims.insert(k.clone(), n);
            }
        }
        if let Some(v) = get_str(&obj, "append_dim")? {
            config.append_dim = v;
        }
        if let Some(v) = obj.get("append_step") {
            config.append_step = parse_append_step_value(v)?;
        }
        if let Some(Value::Object(m)) = obj.get("variables") {
            for (name, v) in m {
                config.variables.insert(name.clone(), parse_variable_config(v)?);
            }
        }
        if let Some(v) = obj.get("included_variables") {
            config.included_variables = if v.is_null() {
                None
            } else {
                Some(as_string_vec(v, "included_variables")?)
            };
        }
        if let Some(v) = obj.get("excluded_variables") {
            config.excluded_variables = as_string_vec(v, "excluded_variables")?;
        }
        if let Some(Value::Object(m)) = obj.get("attrs") {
            config.attrs = m.clone();
        }
        if let Some(v) = get_str(&obj, "attrs_update_mode")? {
            config.attrs_update_mode = AttrsUpdateMode::parse(&v)?;
        }
        if let Some(v) = get_bool(&obj, "permit_eval")? {
            config.permit_eval = v;
        }
        if let Some(v) = get_bool(&obj, "persist_mem_slices")? {
            config.persist_mem_slices = v;
        }
        if let Some(v) = obj.get("slice_engine") {
            config.slice_engine = if v.is_null() { None } else { Some(as_string(v, "slice_engine")?) };
        }
        if let Some(v) = obj.get("slice_storage_options") {
            config.slice_storage_options = parse_storage_options(v)?;
        }
        if let Some(v) = obj.get("slice_polling") {
            config.slice_polling = parse_slice_polling(v)?;
        }
        if let Some(v) = obj.get("slice_source") {
            config.slice_source = if v.is_null() { None } else { Some(as_string(v, "slice_source")?) };
        }
        if let Some(Value::Object(m)) = obj.get("slice_source_kwargs") {
            config.slice_source_kwargs = m.clone();
        }
        if let Some(v) = obj.get("levels") {
            config.levels = if v.is_null() {
                None
            } else {
                Some(v.as_u64().ok_or_else(|| invalid_field("levels"))? as u32)
            };
        }
        if let Some(v) = get_bool(&obj, "profiling")? {
            config.profiling = v;
        }
        Ok(config)
    }
}

fn invalid_field(name: &str) -> ZappendError {
    ZappendError::configuration(format!("invalid value for {name:?}"))
}

fn as_string(v: &Value, field: &str) -> Result<String> {
    v.as_str().map(str::to_string).ok_or_else(|| invalid_field(field))
}

fn as_string_vec(v: &Value, field: &str) -> Result<Vec<String>> {
    v.as_array()
        .ok_or_else(|| invalid_field(field))?
        .iter()
        .map(|e| as_string(e, field))
        .collect()
}

fn get_str(obj: &Map<String, Value>, key: &str) -> Result<Option<String>> {
    match obj.get(key) {
        None => Ok(None),
        Some(v) => Ok(Some(as_string(v, key)?)),
    }
}

fn get_bool(obj: &Map<String, Value>, key: &str) -> Result<Option<bool>> {
    match obj.get(key) {
        None => Ok(None),
        Some(v) => Ok(Some(v.as_bool().ok_or_else(|| invalid_field(key))?)),
    }
}

fn parse_storage_options(v: &Value) -> Result<StorageOptions> {
    let Value::Object(m) = v else {
        return Err(invalid_field("storage_options"));
    };
    let pairs = m
        .iter()
        .map(|(k, val)| Ok((k.clone(), as_string(val, "storage_options")?)))
        .collect::<Result<Vec<(String, String)>>>()?;
    Ok(StorageOptions::from_pairs(pairs))
}

fn parse_append_step_value(v: &Value) -> Result<Option<AppendStep>> {
    match v {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(AppendStep::parse(s)?)),
        Value::Number(n) => {
            let i = n.as_i64().ok_or_else(|| invalid_field("append_step"))?;
            Ok(Some(AppendStep::Fixed(i)))
        }
        _ => Err(invalid_field("append_step")),
    }
}

fn parse_slice_polling(v: &Value) -> Result<SlicePolling> {
    match v {
        Value::Null | Value::Bool(false) => Ok(SlicePolling::Disabled),
        Value::Bool(true) => Ok(SlicePolling::Enabled {
            interval_secs: 2,
            timeout_secs: 60,
        }),
        Value::Object(m) => {
            let interval_secs = m
                .get("interval")
                .and_then(Value::as_u64)
                .unwrap_or(2);
            let timeout_secs = m
                .get("timeout")
                .and_then(Value::as_u64)
                .unwrap_or(60);
            Ok(SlicePolling::Enabled {
                interval_secs,
                timeout_secs,
            })
        }
        _ => Err(invalid_field("slice_polling")),
    }
}

fn parse_variable_config(v: &Value) -> Result<VariableConfig> {
    let Value::Object(m) = v else {
        return Err(invalid_field("variables"));
    };
    let dims = match m.get("dims") {
        None | Some(Value::Null) => None,
        Some(other) => Some(as_string_vec(other, "dims")?),
    };
    let attrs = match m.get("attrs") {
        Some(Value::Object(a)) => a.clone(),
        _ => Map::new(),
    };
    let encoding = parse_variable_encoding(m)?;
    Ok(VariableConfig { dims, encoding, attrs })
}

/// Builds a [`VariableEncoding`] from a variable's config map: a key absent
/// from `m` is *unset*, a key present with `null` is an explicit null, and
/// an alias (`chunksizes` for `chunks`) is folded in only when the primary
/// key itself is unset.
fn parse_variable_encoding(m: &Map<String, Value>) -> Result<VariableEncoding> {
    let mut enc = VariableEncoding::default();
    if let Some(v) = m.get("dtype") {
        enc.dtype = Some(unsettable(v, parse_dtype)?);
    }
    let chunks_key = if m.contains_key("chunks") { "chunks" } else { "chunksizes" };
    if let Some(v) = m.get(chunks_key) {
        enc.chunks = Some(unsettable(v, parse_chunks)?);
    }
    if let Some(v) = m.get("fill_value") {
        enc.fill_value = Some(unsettable(v, parse_fill_value)?);
    }
    if let Some(v) = m.get("scale_factor") {
        enc.scale_factor = Some(unsettable(v, |v| {
            v.as_f64().ok_or_else(|| invalid_field("scale_factor"))
        })?);
    }
    if let Some(v) = m.get("add_offset") {
        enc.add_offset = Some(unsettable(v, |v| {
            v.as_f64().ok_or_else(|| invalid_field("add_offset"))
        })?);
    }
    if let Some(v) = m.get("units") {
        enc.units = Some(unsettable(v, |v| as_string(v, "units"))?);
    }
    if let Some(v) = m.get("calendar") {
        enc.calendar = Some(unsettable(v, |v| as_string(v, "calendar"))?);
    }
    if let Some(v) = m.get("compressor") {
        enc.compressor = Some(unsettable(v, |v| {
            serde_json::from_value(v.clone()).map_err(|e| {
                ZappendError::configuration(format!("invalid compressor: {e}"))
            })
        })?);
    }
    if let Some(v) = m.get("filters") {
        enc.filters = Some(unsettable(v, |v| {
            serde_json::from_value(v.clone())
                .map_err(|e| ZappendError::configuration(format!("invalid filters: {e}")))
        })?);
    }
    Ok(enc)
}

fn unsettable<T>(v: &Value, parse: impl FnOnce(&Value) -> Result<T>) -> Result<Option<T>> {
    if v.is_null() {
        Ok(None)
    } else {
        Ok(Some(parse(v)?))
    }
}

fn parse_dtype(v: &Value) -> Result<DType> {
    let s = v.as_str().ok_or_else(|| invalid_field("dtype"))?;
    Ok(match s {
        "i2" | "<i2" | "i16" => DType::I16,
        "u2" | "<u2" | "u16" => DType::U16,
        "i4" | "<i4" | "i32" => DType::I32,
        "u4" | "<u4" | "u32" => DType::U32,
        "i8" | "<i8" | "i64" => DType::I64,
        "f4" | "<f4" | "f32" => DType::F32,
        "f8" | "<f8" | "f64" => DType::F64,
        other => return Err(invalid_field(&format!("dtype: {other:?}"))),
    })
}

fn parse_chunks(v: &Value) -> Result<Vec<ChunkLen>> {
    v.as_array()
        .ok_or_else(|| invalid_field("chunks"))?
        .iter()
        .map(|e| {
            if e.is_null() {
                Ok(ChunkLen::Full)
            } else {
                Ok(ChunkLen::Fixed(e.as_u64().ok_or_else(|| invalid_field("chunks"))?))
            }
        })
        .collect()
}

fn parse_fill_value(v: &Value) -> Result<FillValue> {
    if let Some(s) = v.as_str() {
        if s.eq_ignore_ascii_case("nan") {
            return Ok(FillValue::NaN);
        }
        return Err(invalid_field("fill_value"));
    }
    v.as_f64().map(FillValue::Number).ok_or_else(|| invalid_field("fill_value"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_target_dir() {
        let cfg = Config::default();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_append_dim_in_fixed_dims() {
        let mut cfg = Config {
            target_dir: "/tmp/x.zarr".into(),
            ..Default::default()
        };
        cfg.fixed_dims.insert("time".into(), 3);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn timedelta_strings_parse_into_fixed_steps() {
        assert_eq!(AppendStep::parse("1D").unwrap(), AppendStep::Fixed(86400));
        assert_eq!(AppendStep::parse("D").unwrap(), AppendStep::Fixed(86400));
        assert_eq!(AppendStep::parse("30m").unwrap(), AppendStep::Fixed(1800));
        assert_eq!(AppendStep::parse("-1h").unwrap(), AppendStep::Fixed(-3600));
        assert_eq!(AppendStep::parse("+").unwrap(), AppendStep::Increasing);
        assert_eq!(AppendStep::parse("-").unwrap(), AppendStep::Decreasing);
        assert!(AppendStep::parse("1x").is_err());
    }

    #[test]
    fn from_value_reads_scalars_and_nested_maps() {
        let value = serde_json::json!({
            "target_dir": "/data/t.zarr",
            "force_new": true,
            "append_dim": "time",
            "append_step": "1D",
            "fixed_dims": {"lat": 180},
            "variables": {
                "chl": {"dims": ["time", "lat"], "dtype": "f4", "chunks": [1, null]},
            },
            "attrs": {"title": "demo"},
        });
        let config = Config::from_value(value).unwrap();
        assert_eq!(config.target_dir, "/data/t.zarr");
        assert!(config.force_new);
        assert_eq!(config.append_step, Some(AppendStep::Fixed(86400)));
        assert_eq!(config.fixed_dims.get("lat"), Some(&180));
        let chl = config.variables.get("chl").unwrap();
        assert_eq!(chl.dims.as_deref(), Some(&["time".to_string(), "lat".to_string()][..]));
        assert_eq!(chl.encoding.dtype, Some(Some(DType::F32)));
        assert_eq!(config.attrs["title"], serde_json::json!("demo"));
    }

    #[test]
    fn merge_patch_wins_on_scalars_unions_collections() {
        let base = Config {
            target_dir: "/a".into(),
            force_new: false,
            ..Default::default()
        };
        let mut patch = Config::default();
        patch.force_new = true;
        patch.fixed_dims.insert("y".into(), 50);
        let merged = base.merge(patch);
        assert_eq!(merged.target_dir, "/a");
        assert!(merged.force_new);
        assert_eq!(merged.fixed_dims.get("y"), Some(&50));
    }
}
