use std::path::PathBuf;

use tracing::info;
use zappend_core::config::Config;
use zappend_core::error::{Result, ZappendError};
use zappend_core::{Processor, SliceItem};

use crate::presentation::cli::Cli;

/// Builds the effective config: every `--config` file folded in order, then
/// the command-line overrides layered last.
pub fn build_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::default();
    for path in &cli.config {
        let value = read_json_file(path)?;
        config = config.merge(Config::from_value(value)?);
    }

    let mut overrides = Config::default();
    if let Some(target) = cli.target_dir.clone().or_else(|| cli.target.clone()) {
        overrides.target_dir = target;
    }
    overrides.force_new = cli.force_new;
    overrides.dry_run = cli.dry_run;
    config = config.merge(overrides);

    Ok(config)
}

fn read_json_file(path: &PathBuf) -> Result<serde_json::Value> {
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(ZappendError::from)
}

/// Runs one `process_slices` invocation end to end: builds the config,
/// treats every positional slice argument as a URI, and hands both to the
/// processor.
pub fn handle_process(cli: &Cli) -> Result<()> {
    let config = build_config(cli)?;
    info!(target_dir = %config.target_dir, slices = cli.slices.len(), "processing slices");
    let processor = Processor::new(config)?;
    let slices = cli.slices.iter().cloned().map(SliceItem::Uri).collect();
    processor.process_slices(slices)
}

/// Prints the recognised config option table in the requested format
/// and returns without touching any slices.
pub fn handle_help_config(format: &str) -> Result<()> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&schema_json())?),
        "md" => println!("{}", schema_markdown()),
        other => {
            return Err(ZappendError::configuration(format!(
                "--help-config: expected \"json\" or \"md\", got {other:?}"
            )));
        }
    }
    Ok(())
}

const OPTIONS: &[(&str, &str, &str)] = &[
    ("target_dir", "string", "the dataset directory to create or append to"),
    ("target_storage_options", "object", "backend options for the target store"),
    ("force_new", "boolean", "delete and recreate the target instead of appending"),
    ("temp_dir", "string | null", "scratch directory for materialised in-memory slices"),
    ("temp_storage_options", "object", "backend options for the scratch store"),
    ("disable_rollback", "boolean", "skip writing a rollback log (no recovery on failure)"),
    ("dry_run", "boolean", "validate every slice without writing anything"),
    ("zarr_version", "integer", "on-disk Zarr major version (only 2 is supported)"),
    ("fixed_dims", "object", "dimension name to fixed size, for dims that never grow"),
    ("append_dim", "string", "the dimension slices are appended along"),
    ("append_step", "null | \"+\" | \"-\" | string | number", "expected spacing between append-dim values"),
    ("variables", "object", "per-variable dims/encoding/attrs overrides"),
    ("included_variables", "array | null", "restrict the outline to exactly these variables"),
    ("excluded_variables", "array", "variables to drop from the outline"),
    ("attrs", "object", "dataset-level attrs to always apply, highest priority"),
    ("attrs_update_mode", "string", "keep | replace | update | ignore"),
    ("permit_eval", "boolean", "allow attribute templates to run arbitrary functions"),
    ("persist_mem_slices", "boolean", "materialise in-memory slices to scratch storage before use"),
    ("slice_engine", "string | null", "reserved for alternate slice-opening backends"),
    ("slice_storage_options", "object", "backend options for opening slice sources"),
    ("slice_polling", "boolean | object | null", "retry opening a slice until it appears"),
    ("slice_source", "string | null", "reserved for named slice-source plugins"),
    ("slice_source_kwargs", "object", "reserved for named slice-source plugin arguments"),
    ("levels", "integer | null", "number of coarsened pyramid levels to write after each commit"),
    ("profiling", "boolean", "reserved for timing instrumentation"),
];

fn schema_json() -> serde_json::Value {
    let fields: serde_json::Map<String, serde_json::Value> = OPTIONS
        .iter()
        .map(|(name, ty, doc)| {
            (
                name.to_string(),
                serde_json::json!({ "type": ty, "description": doc }),
            )
        })
        .collect();
    serde_json::Value::Object(fields)
}

fn schema_markdown() -> String {
    let mut out = String::from("| option | type | description |\n| --- | --- | --- |\n");
    for (name, ty, doc) in OPTIONS {
        out.push_str(&format!("| `{name}` | {ty} | {doc} |\n"));
    }
    out
}
