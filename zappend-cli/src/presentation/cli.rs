use clap::Parser;
use std::path::PathBuf;

/// Atomically append dataset slices to a growing, chunked target.
#[derive(Parser, Debug)]
#[command(author, version, about = "Atomically append dataset slices to a growing target", long_about = None)]
pub struct Cli {
    /// Target dataset directory (a Zarr-like store) to create or append to.
    /// May be omitted when `--config` already sets `target_dir`, or when
    /// `--help-config` is given.
    pub target: Option<String>,

    /// Slice sources to append, in order (URIs to existing Zarr-like
    /// directories; in-process callers use the library API directly for
    /// in-memory slices).
    pub slices: Vec<String>,

    /// A JSON config file. May be given more than once; later files are
    /// merged over earlier ones, and CLI flags are merged last.
    #[arg(short, long = "config", value_name = "PATH")]
    pub config: Vec<PathBuf>,

    /// Overrides `target_dir` from the command line, taking precedence over
    /// both the positional `target` and any `--config` file.
    #[arg(long = "target-dir", value_name = "DIR")]
    pub target_dir: Option<String>,

    /// Delete an existing target first, so it is recreated from scratch.
    #[arg(long)]
    pub force_new: bool,

    /// Validate the outline and every slice without writing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Print the full recognised config option table and exit, without
    /// processing any slices. One of `json` or `md`.
    #[arg(long = "help-config", value_name = "FORMAT")]
    pub help_config: Option<String>,
}
