pub mod handlers;

use clap::Parser;
use zappend_core::error::Result;

use crate::presentation::cli::Cli;

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(format) = &cli.help_config {
        return handlers::handle_help_config(format);
    }

    handlers::handle_process(&cli)
}
