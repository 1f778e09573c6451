mod application;
mod presentation;

use std::process::ExitCode;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    match application::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("zappend: {err}");
            ExitCode::FAILURE
        }
    }
}
