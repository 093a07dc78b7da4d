//! kdo - Kubernetes deployment orchestrator

use std::process::ExitCode;

use kdo_engine::Extensions;

fn main() -> ExitCode {
    miette::set_panic_hook();
    kdo_cli::run_with(Extensions::default())
}
