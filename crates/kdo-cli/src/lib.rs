//! kdo command line
//!
//! The `kdo` binary is a thin wrapper around [`run_with`]. Hosts that ship
//! their own methods, values or jewel backends build an [`Extensions`]
//! registry and call [`run_with`] from their own `main`:
//!
//! ```rust,no_run
//! use kdo_engine::{Extensions, Module};
//!
//! fn main() -> std::process::ExitCode {
//!     let extensions = Extensions::new()
//!         .register("site", Module::new().with_value("region", "eu-central-1"));
//!     kdo_cli::run_with(extensions)
//! }
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use kdo_core::Values;
use kdo_engine::{ChartLoader, Extensions};
use kdo_kube::Orchestrator;
use tracing_subscriber::EnvFilter;

pub mod commands;
pub mod error;
pub mod exit_codes;

use error::{CliError, Result};

#[derive(Parser, Debug)]
#[command(name = "kdo")]
#[command(version)]
#[command(about = "Kubernetes deployment orchestrator", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug output
    #[arg(long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply a chart tree to the cluster
    Apply {
        /// Chart reference: directory, archive, URL or catalog:<alias>
        reference: String,

        /// Namespace of the root chart
        #[arg(short, long, env = "KDO_NAMESPACE")]
        namespace: Option<String>,

        #[command(flatten)]
        values: ValuesArgs,

        /// Treat missing objects as success
        #[arg(long)]
        ignore_not_found: bool,

        /// Apply objects without a namespace
        #[arg(long)]
        cluster_scoped: bool,

        /// Timeout in seconds for rollouts and waits (0 = unbounded)
        #[arg(long, env = "KDO_TIMEOUT", default_value_t = 0)]
        timeout: u64,

        /// How objects are written: server-side or replace
        #[arg(long, default_value = "server-side")]
        tool: String,
    },

    /// Render a chart tree locally
    Template {
        /// Chart reference: directory, archive, URL or catalog:<alias>
        reference: String,

        /// Namespace of the root chart
        #[arg(short, long, env = "KDO_NAMESPACE")]
        namespace: Option<String>,

        #[command(flatten)]
        values: ValuesArgs,
    },

    /// List applied charts
    List {
        /// Only list charts in this namespace
        #[arg(short, long, env = "KDO_NAMESPACE")]
        namespace: Option<String>,
    },
}

/// Value overrides shared by `apply` and `template`
#[derive(Args, Debug, Default)]
pub struct ValuesArgs {
    /// Values file(s) to merge
    #[arg(short = 'f', long = "values")]
    pub files: Vec<PathBuf>,

    /// Set values on command line (key=value)
    #[arg(long = "set")]
    pub set: Vec<String>,
}

impl ValuesArgs {
    /// Files in order, then `--set` pairs
    pub fn load(&self) -> Result<Values> {
        let mut values = Values::new();
        for file in &self.files {
            values.merge(&Values::from_file(file)?);
            tracing::debug!(file = %file.display(), "merged values file");
        }
        if !self.set.is_empty() {
            values.merge(&kdo_core::parse_set_values(&self.set)?);
        }
        Ok(values)
    }
}

/// Parse the command line and run it with `extensions` registered
pub fn run_with(extensions: Extensions) -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match execute(cli, extensions) {
        Ok(()) => ExitCode::from(exit_codes::SUCCESS as u8),
        Err(err) => {
            let code = err.exit_code();
            eprintln!("{:?}", miette::Report::new(err));
            ExitCode::from(code as u8)
        }
    }
}

fn execute(cli: Cli, extensions: Extensions) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::internal(format!("cannot start runtime: {}", e)))?;
    let orchestrator = Orchestrator::new(ChartLoader::new(extensions));

    runtime.block_on(async {
        match cli.command {
            Commands::Apply {
                reference,
                namespace,
                values,
                ignore_not_found,
                cluster_scoped,
                timeout,
                tool,
            } => {
                let args = commands::apply::ApplyArgs {
                    reference,
                    namespace,
                    values,
                    ignore_not_found,
                    cluster_scoped,
                    timeout,
                    tool,
                };
                commands::apply::run(&orchestrator, &args).await
            }
            Commands::Template {
                reference,
                namespace,
                values,
            } => commands::template::run(&orchestrator, &reference, namespace.as_deref(), &values).await,
            Commands::List { namespace } => commands::list::run(namespace.as_deref()).await,
        }
    })
}

/// `RUST_LOG` wins; otherwise `warn`, or `info` with `--debug`
fn init_tracing(debug: bool) {
    let default_level = if debug { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_apply() {
        let cli = Cli::try_parse_from([
            "kdo", "apply", "catalog:uaa", "-n", "uaa", "--set", "replicas=3", "--timeout", "30",
            "--tool", "replace", "--debug",
        ])
        .unwrap();
        assert!(cli.debug);
        match cli.command {
            Commands::Apply {
                reference,
                namespace,
                values,
                timeout,
                tool,
                ..
            } => {
                assert_eq!(reference, "catalog:uaa");
                assert_eq!(namespace.as_deref(), Some("uaa"));
                assert_eq!(values.set, vec!["replicas=3".to_string()]);
                assert_eq!(timeout, 30);
                assert_eq!(tool, "replace");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_values_files_then_set() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("prod.yaml");
        std::fs::write(&file, "replicas: 2\nimage: uaa:1\n").unwrap();

        let args = ValuesArgs {
            files: vec![file],
            set: vec!["replicas=5".to_string()],
        };
        let values = args.load().unwrap();
        assert_eq!(values.get("replicas").unwrap(), 5);
        assert_eq!(values.get("image").unwrap().as_str(), Some("uaa:1"));
    }
}
