//! CLI error types with exit code handling

use kdo_core::CoreError;
use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// Failure reported by resolution, rendering or the cluster
    #[error(transparent)]
    #[diagnostic(code(kdo::cli::chart))]
    Core(#[from] CoreError),

    #[error("Cannot connect to cluster: {message}")]
    #[diagnostic(
        code(kdo::cli::connection),
        help("check KUBECONFIG and the current context")
    )]
    Connection { message: String },

    #[error("Invalid arguments: {message}")]
    #[diagnostic(code(kdo::cli::usage))]
    Usage {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Internal error (runtime, unexpected failure)
    #[error("Internal error: {message}")]
    #[diagnostic(code(kdo::cli::internal))]
    Internal { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Core(err) => core_exit_code(err),
            CliError::Connection { .. } => exit_codes::CLUSTER_ERROR,
            CliError::Usage { .. } => exit_codes::USAGE_ERROR,
            CliError::Internal { .. } => exit_codes::ERROR,
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
            help: None,
        }
    }

    pub fn usage_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    pub fn connection(err: impl std::fmt::Display) -> Self {
        Self::Connection {
            message: err.to_string(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

fn core_exit_code(err: &CoreError) -> i32 {
    match err.root_cause() {
        CoreError::Resolution { .. } => exit_codes::RESOLUTION_ERROR,
        CoreError::Render { .. } | CoreError::Parse { .. } | CoreError::InvalidObject { .. } => {
            exit_codes::TEMPLATE_ERROR
        }
        CoreError::InvalidChart { .. }
        | CoreError::ValuesMerge { .. }
        | CoreError::GlobPattern { .. }
        | CoreError::FileAccess { .. }
        | CoreError::YamlParse(_)
        | CoreError::JsonParse(_)
        | CoreError::InvalidVersion(_) => exit_codes::CHART_ERROR,
        CoreError::Io(_) => exit_codes::IO_ERROR,
        CoreError::Apply { .. } | CoreError::NotFound { .. } | CoreError::Cluster { .. } => {
            exit_codes::CLUSTER_ERROR
        }
        CoreError::RolloutTimeout { .. } => exit_codes::TIMEOUT_ERROR,
        CoreError::SecretBackend { .. } => exit_codes::SECRET_ERROR,
        CoreError::InvalidOptions { .. } => exit_codes::USAGE_ERROR,
        CoreError::StreamCancelled | CoreError::InChart { .. } => exit_codes::ERROR,
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_exit_code_follows_root_cause() {
        let err = CliError::from(
            CoreError::RolloutTimeout {
                kind: "StatefulSet".to_string(),
                name: "uaa-master".to_string(),
                timeout: Duration::from_secs(5),
            }
            .in_chart("uaa"),
        );
        assert_eq!(err.exit_code(), exit_codes::TIMEOUT_ERROR);
        assert!(err.to_string().contains("uaa-master"));
    }

    #[test]
    fn test_exit_codes_by_category() {
        let resolution = CoreError::Resolution {
            reference: "catalog:cf".to_string(),
            message: "no entry".to_string(),
        };
        assert_eq!(CliError::from(resolution).exit_code(), exit_codes::RESOLUTION_ERROR);
        assert_eq!(CliError::connection("refused").exit_code(), exit_codes::CLUSTER_ERROR);
        assert_eq!(CliError::usage("bad tool").exit_code(), exit_codes::USAGE_ERROR);
    }
}
