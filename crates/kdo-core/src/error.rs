//! Core error types

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Cannot resolve chart reference '{reference}': {message}")]
    Resolution { reference: String, message: String },

    #[error("Failed to render chart '{chart}': {message}")]
    Render { chart: String, message: String },

    #[error("Jewel '{jewel}' could not be provisioned: {message}")]
    SecretBackend { jewel: String, message: String },

    #[error("Failed to apply {object}: {message}")]
    Apply { object: String, message: String },

    #[error("Rollout of {kind}/{name} did not complete within {timeout:?}")]
    RolloutTimeout {
        kind: String,
        name: String,
        timeout: Duration,
    },

    #[error("Object stream cancelled")]
    StreamCancelled,

    #[error("Malformed document #{index}: {message}")]
    Parse { index: usize, message: String },

    #[error("Invalid object: {message}")]
    InvalidObject { message: String },

    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    #[error("Invalid chart at {path}: {message}")]
    InvalidChart { path: String, message: String },

    #[error("Invalid options: {message}")]
    InvalidOptions { message: String },

    #[error("Cluster error: {message}")]
    Cluster { message: String },

    #[error("File access error for '{path}': {message}")]
    FileAccess { path: String, message: String },

    #[error("Invalid glob pattern: {message}")]
    GlobPattern { message: String },

    #[error("Values merge error: {message}")]
    ValuesMerge { message: String },

    #[error("Chart '{chart}' failed: {source}")]
    InChart {
        chart: String,
        #[source]
        source: Box<CoreError>,
    },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid version: {0}")]
    InvalidVersion(#[from] semver::Error),
}

impl CoreError {
    /// Attribute this error to a chart.
    ///
    /// An error already attributed to a (deeper) chart keeps its attribution,
    /// so the outermost caller always sees the chart that actually failed.
    pub fn in_chart(self, chart: impl Into<String>) -> Self {
        match self {
            err @ CoreError::InChart { .. } => err,
            err => CoreError::InChart {
                chart: chart.into(),
                source: Box::new(err),
            },
        }
    }

    /// Name of the chart this error is attributed to, if any
    pub fn chart(&self) -> Option<&str> {
        match self {
            CoreError::InChart { chart, .. } => Some(chart),
            _ => None,
        }
    }

    /// The error with chart attribution stripped
    pub fn root_cause(&self) -> &CoreError {
        match self {
            CoreError::InChart { source, .. } => source.root_cause(),
            err => err,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root_cause(), CoreError::NotFound { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root_cause(), CoreError::StreamCancelled)
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
