//! Error types for kdo-kube

use kdo_core::CoreError;
use thiserror::Error;

/// Result type for kdo-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors raised by the Kubernetes transport
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Kubeconfig could not be loaded
    #[error("cannot load kubeconfig: {0}")]
    Config(String),

    /// Neither discovery nor the core tables know the kind
    #[error("unknown resource type: {kind}{}", api_version.as_deref().map(|v| format!(" ({})", v)).unwrap_or_default())]
    UnknownResource {
        kind: String,
        api_version: Option<String>,
    },

    /// Object can not be sent to the API server
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl KubeError {
    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(e)) if e.code == 404)
    }

    /// Check if this is a conflict error
    pub fn is_conflict(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(e)) if e.code == 409)
    }

    /// Attribute a failed write to `object`
    pub fn into_apply(self, object: &str) -> CoreError {
        CoreError::Apply {
            object: object.to_string(),
            message: self.to_string(),
        }
    }
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<KubeError> for CoreError {
    fn from(e: KubeError) -> Self {
        CoreError::Cluster {
            message: e.to_string(),
        }
    }
}
