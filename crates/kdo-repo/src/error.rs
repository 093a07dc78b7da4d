//! Error types for chart acquisition

use kdo_core::CoreError;
use thiserror::Error;

/// Chart acquisition errors
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("Chart not found at {path}")]
    NotFound { path: String },

    #[error("HTTP error: {status} - {url}")]
    HttpError { status: u16, url: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Unsupported archive: {message}")]
    Archive { message: String },

    #[error("Catalog has no entry '{alias}'")]
    UnknownAlias { alias: String },

    #[error("Invalid catalog: {message}")]
    InvalidCatalog { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for acquisition operations
pub type Result<T> = std::result::Result<T, RepoError>;

impl RepoError {
    /// The error as a failure to resolve `reference`
    pub fn into_resolution(self, reference: &str) -> CoreError {
        CoreError::Resolution {
            reference: reference.to_string(),
            message: self.to_string(),
        }
    }
}

impl From<reqwest::Error> for RepoError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => RepoError::HttpError {
                status: status.as_u16(),
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
            },
            None => RepoError::NetworkError {
                message: e.to_string(),
            },
        }
    }
}

impl From<serde_yaml::Error> for RepoError {
    fn from(e: serde_yaml::Error) -> Self {
        RepoError::Serialization(e.to_string())
    }
}

impl From<zip::result::ZipError> for RepoError {
    fn from(e: zip::result::ZipError) -> Self {
        RepoError::Archive {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_resolution_keeps_reference_and_cause() {
        let err = RepoError::UnknownAlias {
            alias: "istio".to_string(),
        }
        .into_resolution("catalog:istio");

        match err {
            CoreError::Resolution { reference, message } => {
                assert_eq!(reference, "catalog:istio");
                assert!(message.contains("'istio'"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
