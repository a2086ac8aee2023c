//! Error types for mro-kube

use mro_core::CoreError;
use thiserror::Error;

/// Result type for mro-kube operations
pub type Result<T> = std::result::Result<T, OperatorError>;

/// Errors that can occur while reconciling
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OperatorError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Object does not exist in the store
    #[error("{kind} '{name}' not found{}", in_namespace(.namespace))]
    NotFound {
        kind: String,
        namespace: Option<String>,
        name: String,
    },

    /// Object already exists in the store
    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: String, name: String },

    /// Write lost an optimistic-concurrency race
    #[error("conflict writing {kind} '{name}': the object has been modified")]
    Conflict { kind: String, name: String },

    /// Any other store failure
    #[error("store error: {0}")]
    Store(String),

    /// Platform lookup failed
    #[error("platform lookup failed: {0}")]
    Platform(String),

    /// Manifest loading failed
    #[error("manifest error: {0}")]
    Manifest(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Timeout
    #[error("operation timed out after {0}")]
    Timeout(String),

    /// Some owned resources could not be deleted
    #[error("teardown failed for {} resource(s): {}", .failed.len(), join_failures(.failed))]
    Teardown { failed: Vec<(String, String)> },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn in_namespace(namespace: &Option<String>) -> String {
    namespace
        .as_deref()
        .map(|ns| format!(" in namespace '{}'", ns))
        .unwrap_or_default()
}

fn join_failures(failed: &[(String, String)]) -> String {
    failed
        .iter()
        .map(|(resource, error)| format!("{}: {}", resource, error))
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<serde_json::Error> for OperatorError {
    fn from(e: serde_json::Error) -> Self {
        OperatorError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for OperatorError {
    fn from(e: serde_yaml::Error) -> Self {
        OperatorError::Serialization(e.to_string())
    }
}

impl From<CoreError> for OperatorError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::UnknownPlatform(_) | CoreError::MissingField { .. } => {
                OperatorError::Platform(e.to_string())
            }
            CoreError::UnknownConditionType(_) => OperatorError::Serialization(e.to_string()),
        }
    }
}

impl OperatorError {
    /// Check if this is a not-found error (typed or Kubernetes 404)
    pub fn is_not_found(&self) -> bool {
        match self {
            OperatorError::NotFound { .. } => true,
            OperatorError::Api(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }

    /// Check if this is a conflict error (409)
    pub fn is_conflict(&self) -> bool {
        match self {
            OperatorError::Conflict { .. } => true,
            OperatorError::Api(kube::Error::Api(resp)) => {
                resp.code == 409 && resp.reason == "Conflict"
            }
            _ => false,
        }
    }

    /// Check if this is an already-exists error (409 AlreadyExists)
    pub fn is_already_exists(&self) -> bool {
        match self {
            OperatorError::AlreadyExists { .. } => true,
            OperatorError::Api(kube::Error::Api(resp)) => {
                resp.code == 409 && resp.reason == "AlreadyExists"
            }
            _ => false,
        }
    }

    /// Whether a retry without any external change can succeed
    pub fn is_retriable(&self) -> bool {
        !matches!(
            self,
            OperatorError::InvalidConfig(_)
                | OperatorError::Manifest(_)
                | OperatorError::Serialization(_)
        )
    }

    /// CamelCase reason used on the Degraded condition
    pub fn reason(&self) -> &'static str {
        match self {
            OperatorError::Platform(_) => "PlatformLookupFailed",
            OperatorError::Manifest(_) => "ManifestLoadFailed",
            OperatorError::InvalidConfig(_) => "InvalidConfiguration",
            OperatorError::Timeout(_) => "ReconcileTimeout",
            OperatorError::Teardown { .. } => "TeardownFailed",
            OperatorError::Conflict { .. } => "WriteConflict",
            _ => "ReconcileFailed",
        }
    }
}
