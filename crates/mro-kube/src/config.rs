//! Operator configuration
//!
//! Loaded from an optional YAML file; the binary layers command-line flags
//! and environment variables on top before calling [`OperatorConfig::validate`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use mro_core::consts::{DEFAULT_OPERATOR_VERSION, NAMESPACE_MACHINE_API};

use crate::error::{OperatorError, Result};
use crate::replicas::ReplicaSource;

/// Runtime configuration of the reconciler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorConfig {
    /// Namespace the operator watches and installs into
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Image tag used when the configuration object sets none
    #[serde(default = "default_operator_version")]
    pub operator_version: String,

    /// Directory holding CRD manifests
    #[serde(default = "default_crds_manifests_dir")]
    pub crds_manifests_dir: PathBuf,

    /// Fixed desired replica count; derived from control-plane size when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Poll interval while components are not yet available
    #[serde(default = "default_requeue_after")]
    pub requeue_after_seconds: u64,

    /// Upper bound on one reconcile; 0 disables the bound
    #[serde(default = "default_reconcile_timeout")]
    pub reconcile_timeout_seconds: u64,
}

fn default_namespace() -> String {
    NAMESPACE_MACHINE_API.to_string()
}

fn default_operator_version() -> String {
    DEFAULT_OPERATOR_VERSION.to_string()
}

fn default_crds_manifests_dir() -> PathBuf {
    PathBuf::from("/data")
}

fn default_requeue_after() -> u64 {
    5
}

fn default_reconcile_timeout() -> u64 {
    60
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            operator_version: default_operator_version(),
            crds_manifests_dir: default_crds_manifests_dir(),
            replicas: None,
            requeue_after_seconds: default_requeue_after(),
            reconcile_timeout_seconds: default_reconcile_timeout(),
        }
    }
}

impl OperatorConfig {
    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(OperatorError::InvalidConfig(
                "namespace must not be empty".to_string(),
            ));
        }
        if self.operator_version.trim().is_empty() {
            return Err(OperatorError::InvalidConfig(
                "operator version must not be empty".to_string(),
            ));
        }
        if let Some(replicas) = self.replicas
            && replicas <= 0
        {
            return Err(OperatorError::InvalidConfig(format!(
                "replicas must be positive, got {}",
                replicas
            )));
        }
        if self.requeue_after_seconds == 0 {
            return Err(OperatorError::InvalidConfig(
                "requeue interval must be at least one second".to_string(),
            ));
        }
        Ok(())
    }

    pub fn requeue_after(&self) -> Duration {
        Duration::from_secs(self.requeue_after_seconds)
    }

    /// `None` when reconciles are unbounded
    pub fn reconcile_timeout(&self) -> Option<Duration> {
        (self.reconcile_timeout_seconds > 0)
            .then(|| Duration::from_secs(self.reconcile_timeout_seconds))
    }

    pub fn replica_source(&self) -> ReplicaSource {
        match self.replicas {
            Some(n) => ReplicaSource::Fixed(n),
            None => ReplicaSource::ControlPlane,
        }
    }
}
