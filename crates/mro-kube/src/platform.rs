//! Platform oracle
//!
//! Answers one question: which infrastructure platform does the cluster run
//! on. A failed lookup is an error for the caller to surface, never a
//! silent default.

use async_trait::async_trait;
use mro_core::{Infrastructure, Platform};

use crate::error::{OperatorError, Result};
use crate::store::{ClusterStore, ObjectKey};

/// Read-only platform lookup
#[async_trait]
pub trait PlatformOracle: Send + Sync {
    /// Platform variant of the named cluster infrastructure
    async fn platform(&self, cluster_name: &str) -> Result<Platform>;
}

/// Reads the cluster-scoped `Infrastructure` descriptor from the store
#[derive(Clone)]
pub struct InfrastructureOracle<S> {
    store: S,
}

impl<S: ClusterStore> InfrastructureOracle<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: ClusterStore> PlatformOracle for InfrastructureOracle<S> {
    async fn platform(&self, cluster_name: &str) -> Result<Platform> {
        let infra: Infrastructure = self
            .store
            .get(&ObjectKey::cluster(cluster_name))
            .await
            .map_err(|e| {
                OperatorError::Platform(format!(
                    "reading infrastructure '{}': {}",
                    cluster_name, e
                ))
            })?;
        Ok(infra.platform()?)
    }
}

/// Fixed answer, for clusters without an infrastructure descriptor
#[derive(Debug, Clone, Copy)]
pub struct StaticPlatform(pub Platform);

#[async_trait]
impl PlatformOracle for StaticPlatform {
    async fn platform(&self, _cluster_name: &str) -> Result<Platform> {
        Ok(self.0)
    }
}
