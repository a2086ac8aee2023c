//! Desired replica count for component deployments

use k8s_openapi::api::core::v1::Node;
use mro_core::consts::MASTER_NODE_ROLE_LABEL;
use tracing::debug;

use crate::error::Result;
use crate::store::ClusterStore;

/// Where the desired replica count comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaSource {
    /// Always this many
    Fixed(i32),
    /// One replica on single-master clusters, two otherwise
    ControlPlane,
}

impl ReplicaSource {
    pub async fn resolve<S: ClusterStore>(&self, store: &S) -> Result<i32> {
        match self {
            ReplicaSource::Fixed(n) => Ok(*n),
            ReplicaSource::ControlPlane => {
                let nodes: Vec<Node> = store.list(None).await?;
                let masters = nodes
                    .iter()
                    .filter(|n| {
                        n.metadata
                            .labels
                            .as_ref()
                            .is_some_and(|l| l.contains_key(MASTER_NODE_ROLE_LABEL))
                    })
                    .count();
                debug!(masters, "counted control-plane nodes");
                Ok(if masters < 2 { 1 } else { 2 })
            }
        }
    }
}
