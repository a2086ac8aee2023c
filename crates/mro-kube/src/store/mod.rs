//! Cluster store abstraction
//!
//! The reconciler only ever talks to the cluster through [`ClusterStore`]:
//! typed CRUD keyed by namespace and name, plus list-by-kind. Two backends:
//! - **Live** ([`KubeClusterStore`]): the Kubernetes API server via kube-rs
//! - **Mock** ([`MockClusterStore`]): an in-memory store for tests that keeps
//!   resource versions, status-subresource separation and finalizer-blocked
//!   deletion close to what the API server does
//!
//! Every call is a single atomic operation on one object; nothing is
//! transactional across objects.

mod live;
mod mock;

pub use live::KubeClusterStore;
pub use mock::{MockClusterStore, OperationCounts, Verb};

use async_trait::async_trait;
use kube::Resource;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;

use crate::error::Result;

/// Types the store can hold
pub trait StoreObject:
    Resource<DynamicType = ()> + Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> StoreObject for T where
    T: Resource<DynamicType = ()>
        + Clone
        + fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Kind name of a store object type
pub fn kind_of<K: StoreObject>() -> String {
    K::kind(&()).into_owned()
}

/// Namespace + name of an object; `namespace` is `None` for cluster-scoped kinds
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Key of an existing object
    pub fn for_object<K: Resource>(obj: &K) -> Self {
        let meta = obj.meta();
        Self {
            namespace: meta.namespace.clone(),
            name: meta.name.clone().unwrap_or_default(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Cluster store trait
///
/// Implementations must be Send + Sync for use across async tasks. Errors
/// are classified through [`crate::OperatorError::is_not_found`] and
/// friends regardless of backend.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Fetch one object
    async fn get<K: StoreObject>(&self, key: &ObjectKey) -> Result<K>;

    /// List objects of a kind, optionally restricted to one namespace
    async fn list<K: StoreObject>(&self, namespace: Option<&str>) -> Result<Vec<K>>;

    /// Create an object; fails with AlreadyExists if present
    async fn create<K: StoreObject>(&self, obj: &K) -> Result<K>;

    /// Replace an object's metadata and spec; status is left untouched
    async fn update<K: StoreObject>(&self, obj: &K) -> Result<K>;

    /// Replace an object's status only
    async fn update_status<K: StoreObject>(&self, obj: &K) -> Result<K>;

    /// Delete an object; fails with NotFound if absent
    async fn delete<K: StoreObject>(&self, key: &ObjectKey) -> Result<()>;

    /// Fetch one object, mapping NotFound to `None`
    async fn get_opt<K: StoreObject>(&self, key: &ObjectKey) -> Result<Option<K>> {
        match self.get::<K>(key).await {
            Ok(obj) => Ok(Some(obj)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
