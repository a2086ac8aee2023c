//! Kubernetes API server backed store
//!
//! Typed objects are routed through `DynamicObject` so one implementation
//! covers namespaced and cluster-scoped kinds alike, without compile-time
//! scope bounds on every call site.

use async_trait::async_trait;
use kube::{
    Client,
    api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams},
    discovery::ApiResource,
};

use super::{ClusterStore, ObjectKey, StoreObject, kind_of};
use crate::error::{OperatorError, Result};

/// Store backed by a live Kubernetes cluster
#[derive(Clone)]
pub struct KubeClusterStore {
    client: Client,
}

impl KubeClusterStore {
    /// Create with an existing Kubernetes client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn api<K: StoreObject>(&self, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = ApiResource::erase::<K>(&());
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        }
    }
}

fn to_dynamic<K: StoreObject>(obj: &K) -> Result<DynamicObject> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

fn from_dynamic<K: StoreObject>(obj: DynamicObject) -> Result<K> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

/// Map API status codes onto typed errors so callers classify uniformly
fn classify<K: StoreObject>(err: kube::Error, key: &ObjectKey) -> OperatorError {
    match &err {
        kube::Error::Api(resp) if resp.code == 404 => OperatorError::NotFound {
            kind: kind_of::<K>(),
            namespace: key.namespace.clone(),
            name: key.name.clone(),
        },
        kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
            OperatorError::AlreadyExists {
                kind: kind_of::<K>(),
                name: key.name.clone(),
            }
        }
        kube::Error::Api(resp) if resp.code == 409 => OperatorError::Conflict {
            kind: kind_of::<K>(),
            name: key.name.clone(),
        },
        _ => OperatorError::Api(err),
    }
}

#[async_trait]
impl ClusterStore for KubeClusterStore {
    async fn get<K: StoreObject>(&self, key: &ObjectKey) -> Result<K> {
        let obj = self
            .api::<K>(key.namespace.as_deref())
            .get(&key.name)
            .await
            .map_err(|e| classify::<K>(e, key))?;
        from_dynamic(obj)
    }

    async fn list<K: StoreObject>(&self, namespace: Option<&str>) -> Result<Vec<K>> {
        let list = self
            .api::<K>(namespace)
            .list(&ListParams::default())
            .await?;
        list.items.into_iter().map(from_dynamic).collect()
    }

    async fn create<K: StoreObject>(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::for_object(obj);
        let created = self
            .api::<K>(key.namespace.as_deref())
            .create(&PostParams::default(), &to_dynamic(obj)?)
            .await
            .map_err(|e| classify::<K>(e, &key))?;
        from_dynamic(created)
    }

    async fn update<K: StoreObject>(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::for_object(obj);
        let replaced = self
            .api::<K>(key.namespace.as_deref())
            .replace(&key.name, &PostParams::default(), &to_dynamic(obj)?)
            .await
            .map_err(|e| classify::<K>(e, &key))?;
        from_dynamic(replaced)
    }

    async fn update_status<K: StoreObject>(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::for_object(obj);
        let value = serde_json::to_value(obj)?;

        // resourceVersion in a merge patch acts as a precondition
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": value["metadata"]["resourceVersion"] },
            "status": value["status"],
        });
        let patched = self
            .api::<K>(key.namespace.as_deref())
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| classify::<K>(e, &key))?;
        from_dynamic(patched)
    }

    async fn delete<K: StoreObject>(&self, key: &ObjectKey) -> Result<()> {
        self.api::<K>(key.namespace.as_deref())
            .delete(&key.name, &DeleteParams::background())
            .await
            .map_err(|e| classify::<K>(e, key))?;
        Ok(())
    }
}
