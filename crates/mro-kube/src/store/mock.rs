//! Mock cluster store for testing
//!
//! This store keeps objects in memory as JSON, useful for unit tests
//! without requiring a Kubernetes cluster. It mimics the API server where
//! the reconciler depends on it:
//! - every write bumps `metadata.resourceVersion`; a write carrying a stale
//!   version fails with Conflict
//! - `update` never touches status, `update_status` touches nothing else
//! - deleting an object with finalizers only sets `deletionTimestamp`; the
//!   object goes away once an update empties its finalizers

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use super::{ClusterStore, ObjectKey, StoreObject, kind_of};
use crate::error::{OperatorError, Result};

/// apiVersion/kind, namespace, name
type Slot = (String, Option<String>, String);

/// Store operations, for counting and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    List,
    Create,
    Update,
    UpdateStatus,
    Delete,
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub gets: usize,
    pub lists: usize,
    pub creates: usize,
    pub updates: usize,
    pub status_updates: usize,
    pub deletes: usize,
}

impl OperationCounts {
    /// Number of calls that could have changed the store
    pub fn mutations(&self) -> usize {
        self.creates + self.updates + self.status_updates + self.deletes
    }
}

/// In-memory cluster store for testing
#[derive(Clone, Default)]
pub struct MockClusterStore {
    objects: Arc<RwLock<BTreeMap<Slot, Value>>>,
    /// Track operation counts for assertions
    operations: Arc<RwLock<OperationCounts>>,
    /// (verb, kind) pairs that fail until cleared
    failures: Arc<RwLock<HashSet<(Verb, String)>>>,
    revision: Arc<AtomicU64>,
}

impl MockClusterStore {
    /// Create a new empty mock store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object directly, bypassing counts and injected failures
    pub fn seed<K: StoreObject>(&self, obj: &K) -> Result<K> {
        let mut value = serde_json::to_value(obj)?;
        stamp_new(&mut value, self.next_revision());
        let slot = slot_of::<K>(&ObjectKey::for_object(obj));
        self.objects.write().unwrap().insert(slot, value.clone());
        decode(&value)
    }

    /// Make every `verb` on `kind` fail until [`Self::clear_failures`]
    pub fn fail_on(&self, verb: Verb, kind: &str) {
        self.failures
            .write()
            .unwrap()
            .insert((verb, kind.to_string()));
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        self.failures.write().unwrap().clear();
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        self.operations.read().unwrap().clone()
    }

    /// Reset operation counts
    pub fn reset_counts(&self) {
        let mut ops = self.operations.write().unwrap();
        *ops = OperationCounts::default();
    }

    /// Count stored objects of a kind
    pub fn count<K: StoreObject>(&self) -> usize {
        let type_key = type_key::<K>();
        self.objects
            .read()
            .unwrap()
            .keys()
            .filter(|(t, _, _)| *t == type_key)
            .count()
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn record<K: StoreObject>(&self, verb: Verb) -> Result<()> {
        {
            let mut ops = self.operations.write().unwrap();
            match verb {
                Verb::Get => ops.gets += 1,
                Verb::List => ops.lists += 1,
                Verb::Create => ops.creates += 1,
                Verb::Update => ops.updates += 1,
                Verb::UpdateStatus => ops.status_updates += 1,
                Verb::Delete => ops.deletes += 1,
            }
        }

        let kind = kind_of::<K>();
        if self
            .failures
            .read()
            .unwrap()
            .contains(&(verb, kind.clone()))
        {
            return Err(OperatorError::Store(format!(
                "injected {:?} failure for {}",
                verb, kind
            )));
        }
        Ok(())
    }
}

fn type_key<K: StoreObject>() -> String {
    format!("{}/{}", K::api_version(&()), K::kind(&()))
}

fn slot_of<K: StoreObject>(key: &ObjectKey) -> Slot {
    (type_key::<K>(), key.namespace.clone(), key.name.clone())
}

fn not_found<K: StoreObject>(key: &ObjectKey) -> OperatorError {
    OperatorError::NotFound {
        kind: kind_of::<K>(),
        namespace: key.namespace.clone(),
        name: key.name.clone(),
    }
}

fn decode<K: StoreObject>(value: &Value) -> Result<K> {
    Ok(serde_json::from_value(value.clone())?)
}

fn resource_version(value: &Value) -> Option<&str> {
    value["metadata"]["resourceVersion"]
        .as_str()
        .filter(|rv| !rv.is_empty())
}

fn has_finalizers(value: &Value) -> bool {
    value["metadata"]["finalizers"]
        .as_array()
        .map(|f| !f.is_empty())
        .unwrap_or(false)
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

fn stamp_new(value: &mut Value, rv: u64) {
    let meta = &mut value["metadata"];
    meta["resourceVersion"] = Value::String(rv.to_string());
    if meta["uid"].as_str().is_none() {
        meta["uid"] = Value::String(format!("uid-{}", rv));
    }
    if meta["creationTimestamp"].is_null() {
        meta["creationTimestamp"] = Value::String(now());
    }
}

/// Reject writes based on a stale resource version
fn check_version<K: StoreObject>(key: &ObjectKey, stored: &Value, incoming: &Value) -> Result<()> {
    match resource_version(incoming) {
        Some(rv) if Some(rv) != resource_version(stored) => Err(OperatorError::Conflict {
            kind: kind_of::<K>(),
            name: key.name.clone(),
        }),
        _ => Ok(()),
    }
}

#[async_trait]
impl ClusterStore for MockClusterStore {
    async fn get<K: StoreObject>(&self, key: &ObjectKey) -> Result<K> {
        self.record::<K>(Verb::Get)?;

        let objects = self.objects.read().unwrap();
        objects
            .get(&slot_of::<K>(key))
            .ok_or_else(|| not_found::<K>(key))
            .and_then(decode)
    }

    async fn list<K: StoreObject>(&self, namespace: Option<&str>) -> Result<Vec<K>> {
        self.record::<K>(Verb::List)?;

        let type_key = type_key::<K>();
        let objects = self.objects.read().unwrap();
        objects
            .iter()
            .filter(|((t, _, _), _)| *t == type_key)
            .filter(|((_, ns, _), _)| namespace.is_none() || ns.as_deref() == namespace)
            .map(|(_, value)| decode(value))
            .collect()
    }

    async fn create<K: StoreObject>(&self, obj: &K) -> Result<K> {
        self.record::<K>(Verb::Create)?;

        let key = ObjectKey::for_object(obj);
        if key.name.is_empty() {
            return Err(OperatorError::Store(format!(
                "{} has no name",
                kind_of::<K>()
            )));
        }

        let mut value = serde_json::to_value(obj)?;
        let slot = slot_of::<K>(&key);
        let mut objects = self.objects.write().unwrap();
        if objects.contains_key(&slot) {
            return Err(OperatorError::AlreadyExists {
                kind: kind_of::<K>(),
                name: key.name,
            });
        }

        // a create never carries a version or deletion state of its own
        value["metadata"]["resourceVersion"] = Value::Null;
        value["metadata"]["deletionTimestamp"] = Value::Null;
        stamp_new(&mut value, self.next_revision());
        objects.insert(slot, value.clone());
        decode(&value)
    }

    async fn update<K: StoreObject>(&self, obj: &K) -> Result<K> {
        self.record::<K>(Verb::Update)?;

        let key = ObjectKey::for_object(obj);
        let slot = slot_of::<K>(&key);
        let mut incoming = serde_json::to_value(obj)?;

        let mut objects = self.objects.write().unwrap();
        let stored = objects.get(&slot).ok_or_else(|| not_found::<K>(&key))?;
        check_version::<K>(&key, stored, &incoming)?;

        // status is a subresource
        match stored.get("status") {
            Some(status) => incoming["status"] = status.clone(),
            None => {
                if let Some(map) = incoming.as_object_mut() {
                    map.remove("status");
                }
            }
        }
        for field in ["uid", "creationTimestamp", "deletionTimestamp"] {
            incoming["metadata"][field] = stored["metadata"][field].clone();
        }
        incoming["metadata"]["resourceVersion"] =
            Value::String(self.next_revision().to_string());

        let deleting = !stored["metadata"]["deletionTimestamp"].is_null();
        if deleting && !has_finalizers(&incoming) {
            objects.remove(&slot);
        } else {
            objects.insert(slot, incoming.clone());
        }
        decode(&incoming)
    }

    async fn update_status<K: StoreObject>(&self, obj: &K) -> Result<K> {
        self.record::<K>(Verb::UpdateStatus)?;

        let key = ObjectKey::for_object(obj);
        let slot = slot_of::<K>(&key);
        let incoming = serde_json::to_value(obj)?;

        let mut objects = self.objects.write().unwrap();
        let stored = objects
            .get_mut(&slot)
            .ok_or_else(|| not_found::<K>(&key))?;
        check_version::<K>(&key, stored, &incoming)?;

        stored["status"] = incoming.get("status").cloned().unwrap_or(Value::Null);
        stored["metadata"]["resourceVersion"] = Value::String(self.next_revision().to_string());
        decode(stored)
    }

    async fn delete<K: StoreObject>(&self, key: &ObjectKey) -> Result<()> {
        self.record::<K>(Verb::Delete)?;

        let slot = slot_of::<K>(key);
        let mut objects = self.objects.write().unwrap();
        let stored = objects
            .get_mut(&slot)
            .ok_or_else(|| not_found::<K>(key))?;

        if has_finalizers(stored) {
            if stored["metadata"]["deletionTimestamp"].is_null() {
                stored["metadata"]["deletionTimestamp"] = Value::String(now());
                stored["metadata"]["resourceVersion"] =
                    Value::String(self.next_revision().to_string());
            }
        } else {
            objects.remove(&slot);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn config_map(namespace: &str, name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("k".to_string(), "v".to_string())])),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_mock_create_and_get() {
        let store = MockClusterStore::new();

        let created = store.create(&config_map("ns", "a")).await.unwrap();
        assert!(created.metadata.resource_version.is_some());
        assert!(created.metadata.uid.is_some());

        let fetched: ConfigMap = store.get(&ObjectKey::namespaced("ns", "a")).await.unwrap();
        assert_eq!(fetched.data, created.data);

        let counts = store.operation_counts();
        assert_eq!(counts.creates, 1);
        assert_eq!(counts.gets, 1);
    }

    #[tokio::test]
    async fn test_mock_create_duplicate_fails() {
        let store = MockClusterStore::new();

        store.create(&config_map("ns", "a")).await.unwrap();
        let result = store.create(&config_map("ns", "a")).await;
        assert!(result.unwrap_err().is_already_exists());
    }

    #[tokio::test]
    async fn test_mock_get_not_found() {
        let store = MockClusterStore::new();

        let result = store.get::<ConfigMap>(&ObjectKey::namespaced("ns", "missing")).await;
        assert!(result.unwrap_err().is_not_found());

        let opt = store
            .get_opt::<ConfigMap>(&ObjectKey::namespaced("ns", "missing"))
            .await
            .unwrap();
        assert!(opt.is_none());
    }

    #[tokio::test]
    async fn test_mock_kinds_do_not_collide() {
        let store = MockClusterStore::new();
        store.create(&config_map("ns", "a")).await.unwrap();

        let result = store.get::<Deployment>(&ObjectKey::namespaced("ns", "a")).await;
        assert!(result.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_mock_list_by_namespace() {
        let store = MockClusterStore::new();
        store.create(&config_map("default", "a")).await.unwrap();
        store.create(&config_map("default", "b")).await.unwrap();
        store.create(&config_map("staging", "a")).await.unwrap();

        let all: Vec<ConfigMap> = store.list(None).await.unwrap();
        assert_eq!(all.len(), 3);

        let in_default: Vec<ConfigMap> = store.list(Some("default")).await.unwrap();
        assert_eq!(in_default.len(), 2);
    }

    #[tokio::test]
    async fn test_mock_stale_update_conflicts() {
        let store = MockClusterStore::new();
        let first = store.create(&config_map("ns", "a")).await.unwrap();

        let mut winner = first.clone();
        winner.data = Some(BTreeMap::from([("k".to_string(), "winner".to_string())]));
        store.update(&winner).await.unwrap();

        let mut loser = first;
        loser.data = Some(BTreeMap::from([("k".to_string(), "loser".to_string())]));
        let err = store.update(&loser).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_mock_update_preserves_status() {
        let store = MockClusterStore::new();
        let mut deploy = Deployment {
            metadata: ObjectMeta {
                name: Some("d".to_string()),
                namespace: Some("ns".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        deploy = store.create(&deploy).await.unwrap();

        deploy.status = Some(DeploymentStatus {
            replicas: Some(1),
            ..Default::default()
        });
        deploy = store.update_status(&deploy).await.unwrap();

        deploy.status = None;
        deploy.metadata.labels = Some(BTreeMap::from([("x".to_string(), "y".to_string())]));
        let updated = store.update(&deploy).await.unwrap();
        assert_eq!(updated.status.and_then(|s| s.replicas), Some(1));
        assert!(updated.metadata.labels.is_some());
    }

    #[tokio::test]
    async fn test_mock_delete_blocked_by_finalizer() {
        let store = MockClusterStore::new();
        let mut cm = config_map("ns", "a");
        cm.metadata.finalizers = Some(vec!["example.com/guard".to_string()]);
        store.create(&cm).await.unwrap();

        let key = ObjectKey::namespaced("ns", "a");
        store.delete::<ConfigMap>(&key).await.unwrap();

        let mut pending: ConfigMap = store.get(&key).await.unwrap();
        assert!(pending.metadata.deletion_timestamp.is_some());

        pending.metadata.finalizers = Some(vec![]);
        store.update(&pending).await.unwrap();
        assert!(store.get::<ConfigMap>(&key).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_mock_delete_missing() {
        let store = MockClusterStore::new();
        let err = store
            .delete::<ConfigMap>(&ObjectKey::namespaced("ns", "a"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_mock_injected_failure() {
        let store = MockClusterStore::new();
        store.fail_on(Verb::Create, "ConfigMap");

        let err = store.create(&config_map("ns", "a")).await.unwrap_err();
        assert!(matches!(err, OperatorError::Store(_)));
        assert!(!err.is_not_found());
        assert_eq!(store.count::<ConfigMap>(), 0);

        store.clear_failures();
        store.create(&config_map("ns", "a")).await.unwrap();
        assert_eq!(store.count::<ConfigMap>(), 1);
    }

    #[tokio::test]
    async fn test_seed_bypasses_counts() {
        let store = MockClusterStore::new();
        let seeded = store.seed(&config_map("ns", "a")).unwrap();
        assert!(seeded.metadata.resource_version.is_some());
        assert_eq!(store.operation_counts(), OperationCounts::default());
    }

    #[tokio::test]
    async fn test_operation_counts() {
        let store = MockClusterStore::new();
        let key = ObjectKey::namespaced("ns", "a");

        let created = store.create(&config_map("ns", "a")).await.unwrap();
        let _ = store.get::<ConfigMap>(&key).await;
        let _ = store.list::<ConfigMap>(None).await;
        store.update(&created).await.unwrap();
        store.delete::<ConfigMap>(&key).await.unwrap();

        let counts = store.operation_counts();
        assert_eq!(counts.creates, 1);
        assert_eq!(counts.gets, 1);
        assert_eq!(counts.lists, 1);
        assert_eq!(counts.updates, 1);
        assert_eq!(counts.deletes, 1);
        assert_eq!(counts.mutations(), 3);

        store.reset_counts();
        assert_eq!(store.operation_counts().creates, 0);
    }
}
