//! Finalizer guard
//!
//! The operator's finalizer is added before any dependent exists and removed
//! only after teardown succeeded. Both [`ensure`] and [`release`] mutate a
//! copy and persist it in one update, so a failed write leaves the stored
//! object exactly as it was.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::debug;

use mro_core::consts::OPERATOR_FINALIZER;

use crate::error::Result;
use crate::store::{ClusterStore, ObjectKey, StoreObject};

pub fn has_finalizer(meta: &ObjectMeta) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|s| s == OPERATOR_FINALIZER))
}

/// Add the operator's finalizer; returns whether anything changed
pub fn add_finalizer(meta: &mut ObjectMeta) -> bool {
    if has_finalizer(meta) {
        return false;
    }
    meta.finalizers
        .get_or_insert_with(Vec::new)
        .push(OPERATOR_FINALIZER.to_string());
    true
}

/// Remove the operator's finalizer; returns whether anything changed
pub fn remove_finalizer(meta: &mut ObjectMeta) -> bool {
    let Some(finalizers) = meta.finalizers.as_mut() else {
        return false;
    };
    let before = finalizers.len();
    finalizers.retain(|f| f != OPERATOR_FINALIZER);
    before != finalizers.len()
}

/// Persist `obj` with the finalizer present
///
/// Returns the stored object, or `None` when it already carried the finalizer.
pub async fn ensure<S: ClusterStore, K: StoreObject>(store: &S, obj: &K) -> Result<Option<K>> {
    let mut updated = obj.clone();
    if !add_finalizer(updated.meta_mut()) {
        return Ok(None);
    }
    debug!(object = %ObjectKey::for_object(obj), "adding finalizer");
    store.update(&updated).await.map(Some)
}

/// Persist `obj` with the finalizer removed
///
/// The store may drop the object entirely once its last finalizer is gone,
/// so the result is not read back.
pub async fn release<S: ClusterStore, K: StoreObject>(store: &S, obj: &K) -> Result<bool> {
    let mut updated = obj.clone();
    if !remove_finalizer(updated.meta_mut()) {
        return Ok(false);
    }
    debug!(object = %ObjectKey::for_object(obj), "removing finalizer");
    store.update(&updated).await?;
    Ok(true)
}
