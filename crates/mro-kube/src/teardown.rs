//! Teardown of owned resources
//!
//! Every resource is attempted even after a failure, in reverse creation
//! order. An absent resource counts as deleted.

use tracing::{debug, info, warn};

use crate::desired::{DesiredResource, DesiredState, with_object};
use crate::error::{OperatorError, Result};
use crate::store::{ClusterStore, ObjectKey, StoreObject};

/// Outcome of a successful teardown
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub deleted: Vec<String>,
    pub already_absent: Vec<String>,
}

async fn delete_like<S: ClusterStore, K: StoreObject>(store: &S, _obj: &K, key: &ObjectKey) -> Result<()> {
    store.delete::<K>(key).await
}

/// Delete one resource; returns `false` if it was already gone
pub async fn delete_resource<S: ClusterStore>(store: &S, resource: &DesiredResource) -> Result<bool> {
    let key = resource.key();
    match with_object!(resource, obj => delete_like(store, obj, &key).await) {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Delete everything in `state`
///
/// Fails with [`OperatorError::Teardown`] listing every resource whose
/// delete failed; the caller must then keep its finalizer.
pub async fn teardown<S: ClusterStore>(store: &S, state: &DesiredState) -> Result<TeardownReport> {
    let mut report = TeardownReport::default();
    let mut failed = Vec::new();

    for resource in state.resources().iter().rev() {
        let name = resource.display_name();
        match delete_resource(store, resource).await {
            Ok(true) => {
                debug!(resource = %name, "deleted");
                report.deleted.push(name);
            }
            Ok(false) => report.already_absent.push(name),
            Err(e) => {
                warn!(resource = %name, error = %e, "delete failed");
                failed.push((name, e.to_string()));
            }
        }
    }

    if !failed.is_empty() {
        return Err(OperatorError::Teardown { failed });
    }

    info!(
        deleted = report.deleted.len(),
        already_absent = report.already_absent.len(),
        "teardown complete"
    );
    Ok(report)
}
