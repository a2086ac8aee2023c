//! Create-or-leave application of the desired state
//!
//! Dependents are created when absent and left alone when present. Drift in
//! an existing object is not corrected.
//!
//! Custom resources wait until the API server serves their kind: a CRD
//! created in the same pass is not established yet, and creating an
//! instance of it would fail with a 404.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use tracing::{debug, info};

use crate::desired::{DesiredResource, DesiredState, ResourceCategory, with_object};
use crate::error::Result;
use crate::store::{ClusterStore, ObjectKey, StoreObject};

/// Result of applying a desired state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplySummary {
    /// Resources created by this call
    pub created: Vec<String>,
    /// Resources that already existed
    pub unchanged: usize,
    /// Custom resources whose CRD is not established yet
    pub deferred: Vec<String>,
}

impl ApplySummary {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty()
    }
}

/// Check whether a CRD reports `Established=True`
pub fn crd_established(crd: &CustomResourceDefinition) -> bool {
    crd.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Established" && c.status == "True")
        })
}

async fn kind_served<S: ClusterStore, K: StoreObject>(store: &S, _obj: &K) -> Result<bool> {
    let name = format!("{}.{}", K::plural(&()), K::group(&()));
    let crd = store
        .get_opt::<CustomResourceDefinition>(&ObjectKey::cluster(name))
        .await?;
    Ok(crd.as_ref().is_some_and(crd_established))
}

async fn create_if_absent<S: ClusterStore, K: StoreObject>(store: &S, obj: &K) -> Result<bool> {
    let key = ObjectKey::for_object(obj);
    if store.get_opt::<K>(&key).await?.is_some() {
        return Ok(false);
    }
    match store.create(obj).await {
        Ok(_) => Ok(true),
        // lost a race with a concurrent writer; present is all we need
        Err(e) if e.is_already_exists() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Ensure one resource exists; returns whether it was created
pub async fn ensure_present<S: ClusterStore>(store: &S, resource: &DesiredResource) -> Result<bool> {
    with_object!(resource, obj => create_if_absent(store, obj).await)
}

/// Ensure every resource exists, in creation order
///
/// Stops at the first failure; earlier creates stay in place and are found
/// present on the next attempt. Deferred custom resources are reported in
/// [`ApplySummary::deferred`] for the caller to retry.
pub async fn apply<S: ClusterStore>(store: &S, state: &DesiredState) -> Result<ApplySummary> {
    let mut summary = ApplySummary::default();

    for resource in state.resources() {
        if resource.category() == ResourceCategory::CustomResource
            && !with_object!(resource, obj => kind_served(store, obj).await)?
        {
            debug!(resource = %resource.display_name(), "CRD not established, deferring");
            summary.deferred.push(resource.display_name());
            continue;
        }

        if ensure_present(store, resource).await? {
            info!(resource = %resource.display_name(), "created");
            summary.created.push(resource.display_name());
        } else {
            debug!(resource = %resource.display_name(), "already present");
            summary.unchanged += 1;
        }
    }

    Ok(summary)
}
