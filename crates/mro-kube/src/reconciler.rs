//! Reconciler
//!
//! One call converges one `MachineRemediationOperator` a step closer to its
//! desired state, always starting from what the store holds right now:
//!
//! 1. Object gone: done.
//! 2. Object deleting: tear down every owned resource, then drop the finalizer.
//! 3. No finalizer yet: add it and stop. Nothing is created in the same call.
//! 4. Otherwise look up the platform, create whatever is missing, aggregate
//!    deployment readiness into the status conditions, and poll again until
//!    everything is available.
//!
//! The caller guarantees at most one call in flight per object key.

use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::controller::Action;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use mro_core::consts::INFRASTRUCTURE_NAME;
use mro_core::{MachineRemediationOperator, MachineRemediationOperatorStatus};

use crate::apply::apply;
use crate::config::OperatorConfig;
use crate::desired::{BuildParams, DesiredState};
use crate::error::{OperatorError, Result};
use crate::finalizer::{self, has_finalizer};
use crate::manifests::ManifestSource;
use crate::platform::PlatformOracle;
use crate::replicas::ReplicaSource;
use crate::status::{Aggregate, aggregate, apply_conditions};
use crate::store::{ClusterStore, ObjectKey};
use crate::teardown::teardown;

/// What the caller should do after a reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Nothing left to do until the object changes
    Done,
    /// Run again after the given delay
    RequeueAfter(Duration),
}

impl From<Directive> for Action {
    fn from(directive: Directive) -> Self {
        match directive {
            Directive::Done => Action::await_change(),
            Directive::RequeueAfter(delay) => Action::requeue(delay),
        }
    }
}

/// Reconciler for `MachineRemediationOperator` objects
pub struct Reconciler<S, P> {
    store: S,
    oracle: P,
    manifests: ManifestSource,
    replicas: ReplicaSource,
    config: OperatorConfig,
}

impl<S: ClusterStore, P: PlatformOracle> Reconciler<S, P> {
    pub fn new(store: S, oracle: P, config: OperatorConfig) -> Self {
        Self {
            store,
            oracle,
            manifests: ManifestSource::new(config.crds_manifests_dir.clone()),
            replicas: config.replica_source(),
            config,
        }
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    /// Reconcile the object at `key`, bounded by the configured timeout
    ///
    /// On timeout the in-flight step is dropped; no write after the last
    /// completed one is attempted.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Directive> {
        match self.config.reconcile_timeout() {
            Some(limit) => tokio::time::timeout(limit, self.reconcile_once(key))
                .await
                .map_err(|_| OperatorError::Timeout(format!("{:?}", limit)))?,
            None => self.reconcile_once(key).await,
        }
    }

    #[instrument(skip_all, fields(object = %key))]
    async fn reconcile_once(&self, key: &ObjectKey) -> Result<Directive> {
        let Some(operator) = self
            .store
            .get_opt::<MachineRemediationOperator>(key)
            .await?
        else {
            debug!("object no longer exists");
            return Ok(Directive::Done);
        };

        if operator.metadata.deletion_timestamp.is_some() {
            return self.finalize(&operator).await;
        }

        if !has_finalizer(&operator.metadata) {
            finalizer::ensure(&self.store, &operator).await?;
            info!("finalizer added");
            return Ok(Directive::Done);
        }

        match self.converge(&operator).await {
            Ok(outcome) => {
                self.write_status(&operator, &outcome).await?;
                if outcome.is_available() {
                    Ok(Directive::Done)
                } else {
                    Ok(Directive::RequeueAfter(self.config.requeue_after()))
                }
            }
            Err(err) => {
                warn!(error = %err, "reconcile failed");
                self.record_degraded(&operator, &err).await;
                Err(err)
            }
        }
    }

    async fn converge(&self, operator: &MachineRemediationOperator) -> Result<Aggregate> {
        let platform = self.oracle.platform(INFRASTRUCTURE_NAME).await?;
        let replicas = self.replicas.resolve(&self.store).await?;
        let crds = self.manifests.load()?;
        debug!(%platform, replicas, crds = crds.len(), "building desired state");

        let params = self.params(replicas);
        let desired = DesiredState::build(operator, platform, &crds, &params);
        let summary = apply(&self.store, &desired).await?;
        if !summary.is_noop() {
            info!(created = summary.created.len(), "created missing resources");
        }

        let mut observed = Vec::new();
        for deployment in desired.deployments() {
            let key = ObjectKey::for_object(deployment);
            let current = self.store.get_opt::<Deployment>(&key).await?;
            observed.push((key.name, current));
        }
        Ok(aggregate(&observed).with_pending(summary.deferred))
    }

    async fn finalize(&self, operator: &MachineRemediationOperator) -> Result<Directive> {
        if !has_finalizer(&operator.metadata) {
            debug!("teardown already complete");
            return Ok(Directive::Done);
        }

        // the removal set does not depend on the platform or replica count
        let removal = self
            .manifests
            .load()
            .map(|crds| DesiredState::removal_set(operator, &crds, &self.params(1)));
        let report = match removal {
            Ok(removal) => teardown(&self.store, &removal).await,
            Err(err) => Err(err),
        };

        match report {
            Ok(report) => {
                finalizer::release(&self.store, operator).await?;
                info!(deleted = report.deleted.len(), "finalizer released");
                Ok(Directive::Done)
            }
            Err(err) => {
                warn!(error = %err, "teardown incomplete, keeping finalizer");
                self.record_degraded(operator, &err).await;
                Err(err)
            }
        }
    }

    fn params(&self, replicas: i32) -> BuildParams {
        BuildParams {
            namespace: self.config.namespace.clone(),
            operator_version: self.config.operator_version.clone(),
            replicas,
        }
    }

    /// Best effort; the triggering error is what gets reported
    async fn record_degraded(&self, operator: &MachineRemediationOperator, err: &OperatorError) {
        if let Err(status_err) = self.write_status(operator, &Aggregate::degraded(err)).await {
            warn!(error = %status_err, "could not record Degraded condition");
        }
    }

    async fn write_status(
        &self,
        operator: &MachineRemediationOperator,
        outcome: &Aggregate,
    ) -> Result<()> {
        let existing = operator
            .status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default();
        let conditions = apply_conditions(existing, outcome.conditions(), Utc::now());
        if conditions == existing {
            debug!("status unchanged");
            return Ok(());
        }

        let mut updated = operator.clone();
        updated.status = Some(MachineRemediationOperatorStatus { conditions });
        self.store.update_status(&updated).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_to_action() {
        assert_eq!(Action::from(Directive::Done), Action::await_change());
        assert_eq!(
            Action::from(Directive::RequeueAfter(Duration::from_secs(5))),
            Action::requeue(Duration::from_secs(5))
        );
    }
}
