//! Wiring of the reconciler into the kube-runtime controller loop
//!
//! Only `MachineRemediationOperator` objects are watched. Progress of the
//! dependents is picked up by the reconciler's own requeue interval.

use futures::StreamExt;
use kube::api::{Api, ListParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::{Client, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use mro_core::MachineRemediationOperator;
use mro_kube::{
    InfrastructureOracle, KubeClusterStore, ObjectKey, OperatorConfig, OperatorError, Reconciler,
    Result,
};

type LiveReconciler = Reconciler<KubeClusterStore, InfrastructureOracle<KubeClusterStore>>;

/// Retry delay after a failure a plain retry may fix
const RETRY_SHORT: Duration = Duration::from_secs(15);
/// Retry delay after a failure that needs an outside change
const RETRY_LONG: Duration = Duration::from_secs(60);

/// Run the controller until SIGTERM / Ctrl-C
pub async fn run(client: Client, config: OperatorConfig) -> Result<()> {
    let operators: Api<MachineRemediationOperator> =
        Api::namespaced(client.clone(), &config.namespace);

    // fail fast when the configuration CRD is not installed
    if let Err(e) = operators.list(&ListParams::default().limit(1)).await {
        error!(error = %e, "MachineRemediationOperator CRD is not available");
        return Err(OperatorError::InvalidConfig(format!(
            "cannot list MachineRemediationOperator objects in '{}': {}",
            config.namespace, e
        )));
    }

    let store = KubeClusterStore::with_client(client);
    let reconciler = Reconciler::new(store.clone(), InfrastructureOracle::new(store), config);
    info!(namespace = %reconciler.config().namespace, "starting controller");

    Controller::new(operators, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, Arc::new(reconciler))
        .for_each(|res| async move {
            match res {
                Ok((obj, action)) => debug!(object = %obj, ?action, "reconciled"),
                Err(e) => warn!(error = %e, "controller error"),
            }
        })
        .await;

    Ok(())
}

async fn reconcile(obj: Arc<MachineRemediationOperator>, ctx: Arc<LiveReconciler>) -> Result<Action> {
    let key = ObjectKey::for_object(obj.as_ref());
    ctx.reconcile(&key).await.map(Action::from)
}

fn error_policy(
    obj: Arc<MachineRemediationOperator>,
    error: &OperatorError,
    _ctx: Arc<LiveReconciler>,
) -> Action {
    error!(name = %obj.name_any(), error = %error, "reconcile failed");
    if error.is_retriable() {
        Action::requeue(RETRY_SHORT)
    } else {
        Action::requeue(RETRY_LONG)
    }
}
