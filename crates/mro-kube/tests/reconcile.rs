//! Full reconcile lifecycle against the in-memory store

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceDefinition, CustomResourceDefinitionCondition, CustomResourceDefinitionStatus,
};

use mro_core::consts::{
    MASTER_MACHINE_DISRUPTION_BUDGET, MASTER_MACHINE_HEALTH_CHECK, MASTER_NODE_ROLE_LABEL,
    NAMESPACE_MACHINE_API,
};
use mro_core::{
    ConditionStatus, ConditionType, Infrastructure, InfrastructureSpec, InfrastructureStatus,
    MachineDisruptionBudget, MachineHealthCheck, MachineRemediationOperator,
    MachineRemediationOperatorSpec, Platform,
};
use mro_kube::finalizer::has_finalizer;
use mro_kube::{
    ClusterStore, Directive, InfrastructureOracle, MockClusterStore, ObjectKey, OperatorConfig,
    OperatorError, PlatformOracle, Reconciler, Verb,
};

const IMAGE_REGISTRY: &str = "docker.io/test";
const IMAGE_TAG: &str = "test";

type TestReconciler = Reconciler<MockClusterStore, InfrastructureOracle<MockClusterStore>>;

fn crds_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../manifests/crds")
}

fn new_operator(name: &str) -> MachineRemediationOperator {
    let mut mro = MachineRemediationOperator::new(
        name,
        MachineRemediationOperatorSpec {
            image_registry: IMAGE_REGISTRY.to_string(),
            image_pull_policy: "Always".to_string(),
            version: None,
        },
    );
    mro.metadata.namespace = Some(NAMESPACE_MACHINE_API.to_string());
    mro
}

fn new_reconciler(store: &MockClusterStore) -> TestReconciler {
    let config = OperatorConfig {
        operator_version: IMAGE_TAG.to_string(),
        crds_manifests_dir: crds_dir(),
        ..Default::default()
    };
    Reconciler::new(store.clone(), InfrastructureOracle::new(store.clone()), config)
}

fn key() -> ObjectKey {
    ObjectKey::namespaced(NAMESPACE_MACHINE_API, "mro")
}

async fn fetch(store: &MockClusterStore) -> MachineRemediationOperator {
    store.get(&key()).await.unwrap()
}

fn conditions_are(
    mro: &MachineRemediationOperator,
    available: ConditionStatus,
    progressing: ConditionStatus,
    degraded: ConditionStatus,
) -> bool {
    let status = mro.status.clone().unwrap_or_default();
    let status_of = |t| status.condition(t).map(|c| c.status);
    status_of(ConditionType::Available) == Some(available)
        && status_of(ConditionType::Progressing) == Some(progressing)
        && status_of(ConditionType::Degraded) == Some(degraded)
}

/// Report every deployment as fully rolled out at its own replica count
async fn mark_deployments_ready(store: &MockClusterStore) {
    let deployments: Vec<Deployment> = store.list(None).await.unwrap();
    for mut d in deployments {
        let replicas = d.spec.as_ref().and_then(|s| s.replicas);
        d.status = Some(DeploymentStatus {
            replicas,
            updated_replicas: replicas,
            ..Default::default()
        });
        store.update_status(&d).await.unwrap();
    }
}

/// Report every CRD as served, as the API server does shortly after creation
async fn establish_crds(store: &MockClusterStore) {
    let crds: Vec<CustomResourceDefinition> = store.list(None).await.unwrap();
    for mut crd in crds {
        crd.status = Some(CustomResourceDefinitionStatus {
            conditions: Some(vec![CustomResourceDefinitionCondition {
                type_: "Established".to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        });
        store.update_status(&crd).await.unwrap();
    }
}

fn master_node(name: &str) -> Node {
    let mut node = Node::default();
    node.metadata.name = Some(name.to_string());
    node.metadata.labels = Some(BTreeMap::from([(
        MASTER_NODE_ROLE_LABEL.to_string(),
        String::new(),
    )]));
    node
}

/// Seed an operator and reconcile it until every component is available
async fn converge(store: &MockClusterStore, reconciler: &TestReconciler) {
    store.seed(&new_operator("mro")).unwrap();
    reconciler.reconcile(&key()).await.unwrap();
    reconciler.reconcile(&key()).await.unwrap();
    establish_crds(store).await;
    mark_deployments_ready(store).await;
    assert_eq!(reconciler.reconcile(&key()).await.unwrap(), Directive::Done);
}

async fn test_reconcile(platform: Platform) {
    let store = MockClusterStore::new();
    store
        .seed(&Infrastructure::for_platform("cluster", platform))
        .unwrap();
    store.seed(&new_operator("mro")).unwrap();
    let reconciler = new_reconciler(&store);

    // first call only adds the finalizer
    store.reset_counts();
    let directive = reconciler.reconcile(&key()).await.unwrap();
    assert_eq!(directive, Directive::Done);
    assert!(has_finalizer(&fetch(&store).await.metadata));
    let counts = store.operation_counts();
    assert_eq!(counts.updates, 1);
    assert_eq!(counts.mutations(), 1);

    // second call creates every component and reports progress
    let directive = reconciler.reconcile(&key()).await.unwrap();
    assert_eq!(directive, Directive::RequeueAfter(Duration::from_secs(5)));

    let deployments: Vec<Deployment> = store.list(None).await.unwrap();
    assert_eq!(deployments.len(), 3);
    for d in &deployments {
        let container = &d.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0];
        assert_eq!(container.image_pull_policy.as_deref(), Some("Always"));
        assert_eq!(
            container.image.as_deref(),
            Some(format!("{}/{}:{}", IMAGE_REGISTRY, container.name, IMAGE_TAG).as_str())
        );
    }

    let crds: Vec<CustomResourceDefinition> = store.list(None).await.unwrap();
    assert_eq!(crds.len(), 3);

    assert!(conditions_are(
        &fetch(&store).await,
        ConditionStatus::False,
        ConditionStatus::True,
        ConditionStatus::False,
    ));

    // policies wait for their CRDs to be served
    assert_eq!(store.count::<MachineHealthCheck>(), 0);
    assert_eq!(store.count::<MachineDisruptionBudget>(), 0);

    // third call sees served CRDs and every deployment ready
    establish_crds(&store).await;
    mark_deployments_ready(&store).await;
    let directive = reconciler.reconcile(&key()).await.unwrap();
    assert_eq!(directive, Directive::Done);
    assert!(conditions_are(
        &fetch(&store).await,
        ConditionStatus::True,
        ConditionStatus::False,
        ConditionStatus::False,
    ));

    let mhc_key = ObjectKey::namespaced(NAMESPACE_MACHINE_API, MASTER_MACHINE_HEALTH_CHECK);
    let mdb_key = ObjectKey::namespaced(NAMESPACE_MACHINE_API, MASTER_MACHINE_DISRUPTION_BUDGET);
    let mhc = store.get::<MachineHealthCheck>(&mhc_key).await;
    let mdb = store.get::<MachineDisruptionBudget>(&mdb_key).await;
    if platform == Platform::BareMetal {
        assert!(mhc.is_ok());
        assert!(mdb.is_ok());
    } else {
        assert!(mhc.unwrap_err().is_not_found());
        assert!(mdb.unwrap_err().is_not_found());
    }

    // deletion removes every dependent, then the finalizer
    store.delete::<MachineRemediationOperator>(&key()).await.unwrap();
    assert!(fetch(&store).await.metadata.deletion_timestamp.is_some());

    let directive = reconciler.reconcile(&key()).await.unwrap();
    assert_eq!(directive, Directive::Done);
    assert_eq!(store.count::<Deployment>(), 0);
    assert_eq!(store.count::<CustomResourceDefinition>(), 0);
    assert_eq!(store.count::<MachineHealthCheck>(), 0);
    assert_eq!(store.count::<MachineDisruptionBudget>(), 0);

    // the last finalizer is gone, so the store finished the deletion
    let gone = store
        .get_opt::<MachineRemediationOperator>(&key())
        .await
        .unwrap();
    assert!(gone.is_none());

    // and reconciling a vanished object is a no-op
    assert_eq!(reconciler.reconcile(&key()).await.unwrap(), Directive::Done);
}

#[tokio::test]
async fn test_reconcile_bare_metal_platform() {
    test_reconcile(Platform::BareMetal).await;
}

#[tokio::test]
async fn test_reconcile_aws_platform() {
    test_reconcile(Platform::Aws).await;
}

#[tokio::test]
async fn test_converged_reconcile_is_mutation_free() {
    let store = MockClusterStore::new();
    store
        .seed(&Infrastructure::for_platform("cluster", Platform::BareMetal))
        .unwrap();
    let reconciler = new_reconciler(&store);
    converge(&store, &reconciler).await;

    let before = fetch(&store).await;
    store.reset_counts();
    for _ in 0..2 {
        assert_eq!(reconciler.reconcile(&key()).await.unwrap(), Directive::Done);
    }
    assert_eq!(store.operation_counts().mutations(), 0);

    let after = fetch(&store).await;
    assert_eq!(before.status, after.status);
    assert_eq!(before.metadata.resource_version, after.metadata.resource_version);
}

#[tokio::test]
async fn test_deleted_dependent_is_recreated() {
    let store = MockClusterStore::new();
    store
        .seed(&Infrastructure::for_platform("cluster", Platform::Aws))
        .unwrap();
    let reconciler = new_reconciler(&store);
    converge(&store, &reconciler).await;

    let victim = ObjectKey::namespaced(NAMESPACE_MACHINE_API, "machine-health-check");
    store.delete::<Deployment>(&victim).await.unwrap();

    let directive = reconciler.reconcile(&key()).await.unwrap();
    assert_eq!(directive, Directive::RequeueAfter(Duration::from_secs(5)));
    assert_eq!(store.count::<Deployment>(), 3);
    assert!(conditions_are(
        &fetch(&store).await,
        ConditionStatus::False,
        ConditionStatus::True,
        ConditionStatus::False,
    ));
}

#[tokio::test]
async fn test_finalizer_removal_visible_with_foreign_finalizer() {
    let store = MockClusterStore::new();
    store
        .seed(&Infrastructure::for_platform("cluster", Platform::Aws))
        .unwrap();
    let mut mro = new_operator("mro");
    mro.metadata.finalizers = Some(vec!["example.com/keep".to_string()]);
    store.seed(&mro).unwrap();
    let reconciler = new_reconciler(&store);

    reconciler.reconcile(&key()).await.unwrap();
    reconciler.reconcile(&key()).await.unwrap();
    store.delete::<MachineRemediationOperator>(&key()).await.unwrap();

    assert_eq!(reconciler.reconcile(&key()).await.unwrap(), Directive::Done);

    let fetched = fetch(&store).await;
    assert!(!has_finalizer(&fetched.metadata));
    assert_eq!(
        fetched.metadata.finalizers,
        Some(vec!["example.com/keep".to_string()])
    );
    assert_eq!(store.count::<Deployment>(), 0);

    // teardown is already complete
    store.reset_counts();
    assert_eq!(reconciler.reconcile(&key()).await.unwrap(), Directive::Done);
    assert_eq!(store.operation_counts().mutations(), 0);
}

#[tokio::test]
async fn test_failed_teardown_keeps_finalizer() {
    let store = MockClusterStore::new();
    store
        .seed(&Infrastructure::for_platform("cluster", Platform::BareMetal))
        .unwrap();
    let reconciler = new_reconciler(&store);
    converge(&store, &reconciler).await;

    store.delete::<MachineRemediationOperator>(&key()).await.unwrap();
    store.fail_on(Verb::Delete, "Deployment");

    let err = reconciler.reconcile(&key()).await.unwrap_err();
    assert!(matches!(err, OperatorError::Teardown { .. }));

    let mro = fetch(&store).await;
    assert!(has_finalizer(&mro.metadata));
    assert!(conditions_are(
        &mro,
        ConditionStatus::False,
        ConditionStatus::False,
        ConditionStatus::True,
    ));
    // every other dependent was still removed
    assert_eq!(store.count::<Deployment>(), 3);
    assert_eq!(store.count::<CustomResourceDefinition>(), 0);

    store.clear_failures();
    assert_eq!(reconciler.reconcile(&key()).await.unwrap(), Directive::Done);
    assert_eq!(store.count::<Deployment>(), 0);
    assert!(store.get_opt::<MachineRemediationOperator>(&key()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_teardown_does_not_need_platform() {
    let store = MockClusterStore::new();
    store
        .seed(&Infrastructure::for_platform("cluster", Platform::BareMetal))
        .unwrap();
    let reconciler = new_reconciler(&store);
    converge(&store, &reconciler).await;

    store
        .delete::<Infrastructure>(&ObjectKey::cluster("cluster"))
        .await
        .unwrap();
    store.delete::<MachineRemediationOperator>(&key()).await.unwrap();

    assert_eq!(reconciler.reconcile(&key()).await.unwrap(), Directive::Done);
    assert_eq!(store.count::<MachineHealthCheck>(), 0);
    assert_eq!(store.count::<MachineDisruptionBudget>(), 0);
}

#[tokio::test]
async fn test_missing_platform_descriptor_degrades() {
    let store = MockClusterStore::new();
    store.seed(&new_operator("mro")).unwrap();
    let reconciler = new_reconciler(&store);

    reconciler.reconcile(&key()).await.unwrap();
    let err = reconciler.reconcile(&key()).await.unwrap_err();
    assert!(matches!(err, OperatorError::Platform(_)));

    let mro = fetch(&store).await;
    assert!(conditions_are(
        &mro,
        ConditionStatus::False,
        ConditionStatus::False,
        ConditionStatus::True,
    ));
    let degraded = mro
        .status
        .as_ref()
        .and_then(|s| s.condition(ConditionType::Degraded))
        .unwrap();
    assert_eq!(degraded.reason, "PlatformLookupFailed");
    assert_eq!(store.count::<Deployment>(), 0);
}

#[tokio::test]
async fn test_unknown_platform_degrades() {
    let store = MockClusterStore::new();
    let mut infra = Infrastructure::new("cluster", InfrastructureSpec::default());
    infra.status = Some(InfrastructureStatus {
        platform: Some("Mars".to_string()),
        ..Default::default()
    });
    store.seed(&infra).unwrap();
    store.seed(&new_operator("mro")).unwrap();
    let reconciler = new_reconciler(&store);

    reconciler.reconcile(&key()).await.unwrap();
    let err = reconciler.reconcile(&key()).await.unwrap_err();
    assert!(matches!(err, OperatorError::Platform(_)));
    assert!(fetch(&store).await.status.unwrap().is_true(ConditionType::Degraded));
}

#[tokio::test]
async fn test_recovers_from_degraded() {
    let store = MockClusterStore::new();
    store.seed(&new_operator("mro")).unwrap();
    let reconciler = new_reconciler(&store);

    reconciler.reconcile(&key()).await.unwrap();
    assert!(reconciler.reconcile(&key()).await.is_err());

    store
        .seed(&Infrastructure::for_platform("cluster", Platform::Aws))
        .unwrap();
    let directive = reconciler.reconcile(&key()).await.unwrap();
    assert_eq!(directive, Directive::RequeueAfter(Duration::from_secs(5)));
    assert!(conditions_are(
        &fetch(&store).await,
        ConditionStatus::False,
        ConditionStatus::True,
        ConditionStatus::False,
    ));
}

#[tokio::test]
async fn test_store_failure_propagates() {
    let store = MockClusterStore::new();
    store
        .seed(&Infrastructure::for_platform("cluster", Platform::Aws))
        .unwrap();
    store.seed(&new_operator("mro")).unwrap();
    let reconciler = new_reconciler(&store);
    reconciler.reconcile(&key()).await.unwrap();

    store.fail_on(Verb::Create, "Deployment");
    let err = reconciler.reconcile(&key()).await.unwrap_err();
    assert!(err.is_retriable());
    assert!(fetch(&store).await.status.unwrap().is_true(ConditionType::Degraded));

    // creates from the failed attempt are kept and not repeated
    store.clear_failures();
    store.reset_counts();
    reconciler.reconcile(&key()).await.unwrap();
    assert_eq!(store.operation_counts().creates, 3);
    assert_eq!(store.count::<Deployment>(), 3);
}

#[tokio::test]
async fn test_fixed_replica_count() {
    let store = MockClusterStore::new();
    store
        .seed(&Infrastructure::for_platform("cluster", Platform::Aws))
        .unwrap();
    store.seed(&new_operator("mro")).unwrap();
    let config = OperatorConfig {
        operator_version: IMAGE_TAG.to_string(),
        crds_manifests_dir: crds_dir(),
        replicas: Some(3),
        ..Default::default()
    };
    let reconciler = Reconciler::new(store.clone(), InfrastructureOracle::new(store.clone()), config);

    reconciler.reconcile(&key()).await.unwrap();
    reconciler.reconcile(&key()).await.unwrap();

    let deployments: Vec<Deployment> = store.list(None).await.unwrap();
    assert!(
        deployments
            .iter()
            .all(|d| d.spec.as_ref().unwrap().replicas == Some(3))
    );
}

#[tokio::test]
async fn test_pending_crds_keep_progressing_without_degrading() {
    let store = MockClusterStore::new();
    store
        .seed(&Infrastructure::for_platform("cluster", Platform::BareMetal))
        .unwrap();
    store.seed(&new_operator("mro")).unwrap();
    let reconciler = new_reconciler(&store);

    reconciler.reconcile(&key()).await.unwrap();
    reconciler.reconcile(&key()).await.unwrap();

    // deployments are ready but the policy CRDs are not served yet
    mark_deployments_ready(&store).await;
    let directive = reconciler.reconcile(&key()).await.unwrap();
    assert_eq!(directive, Directive::RequeueAfter(Duration::from_secs(5)));
    assert!(conditions_are(
        &fetch(&store).await,
        ConditionStatus::False,
        ConditionStatus::True,
        ConditionStatus::False,
    ));
    assert_eq!(store.count::<MachineHealthCheck>(), 0);

    establish_crds(&store).await;
    assert_eq!(reconciler.reconcile(&key()).await.unwrap(), Directive::Done);
    assert_eq!(store.count::<MachineHealthCheck>(), 1);
    assert_eq!(store.count::<MachineDisruptionBudget>(), 1);
}

#[tokio::test]
async fn test_control_plane_growth_keeps_available() {
    let store = MockClusterStore::new();
    store
        .seed(&Infrastructure::for_platform("cluster", Platform::Aws))
        .unwrap();
    store.seed(&master_node("m0")).unwrap();
    let reconciler = new_reconciler(&store);
    converge(&store, &reconciler).await;

    store.seed(&master_node("m1")).unwrap();
    store.seed(&master_node("m2")).unwrap();
    mark_deployments_ready(&store).await;

    for _ in 0..5 {
        assert_eq!(reconciler.reconcile(&key()).await.unwrap(), Directive::Done);
    }
    assert!(conditions_are(
        &fetch(&store).await,
        ConditionStatus::True,
        ConditionStatus::False,
        ConditionStatus::False,
    ));

    // existing deployments keep the count they were created with
    let deployments: Vec<Deployment> = store.list(None).await.unwrap();
    assert!(
        deployments
            .iter()
            .all(|d| d.spec.as_ref().unwrap().replicas == Some(1))
    );
}

/// Platform lookup that never answers
struct HangingPlatform;

#[async_trait]
impl PlatformOracle for HangingPlatform {
    async fn platform(&self, _cluster_name: &str) -> mro_kube::Result<Platform> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_times_out() {
    let store = MockClusterStore::new();
    store.seed(&new_operator("mro")).unwrap();
    let config = OperatorConfig {
        operator_version: IMAGE_TAG.to_string(),
        crds_manifests_dir: crds_dir(),
        reconcile_timeout_seconds: 1,
        ..Default::default()
    };
    let reconciler = Reconciler::new(store.clone(), HangingPlatform, config);

    // the finalizer step does not consult the platform
    reconciler.reconcile(&key()).await.unwrap();

    store.reset_counts();
    let err = reconciler.reconcile(&key()).await.unwrap_err();
    assert!(matches!(err, OperatorError::Timeout(_)));
    assert!(err.is_retriable());
    assert_eq!(store.operation_counts().creates, 0);
    assert_eq!(store.count::<Deployment>(), 0);
}
