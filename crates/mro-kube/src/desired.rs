//! Desired-state builder
//!
//! Maps (configuration, platform, CRD templates) to the complete set of
//! dependent resources. Pure: the result never depends on what is currently
//! in the cluster, so every reconcile re-derives it from scratch.
//!
//! Resources come out ordered by [`ResourceCategory`]; creation walks that
//! order and teardown walks it backwards.

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, PodSpec, PodTemplateSpec, ResourceRequirements, ServiceAccount, Toleration,
};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use kube::Resource;
use std::collections::BTreeMap;

use mro_core::consts::{
    APP_LABEL, MANAGED_BY, MANAGED_BY_LABEL, MASTER_MACHINE_DISRUPTION_BUDGET,
    MASTER_MACHINE_HEALTH_CHECK, MASTER_NODE_ROLE_LABEL,
};
use mro_core::policy::master_machine_selector;
use mro_core::{
    Component, MachineDisruptionBudget, MachineDisruptionBudgetSpec, MachineHealthCheck,
    MachineHealthCheckSpec, MachineRemediationOperator, Platform,
};

use crate::store::ObjectKey;

/// Resource category for ordering during installation
///
/// Resources are installed in order from lowest to highest category value
/// and removed in the reverse order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceCategory {
    /// CustomResourceDefinition - installed first
    Crd = 0,
    /// ClusterRole, ClusterRoleBinding
    ClusterRbac = 10,
    /// ServiceAccount
    NamespacedRbac = 11,
    /// Deployment
    Workload = 40,
    /// Custom Resources (using CRDs)
    CustomResource = 70,
}

/// One dependent resource the operator owns
#[derive(Debug, Clone, PartialEq)]
pub enum DesiredResource {
    CustomResourceDefinition(CustomResourceDefinition),
    ClusterRole(ClusterRole),
    ClusterRoleBinding(ClusterRoleBinding),
    ServiceAccount(ServiceAccount),
    Deployment(Deployment),
    MachineHealthCheck(MachineHealthCheck),
    MachineDisruptionBudget(MachineDisruptionBudget),
}

/// Run `$body` with `$obj` bound to the typed object inside a [`DesiredResource`]
macro_rules! with_object {
    ($resource:expr, $obj:ident => $body:expr) => {
        match $resource {
            $crate::desired::DesiredResource::CustomResourceDefinition($obj) => $body,
            $crate::desired::DesiredResource::ClusterRole($obj) => $body,
            $crate::desired::DesiredResource::ClusterRoleBinding($obj) => $body,
            $crate::desired::DesiredResource::ServiceAccount($obj) => $body,
            $crate::desired::DesiredResource::Deployment($obj) => $body,
            $crate::desired::DesiredResource::MachineHealthCheck($obj) => $body,
            $crate::desired::DesiredResource::MachineDisruptionBudget($obj) => $body,
        }
    };
}
pub(crate) use with_object;

impl DesiredResource {
    pub fn category(&self) -> ResourceCategory {
        match self {
            DesiredResource::CustomResourceDefinition(_) => ResourceCategory::Crd,
            DesiredResource::ClusterRole(_) | DesiredResource::ClusterRoleBinding(_) => {
                ResourceCategory::ClusterRbac
            }
            DesiredResource::ServiceAccount(_) => ResourceCategory::NamespacedRbac,
            DesiredResource::Deployment(_) => ResourceCategory::Workload,
            DesiredResource::MachineHealthCheck(_) | DesiredResource::MachineDisruptionBudget(_) => {
                ResourceCategory::CustomResource
            }
        }
    }

    pub fn kind(&self) -> String {
        with_object!(self, obj => kind_name(obj))
    }

    pub fn key(&self) -> ObjectKey {
        with_object!(self, obj => ObjectKey::for_object(obj))
    }

    /// Get display name for logging
    pub fn display_name(&self) -> String {
        format!("{}/{}", self.kind(), self.key())
    }
}

fn kind_name<K: Resource<DynamicType = ()>>(_: &K) -> String {
    K::kind(&()).into_owned()
}

/// Inputs that come from the operator's own configuration rather than the object
#[derive(Debug, Clone)]
pub struct BuildParams {
    /// Namespace for every namespaced dependent
    pub namespace: String,
    /// Image tag used when the configuration object sets none
    pub operator_version: String,
    /// Desired replica count for every component deployment
    pub replicas: i32,
}

/// The complete target resource set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesiredState {
    resources: Vec<DesiredResource>,
}

impl DesiredState {
    /// Everything that should exist for `operator` on `platform`
    pub fn build(
        operator: &MachineRemediationOperator,
        platform: Platform,
        crds: &[CustomResourceDefinition],
        params: &BuildParams,
    ) -> Self {
        Self::assemble(operator, crds, params, platform.requires_master_policies())
    }

    /// Everything the operator may have created on any platform
    ///
    /// Used for teardown, which must not depend on a working platform lookup.
    pub fn removal_set(
        operator: &MachineRemediationOperator,
        crds: &[CustomResourceDefinition],
        params: &BuildParams,
    ) -> Self {
        Self::assemble(operator, crds, params, true)
    }

    fn assemble(
        operator: &MachineRemediationOperator,
        crds: &[CustomResourceDefinition],
        params: &BuildParams,
        with_policies: bool,
    ) -> Self {
        let owner = operator.controller_owner_ref(&()).map(|o| vec![o]);
        let mut resources = Vec::new();

        resources.extend(
            crds.iter()
                .cloned()
                .map(build_crd)
                .map(DesiredResource::CustomResourceDefinition),
        );

        for component in Component::ALL {
            resources.push(DesiredResource::ClusterRole(build_cluster_role(component)));
            resources.push(DesiredResource::ClusterRoleBinding(
                build_cluster_role_binding(component, &params.namespace),
            ));
            resources.push(DesiredResource::ServiceAccount(build_service_account(
                component,
                &params.namespace,
                owner.clone(),
            )));
            resources.push(DesiredResource::Deployment(build_deployment(
                component,
                operator,
                params,
                owner.clone(),
            )));
        }

        if with_policies {
            resources.push(DesiredResource::MachineHealthCheck(build_health_check(
                &params.namespace,
                owner.clone(),
            )));
            resources.push(DesiredResource::MachineDisruptionBudget(
                build_disruption_budget(&params.namespace, owner),
            ));
        }

        resources.sort_by_key(DesiredResource::category);
        Self { resources }
    }

    /// Resources in creation order
    pub fn resources(&self) -> &[DesiredResource] {
        &self.resources
    }

    /// Component deployments
    pub fn deployments(&self) -> impl Iterator<Item = &Deployment> {
        self.resources.iter().filter_map(|r| match r {
            DesiredResource::Deployment(d) => Some(d),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// `{registry}/{name}:{version}`
pub fn image_for(registry: &str, name: &str, version: &str) -> String {
    format!("{}/{}:{}", registry, name, version)
}

fn managed_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string())])
}

fn component_labels(component: Component) -> BTreeMap<String, String> {
    let mut labels = managed_labels();
    labels.insert(APP_LABEL.to_string(), component.name().to_string());
    labels
}

fn metadata(
    name: &str,
    namespace: Option<&str>,
    labels: BTreeMap<String, String>,
    owner: Option<Vec<OwnerReference>>,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        labels: Some(labels),
        owner_references: owner,
        ..Default::default()
    }
}

fn build_crd(mut crd: CustomResourceDefinition) -> CustomResourceDefinition {
    crd.metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .extend(managed_labels());
    // templates may come straight from a cluster dump
    crd.metadata.resource_version = None;
    crd.metadata.uid = None;
    crd.status = None;
    crd
}

fn rule(api_groups: &[&str], resources: &[&str], verbs: &[&str]) -> PolicyRule {
    let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    PolicyRule {
        api_groups: Some(owned(api_groups)),
        resources: Some(owned(resources)),
        verbs: owned(verbs),
        ..Default::default()
    }
}

const READ: &[&str] = &["get", "list", "watch"];
const WRITE: &[&str] = &["get", "list", "watch", "create", "update", "patch", "delete"];
const REMEDIATION_GROUP: &str = "machineremediation.kubevirt.io";
const MACHINE_GROUP: &str = "machine.openshift.io";

fn cluster_role_rules(component: Component) -> Vec<PolicyRule> {
    match component {
        Component::MachineRemediation => vec![
            rule(&[REMEDIATION_GROUP], &["machineremediations", "machineremediations/status"], WRITE),
            rule(&[MACHINE_GROUP], &["machines"], WRITE),
            rule(&["metal3.io"], &["baremetalhosts"], &["get", "list", "watch", "update", "patch"]),
            rule(&[""], &["nodes"], &["get", "list", "watch", "update", "patch"]),
            rule(&[""], &["events"], &["create", "patch"]),
        ],
        Component::MachineHealthCheck => vec![
            rule(&[REMEDIATION_GROUP], &["machinehealthchecks", "machinehealthchecks/status"], WRITE),
            rule(&[REMEDIATION_GROUP], &["machineremediations"], &["get", "list", "watch", "create"]),
            rule(&[REMEDIATION_GROUP], &["machinedisruptionbudgets"], READ),
            rule(&[MACHINE_GROUP], &["machines"], READ),
            rule(&[""], &["nodes"], READ),
            rule(&[""], &["events"], &["create", "patch"]),
        ],
        Component::MachineDisruptionBudget => vec![
            rule(
                &[REMEDIATION_GROUP],
                &["machinedisruptionbudgets", "machinedisruptionbudgets/status"],
                WRITE,
            ),
            rule(&[MACHINE_GROUP], &["machines"], READ),
            rule(&[""], &["events"], &["create", "patch"]),
        ],
    }
}

fn build_cluster_role(component: Component) -> ClusterRole {
    ClusterRole {
        metadata: metadata(component.name(), None, component_labels(component), None),
        rules: Some(cluster_role_rules(component)),
        ..Default::default()
    }
}

fn build_cluster_role_binding(component: Component, namespace: &str) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: metadata(component.name(), None, component_labels(component), None),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: component.name().to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: component.name().to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    }
}

fn build_service_account(
    component: Component,
    namespace: &str,
    owner: Option<Vec<OwnerReference>>,
) -> ServiceAccount {
    ServiceAccount {
        metadata: metadata(
            component.name(),
            Some(namespace),
            component_labels(component),
            owner,
        ),
        ..Default::default()
    }
}

fn build_container(component: Component, operator: &MachineRemediationOperator, params: &BuildParams) -> Container {
    let spec = &operator.spec;
    let name = component.name().to_string();
    let image = image_for(
        &spec.image_registry,
        &name,
        spec.version_or(&params.operator_version),
    );

    Container {
        command: Some(vec![format!("/usr/bin/{}", name)]),
        args: Some(vec![format!("--namespace={}", params.namespace)]),
        image: Some(image),
        image_pull_policy: Some(spec.image_pull_policy.clone()),
        resources: Some(ResourceRequirements {
            requests: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity("10m".to_string())),
                ("memory".to_string(), Quantity("50Mi".to_string())),
            ])),
            ..Default::default()
        }),
        name,
        ..Default::default()
    }
}

fn build_deployment(
    component: Component,
    operator: &MachineRemediationOperator,
    params: &BuildParams,
    owner: Option<Vec<OwnerReference>>,
) -> Deployment {
    let labels = component_labels(component);
    let selector = BTreeMap::from([(APP_LABEL.to_string(), component.name().to_string())]);

    Deployment {
        metadata: metadata(component.name(), Some(&params.namespace), labels.clone(), owner),
        spec: Some(DeploymentSpec {
            replicas: Some(params.replicas),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![build_container(component, operator, params)],
                    service_account_name: Some(component.name().to_string()),
                    priority_class_name: Some("system-node-critical".to_string()),
                    node_selector: Some(BTreeMap::from([(
                        MASTER_NODE_ROLE_LABEL.to_string(),
                        String::new(),
                    )])),
                    tolerations: Some(vec![Toleration {
                        key: Some(MASTER_NODE_ROLE_LABEL.to_string()),
                        operator: Some("Exists".to_string()),
                        effect: Some("NoSchedule".to_string()),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn build_health_check(namespace: &str, owner: Option<Vec<OwnerReference>>) -> MachineHealthCheck {
    let mut mhc = MachineHealthCheck::new(
        MASTER_MACHINE_HEALTH_CHECK,
        MachineHealthCheckSpec {
            selector: master_machine_selector(),
        },
    );
    mhc.metadata = metadata(MASTER_MACHINE_HEALTH_CHECK, Some(namespace), managed_labels(), owner);
    mhc
}

fn build_disruption_budget(
    namespace: &str,
    owner: Option<Vec<OwnerReference>>,
) -> MachineDisruptionBudget {
    let mut mdb = MachineDisruptionBudget::new(
        MASTER_MACHINE_DISRUPTION_BUDGET,
        MachineDisruptionBudgetSpec {
            selector: master_machine_selector(),
            min_available: None,
            max_unavailable: Some(1),
        },
    );
    mdb.metadata = metadata(
        MASTER_MACHINE_DISRUPTION_BUDGET,
        Some(namespace),
        managed_labels(),
        owner,
    );
    mdb
}
