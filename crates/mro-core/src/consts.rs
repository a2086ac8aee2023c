//! Fixed identifiers shared with the rest of the deployment

/// Namespace the operator and its components run in
pub const NAMESPACE_MACHINE_API: &str = "openshift-machine-api";

/// Finalizer owned by the operator on the configuration object
pub const OPERATOR_FINALIZER: &str = "foregroundDeleteMachineRemediationOperator";

/// Health-check policy created for control-plane machines on bare metal
pub const MASTER_MACHINE_HEALTH_CHECK: &str = "master-mhc";

/// Disruption-budget policy created for control-plane machines on bare metal
pub const MASTER_MACHINE_DISRUPTION_BUDGET: &str = "master-mdb";

/// Name of the cluster-scoped infrastructure descriptor
pub const INFRASTRUCTURE_NAME: &str = "cluster";

/// Label carried by control-plane nodes
pub const MASTER_NODE_ROLE_LABEL: &str = "node-role.kubernetes.io/master";

/// Label carrying a machine's role
pub const MACHINE_ROLE_LABEL: &str = "machine.openshift.io/cluster-api-machine-role";

/// Value of [`MACHINE_ROLE_LABEL`] on control-plane machines
pub const MACHINE_ROLE_MASTER: &str = "master";

/// Label used to select component pods
pub const APP_LABEL: &str = "app";

/// Label marking everything this operator creates
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`]
pub const MANAGED_BY: &str = "machine-remediation-operator";

/// Default tag used when neither the configuration object nor the operator sets one
pub const DEFAULT_OPERATOR_VERSION: &str = "latest";
