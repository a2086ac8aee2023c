//! Control-plane remediation policies
//!
//! Both kinds are served by CRDs the operator installs, and are only created
//! on bare-metal clusters where a failed control-plane machine can actually
//! be power-cycled.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::consts::{MACHINE_ROLE_LABEL, MACHINE_ROLE_MASTER};

/// Watches machines matching a selector and requests remediation for unhealthy ones
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "machineremediation.kubevirt.io",
    version = "v1alpha1",
    kind = "MachineHealthCheck",
    derive = "PartialEq",
    namespaced,
    shortname = "mhc"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineHealthCheckSpec {
    /// Machines to watch
    pub selector: LabelSelector,
}

/// Limits how many matching machines may be remediated at once
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "machineremediation.kubevirt.io",
    version = "v1alpha1",
    kind = "MachineDisruptionBudget",
    derive = "PartialEq",
    namespaced,
    shortname = "mdb"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineDisruptionBudgetSpec {
    /// Machines covered by the budget
    pub selector: LabelSelector,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_available: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<i32>,
}

/// Selector matching control-plane machines
pub fn master_machine_selector() -> LabelSelector {
    LabelSelector {
        match_labels: Some(BTreeMap::from([(
            MACHINE_ROLE_LABEL.to_string(),
            MACHINE_ROLE_MASTER.to_string(),
        )])),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_selector() {
        let selector = master_machine_selector();
        let labels = selector.match_labels.unwrap();
        assert_eq!(labels.get(MACHINE_ROLE_LABEL).map(String::as_str), Some("master"));
    }

    #[test]
    fn test_disruption_budget_skips_unset_bounds() {
        let spec = MachineDisruptionBudgetSpec {
            selector: master_machine_selector(),
            min_available: None,
            max_unavailable: Some(1),
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["maxUnavailable"], 1);
        assert!(json.get("minAvailable").is_none());
    }
}
