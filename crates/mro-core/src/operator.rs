//! The MachineRemediationOperator configuration object
//!
//! A single object per namespace drives the whole installation. Its spec
//! selects where component images come from; its status reports the
//! aggregate readiness of the installed components as three conditions.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Configuration for the machine remediation installation
///
/// # Example
///
/// ```yaml
/// apiVersion: machineremediation.kubevirt.io/v1alpha1
/// kind: MachineRemediationOperator
/// metadata:
///   name: mro
///   namespace: openshift-machine-api
/// spec:
///   imageRegistry: quay.io/kubevirt
///   imagePullPolicy: IfNotPresent
/// ```
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "machineremediation.kubevirt.io",
    version = "v1alpha1",
    kind = "MachineRemediationOperator",
    derive = "PartialEq",
    namespaced,
    status = "MachineRemediationOperatorStatus",
    shortname = "mro",
    printcolumn = r#"{"name":"Registry","type":"string","jsonPath":".spec.imageRegistry"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MachineRemediationOperatorSpec {
    /// Registry prefix for component images (e.g. `quay.io/kubevirt`)
    pub image_registry: String,

    /// Pull policy copied verbatim onto every component container
    #[serde(default = "default_image_pull_policy")]
    pub image_pull_policy: String,

    /// Image tag; the operator's own version is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

fn default_image_pull_policy() -> String {
    "IfNotPresent".to_string()
}

impl MachineRemediationOperatorSpec {
    /// Resolve the image tag, falling back to the operator version
    pub fn version_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.version
            .as_deref()
            .filter(|v| !v.is_empty())
            .unwrap_or(fallback)
    }
}

/// Observed state of the installation
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineRemediationOperatorStatus {
    /// Ordered Available, Progressing, Degraded conditions
    #[serde(default)]
    pub conditions: Vec<OperatorCondition>,
}

impl MachineRemediationOperatorStatus {
    /// Find a condition by type
    pub fn condition(&self, type_: ConditionType) -> Option<&OperatorCondition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Check whether a condition is present with status True
    pub fn is_true(&self, type_: ConditionType) -> bool {
        self.condition(type_)
            .map(|c| c.status == ConditionStatus::True)
            .unwrap_or(false)
    }
}

/// Condition types reported on the configuration object
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ConditionType {
    Available,
    Progressing,
    Degraded,
}

impl ConditionType {
    /// All condition types in the order they are written
    pub const ALL: [ConditionType; 3] = [
        ConditionType::Available,
        ConditionType::Progressing,
        ConditionType::Degraded,
    ];
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConditionType::Available => "Available",
            ConditionType::Progressing => "Progressing",
            ConditionType::Degraded => "Degraded",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for ConditionType {
    type Err = crate::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Available" => Ok(ConditionType::Available),
            "Progressing" => Ok(ConditionType::Progressing),
            "Degraded" => Ok(ConditionType::Degraded),
            other => Err(crate::CoreError::UnknownConditionType(other.to_string())),
        }
    }
}

/// Kubernetes-style tri-state condition status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        };
        write!(f, "{}", s)
    }
}

/// A single status condition
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperatorCondition {
    #[serde(rename = "type")]
    pub type_: ConditionType,

    pub status: ConditionStatus,

    /// Last time the status flipped; unchanged while the status holds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,

    /// Machine-readable CamelCase reason
    #[serde(default)]
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,
}

impl OperatorCondition {
    pub fn new(
        type_: ConditionType,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_,
            status,
            last_transition_time: None,
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// Equal in everything except the transition timestamp
    pub fn same_state(&self, other: &OperatorCondition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}
