//! Cluster infrastructure descriptor and platform variants
//!
//! The descriptor is owned by the cluster installer; the operator only ever
//! reads it to find out which platform it runs on.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Cluster-scoped infrastructure descriptor (`config.openshift.io/v1`)
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "config.openshift.io",
    version = "v1",
    kind = "Infrastructure",
    derive = "PartialEq",
    status = "InfrastructureStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_config: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_name: Option<String>,

    /// Legacy platform field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_status: Option<PlatformStatus>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct PlatformStatus {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
}

impl InfrastructureStatus {
    /// Raw platform name, preferring `platformStatus.type`
    pub fn platform_name(&self) -> Option<&str> {
        self.platform_status
            .as_ref()
            .and_then(|p| p.type_.as_deref())
            .or(self.platform.as_deref())
            .filter(|p| !p.is_empty())
    }
}

impl Infrastructure {
    /// Build a descriptor reporting the given platform
    pub fn for_platform(name: &str, platform: Platform) -> Self {
        let mut infra = Infrastructure::new(name, InfrastructureSpec::default());
        infra.status = Some(InfrastructureStatus {
            infrastructure_name: Some(name.to_string()),
            platform: Some(platform.to_string()),
            platform_status: Some(PlatformStatus {
                type_: Some(platform.to_string()),
            }),
        });
        infra
    }

    /// Parse the platform this descriptor reports
    pub fn platform(&self) -> crate::Result<Platform> {
        let name = self
            .status
            .as_ref()
            .and_then(InfrastructureStatus::platform_name)
            .ok_or_else(|| CoreError::MissingField {
                field: "status.platform".to_string(),
            })?;
        name.parse()
    }
}

/// Infrastructure platform variant
///
/// Closed on purpose: supporting a new platform means adding a variant here
/// and handling it everywhere the compiler asks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Aws,
    Azure,
    BareMetal,
    Gcp,
    IbmCloud,
    Libvirt,
    None,
    OpenStack,
    Ovirt,
    VSphere,
}

impl Platform {
    pub const ALL: [Platform; 10] = [
        Platform::Aws,
        Platform::Azure,
        Platform::BareMetal,
        Platform::Gcp,
        Platform::IbmCloud,
        Platform::Libvirt,
        Platform::None,
        Platform::OpenStack,
        Platform::Ovirt,
        Platform::VSphere,
    ];

    /// Name as written in the infrastructure descriptor
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Aws => "AWS",
            Platform::Azure => "Azure",
            Platform::BareMetal => "BareMetal",
            Platform::Gcp => "GCP",
            Platform::IbmCloud => "IBMCloud",
            Platform::Libvirt => "Libvirt",
            Platform::None => "None",
            Platform::OpenStack => "OpenStack",
            Platform::Ovirt => "oVirt",
            Platform::VSphere => "VSphere",
        }
    }

    /// Whether control-plane health-check and disruption-budget policies are installed
    pub fn requires_master_policies(&self) -> bool {
        match self {
            Platform::BareMetal => true,
            Platform::Aws
            | Platform::Azure
            | Platform::Gcp
            | Platform::IbmCloud
            | Platform::Libvirt
            | Platform::None
            | Platform::OpenStack
            | Platform::Ovirt
            | Platform::VSphere => false,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| CoreError::UnknownPlatform(s.to_string()))
    }
}
