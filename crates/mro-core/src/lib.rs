//! MRO Core - API types for the machine remediation operator
//!
//! This crate provides the types shared by the operator and its tooling:
//! - `MachineRemediationOperator`: The user-authored configuration object
//! - `MachineHealthCheck` / `MachineDisruptionBudget`: Control-plane policies
//! - `Infrastructure` / `Platform`: The cluster platform descriptor
//! - `Component`: The workloads the operator installs
//! - `consts`: Identifiers shared with the rest of the deployment

pub mod component;
pub mod consts;
pub mod error;
pub mod infrastructure;
pub mod operator;
pub mod policy;

pub use component::Component;
pub use error::{CoreError, Result};
pub use infrastructure::{Infrastructure, InfrastructureSpec, InfrastructureStatus, Platform, PlatformStatus};
pub use operator::{
    ConditionStatus, ConditionType, MachineRemediationOperator, MachineRemediationOperatorSpec,
    MachineRemediationOperatorStatus, OperatorCondition,
};
pub use policy::{
    MachineDisruptionBudget, MachineDisruptionBudgetSpec, MachineHealthCheck,
    MachineHealthCheckSpec,
};
