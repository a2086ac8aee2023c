//! MRO Kube - reconciliation engine for the machine remediation operator
//!
//! This crate provides:
//! - **Cluster Store**: Typed CRUD over the Kubernetes API, plus an in-memory store for tests
//! - **Platform Oracle**: Which infrastructure platform the cluster runs on
//! - **Desired State**: The complete set of dependents for a configuration object
//! - **Apply / Teardown**: Create-or-leave installation and ordered, not-found tolerant removal
//! - **Status**: Deployment readiness folded into Available / Progressing / Degraded
//! - **Reconciler**: One convergence step per call, finalizer first

pub mod apply;
pub mod config;
pub mod desired;
pub mod error;
pub mod finalizer;
pub mod manifests;
pub mod platform;
pub mod reconciler;
pub mod replicas;
pub mod status;
pub mod store;
pub mod teardown;

pub use apply::{ApplySummary, apply};
pub use config::OperatorConfig;
pub use desired::{BuildParams, DesiredResource, DesiredState, ResourceCategory};
pub use error::{OperatorError, Result};
pub use manifests::ManifestSource;
pub use platform::{InfrastructureOracle, PlatformOracle, StaticPlatform};
pub use reconciler::{Directive, Reconciler};
pub use replicas::ReplicaSource;
pub use status::Aggregate;
pub use store::{
    ClusterStore, KubeClusterStore, MockClusterStore, ObjectKey, OperationCounts, StoreObject, Verb,
};
pub use teardown::{TeardownReport, teardown};
