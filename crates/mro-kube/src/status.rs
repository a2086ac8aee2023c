//! Status aggregation
//!
//! Folds the observed component deployments into one of three outcomes and
//! renders that outcome as the full Available / Progressing / Degraded
//! triple. Exactly one of the three is ever `True`.
//!
//! A deployment is ready only when it reports the replica count it was
//! created with and every replica runs the current template:
//! `updatedReplicas == replicas == spec.replicas`. The target is read from
//! the deployment itself, so a later change in the replica source never
//! strands an existing deployment.

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;

use mro_core::{ConditionStatus, ConditionType, OperatorCondition};

use crate::error::OperatorError;

/// Aggregate state of the installation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Aggregate {
    /// Every component deployment is ready
    Available,
    /// Some deployments are missing or still rolling out
    Progressing { pending: Vec<String> },
    /// A read, apply or lookup failed
    Degraded { reason: String, message: String },
}

impl Aggregate {
    pub fn degraded(err: &OperatorError) -> Self {
        Aggregate::Degraded {
            reason: err.reason().to_string(),
            message: err.to_string(),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Aggregate::Available)
    }

    /// Add resources that are still waiting to be created
    pub fn with_pending(self, more: Vec<String>) -> Self {
        if more.is_empty() {
            return self;
        }
        match self {
            Aggregate::Available => Aggregate::Progressing { pending: more },
            Aggregate::Progressing { mut pending } => {
                pending.extend(more);
                Aggregate::Progressing { pending }
            }
            degraded @ Aggregate::Degraded { .. } => degraded,
        }
    }

    /// The condition triple in its fixed order, without transition times
    pub fn conditions(&self) -> [OperatorCondition; 3] {
        let (available, progressing, degraded) = match self {
            Aggregate::Available => (
                OperatorCondition::new(
                    ConditionType::Available,
                    ConditionStatus::True,
                    "AllComponentsReady",
                    "all components are ready",
                ),
                not_progressing(),
                not_degraded(),
            ),
            Aggregate::Progressing { pending } => (
                not_available(),
                OperatorCondition::new(
                    ConditionType::Progressing,
                    ConditionStatus::True,
                    "Deploying",
                    format!("waiting for: {}", pending.join(", ")),
                ),
                not_degraded(),
            ),
            Aggregate::Degraded { reason, message } => (
                not_available(),
                not_progressing(),
                OperatorCondition::new(
                    ConditionType::Degraded,
                    ConditionStatus::True,
                    reason.clone(),
                    message.clone(),
                ),
            ),
        };
        [available, progressing, degraded]
    }
}

fn not_available() -> OperatorCondition {
    OperatorCondition::new(
        ConditionType::Available,
        ConditionStatus::False,
        "ComponentsNotReady",
        "not all components are ready",
    )
}

fn not_progressing() -> OperatorCondition {
    OperatorCondition::new(
        ConditionType::Progressing,
        ConditionStatus::False,
        "Idle",
        "no rollout in progress",
    )
}

fn not_degraded() -> OperatorCondition {
    OperatorCondition::new(
        ConditionType::Degraded,
        ConditionStatus::False,
        "AsExpected",
        "no errors",
    )
}

/// Check whether one deployment has converged on its own `spec.replicas`
pub fn deployment_ready(deployment: &Deployment) -> bool {
    let Some(status) = &deployment.status else {
        return false;
    };
    // the API server defaults an unset replica count to 1
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let replicas = status.replicas.unwrap_or(0);
    let updated = status.updated_replicas.unwrap_or(0);
    updated == replicas && replicas == desired
}

/// Aggregate observed deployments, keyed by name; `None` means not found
pub fn aggregate(observed: &[(String, Option<Deployment>)]) -> Aggregate {
    let pending: Vec<String> = observed
        .iter()
        .filter(|(_, d)| !d.as_ref().is_some_and(deployment_ready))
        .map(|(name, _)| name.clone())
        .collect();

    if pending.is_empty() {
        Aggregate::Available
    } else {
        Aggregate::Progressing { pending }
    }
}

/// Merge computed conditions into existing ones
///
/// A condition keeps its previous transition time while its status is
/// unchanged, so re-applying the same aggregate is a no-op.
pub fn apply_conditions(
    existing: &[OperatorCondition],
    computed: [OperatorCondition; 3],
    now: DateTime<Utc>,
) -> Vec<OperatorCondition> {
    computed
        .into_iter()
        .map(|mut condition| {
            let previous = existing.iter().find(|c| c.type_ == condition.type_);
            condition.last_transition_time = match previous {
                Some(prev) if prev.status == condition.status => {
                    prev.last_transition_time.or(Some(now))
                }
                _ => Some(now),
            };
            condition
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use k8s_openapi::api::apps::v1::{DeploymentSpec, DeploymentStatus};

    fn deployment(desired: i32, replicas: i32, updated: i32) -> Deployment {
        Deployment {
            spec: Some(DeploymentSpec {
                replicas: Some(desired),
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                replicas: Some(replicas),
                updated_replicas: Some(updated),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn true_count(conditions: &[OperatorCondition]) -> usize {
        conditions
            .iter()
            .filter(|c| c.status == ConditionStatus::True)
            .count()
    }

    #[test]
    fn test_deployment_ready() {
        assert!(deployment_ready(&deployment(1, 1, 1)));
        assert!(deployment_ready(&deployment(2, 2, 2)));
        assert!(!deployment_ready(&deployment(2, 1, 1)));
        assert!(!deployment_ready(&deployment(2, 2, 1)));
        assert!(!deployment_ready(&Deployment::default()));
    }

    #[test]
    fn test_unset_spec_replicas_means_one() {
        let mut d = deployment(1, 1, 1);
        d.spec.as_mut().unwrap().replicas = None;
        assert!(deployment_ready(&d));
    }

    #[test]
    fn test_aggregate() {
        let ready = vec![
            ("a".to_string(), Some(deployment(1, 1, 1))),
            ("b".to_string(), Some(deployment(2, 2, 2))),
        ];
        assert_eq!(aggregate(&ready), Aggregate::Available);

        let partial = vec![
            ("a".to_string(), Some(deployment(1, 1, 1))),
            ("b".to_string(), Some(deployment(1, 1, 0))),
            ("c".to_string(), None),
        ];
        assert_eq!(
            aggregate(&partial),
            Aggregate::Progressing {
                pending: vec!["b".to_string(), "c".to_string()]
            }
        );
    }

    #[test]
    fn test_with_pending() {
        assert_eq!(Aggregate::Available.with_pending(vec![]), Aggregate::Available);
        assert_eq!(
            Aggregate::Available.with_pending(vec!["x".to_string()]),
            Aggregate::Progressing {
                pending: vec!["x".to_string()]
            }
        );
        assert_eq!(
            Aggregate::Progressing {
                pending: vec!["a".to_string()]
            }
            .with_pending(vec!["x".to_string()]),
            Aggregate::Progressing {
                pending: vec!["a".to_string(), "x".to_string()]
            }
        );
        let degraded = Aggregate::degraded(&OperatorError::Store("down".to_string()));
        assert_eq!(degraded.clone().with_pending(vec!["x".to_string()]), degraded);
    }

    #[test]
    fn test_exactly_one_true() {
        let outcomes = [
            Aggregate::Available,
            Aggregate::Progressing {
                pending: vec!["a".to_string()],
            },
            Aggregate::degraded(&OperatorError::Platform("boom".to_string())),
        ];
        for outcome in outcomes {
            let conditions = outcome.conditions();
            let types: Vec<_> = conditions.iter().map(|c| c.type_).collect();
            assert_eq!(types, ConditionType::ALL.to_vec());
            assert_eq!(true_count(&conditions), 1, "{:?}", outcome);
        }
    }

    #[test]
    fn test_degraded_carries_error_reason() {
        let conditions =
            Aggregate::degraded(&OperatorError::Platform("no descriptor".to_string())).conditions();
        assert_eq!(conditions[2].reason, "PlatformLookupFailed");
        assert!(conditions[2].message.contains("no descriptor"));
    }

    #[test]
    fn test_transition_time_preserved_while_status_holds() {
        let t0 = Utc::now() - Duration::minutes(10);
        let t1 = Utc::now();

        let first = apply_conditions(&[], Aggregate::Available.conditions(), t0);
        assert!(first.iter().all(|c| c.last_transition_time == Some(t0)));

        let again = apply_conditions(&first, Aggregate::Available.conditions(), t1);
        assert_eq!(again, first);

        let degraded = apply_conditions(
            &first,
            Aggregate::degraded(&OperatorError::Timeout("1s".to_string())).conditions(),
            t1,
        );
        // Available and Degraded flipped; Progressing stayed False
        assert_eq!(degraded[0].last_transition_time, Some(t1));
        assert_eq!(degraded[1].last_transition_time, Some(t0));
        assert_eq!(degraded[2].last_transition_time, Some(t1));
    }
}
