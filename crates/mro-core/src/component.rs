//! Components installed by the operator

use std::fmt;

/// A managed component; each one gets a Deployment, a ServiceAccount and cluster RBAC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Component {
    MachineRemediation,
    MachineHealthCheck,
    MachineDisruptionBudget,
}

impl Component {
    /// Every component, in installation order
    pub const ALL: [Component; 3] = [
        Component::MachineRemediation,
        Component::MachineHealthCheck,
        Component::MachineDisruptionBudget,
    ];

    /// Name used for the deployment, its container, image and service account
    pub fn name(&self) -> &'static str {
        match self {
            Component::MachineRemediation => "machine-remediation",
            Component::MachineHealthCheck => "machine-health-check",
            Component::MachineDisruptionBudget => "machine-disruption-budget",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_unique() {
        let mut names: Vec<_> = Component::ALL.iter().map(|c| c.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), Component::ALL.len());
    }
}
