//! `ClusterExtensionRevision`: an immutable record of one bundle-install
//! attempt. See §3: the `revision` number and a non-empty `phases` list
//! cannot be mutated once set.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "olm.operatorframework.io",
    version = "v1",
    kind = "ClusterExtensionRevision",
    singular = "clusterextensionrevision",
    plural = "clusterextensionrevisions",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterExtensionRevisionSpec {
    /// Must be positive; immutable once set.
    pub revision: i64,
    /// Immutable once non-empty.
    #[serde(default)]
    pub phases: Vec<Phase>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Phase {
    pub name: String,
    pub objects: Vec<PhaseObject>,
}

/// A rendered object, kept as an opaque JSON value: the templating engine
/// that produces these is out of scope (§1).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PhaseObject {
    pub object: Value,
    pub collision_protection: CollisionProtection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum CollisionProtection {
    #[default]
    Prevent,
    IfNoController,
    None,
}

#[derive(Debug, Clone)]
pub struct RevisionValidationError(pub String);

impl std::fmt::Display for RevisionValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for RevisionValidationError {}

/// Validate a proposed update to a revision against the prior stored spec.
/// Returns `Err` if the update would violate §3's immutability invariants.
pub fn validate_update(
    prior: &ClusterExtensionRevisionSpec,
    next: &ClusterExtensionRevisionSpec,
) -> Result<(), RevisionValidationError> {
    if next.revision <= 0 {
        return Err(RevisionValidationError(
            "revision must be positive".to_string(),
        ));
    }
    if prior.revision != next.revision {
        return Err(RevisionValidationError(
            "revision is immutable once set".to_string(),
        ));
    }
    if !prior.phases.is_empty() {
        let prior_json = serde_json::to_value(&prior.phases).unwrap_or(Value::Null);
        let next_json = serde_json::to_value(&next.phases).unwrap_or(Value::Null);
        if prior_json != next_json {
            return Err(RevisionValidationError(
                "phases are immutable once non-empty".to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(revision: i64, phases: Vec<Phase>) -> ClusterExtensionRevisionSpec {
        ClusterExtensionRevisionSpec { revision, phases }
    }

    #[test]
    fn non_positive_revision_rejected() {
        let prior = spec(1, vec![]);
        let next = spec(0, vec![]);
        assert!(validate_update(&prior, &next).is_err());
    }

    #[test]
    fn revision_number_immutable() {
        let prior = spec(1, vec![]);
        let next = spec(2, vec![]);
        assert!(validate_update(&prior, &next).is_err());
    }

    #[test]
    fn phases_immutable_once_non_empty() {
        let phase = Phase {
            name: "crds".to_string(),
            objects: vec![],
        };
        let prior = spec(1, vec![phase.clone()]);
        let next = spec(1, vec![]);
        assert!(validate_update(&prior, &next).is_err());
    }

    #[test]
    fn setting_phases_from_empty_is_allowed() {
        let phase = Phase {
            name: "crds".to_string(),
            objects: vec![],
        };
        let prior = spec(1, vec![]);
        let next = spec(1, vec![phase]);
        assert!(validate_update(&prior, &next).is_ok());
    }
}
