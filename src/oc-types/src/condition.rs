//! Condition plumbing shared by every reconciler in the pipeline.
//!
//! Setting a condition to a tuple identical to its current value is a no-op:
//! this is what keeps reconciles from generating status churn on every poll.

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The host's own condition type, not a reimplementation of its field shape.
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;

/// Well-known condition types surfaced on `Catalog` and `ClusterExtension`.
pub mod types {
    pub const SERVING: &str = "Serving";
    pub const PROGRESSING: &str = "Progressing";
    pub const INSTALLED: &str = "Installed";
    pub const DEPRECATED: &str = "Deprecated";
    pub const PACKAGE_DEPRECATED: &str = "PackageDeprecated";
    pub const CHANNEL_DEPRECATED: &str = "ChannelDeprecated";
    pub const BUNDLE_DEPRECATED: &str = "BundleDeprecated";
}

/// Well-known reasons. Reasons are CamelCase tokens, not free text.
pub mod reasons {
    pub const AVAILABLE: &str = "Available";
    pub const UNAVAILABLE: &str = "Unavailable";
    pub const RETRYING: &str = "Retrying";
    pub const BLOCKED: &str = "Blocked";
    pub const INVALID_CONFIGURATION: &str = "InvalidConfiguration";
    pub const PREFLIGHT_FAILED: &str = "PreflightFailed";
    pub const SUCCEEDED: &str = "Succeeded";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    fn as_str(self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }
}

/// Fields compared when deciding whether setting a condition is a no-op.
/// `last_transition_time` is excluded since it is derived, not set by the
/// caller.
fn same_value(a: &Condition, b: &Condition) -> bool {
    a.type_ == b.type_
        && a.status == b.status
        && a.reason == b.reason
        && a.message == b.message
        && a.observed_generation == b.observed_generation
}

/// An ordered set of conditions, keyed by `type`, matching the Kubernetes
/// `metav1.Condition` list convention.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conditions(pub Vec<Condition>);

impl JsonSchema for Conditions {
    fn schema_name() -> String {
        "Conditions".to_string()
    }

    /// `k8s_openapi::Condition` carries no `JsonSchema` impl, so the CRD
    /// schema models `status.conditions` as an opaque array here, the same
    /// way the host's own CRD generators leave `metav1.Condition` lists
    /// unvalidated.
    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        gen.subschema_for::<Vec<serde_json::Value>>()
    }
}

impl Conditions {
    pub fn get(&self, type_: &str) -> Option<&Condition> {
        self.0.iter().find(|c| c.type_ == type_)
    }

    /// Set a condition. Returns `true` if the stored state changed.
    ///
    /// `now` is passed in rather than read from the clock so that callers
    /// can keep reconciles reproducible in tests.
    pub fn set(
        &mut self,
        type_: &str,
        status: ConditionStatus,
        reason: &str,
        message: impl Into<String>,
        observed_generation: i64,
        now: DateTime<Utc>,
    ) -> bool {
        let next = Condition {
            type_: type_.to_string(),
            status: status.as_str().to_string(),
            reason: reason.to_string(),
            message: message.into(),
            observed_generation: Some(observed_generation),
            last_transition_time: Time(now),
        };
        match self.0.iter_mut().find(|c| c.type_ == type_) {
            Some(existing) if same_value(existing, &next) => false,
            Some(existing) => {
                *existing = next;
                true
            }
            None => {
                self.0.push(next);
                true
            }
        }
    }

    pub fn is_true(&self, type_: &str) -> bool {
        matches!(self.get(type_), Some(c) if c.status == "True")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn setting_identical_tuple_is_noop() {
        let mut conds = Conditions::default();
        assert!(conds.set(types::SERVING, ConditionStatus::True, reasons::AVAILABLE, "ok", 1, t(0)));
        // Same tuple, later timestamp: must report no change and must not
        // bump last_transition_time.
        let changed = conds.set(types::SERVING, ConditionStatus::True, reasons::AVAILABLE, "ok", 1, t(100));
        assert!(!changed);
        assert_eq!(conds.get(types::SERVING).unwrap().last_transition_time.0, t(0));
    }

    #[test]
    fn setting_different_reason_transitions() {
        let mut conds = Conditions::default();
        conds.set(types::SERVING, ConditionStatus::True, reasons::AVAILABLE, "ok", 1, t(0));
        let changed = conds.set(types::SERVING, ConditionStatus::False, reasons::UNAVAILABLE, "down", 2, t(5));
        assert!(changed);
        assert_eq!(conds.get(types::SERVING).unwrap().last_transition_time.0, t(5));
    }

    #[test]
    fn is_true_reflects_status_string() {
        let mut conds = Conditions::default();
        conds.set(types::SERVING, ConditionStatus::True, reasons::AVAILABLE, "ok", 1, t(0));
        assert!(conds.is_true(types::SERVING));
        conds.set(types::SERVING, ConditionStatus::False, reasons::UNAVAILABLE, "down", 2, t(1));
        assert!(!conds.is_true(types::SERVING));
    }
}
