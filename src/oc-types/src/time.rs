//! Time helpers. The host's status subresource round-trips timestamps
//! through RFC3339-with-second-precision, so every `unpacked_at` /
//! `last_successful_poll_attempt` we hand back must already be truncated;
//! otherwise two reconciles of an unchanged object would disagree on
//! whether the timestamp changed and generate status churn.

use chrono::{DateTime, SubsecRound, Utc};

/// Truncate `t` to whole seconds, matching how the host serializes
/// `metav1.Time`.
pub fn truncate_to_second(t: DateTime<Utc>) -> DateTime<Utc> {
    t.trunc_subsecs(0)
}

pub fn now_truncated() -> DateTime<Utc> {
    truncate_to_second(Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn truncates_subsecond_component() {
        let t = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let truncated = truncate_to_second(t);
        assert_eq!(truncated.timestamp_subsec_nanos(), 0);
        assert_eq!(truncated.timestamp(), 1_700_000_000);
    }
}
