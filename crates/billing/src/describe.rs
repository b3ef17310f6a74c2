//! User-facing labels for plan choices

use plansync_shared::Plan;

use crate::config::ReconcileConfig;
use crate::record::SubscriptionRecord;

/// How choosing a plan compares to the subscription's current plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum PlanDifference {
    Upgrade,
    Downgrade,
    StartTrial,
}

impl PlanDifference {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanDifference::Upgrade => "Upgrade",
            PlanDifference::Downgrade => "Downgrade",
            PlanDifference::StartTrial => "Start Trial",
        }
    }
}

impl std::fmt::Display for PlanDifference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Label for offering `plan_to_describe` to the subscriber.
///
/// Unlike reconciliation, this compares prices.
pub fn describe_difference(
    record: &SubscriptionRecord,
    plan_to_describe: &Plan,
    config: &ReconcileConfig,
) -> PlanDifference {
    match &record.plan {
        None if record.is_persisted() => PlanDifference::Upgrade,
        None if config.free_trial_enabled => PlanDifference::StartTrial,
        None => PlanDifference::Upgrade,
        Some(current) if plan_to_describe.is_upgrade_from(current) => PlanDifference::Upgrade,
        Some(_) => PlanDifference::Downgrade,
    }
}
