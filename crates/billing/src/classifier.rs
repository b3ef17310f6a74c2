//! Plan change classification
//!
//! Direction is decided by comparing plan identifiers, not prices. Plans are
//! expected to be numbered in ascending tier order.

use plansync_shared::PlanId;

/// Kind of plan change pending on a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum PlanChange {
    NoChange,
    NewSubscription,
    Upgrade,
    Downgrade,
    Cancellation,
}

impl PlanChange {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanChange::NoChange => "no_change",
            PlanChange::NewSubscription => "new_subscription",
            PlanChange::Upgrade => "upgrade",
            PlanChange::Downgrade => "downgrade",
            PlanChange::Cancellation => "cancellation",
        }
    }
}

impl std::fmt::Display for PlanChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub fn is_changing(previous: Option<PlanId>, next: Option<PlanId>) -> bool {
    previous != next
}

pub fn is_downgrading(previous: Option<PlanId>, next: Option<PlanId>) -> bool {
    matches!((previous, next), (Some(prev), Some(next)) if prev > next)
}

/// Also true when there was no previous plan at all.
pub fn is_upgrading(previous: Option<PlanId>, next: Option<PlanId>) -> bool {
    match (previous, next) {
        (None, _) => true,
        (Some(prev), Some(next)) => prev < next,
        (Some(_), None) => false,
    }
}

pub fn classify(previous: Option<PlanId>, next: Option<PlanId>) -> PlanChange {
    if !is_changing(previous, next) {
        return PlanChange::NoChange;
    }

    match (previous, next) {
        (_, None) => PlanChange::Cancellation,
        (None, Some(_)) => PlanChange::NewSubscription,
        (Some(prev), Some(next)) if prev > next => PlanChange::Downgrade,
        _ => PlanChange::Upgrade,
    }
}
