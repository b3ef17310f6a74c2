//! Common types used across PlanSync

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use time::OffsetDateTime;

use crate::error::SharedError;

// =============================================================================
// ID Wrappers
// =============================================================================

/// Plan ID wrapper
///
/// Ordering follows the numeric identifier. Upgrade/downgrade classification
/// relies on plans being numbered in ascending tier order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(pub i64);

impl From<i64> for PlanId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl FromStr for PlanId {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|_| SharedError::Validation(format!("Invalid plan ID: {}", s)))
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Plans
// =============================================================================

/// A subscribable plan, mirrored by a plan on the payment processor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub name: String,
    /// Price in cents
    pub price: Option<i64>,
    /// Plan identifier on the payment processor
    pub remote_plan_id: String,
    pub trial_period_days: Option<u32>,
}

impl Plan {
    pub fn new(id: i64, name: impl Into<String>, price: i64, remote_plan_id: impl Into<String>) -> Self {
        Self {
            id: PlanId(id),
            name: name.into(),
            price: Some(price),
            remote_plan_id: remote_plan_id.into(),
            trial_period_days: None,
        }
    }

    pub fn with_trial_days(mut self, days: u32) -> Self {
        self.trial_period_days = Some(days);
        self
    }

    /// Whether moving from `other` to this plan costs the same or more.
    /// A missing price counts as free.
    pub fn is_upgrade_from(&self, other: &Plan) -> bool {
        self.price.unwrap_or(0) >= other.price.unwrap_or(0)
    }
}

// =============================================================================
// Coupons
// =============================================================================

/// Capability exposed by coupon types that can grant a free trial
pub trait CouponProvider: std::fmt::Debug + Send + Sync {
    fn is_free_trial(&self) -> bool;
    fn free_trial_ends_at(&self) -> Option<OffsetDateTime>;
}

/// Coupon applied to a subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    pub code: String,
    pub free_trial: bool,
    pub free_trial_ends_at: Option<OffsetDateTime>,
}

impl Coupon {
    /// Coupon that grants a free trial until `ends_at`
    pub fn free_trial(code: impl Into<String>, ends_at: OffsetDateTime) -> Self {
        Self {
            code: code.into(),
            free_trial: true,
            free_trial_ends_at: Some(ends_at),
        }
    }
}

impl CouponProvider for Coupon {
    fn is_free_trial(&self) -> bool {
        self.free_trial
    }

    fn free_trial_ends_at(&self) -> Option<OffsetDateTime> {
        self.free_trial_ends_at
    }
}

// =============================================================================
// Owners
// =============================================================================

/// Whatever entity a subscription belongs to (a user, an organization, ...)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionOwner {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
}

impl SubscriptionOwner {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    /// Customer description sent to the payment processor.
    /// Missing contact fields render as empty strings.
    pub fn description(&self) -> String {
        format!(
            "{} - {} - {} - {}",
            self.id,
            self.email.as_deref().unwrap_or_default(),
            self.name.as_deref().unwrap_or_default(),
            self.phone.as_deref().unwrap_or_default()
        )
    }

    pub fn email_or_empty(&self) -> &str {
        self.email.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_id_ordering() {
        assert!(PlanId(1) < PlanId(2));
        assert!(Some(PlanId(3)) > Some(PlanId(2)));
    }

    #[test]
    fn test_plan_id_parse() {
        assert_eq!("42".parse::<PlanId>().unwrap(), PlanId(42));
        assert!("pro".parse::<PlanId>().is_err());
    }

    #[test]
    fn test_is_upgrade_from_compares_price() {
        let basic = Plan::new(1, "Basic", 1000, "basic");
        let pro = Plan::new(2, "Pro", 2900, "pro");
        assert!(pro.is_upgrade_from(&basic));
        assert!(!basic.is_upgrade_from(&pro));
        assert!(basic.is_upgrade_from(&basic));

        let unpriced = Plan {
            price: None,
            ..Plan::new(3, "Legacy", 0, "legacy")
        };
        assert!(basic.is_upgrade_from(&unpriced));
    }

    #[test]
    fn test_owner_description_with_missing_fields() {
        let owner = SubscriptionOwner::new("17").with_email("ada@example.com");
        assert_eq!(owner.description(), "17 - ada@example.com -  - ");
        assert_eq!(owner.email_or_empty(), "ada@example.com");

        let bare = SubscriptionOwner::new("18");
        assert_eq!(bare.description(), "18 -  -  - ");
        assert_eq!(bare.email_or_empty(), "");
    }

    #[test]
    fn test_coupon_serde() {
        let coupon = Coupon::free_trial("WELCOME", OffsetDateTime::UNIX_EPOCH);
        let json = serde_json::to_string(&coupon).unwrap();
        let back: Coupon = serde_json::from_str(&json).unwrap();
        assert_eq!(back, coupon);
        assert!(back.is_free_trial());
    }
}
