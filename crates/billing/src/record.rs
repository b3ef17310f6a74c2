//! Local subscription record
//!
//! The record mirrors the plan, price and card summary of one remote
//! customer. Plan changes are tracked against a snapshot taken when the
//! record was loaded or last persisted.

use plansync_shared::{CouponProvider, Plan, PlanId, SubscriptionOwner};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::classifier::{self, PlanChange};
use crate::guard::RecursionGuard;

/// A subscription as owned by the embedding application
#[derive(Debug, Clone)]
pub struct SubscriptionRecord {
    pub id: Uuid,
    pub owner: SubscriptionOwner,
    pub plan: Option<Plan>,
    /// Mirrors `plan.price` (cents) once reconciled
    pub current_price: Option<i64>,
    /// Customer id on the payment processor. Never cleared once set.
    pub remote_customer_id: Option<String>,
    pub card_last_four: Option<String>,
    /// Any coupon type; only its free-trial capability is read
    pub coupon: Option<Arc<dyn CouponProvider>>,
    /// Single-use card token from the client side. Never persisted.
    pub credit_card_token: Option<String>,
    /// Disable proration for the pending plan change only
    pub skip_prorate_on_plan_change: bool,
    previous_plan_id: Option<PlanId>,
    persisted: bool,
    errors: Vec<String>,
    guard: RecursionGuard,
}

impl SubscriptionRecord {
    /// A fresh record: no plan and no remote customer yet
    pub fn new(owner: SubscriptionOwner) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner,
            plan: None,
            current_price: None,
            remote_customer_id: None,
            card_last_four: None,
            coupon: None,
            credit_card_token: None,
            skip_prorate_on_plan_change: false,
            previous_plan_id: None,
            persisted: false,
            errors: Vec::new(),
            guard: RecursionGuard::new(),
        }
    }

    /// Rebuild a record from stored state
    pub fn load(
        id: Uuid,
        owner: SubscriptionOwner,
        plan: Option<Plan>,
        current_price: Option<i64>,
        remote_customer_id: Option<String>,
        card_last_four: Option<String>,
    ) -> Self {
        let previous_plan_id = plan.as_ref().map(|p| p.id);
        Self {
            id,
            owner,
            plan,
            current_price,
            remote_customer_id,
            card_last_four,
            coupon: None,
            credit_card_token: None,
            skip_prorate_on_plan_change: false,
            previous_plan_id,
            persisted: true,
            errors: Vec::new(),
            guard: RecursionGuard::new(),
        }
    }

    pub fn with_coupon(mut self, coupon: impl CouponProvider + 'static) -> Self {
        self.coupon = Some(Arc::new(coupon));
        self
    }

    /// Select a new plan, or `None` to cancel
    pub fn select_plan(&mut self, plan: Option<Plan>) {
        self.plan = plan;
    }

    pub fn set_card_token(&mut self, token: impl Into<String>) {
        self.credit_card_token = Some(token.into());
    }

    pub fn plan_id(&self) -> Option<PlanId> {
        self.plan.as_ref().map(|p| p.id)
    }

    pub fn previous_plan_id(&self) -> Option<PlanId> {
        self.previous_plan_id
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub fn is_changing_plans(&self) -> bool {
        classifier::is_changing(self.previous_plan_id, self.plan_id())
    }

    pub fn is_upgrading(&self) -> bool {
        classifier::is_upgrading(self.previous_plan_id, self.plan_id())
    }

    pub fn is_downgrading(&self) -> bool {
        classifier::is_downgrading(self.previous_plan_id, self.plan_id())
    }

    pub fn plan_change(&self) -> PlanChange {
        classifier::classify(self.previous_plan_id, self.plan_id())
    }

    /// Card token, ignoring blank values
    pub fn card_token(&self) -> Option<&str> {
        self.credit_card_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Trial end granted by the attached coupon, if any
    pub fn coupon_trial_end(&self) -> Option<OffsetDateTime> {
        self.coupon
            .as_ref()
            .filter(|c| c.is_free_trial())
            .and_then(|c| c.free_trial_ends_at())
    }

    /// User-visible errors attached during the last pass
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }

    pub fn guard(&self) -> &RecursionGuard {
        &self.guard
    }

    /// Called once the record has been committed: the stored plan becomes
    /// the new baseline and request-scoped inputs are dropped.
    pub fn mark_persisted(&mut self) {
        self.previous_plan_id = self.plan_id();
        self.credit_card_token = None;
        self.skip_prorate_on_plan_change = false;
        self.persisted = true;
    }
}
