//! Lifecycle callbacks fired during a reconciliation pass
//!
//! Every callback is optional and a no-op when unset. Callbacks observe the
//! record; they never steer the engine.

use crate::record::SubscriptionRecord;

pub type HookFn = Box<dyn Fn(&SubscriptionRecord) + Send + Sync>;
pub type AmountHookFn = Box<dyn Fn(&SubscriptionRecord, i64) + Send + Sync>;

/// Points in a pass where the embedding application can react
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    PrepareForPlanChange,
    PrepareForNewSubscription,
    PrepareForUpgrade,
    PrepareForDowngrade,
    PrepareForCancelation,
    PrepareForCardUpdate,
    FinalizePlanChange,
    FinalizeNewSubscription,
    FinalizeUpgrade,
    FinalizeDowngrade,
    FinalizeCancelation,
    FinalizeCardUpdate,
    CardWasDeclined,
}

impl HookPoint {
    pub const ALL: [HookPoint; 13] = [
        HookPoint::PrepareForPlanChange,
        HookPoint::PrepareForNewSubscription,
        HookPoint::PrepareForUpgrade,
        HookPoint::PrepareForDowngrade,
        HookPoint::PrepareForCancelation,
        HookPoint::PrepareForCardUpdate,
        HookPoint::FinalizePlanChange,
        HookPoint::FinalizeNewSubscription,
        HookPoint::FinalizeUpgrade,
        HookPoint::FinalizeDowngrade,
        HookPoint::FinalizeCancelation,
        HookPoint::FinalizeCardUpdate,
        HookPoint::CardWasDeclined,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookPoint::PrepareForPlanChange => "prepare_for_plan_change",
            HookPoint::PrepareForNewSubscription => "prepare_for_new_subscription",
            HookPoint::PrepareForUpgrade => "prepare_for_upgrade",
            HookPoint::PrepareForDowngrade => "prepare_for_downgrade",
            HookPoint::PrepareForCancelation => "prepare_for_cancelation",
            HookPoint::PrepareForCardUpdate => "prepare_for_card_update",
            HookPoint::FinalizePlanChange => "finalize_plan_change",
            HookPoint::FinalizeNewSubscription => "finalize_new_subscription",
            HookPoint::FinalizeUpgrade => "finalize_upgrade",
            HookPoint::FinalizeDowngrade => "finalize_downgrade",
            HookPoint::FinalizeCancelation => "finalize_cancelation",
            HookPoint::FinalizeCardUpdate => "finalize_card_update",
            HookPoint::CardWasDeclined => "card_was_declined",
        }
    }
}

impl std::fmt::Display for HookPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Set of optional lifecycle callbacks
#[derive(Default)]
pub struct HookDispatcher {
    prepare_for_plan_change: Option<HookFn>,
    prepare_for_new_subscription: Option<HookFn>,
    prepare_for_upgrade: Option<HookFn>,
    prepare_for_downgrade: Option<HookFn>,
    prepare_for_cancelation: Option<HookFn>,
    prepare_for_card_update: Option<HookFn>,
    finalize_plan_change: Option<HookFn>,
    finalize_new_subscription: Option<HookFn>,
    finalize_upgrade: Option<HookFn>,
    finalize_downgrade: Option<HookFn>,
    finalize_cancelation: Option<HookFn>,
    finalize_card_update: Option<HookFn>,
    card_was_declined: Option<HookFn>,

    // Payment processor webhook callbacks
    payment_succeeded: Option<AmountHookFn>,
    charge_failed: Option<HookFn>,
    charge_disputed: Option<HookFn>,
}

impl HookDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the callback for a lifecycle point, replacing any previous one
    pub fn on<F>(mut self, point: HookPoint, f: F) -> Self
    where
        F: Fn(&SubscriptionRecord) + Send + Sync + 'static,
    {
        *self.slot_mut(point) = Some(Box::new(f));
        self
    }

    pub fn on_payment_succeeded<F>(mut self, f: F) -> Self
    where
        F: Fn(&SubscriptionRecord, i64) + Send + Sync + 'static,
    {
        self.payment_succeeded = Some(Box::new(f));
        self
    }

    pub fn on_charge_failed<F>(mut self, f: F) -> Self
    where
        F: Fn(&SubscriptionRecord) + Send + Sync + 'static,
    {
        self.charge_failed = Some(Box::new(f));
        self
    }

    pub fn on_charge_disputed<F>(mut self, f: F) -> Self
    where
        F: Fn(&SubscriptionRecord) + Send + Sync + 'static,
    {
        self.charge_disputed = Some(Box::new(f));
        self
    }

    pub fn dispatch(&self, point: HookPoint, record: &SubscriptionRecord) {
        tracing::trace!(record_id = %record.id, hook = %point, "Dispatching subscription hook");
        if let Some(hook) = self.slot(point) {
            hook(record);
        }
    }

    pub fn payment_succeeded(&self, record: &SubscriptionRecord, amount_cents: i64) {
        if let Some(hook) = &self.payment_succeeded {
            hook(record, amount_cents);
        }
    }

    pub fn charge_failed(&self, record: &SubscriptionRecord) {
        if let Some(hook) = &self.charge_failed {
            hook(record);
        }
    }

    pub fn charge_disputed(&self, record: &SubscriptionRecord) {
        if let Some(hook) = &self.charge_disputed {
            hook(record);
        }
    }

    fn slot(&self, point: HookPoint) -> Option<&HookFn> {
        match point {
            HookPoint::PrepareForPlanChange => self.prepare_for_plan_change.as_ref(),
            HookPoint::PrepareForNewSubscription => self.prepare_for_new_subscription.as_ref(),
            HookPoint::PrepareForUpgrade => self.prepare_for_upgrade.as_ref(),
            HookPoint::PrepareForDowngrade => self.prepare_for_downgrade.as_ref(),
            HookPoint::PrepareForCancelation => self.prepare_for_cancelation.as_ref(),
            HookPoint::PrepareForCardUpdate => self.prepare_for_card_update.as_ref(),
            HookPoint::FinalizePlanChange => self.finalize_plan_change.as_ref(),
            HookPoint::FinalizeNewSubscription => self.finalize_new_subscription.as_ref(),
            HookPoint::FinalizeUpgrade => self.finalize_upgrade.as_ref(),
            HookPoint::FinalizeDowngrade => self.finalize_downgrade.as_ref(),
            HookPoint::FinalizeCancelation => self.finalize_cancelation.as_ref(),
            HookPoint::FinalizeCardUpdate => self.finalize_card_update.as_ref(),
            HookPoint::CardWasDeclined => self.card_was_declined.as_ref(),
        }
    }

    fn slot_mut(&mut self, point: HookPoint) -> &mut Option<HookFn> {
        match point {
            HookPoint::PrepareForPlanChange => &mut self.prepare_for_plan_change,
            HookPoint::PrepareForNewSubscription => &mut self.prepare_for_new_subscription,
            HookPoint::PrepareForUpgrade => &mut self.prepare_for_upgrade,
            HookPoint::PrepareForDowngrade => &mut self.prepare_for_downgrade,
            HookPoint::PrepareForCancelation => &mut self.prepare_for_cancelation,
            HookPoint::PrepareForCardUpdate => &mut self.prepare_for_card_update,
            HookPoint::FinalizePlanChange => &mut self.finalize_plan_change,
            HookPoint::FinalizeNewSubscription => &mut self.finalize_new_subscription,
            HookPoint::FinalizeUpgrade => &mut self.finalize_upgrade,
            HookPoint::FinalizeDowngrade => &mut self.finalize_downgrade,
            HookPoint::FinalizeCancelation => &mut self.finalize_cancelation,
            HookPoint::FinalizeCardUpdate => &mut self.finalize_card_update,
            HookPoint::CardWasDeclined => &mut self.card_was_declined,
        }
    }
}

impl std::fmt::Debug for HookDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookDispatcher").finish_non_exhaustive()
    }
}
