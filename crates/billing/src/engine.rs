//! Subscription reconciliation
//!
//! A pass classifies the pending change on a [`SubscriptionRecord`], drives
//! the payment processor through the matching calls and mirrors the result
//! in the record's local fields:
//!
//! - plan change with an existing customer: switch plan or cancel
//! - plan change without a customer: create the customer, commit its id,
//!   then attach the plan
//! - card token only: replace the default card
//!
//! Hooks fire at fixed points and never change the flow. Card declines are
//! reported on the record and abort the pass with the local fields restored.
//! Other remote failures abort the pass as they are; fields already mirrored
//! earlier in the pass are kept.
//!
//! Two passes on the same record must not run concurrently; nothing here
//! locks the record or the remote customer.

use std::collections::HashMap;
use time::{Duration, OffsetDateTime};

use plansync_shared::Plan;

use crate::config::ReconcileConfig;
use crate::error::{BillingError, BillingResult};
use crate::hooks::{HookDispatcher, HookPoint};
use crate::record::SubscriptionRecord;
use crate::remote::{NewCustomer, RemoteBillingClient, RemoteCustomer};
use crate::store::SubscriptionStore;

/// Customer metadata key holding the local subscription id
pub const SUBSCRIPTION_METADATA_KEY: &str = "subscription_id";

/// Local fields a pass may mirror, as they were before it started
#[derive(Debug, Clone)]
struct LocalSnapshot {
    current_price: Option<i64>,
    remote_customer_id: Option<String>,
    card_last_four: Option<String>,
}

impl LocalSnapshot {
    fn take(record: &SubscriptionRecord) -> Self {
        Self {
            current_price: record.current_price,
            remote_customer_id: record.remote_customer_id.clone(),
            card_last_four: record.card_last_four.clone(),
        }
    }

    fn restore(&self, record: &mut SubscriptionRecord) {
        record.current_price = self.current_price;
        record.remote_customer_id = self.remote_customer_id.clone();
        record.card_last_four = self.card_last_four.clone();
    }
}

/// Keeps subscription records in step with the payment processor
pub struct ReconciliationEngine<C, S> {
    client: C,
    store: S,
    config: ReconcileConfig,
}

impl<C, S> ReconciliationEngine<C, S>
where
    C: RemoteBillingClient,
    S: SubscriptionStore,
{
    pub fn new(client: C, store: S, config: ReconcileConfig) -> Self {
        Self {
            client,
            store,
            config,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Reconcile the pending change, then persist the record.
    ///
    /// Nothing is written when the pass fails.
    pub async fn save(&self, record: &mut SubscriptionRecord, hooks: &HookDispatcher) -> BillingResult<()> {
        if record.guard().is_engaged() {
            tracing::debug!(record_id = %record.id, "Save suppressed while a pass is committing");
            return Ok(());
        }

        self.reconcile(record, hooks).await?;
        self.store.save(record).await?;
        record.mark_persisted();

        Ok(())
    }

    /// Run one reconciliation pass for the pending change on `record`.
    pub async fn reconcile(&self, record: &mut SubscriptionRecord, hooks: &HookDispatcher) -> BillingResult<()> {
        if record.guard().is_engaged() {
            tracing::debug!(record_id = %record.id, "Reconciliation already in progress, skipping");
            return Ok(());
        }

        record.clear_errors();

        if record.is_changing_plans() {
            self.change_plan(record, hooks).await
        } else if record.card_token().is_some() {
            self.update_default_card(record, hooks).await
        } else {
            Ok(())
        }
    }

    /// Replace the customer's default card with the pending card token.
    ///
    /// Does nothing without a token.
    pub async fn update_default_card(
        &self,
        record: &mut SubscriptionRecord,
        hooks: &HookDispatcher,
    ) -> BillingResult<()> {
        let Some(token) = record.card_token().map(str::to_owned) else {
            return Ok(());
        };
        let customer_id = record
            .remote_customer_id
            .clone()
            .ok_or(BillingError::NoCustomer)?;

        let snapshot = LocalSnapshot::take(record);
        hooks.dispatch(HookPoint::PrepareForCardUpdate, record);

        let customer = self.client.retrieve_customer(&customer_id).await?;
        self.install_card(record, hooks, &customer, &token, &snapshot)
            .await?;

        Ok(())
    }

    async fn change_plan(&self, record: &mut SubscriptionRecord, hooks: &HookDispatcher) -> BillingResult<()> {
        let snapshot = LocalSnapshot::take(record);

        tracing::info!(
            record_id = %record.id,
            change = %record.plan_change(),
            previous_plan_id = ?record.previous_plan_id(),
            plan_id = ?record.plan_id(),
            "Reconciling plan change"
        );

        hooks.dispatch(HookPoint::PrepareForPlanChange, record);

        match (record.remote_customer_id.clone(), record.plan.clone()) {
            (Some(customer_id), plan) => {
                let customer = self.client.retrieve_customer(&customer_id).await?;
                match plan {
                    Some(plan) => {
                        self.switch_plan(record, hooks, customer, &plan, &snapshot)
                            .await?
                    }
                    None => self.cancel(record, hooks, &customer).await,
                }
            }
            (None, Some(plan)) => self.subscribe(record, hooks, &plan, &snapshot).await?,
            (None, None) => {
                // Unreachable in normal operation: nothing to cancel remotely
                record.plan = None;
                record.current_price = None;
            }
        }

        hooks.dispatch(HookPoint::FinalizePlanChange, record);

        Ok(())
    }

    /// Existing customer moving to another plan
    async fn switch_plan(
        &self,
        record: &mut SubscriptionRecord,
        hooks: &HookDispatcher,
        customer: RemoteCustomer,
        plan: &Plan,
        snapshot: &LocalSnapshot,
    ) -> BillingResult<()> {
        record.current_price = plan.price;

        let downgrading = record.is_downgrading();
        let upgrading = record.is_upgrading();

        if downgrading {
            hooks.dispatch(HookPoint::PrepareForDowngrade, record);
        }
        if upgrading {
            hooks.dispatch(HookPoint::PrepareForUpgrade, record);
        }

        let mut customer = customer;
        if let Some(token) = record.card_token().map(str::to_owned) {
            hooks.dispatch(HookPoint::PrepareForCardUpdate, record);
            customer = self
                .install_card(record, hooks, &customer, &token, snapshot)
                .await?;
        }

        let trial_end = match self.client.active_trial_end(&customer, OffsetDateTime::now_utc()) {
            Some(existing) if self.config.keep_trial_end_on_plan_change => {
                let extra_days = self
                    .client
                    .retrieve_plan_trial_days(&plan.remote_plan_id)
                    .await?
                    .unwrap_or(0);
                Some(existing + Duration::days(i64::from(extra_days)))
            }
            _ => None,
        };

        let prorate = !record.skip_prorate_on_plan_change;

        self.client
            .update_subscription_plan(&customer, &plan.remote_plan_id, trial_end, prorate)
            .await?;

        tracing::info!(
            record_id = %record.id,
            customer_id = %customer.id,
            remote_plan_id = %plan.remote_plan_id,
            trial_end = ?trial_end,
            prorate = prorate,
            "Switched subscription plan"
        );

        if downgrading {
            hooks.dispatch(HookPoint::FinalizeDowngrade, record);
        }
        if upgrading {
            hooks.dispatch(HookPoint::FinalizeUpgrade, record);
        }

        Ok(())
    }

    /// Existing customer dropping their plan
    async fn cancel(&self, record: &mut SubscriptionRecord, hooks: &HookDispatcher, customer: &RemoteCustomer) {
        hooks.dispatch(HookPoint::PrepareForCancelation, record);

        record.current_price = None;

        let at_period_end = !self.config.prorate_on_cancel;
        match self.client.cancel_subscription(customer, at_period_end).await {
            Ok(()) => {
                tracing::info!(
                    record_id = %record.id,
                    customer_id = %customer.id,
                    at_period_end = at_period_end,
                    "Cancelled remote subscription"
                );
            }
            Err(e) => {
                // Treated as already cancelled, e.g. by support
                tracing::info!(
                    record_id = %record.id,
                    customer_id = %customer.id,
                    error = %e,
                    "Error canceling remote subscription"
                );
            }
        }

        hooks.dispatch(HookPoint::FinalizeCancelation, record);
    }

    /// First subscription: customer creation, customer commit, plan attachment
    async fn subscribe(
        &self,
        record: &mut SubscriptionRecord,
        hooks: &HookDispatcher,
        plan: &Plan,
        snapshot: &LocalSnapshot,
    ) -> BillingResult<()> {
        record.current_price = plan.price;

        hooks.dispatch(HookPoint::PrepareForNewSubscription, record);
        hooks.dispatch(HookPoint::PrepareForUpgrade, record);

        let mut metadata = HashMap::new();
        metadata.insert(self.config.owner_metadata_key(), record.owner.id.clone());
        metadata.insert(SUBSCRIPTION_METADATA_KEY.to_string(), record.id.to_string());

        let params = NewCustomer {
            description: record.owner.description(),
            email: record.owner.email_or_empty().to_string(),
            card_token: record.card_token().map(str::to_owned),
            trial_end_override: record.coupon_trial_end(),
            metadata,
        };

        let created = self.client.create_customer(params).await;
        let customer = self.on_decline(created, record, hooks, snapshot)?;

        record.remote_customer_id = Some(customer.id.clone());
        record.card_last_four = self.client.card_last_four(&customer);

        {
            let _committing = record.guard().engage();
            if let Err(e) = self.store.commit_customer(record).await {
                tracing::error!(
                    record_id = %record.id,
                    customer_id = %customer.id,
                    error = %e,
                    "Remote customer created but not recorded locally"
                );
                return Err(e);
            }
        }

        tracing::info!(
            record_id = %record.id,
            customer_id = %customer.id,
            "Recorded new remote customer"
        );

        self.client
            .attach_plan(&customer, &plan.remote_plan_id)
            .await?;

        tracing::info!(
            record_id = %record.id,
            customer_id = %customer.id,
            remote_plan_id = %plan.remote_plan_id,
            "Attached plan to new customer"
        );

        hooks.dispatch(HookPoint::FinalizeNewSubscription, record);
        hooks.dispatch(HookPoint::FinalizeUpgrade, record);

        Ok(())
    }

    /// Attach the token as a source, make it the default and mirror its last
    /// four digits. Returns the refreshed customer.
    async fn install_card(
        &self,
        record: &mut SubscriptionRecord,
        hooks: &HookDispatcher,
        customer: &RemoteCustomer,
        token: &str,
        snapshot: &LocalSnapshot,
    ) -> BillingResult<RemoteCustomer> {
        let created = self.client.create_payment_source(customer, token).await;
        let source = self.on_decline(created, record, hooks, snapshot)?;

        let updated = self.client.set_default_source(customer, &source.id).await;
        let updated = self.on_decline(updated, record, hooks, snapshot)?;

        record.card_last_four = self
            .client
            .card_last_four(&updated)
            .or_else(|| source.last4.clone());

        tracing::info!(
            record_id = %record.id,
            customer_id = %updated.id,
            source_id = %source.id,
            "Replaced default card"
        );

        hooks.dispatch(HookPoint::FinalizeCardUpdate, record);

        Ok(updated)
    }

    /// Turn a card decline into a user-visible error on the record
    fn on_decline<T>(
        &self,
        result: BillingResult<T>,
        record: &mut SubscriptionRecord,
        hooks: &HookDispatcher,
        snapshot: &LocalSnapshot,
    ) -> BillingResult<T> {
        match result {
            Err(BillingError::CardDeclined(message)) => {
                snapshot.restore(record);
                record.add_error(message.clone());

                tracing::warn!(
                    record_id = %record.id,
                    reason = %message,
                    "Card declined"
                );

                hooks.dispatch(HookPoint::CardWasDeclined, record);
                Err(BillingError::CardDeclined(message))
            }
            other => other,
        }
    }
}
