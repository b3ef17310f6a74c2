//! Payment processor webhooks relevant to a subscription
//!
//! Signature verification and event parsing stay with the embedding
//! application; this module maps an already-verified event onto the record
//! it concerns and fires the matching callback.

use crate::error::{BillingError, BillingResult};
use crate::hooks::HookDispatcher;
use crate::store::SubscriptionStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionWebhookEvent {
    PaymentSucceeded { customer_id: String, amount_cents: i64 },
    ChargeFailed { customer_id: String },
    ChargeDisputed { customer_id: String },
}

impl SubscriptionWebhookEvent {
    /// Build from a Stripe event type, e.g. `"charge.failed"`
    pub fn from_stripe(event_type: &str, customer_id: &str, amount_cents: Option<i64>) -> BillingResult<Self> {
        let customer_id = customer_id.to_string();
        match event_type {
            "invoice.payment_succeeded" | "invoice.paid" => Ok(Self::PaymentSucceeded {
                customer_id,
                amount_cents: amount_cents.unwrap_or(0),
            }),
            "charge.failed" => Ok(Self::ChargeFailed { customer_id }),
            "charge.dispute.created" => Ok(Self::ChargeDisputed { customer_id }),
            other => Err(BillingError::WebhookEventNotSupported(other.to_string())),
        }
    }

    pub fn customer_id(&self) -> &str {
        match self {
            Self::PaymentSucceeded { customer_id, .. }
            | Self::ChargeFailed { customer_id }
            | Self::ChargeDisputed { customer_id } => customer_id,
        }
    }
}

/// Routes webhook events to the callbacks of the subscription they concern
pub struct WebhookRouter<S> {
    store: S,
}

impl<S: SubscriptionStore> WebhookRouter<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn route(&self, event: &SubscriptionWebhookEvent, hooks: &HookDispatcher) -> BillingResult<()> {
        let customer_id = event.customer_id();
        let record = self
            .store
            .find_by_customer_id(customer_id)
            .await?
            .ok_or_else(|| BillingError::CustomerNotFound(customer_id.to_string()))?;

        tracing::info!(
            record_id = %record.id,
            customer_id = %customer_id,
            event = ?event,
            "Routing subscription webhook"
        );

        match event {
            SubscriptionWebhookEvent::PaymentSucceeded { amount_cents, .. } => {
                hooks.payment_succeeded(&record, *amount_cents)
            }
            SubscriptionWebhookEvent::ChargeFailed { .. } => hooks.charge_failed(&record),
            SubscriptionWebhookEvent::ChargeDisputed { .. } => hooks.charge_disputed(&record),
        }

        Ok(())
    }
}
