//! Payment processor interface used by the reconciliation engine
//!
//! The engine only talks to the processor through [`RemoteBillingClient`].
//! [`crate::client::StripeBillingClient`] is the production implementation.

use async_trait::async_trait;
use std::collections::HashMap;
use time::OffsetDateTime;

use crate::error::BillingResult;

/// Snapshot of a remote customer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteCustomer {
    pub id: String,
    /// Id of the source charged by default
    pub default_source: Option<String>,
    pub sources: Vec<PaymentSource>,
    /// First subscription on the customer, if any
    pub subscription: Option<RemoteSubscription>,
    /// Trial end requested at creation, applied when a plan is attached
    pub trial_end_override: Option<OffsetDateTime>,
}

impl RemoteCustomer {
    pub fn source(&self, source_id: &str) -> Option<&PaymentSource> {
        self.sources.iter().find(|s| s.id == source_id)
    }

    pub fn default_payment_source(&self) -> Option<&PaymentSource> {
        self.default_source.as_deref().and_then(|id| self.source(id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSubscription {
    pub id: String,
    /// Subscription item carrying the plan
    pub item_id: Option<String>,
    pub remote_plan_id: Option<String>,
    pub trial_end: Option<OffsetDateTime>,
}

/// Card (or other source) attached to a remote customer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSource {
    pub id: String,
    pub last4: Option<String>,
}

/// Parameters for creating a remote customer without a plan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewCustomer {
    pub description: String,
    pub email: String,
    pub card_token: Option<String>,
    pub trial_end_override: Option<OffsetDateTime>,
    pub metadata: HashMap<String, String>,
}

/// Operations the engine needs from the payment processor.
///
/// Card refusals surface as [`crate::BillingError::CardDeclined`] and missing
/// resources as [`crate::BillingError::RemoteNotFound`].
#[async_trait]
pub trait RemoteBillingClient: Send + Sync {
    async fn retrieve_customer(&self, customer_id: &str) -> BillingResult<RemoteCustomer>;

    async fn create_customer(&self, params: NewCustomer) -> BillingResult<RemoteCustomer>;

    /// Move the customer's subscription to another plan
    async fn update_subscription_plan(
        &self,
        customer: &RemoteCustomer,
        remote_plan_id: &str,
        trial_end: Option<OffsetDateTime>,
        prorate: bool,
    ) -> BillingResult<()>;

    /// Subscribe a customer that has no subscription yet
    async fn attach_plan(&self, customer: &RemoteCustomer, remote_plan_id: &str) -> BillingResult<()>;

    async fn cancel_subscription(&self, customer: &RemoteCustomer, at_period_end: bool) -> BillingResult<()>;

    async fn create_payment_source(&self, customer: &RemoteCustomer, token: &str) -> BillingResult<PaymentSource>;

    /// Make `source_id` the default source and return the refreshed customer
    async fn set_default_source(&self, customer: &RemoteCustomer, source_id: &str) -> BillingResult<RemoteCustomer>;

    async fn retrieve_plan_trial_days(&self, remote_plan_id: &str) -> BillingResult<Option<u32>>;

    /// Trial end of the customer's subscription if it is still in the future
    fn active_trial_end(&self, customer: &RemoteCustomer, now: OffsetDateTime) -> Option<OffsetDateTime> {
        customer
            .subscription
            .as_ref()
            .and_then(|s| s.trial_end)
            .filter(|end| *end > now)
    }

    fn card_last_four(&self, customer: &RemoteCustomer) -> Option<String> {
        customer.default_payment_source().and_then(|s| s.last4.clone())
    }
}
