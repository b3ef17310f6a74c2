#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! PlanSync Billing
//!
//! Keeps local subscription records in step with Stripe: plan switches,
//! cancellations, first subscriptions and default card replacement, with
//! lifecycle hooks around each step.

pub mod classifier;
pub mod client;
pub mod config;
pub mod describe;
pub mod engine;
pub mod error;
pub mod guard;
pub mod hooks;
pub mod record;
pub mod remote;
pub mod store;
pub mod webhooks;

#[cfg(test)]
mod mock;

pub use classifier::PlanChange;
pub use client::{StripeBillingClient, StripeConfig};
pub use config::ReconcileConfig;
pub use describe::{describe_difference, PlanDifference};
pub use engine::ReconciliationEngine;
pub use error::{BillingError, BillingResult};
pub use guard::{GuardScope, RecursionGuard};
pub use hooks::{HookDispatcher, HookPoint};
pub use record::SubscriptionRecord;
pub use remote::{NewCustomer, PaymentSource, RemoteBillingClient, RemoteCustomer, RemoteSubscription};
pub use store::{
    InMemorySubscriptionStore, PgSubscriptionStore, PlanCatalog, StoreWrite, StoreWriteKind, StoredSubscription,
    SubscriptionStore,
};
pub use webhooks::{SubscriptionWebhookEvent, WebhookRouter};
