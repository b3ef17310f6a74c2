//! Integration tests for reconciliation against Stripe test mode
//!
//! These tests create real customers and subscriptions in a Stripe test
//! account. Records are kept in memory so no database is needed.
//!
//! ## Running Tests
//! ```bash
//! export STRIPE_SECRET_KEY="sk_test_..."
//! export STRIPE_BASIC_PRICE_ID="price_..."
//! export STRIPE_PRO_PRICE_ID="price_..."
//! cargo test --test stripe_reconcile -- --ignored --test-threads=1
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

use plansync_billing::{
    BillingError, HookDispatcher, HookPoint, InMemorySubscriptionStore, PlanCatalog, ReconcileConfig,
    ReconciliationEngine, RemoteBillingClient, StripeBillingClient, SubscriptionRecord,
};
use plansync_shared::{Plan, SubscriptionOwner};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// Test Utilities
// ============================================================================

fn plans() -> (Plan, Plan) {
    let basic = std::env::var("STRIPE_BASIC_PRICE_ID").unwrap_or_else(|_| "price_test_basic".to_string());
    let pro = std::env::var("STRIPE_PRO_PRICE_ID").unwrap_or_else(|_| "price_test_pro".to_string());
    (Plan::new(1, "Basic", 1000, basic), Plan::new(2, "Pro", 2900, pro))
}

fn setup() -> ReconciliationEngine<StripeBillingClient, InMemorySubscriptionStore> {
    dotenvy::dotenv().ok();
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let client = StripeBillingClient::from_env()
        .expect("STRIPE_SECRET_KEY (test mode: sk_test_...) must be set for integration tests");
    let (basic, pro) = plans();

    ReconciliationEngine::new(
        client,
        InMemorySubscriptionStore::new(PlanCatalog::new([basic, pro])),
        ReconcileConfig::default(),
    )
}

fn test_owner() -> SubscriptionOwner {
    let id = uuid::Uuid::new_v4().to_string();
    SubscriptionOwner::new(id.clone()).with_email(format!("test-{}@example.com", id))
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
#[ignore]
async fn test_first_subscription_then_upgrade_then_cancel() {
    let engine = setup();
    let (basic, pro) = plans();
    let hooks = HookDispatcher::new();

    let mut record = SubscriptionRecord::new(test_owner());
    record.select_plan(Some(basic));
    record.set_card_token("tok_visa");
    engine.save(&mut record, &hooks).await.expect("Subscribe failed");

    let customer_id = record.remote_customer_id.clone().expect("No customer id recorded");
    assert_eq!(record.card_last_four.as_deref(), Some("4242"));

    record.select_plan(Some(pro.clone()));
    engine.save(&mut record, &hooks).await.expect("Upgrade failed");

    let customer = engine.client().retrieve_customer(&customer_id).await.unwrap();
    assert_eq!(
        customer.subscription.and_then(|s| s.remote_plan_id),
        Some(pro.remote_plan_id)
    );

    record.select_plan(None);
    engine.save(&mut record, &hooks).await.expect("Cancel failed");
    assert!(record.current_price.is_none());
    assert_eq!(record.remote_customer_id.as_deref(), Some(customer_id.as_str()));
}

#[tokio::test]
#[ignore]
async fn test_declined_card_reports_error() {
    let engine = setup();
    let (basic, _) = plans();
    let declined = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&declined);
    let hooks = HookDispatcher::new().on(HookPoint::CardWasDeclined, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let mut record = SubscriptionRecord::new(test_owner());
    record.select_plan(Some(basic));
    record.set_card_token("tok_chargeDeclined");

    let result = engine.save(&mut record, &hooks).await;

    assert!(matches!(result, Err(BillingError::CardDeclined(_))));
    assert_eq!(record.errors().len(), 1);
    assert!(record.remote_customer_id.is_none());
    assert_eq!(declined.load(Ordering::SeqCst), 1);
}

#[tokio::test]
#[ignore]
async fn test_replace_default_card() {
    let engine = setup();
    let (basic, _) = plans();
    let hooks = HookDispatcher::new();

    let mut record = SubscriptionRecord::new(test_owner());
    record.select_plan(Some(basic));
    record.set_card_token("tok_visa");
    engine.save(&mut record, &hooks).await.expect("Subscribe failed");

    record.set_card_token("tok_mastercard");
    engine.save(&mut record, &hooks).await.expect("Card update failed");

    assert_eq!(record.card_last_four.as_deref(), Some("4444"));
}
