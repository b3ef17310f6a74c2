//! Stripe client configuration and the Stripe-backed remote billing client

use async_trait::async_trait;
use stripe::generated::billing::subscription::SubscriptionProrationBehavior;
use stripe::{
    CancelSubscription, Client, CreateCustomer, CreateSubscription, CreateSubscriptionItems,
    Customer, CustomerId, Expandable, PaymentSourceId, PaymentSourceParams, Scheduled, Subscription,
    SubscriptionId, TokenId, UpdateCustomer, UpdateSubscription, UpdateSubscriptionItems,
};
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::remote::{NewCustomer, PaymentSource, RemoteBillingClient, RemoteCustomer, RemoteSubscription};

/// Customer metadata key holding a trial end to apply when a plan is attached
pub const TRIAL_END_METADATA_KEY: &str = "plansync_trial_end";

/// Expansions needed to read the card summary and subscription in one call
const CUSTOMER_EXPAND: &[&str] = &["default_source", "sources", "subscriptions"];

/// Configuration for Stripe billing
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Stripe secret API key
    pub secret_key: String,
}

impl StripeConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            secret_key: std::env::var("STRIPE_SECRET_KEY")
                .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?,
        })
    }
}

/// Stripe billing client
#[derive(Clone)]
pub struct StripeBillingClient {
    client: Client,
}

impl StripeBillingClient {
    /// Create a new Stripe client from config
    pub fn new(config: StripeConfig) -> Self {
        let client = Client::new(config.secret_key);
        Self { client }
    }

    /// Create a new Stripe client from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let config = StripeConfig::from_env()?;
        Ok(Self::new(config))
    }

    /// Get the inner Stripe client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    async fn create_subscription(
        &self,
        customer: &RemoteCustomer,
        remote_plan_id: &str,
        trial_end: Option<OffsetDateTime>,
    ) -> BillingResult<()> {
        let customer_id = parse_customer_id(&customer.id)?;

        let mut params = CreateSubscription::new(customer_id);
        params.items = Some(vec![CreateSubscriptionItems {
            price: Some(remote_plan_id.to_string()),
            quantity: Some(1),
            ..Default::default()
        }]);
        params.trial_end = trial_end.map(|t| Scheduled::Timestamp(t.unix_timestamp()));

        let subscription = Subscription::create(&self.client, params).await?;

        tracing::info!(
            customer_id = %customer.id,
            subscription_id = %subscription.id,
            remote_plan_id = %remote_plan_id,
            "Created subscription"
        );

        Ok(())
    }
}

#[async_trait]
impl RemoteBillingClient for StripeBillingClient {
    async fn retrieve_customer(&self, customer_id: &str) -> BillingResult<RemoteCustomer> {
        let id = parse_customer_id(customer_id)?;
        let customer = Customer::retrieve(&self.client, &id, CUSTOMER_EXPAND).await?;

        if customer.deleted {
            return Err(BillingError::RemoteNotFound(format!(
                "Customer {} was deleted",
                customer_id
            )));
        }

        Ok(to_remote_customer(&customer))
    }

    async fn create_customer(&self, params: NewCustomer) -> BillingResult<RemoteCustomer> {
        let token = params
            .card_token
            .as_deref()
            .map(parse_token_id)
            .transpose()?;

        let mut metadata = params.metadata.clone();
        if let Some(trial_end) = params.trial_end_override {
            metadata.insert(
                TRIAL_END_METADATA_KEY.to_string(),
                trial_end.unix_timestamp().to_string(),
            );
        }

        let create = CreateCustomer {
            description: Some(&params.description),
            email: Some(&params.email),
            source: token.map(PaymentSourceParams::Token),
            metadata: Some(metadata),
            ..Default::default()
        };

        let customer = Customer::create(&self.client, create).await?;

        tracing::info!(customer_id = %customer.id, "Created Stripe customer");

        // Re-fetch with expansions so the default card is readable
        self.retrieve_customer(customer.id.as_str()).await
    }

    async fn update_subscription_plan(
        &self,
        customer: &RemoteCustomer,
        remote_plan_id: &str,
        trial_end: Option<OffsetDateTime>,
        prorate: bool,
    ) -> BillingResult<()> {
        // A customer whose subscription was canceled gets a new one
        let Some(current) = customer.subscription.as_ref() else {
            return self.create_subscription(customer, remote_plan_id, trial_end).await;
        };

        let sub_id = parse_subscription_id(&current.id)?;

        let params = plan_update_params(current, remote_plan_id, trial_end, prorate);

        let subscription = Subscription::update(&self.client, &sub_id, params).await?;

        tracing::info!(
            customer_id = %customer.id,
            subscription_id = %subscription.id,
            remote_plan_id = %remote_plan_id,
            prorate = prorate,
            "Updated subscription plan"
        );

        Ok(())
    }

    async fn attach_plan(&self, customer: &RemoteCustomer, remote_plan_id: &str) -> BillingResult<()> {
        self.create_subscription(customer, remote_plan_id, customer.trial_end_override)
            .await
    }

    async fn cancel_subscription(&self, customer: &RemoteCustomer, at_period_end: bool) -> BillingResult<()> {
        let current = customer.subscription.as_ref().ok_or_else(|| {
            BillingError::RemoteNotFound(format!("No subscription for customer {}", customer.id))
        })?;
        let sub_id = parse_subscription_id(&current.id)?;

        if at_period_end {
            let params = UpdateSubscription {
                cancel_at_period_end: Some(true),
                ..Default::default()
            };
            Subscription::update(&self.client, &sub_id, params).await?;
        } else {
            let params = CancelSubscription {
                cancellation_details: None,
                invoice_now: None,
                prorate: Some(true),
            };
            Subscription::cancel(&self.client, &sub_id, params).await?;
        }

        tracing::info!(
            customer_id = %customer.id,
            subscription_id = %sub_id,
            at_period_end = at_period_end,
            "Cancelled subscription"
        );

        Ok(())
    }

    async fn create_payment_source(&self, customer: &RemoteCustomer, token: &str) -> BillingResult<PaymentSource> {
        let customer_id = parse_customer_id(&customer.id)?;
        let token = parse_token_id(token)?;

        let source =
            Customer::attach_source(&self.client, &customer_id, PaymentSourceParams::Token(token))
                .await?;

        to_payment_source(&source).ok_or_else(|| {
            BillingError::Internal("Attached payment source has an unsupported type".to_string())
        })
    }

    async fn set_default_source(&self, customer: &RemoteCustomer, source_id: &str) -> BillingResult<RemoteCustomer> {
        let customer_id = parse_customer_id(&customer.id)?;
        let source = source_id
            .parse::<PaymentSourceId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid payment source ID: {}", e)))?;

        let params = UpdateCustomer {
            default_source: Some(source),
            ..Default::default()
        };
        Customer::update(&self.client, &customer_id, params).await?;

        tracing::info!(
            customer_id = %customer.id,
            source_id = %source_id,
            "Updated default payment source"
        );

        self.retrieve_customer(&customer.id).await
    }

    async fn retrieve_plan_trial_days(&self, remote_plan_id: &str) -> BillingResult<Option<u32>> {
        let plan_id = remote_plan_id
            .parse::<stripe::PlanId>()
            .map_err(|e| BillingError::InvalidInput(format!("Invalid plan ID: {}", e)))?;

        let plan = stripe::Plan::retrieve(&self.client, &plan_id, &[]).await?;
        Ok(plan.trial_period_days)
    }
}

fn plan_update_params(
    current: &RemoteSubscription,
    remote_plan_id: &str,
    trial_end: Option<OffsetDateTime>,
    prorate: bool,
) -> UpdateSubscription<'static> {
    let proration_behavior = if prorate {
        SubscriptionProrationBehavior::CreateProrations
    } else {
        SubscriptionProrationBehavior::None
    };

    UpdateSubscription {
        items: Some(vec![UpdateSubscriptionItems {
            id: current.item_id.clone(),
            price: Some(remote_plan_id.to_string()),
            ..Default::default()
        }]),
        trial_end: trial_end.map(|t| Scheduled::Timestamp(t.unix_timestamp())),
        proration_behavior: Some(proration_behavior),
        // Choosing a plan again revokes a pending end-of-period cancellation
        cancel_at_period_end: Some(false),
        ..Default::default()
    }
}

fn parse_customer_id(id: &str) -> BillingResult<CustomerId> {
    id.parse::<CustomerId>()
        .map_err(|e| BillingError::StripeApi(format!("Invalid customer ID: {}", e)))
}

fn parse_subscription_id(id: &str) -> BillingResult<SubscriptionId> {
    id.parse::<SubscriptionId>()
        .map_err(|e| BillingError::StripeApi(format!("Invalid subscription ID: {}", e)))
}

fn parse_token_id(token: &str) -> BillingResult<TokenId> {
    token
        .parse::<TokenId>()
        .map_err(|e| BillingError::InvalidInput(format!("Invalid card token: {}", e)))
}

fn to_remote_customer(customer: &Customer) -> RemoteCustomer {
    let mut sources: Vec<PaymentSource> = customer
        .sources
        .data
        .iter()
        .filter_map(to_payment_source)
        .collect();

    let default_source = customer.default_source.as_ref().map(|source| match source {
        Expandable::Id(id) => id.to_string(),
        Expandable::Object(object) => {
            let converted = to_payment_source(object);
            let id = converted.as_ref().map(|s| s.id.clone()).unwrap_or_default();
            if let Some(converted) = converted {
                if !sources.iter().any(|s| s.id == converted.id) {
                    sources.push(converted);
                }
            }
            id
        }
    });

    let subscription = customer
        .subscriptions
        .as_ref()
        .and_then(|list| list.data.first())
        .map(to_remote_subscription);

    let trial_end_override = customer
        .metadata
        .as_ref()
        .and_then(|m| m.get(TRIAL_END_METADATA_KEY))
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok());

    RemoteCustomer {
        id: customer.id.to_string(),
        default_source,
        sources,
        subscription,
        trial_end_override,
    }
}

fn to_remote_subscription(subscription: &Subscription) -> RemoteSubscription {
    let item = subscription.items.data.first();
    RemoteSubscription {
        id: subscription.id.to_string(),
        item_id: item.map(|i| i.id.to_string()),
        remote_plan_id: item
            .and_then(|i| i.price.as_ref())
            .map(|p| p.id.to_string()),
        trial_end: subscription
            .trial_end
            .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok()),
    }
}

fn to_payment_source(source: &stripe::PaymentSource) -> Option<PaymentSource> {
    match source {
        stripe::PaymentSource::Card(card) => Some(PaymentSource {
            id: card.id.to_string(),
            last4: card.last4.clone(),
        }),
        stripe::PaymentSource::BankAccount(bank) => Some(PaymentSource {
            id: bank.id.to_string(),
            last4: bank.last4.clone(),
        }),
        stripe::PaymentSource::Source(src) => Some(PaymentSource {
            id: src.id.to_string(),
            last4: None,
        }),
        _ => None,
    }
}
