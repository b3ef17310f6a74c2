//! In-process payment processor for engine tests

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::remote::{NewCustomer, PaymentSource, RemoteBillingClient, RemoteCustomer, RemoteSubscription};

pub const DECLINE_MESSAGE: &str = "Your card was declined.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    RetrieveCustomer(String),
    CreateCustomer(NewCustomer),
    UpdateSubscriptionPlan {
        customer_id: String,
        remote_plan_id: String,
        trial_end: Option<OffsetDateTime>,
        prorate: bool,
    },
    AttachPlan {
        customer_id: String,
        remote_plan_id: String,
    },
    CancelSubscription {
        customer_id: String,
        at_period_end: bool,
    },
    CreatePaymentSource {
        customer_id: String,
        token: String,
    },
    SetDefaultSource {
        customer_id: String,
        source_id: String,
    },
    RetrievePlanTrialDays(String),
}

impl RemoteCall {
    fn name(&self) -> &'static str {
        match self {
            RemoteCall::RetrieveCustomer(_) => "retrieve_customer",
            RemoteCall::CreateCustomer(_) => "create_customer",
            RemoteCall::UpdateSubscriptionPlan { .. } => "update_subscription_plan",
            RemoteCall::AttachPlan { .. } => "attach_plan",
            RemoteCall::CancelSubscription { .. } => "cancel_subscription",
            RemoteCall::CreatePaymentSource { .. } => "create_payment_source",
            RemoteCall::SetDefaultSource { .. } => "set_default_source",
            RemoteCall::RetrievePlanTrialDays(_) => "retrieve_plan_trial_days",
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    customers: HashMap<String, RemoteCustomer>,
    calls: Vec<RemoteCall>,
    declined_tokens: HashSet<String>,
    plan_trial_days: HashMap<String, u32>,
    fail_attach_plan: bool,
    next_id: usize,
}

impl MockState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}_mock_{}", prefix, self.next_id)
    }

    fn customer_mut(&mut self, customer_id: &str) -> BillingResult<&mut RemoteCustomer> {
        self.customers
            .get_mut(customer_id)
            .ok_or_else(|| BillingError::RemoteNotFound(format!("No such customer: {}", customer_id)))
    }

    fn add_card(&mut self, customer_id: &str, token: &str) -> BillingResult<PaymentSource> {
        if self.declined_tokens.contains(token) {
            return Err(BillingError::CardDeclined(DECLINE_MESSAGE.to_string()));
        }
        let source = PaymentSource {
            id: self.next_id("card"),
            last4: Some(last4_from_token(token)),
        };
        self.customer_mut(customer_id)?.sources.push(source.clone());
        Ok(source)
    }
}

/// Trailing four digits of the token, or the usual test card's
fn last4_from_token(token: &str) -> String {
    let digits: String = token
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    if digits.len() >= 4 {
        digits[digits.len() - 4..].to_string()
    } else {
        "4242".to_string()
    }
}

#[derive(Debug, Default)]
pub struct MockBillingClient {
    state: Mutex<MockState>,
    timeline: Option<Arc<Mutex<Vec<String>>>>,
}

impl MockBillingClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_customer(self, customer: RemoteCustomer) -> Self {
        self.state.lock().unwrap().customers.insert(customer.id.clone(), customer);
        self
    }

    pub fn decline_token(self, token: &str) -> Self {
        self.state.lock().unwrap().declined_tokens.insert(token.to_string());
        self
    }

    pub fn with_plan_trial_days(self, remote_plan_id: &str, days: u32) -> Self {
        self.state
            .lock()
            .unwrap()
            .plan_trial_days
            .insert(remote_plan_id.to_string(), days);
        self
    }

    pub fn fail_attach_plan(self) -> Self {
        self.state.lock().unwrap().fail_attach_plan = true;
        self
    }

    /// Also log call names, prefixed with `remote:`, into a shared timeline
    pub fn with_timeline(mut self, timeline: Arc<Mutex<Vec<String>>>) -> Self {
        self.timeline = Some(timeline);
        self
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_names(&self) -> Vec<&'static str> {
        self.calls().iter().map(RemoteCall::name).collect()
    }

    pub fn customer(&self, customer_id: &str) -> Option<RemoteCustomer> {
        self.state.lock().unwrap().customers.get(customer_id).cloned()
    }

    fn log(&self, state: &mut MockState, call: RemoteCall) {
        if let Some(timeline) = &self.timeline {
            timeline.lock().unwrap().push(format!("remote:{}", call.name()));
        }
        state.calls.push(call);
    }
}

#[async_trait]
impl RemoteBillingClient for MockBillingClient {
    async fn retrieve_customer(&self, customer_id: &str) -> BillingResult<RemoteCustomer> {
        let mut state = self.state.lock().unwrap();
        self.log(&mut state, RemoteCall::RetrieveCustomer(customer_id.to_string()));
        state.customer_mut(customer_id).map(|c| c.clone())
    }

    async fn create_customer(&self, params: NewCustomer) -> BillingResult<RemoteCustomer> {
        let mut state = self.state.lock().unwrap();
        self.log(&mut state, RemoteCall::CreateCustomer(params.clone()));

        if let Some(token) = &params.card_token {
            if state.declined_tokens.contains(token) {
                return Err(BillingError::CardDeclined(DECLINE_MESSAGE.to_string()));
            }
        }

        let id = state.next_id("cus");
        state.customers.insert(
            id.clone(),
            RemoteCustomer {
                id: id.clone(),
                trial_end_override: params.trial_end_override,
                ..Default::default()
            },
        );
        if let Some(token) = &params.card_token {
            let source = state.add_card(&id, token)?;
            state.customer_mut(&id)?.default_source = Some(source.id);
        }
        state.customer_mut(&id).map(|c| c.clone())
    }

    async fn update_subscription_plan(
        &self,
        customer: &RemoteCustomer,
        remote_plan_id: &str,
        trial_end: Option<OffsetDateTime>,
        prorate: bool,
    ) -> BillingResult<()> {
        let mut state = self.state.lock().unwrap();
        self.log(
            &mut state,
            RemoteCall::UpdateSubscriptionPlan {
                customer_id: customer.id.clone(),
                remote_plan_id: remote_plan_id.to_string(),
                trial_end,
                prorate,
            },
        );

        let new_id = state.next_id("sub");
        let stored = state.customer_mut(&customer.id)?;
        let subscription = stored.subscription.get_or_insert(RemoteSubscription {
            id: new_id,
            item_id: None,
            remote_plan_id: None,
            trial_end: None,
        });
        subscription.remote_plan_id = Some(remote_plan_id.to_string());
        if trial_end.is_some() {
            subscription.trial_end = trial_end;
        }
        Ok(())
    }

    async fn attach_plan(&self, customer: &RemoteCustomer, remote_plan_id: &str) -> BillingResult<()> {
        let mut state = self.state.lock().unwrap();
        self.log(
            &mut state,
            RemoteCall::AttachPlan {
                customer_id: customer.id.clone(),
                remote_plan_id: remote_plan_id.to_string(),
            },
        );

        if state.fail_attach_plan {
            return Err(BillingError::StripeApi("No such plan".to_string()));
        }

        let new_id = state.next_id("sub");
        let stored = state.customer_mut(&customer.id)?;
        stored.subscription = Some(RemoteSubscription {
            id: new_id,
            item_id: None,
            remote_plan_id: Some(remote_plan_id.to_string()),
            trial_end: stored.trial_end_override,
        });
        Ok(())
    }

    async fn cancel_subscription(&self, customer: &RemoteCustomer, at_period_end: bool) -> BillingResult<()> {
        let mut state = self.state.lock().unwrap();
        self.log(
            &mut state,
            RemoteCall::CancelSubscription {
                customer_id: customer.id.clone(),
                at_period_end,
            },
        );

        let stored = state.customer_mut(&customer.id)?;
        match stored.subscription.take() {
            Some(_) => Ok(()),
            None => Err(BillingError::RemoteNotFound(format!(
                "Customer {} has no subscription",
                customer.id
            ))),
        }
    }

    async fn create_payment_source(&self, customer: &RemoteCustomer, token: &str) -> BillingResult<PaymentSource> {
        let mut state = self.state.lock().unwrap();
        self.log(
            &mut state,
            RemoteCall::CreatePaymentSource {
                customer_id: customer.id.clone(),
                token: token.to_string(),
            },
        );
        state.add_card(&customer.id, token)
    }

    async fn set_default_source(&self, customer: &RemoteCustomer, source_id: &str) -> BillingResult<RemoteCustomer> {
        let mut state = self.state.lock().unwrap();
        self.log(
            &mut state,
            RemoteCall::SetDefaultSource {
                customer_id: customer.id.clone(),
                source_id: source_id.to_string(),
            },
        );

        let stored = state.customer_mut(&customer.id)?;
        stored.default_source = Some(source_id.to_string());
        Ok(stored.clone())
    }

    async fn retrieve_plan_trial_days(&self, remote_plan_id: &str) -> BillingResult<Option<u32>> {
        let mut state = self.state.lock().unwrap();
        self.log(&mut state, RemoteCall::RetrievePlanTrialDays(remote_plan_id.to_string()));
        Ok(state.plan_trial_days.get(remote_plan_id).copied())
    }
}

#[test]
fn test_last4_from_token() {
    assert_eq!(last4_from_token("tok_visa_4000000000000341"), "0341");
    assert_eq!(last4_from_token("tok_visa"), "4242");
}
