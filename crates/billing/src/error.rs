//! Billing error types

use thiserror::Error;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Card declined: {0}")]
    CardDeclined(String),

    #[error("Remote resource not found: {0}")]
    RemoteNotFound(String),

    #[error("Stripe API error: {0}")]
    StripeApi(String),

    #[error("Customer not found: {0}")]
    CustomerNotFound(String),

    #[error("No customer found for subscription")]
    NoCustomer,

    #[error("Webhook event type not supported: {0}")]
    WebhookEventNotSupported(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Whether the payment processor refused the card
    pub fn is_card_declined(&self) -> bool {
        matches!(self, BillingError::CardDeclined(_))
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        if let stripe::StripeError::Stripe(request) = &err {
            if matches!(request.error_type, stripe::ErrorType::Card) {
                return BillingError::CardDeclined(
                    request
                        .message
                        .clone()
                        .unwrap_or_else(|| "Your card was declined.".to_string()),
                );
            }
            if request.http_status == 404 {
                return BillingError::RemoteNotFound(
                    request.message.clone().unwrap_or_else(|| err.to_string()),
                );
            }
        }
        BillingError::StripeApi(err.to_string())
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

impl From<plansync_shared::SharedError> for BillingError {
    fn from(err: plansync_shared::SharedError) -> Self {
        match err {
            plansync_shared::SharedError::Validation(msg) => BillingError::InvalidInput(msg),
            other => BillingError::Database(other.to_string()),
        }
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
