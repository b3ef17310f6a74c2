//! Reconciliation settings

use crate::error::{BillingError, BillingResult};

/// Deployment-wide settings, passed into the engine explicitly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Carry an active trial over to the new plan (extended by the new
    /// plan's trial days)
    pub keep_trial_end_on_plan_change: bool,
    /// Prorate cancellations. When false, cancellation waits for the end of
    /// the billing period.
    pub prorate_on_cancel: bool,
    /// New subscribers start on a free trial
    pub free_trial_enabled: bool,
    /// Kind of entity subscriptions belong to, e.g. "user" or "organization"
    pub subscriptions_owned_by: String,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            keep_trial_end_on_plan_change: false,
            prorate_on_cancel: true,
            free_trial_enabled: false,
            subscriptions_owned_by: "user".to_string(),
        }
    }
}

impl ReconcileConfig {
    /// Create config from environment variables, falling back to defaults
    pub fn from_env() -> BillingResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            keep_trial_end_on_plan_change: env_flag(
                "PLANSYNC_KEEP_TRIAL_END",
                defaults.keep_trial_end_on_plan_change,
            )?,
            prorate_on_cancel: env_flag("PLANSYNC_PRORATE", defaults.prorate_on_cancel)?,
            free_trial_enabled: env_flag("PLANSYNC_FREE_TRIAL", defaults.free_trial_enabled)?,
            subscriptions_owned_by: std::env::var("PLANSYNC_OWNED_BY")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.subscriptions_owned_by),
        })
    }

    /// Metadata key carrying the owner id on remote customers, e.g. "user_id"
    pub fn owner_metadata_key(&self) -> String {
        format!("{}_id", self.subscriptions_owned_by)
    }
}

fn env_flag(name: &str, default: bool) -> BillingResult<bool> {
    match std::env::var(name) {
        Ok(value) => parse_flag(&value)
            .ok_or_else(|| BillingError::Config(format!("{} must be true or false, got {:?}", name, value))),
        Err(_) => Ok(default),
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
