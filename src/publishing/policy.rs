use chrono::{DateTime, Duration, Utc};

use crate::config;

use super::models::{BillingStatus, TeamAccount};

/// key: publish-policy -> quota, fee and timing knobs shared by admission and the worker
#[derive(Debug, Clone)]
pub struct PublishPolicy {
    pub free_quota: i64,
    pub fee_cents: i64,
    pub currency: String,
    pub past_due_grace: Duration,
    pub claim_lease: Duration,
    pub sweep_budget: std::time::Duration,
    pub stale_after: Option<Duration>,
}

impl Default for PublishPolicy {
    fn default() -> Self {
        Self {
            free_quota: 3,
            fee_cents: 799,
            currency: "usd".to_string(),
            past_due_grace: Duration::days(7),
            claim_lease: Duration::seconds(120),
            sweep_budget: std::time::Duration::from_secs(50),
            stale_after: None,
        }
    }
}

impl PublishPolicy {
    pub fn from_env() -> Self {
        Self {
            free_quota: *config::PUBLISH_FREE_QUOTA,
            fee_cents: *config::PUBLISH_FEE_CENTS,
            currency: config::PUBLISH_CURRENCY.clone(),
            past_due_grace: Duration::days(*config::BILLING_PAST_DUE_GRACE_DAYS),
            claim_lease: Duration::seconds(*config::PUBLISH_QUEUE_CLAIM_LEASE_SECS),
            sweep_budget: std::time::Duration::from_secs(*config::PUBLISH_QUEUE_SWEEP_BUDGET_SECS),
            stale_after: config::PUBLISH_QUEUE_STALE_AFTER_DAYS.map(Duration::days),
        }
    }

    /// Whether the team's billing standing allows charging at all. A `past_due`
    /// subscription keeps its payment method only inside the grace window.
    pub fn billing_standing_ok(&self, team: &TeamAccount, now: DateTime<Utc>) -> bool {
        if team.stripe_customer_id.is_none() {
            return false;
        }
        match team.billing_status {
            BillingStatus::PastDue { since } => since + self.past_due_grace > now,
            _ => true,
        }
    }
}
