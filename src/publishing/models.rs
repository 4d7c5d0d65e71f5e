use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// key: publish-models -> submission lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Draft,
    Published,
    Queued,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Draft => "draft",
            SubmissionStatus::Published => "published",
            SubmissionStatus::Queued => "queued",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(SubmissionStatus::Draft),
            "published" => Ok(SubmissionStatus::Published),
            "queued" => Ok(SubmissionStatus::Queued),
            _ => Err(()),
        }
    }
}

/// key: publish-models -> a member's publishable welcomepage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: i64,
    pub public_id: String,
    pub team_id: i64,
    pub owner_name: String,
    pub status: SubmissionStatus,
    pub queued_at: Option<DateTime<Utc>>,
    pub paid: bool,
    pub charge_reference: Option<String>,
    pub charge_attempt: i32,
    pub notification_pending: bool,
    pub published_at: Option<DateTime<Utc>>,
}

impl Submission {
    pub fn is_draft(&self) -> bool {
        self.status != SubmissionStatus::Published
    }

    pub fn publish_queued(&self) -> bool {
        self.status == SubmissionStatus::Queued
    }

    /// Key handed to the billing provider. Stable across transient retries; only a
    /// confirmed decline advances `charge_attempt`.
    pub fn idempotency_key(&self) -> String {
        format!("welcomepage-publish:{}:{}", self.public_id, self.charge_attempt)
    }
}

/// key: publish-models -> team tier, replaces the `unlimited` string override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamTier {
    Free,
    /// Hosting subscription. Publishing still follows the free quota and the
    /// per-page fee, same as `Free`; the tier is carried for status reporting.
    Paid,
    Unlimited,
}

impl TeamTier {
    pub fn from_subscription_status(status: Option<&str>) -> Self {
        match status.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
            Some("unlimited") => TeamTier::Unlimited,
            Some("pro") => TeamTier::Paid,
            _ => TeamTier::Free,
        }
    }
}

/// Provider-side subscription state as far as payment usability is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum BillingStatus {
    None,
    Active,
    PastDue { since: DateTime<Utc> },
    Canceled,
}

impl BillingStatus {
    pub fn from_provider(status: Option<&str>, changed_at: DateTime<Utc>) -> Self {
        match status {
            Some("active") | Some("trialing") => BillingStatus::Active,
            Some("past_due") | Some("unpaid") => BillingStatus::PastDue { since: changed_at },
            Some("canceled") | Some("incomplete_expired") => BillingStatus::Canceled,
            _ => BillingStatus::None,
        }
    }
}

/// key: publish-models -> team billing context read by admission and reconciliation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamAccount {
    pub id: i64,
    pub public_id: String,
    pub organization_name: String,
    pub tier: TeamTier,
    pub stripe_customer_id: Option<String>,
    pub billing_status: BillingStatus,
    #[serde(skip_serializing)]
    pub slack_settings: Option<Value>,
}

/// key: publish-models -> admission result, queued is a deferred success
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum AdmitOutcome {
    FreePublished {
        submission: String,
        notification_pending: bool,
    },
    PaidPublished {
        submission: String,
        charge_reference: String,
        amount_cents: i64,
        notification_pending: bool,
    },
    Queued {
        submission: String,
        queued_at: DateTime<Utc>,
    },
}

impl AdmitOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, AdmitOutcome::Queued { .. })
    }
}

/// key: publish-models -> aggregate of one reconciliation sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub run_id: Uuid,
    pub processed_count: u64,
    pub failed_count: u64,
    /// Distinct teams left untouched because they still lack a usable payment method.
    pub skipped_count: u64,
    pub skipped_submissions: u64,
    /// Queued submissions another run currently holds a claim on.
    pub contended_count: u64,
    /// Queued submissions not reached before the sweep budget ran out.
    pub deferred_count: u64,
    pub budget_exhausted: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NotificationRetryReport {
    pub retried: u64,
    pub delivered: u64,
    pub still_pending: u64,
    /// Rows another batch took between listing and delivery.
    pub contended: u64,
}

/// key: publish-models -> one scheduled batch: expiry, queue sweep, announcement retries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub started_at: DateTime<Utc>,
    pub expired_count: u64,
    pub queued_pages: ReconcileReport,
    pub notifications: NotificationRetryReport,
    pub duration_ms: u64,
}

/// key: publish-status -> one queued submission as seen by team admins
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedSubmissionInfo {
    pub submission_public_id: String,
    pub owner_name: String,
    pub queued_at: DateTime<Utc>,
    pub days_queued: i64,
}

/// key: publish-status -> per-team queue snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamQueueStatus {
    pub team_public_id: String,
    pub team_name: String,
    pub tier: TeamTier,
    pub published_count: i64,
    pub queued_count: i64,
    pub has_payment_method: bool,
    /// The billing provider could not be asked; `has_payment_method` is then `false`.
    pub payment_method_unknown: bool,
    pub queued: Vec<QueuedSubmissionInfo>,
}
