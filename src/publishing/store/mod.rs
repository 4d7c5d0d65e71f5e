use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use super::models::{Submission, TeamAccount};

pub mod memory;
pub mod postgres;

pub use memory::InMemorySubmissionStore;
pub use postgres::PgSubmissionStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt submission row `{public_id}`: {reason}")]
    Corrupt { public_id: String, reason: String },
}

/// key: publish-store -> durable submission state, every transition is compare-and-set
///
/// Methods returning `bool` report whether the conditional update won. A `false`
/// means another writer moved the row first and the caller must not act on it.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn submission(&self, public_id: &str) -> Result<Option<Submission>, StoreError>;

    async fn team(&self, team_id: i64) -> Result<Option<TeamAccount>, StoreError>;

    async fn team_by_public_id(&self, public_id: &str)
        -> Result<Option<TeamAccount>, StoreError>;

    /// Published submissions of the team, read from the store on every call.
    async fn published_count(&self, team_id: i64) -> Result<i64, StoreError>;

    /// Takes a lease on a draft for one admission while it charges. Returns the
    /// freshly read row when the claim is won.
    async fn claim_draft(
        &self,
        public_id: &str,
        claim_id: Uuid,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Submission>, StoreError>;

    /// `draft -> published`. With `claim` the caller must hold that claim;
    /// without one the draft must not be leased by anybody.
    async fn publish_draft(
        &self,
        public_id: &str,
        claim: Option<Uuid>,
        charge_reference: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// `draft -> queued`, stamping `queued_at`. Fails while the draft is leased.
    async fn queue_draft(&self, public_id: &str, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// All queued submissions in ascending `(queued_at, id)` order.
    async fn queued_submissions(&self) -> Result<Vec<Submission>, StoreError>;

    async fn queued_for_team(&self, team_id: i64) -> Result<Vec<Submission>, StoreError>;

    /// Takes a lease on a queued submission for one reconciliation run. Returns the
    /// freshly read row when the claim is won.
    async fn claim_queued(
        &self,
        public_id: &str,
        run_id: Uuid,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Submission>, StoreError>;

    /// `queued -> published`, only for the run holding the claim.
    async fn complete_queued(
        &self,
        public_id: &str,
        run_id: Uuid,
        charge_reference: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Drops a draft or queued claim, advancing `charge_attempt` when the charge
    /// was declined.
    async fn release_claim(
        &self,
        public_id: &str,
        run_id: Uuid,
        declined: bool,
    ) -> Result<bool, StoreError>;

    async fn set_notification_pending(
        &self,
        public_id: &str,
        pending: bool,
    ) -> Result<(), StoreError>;

    /// Clears `notification_pending` if still set. Only the caller that wins this
    /// posts the announcement.
    async fn take_notification(&self, public_id: &str) -> Result<bool, StoreError>;

    async fn pending_notifications(&self, limit: i64) -> Result<Vec<Submission>, StoreError>;

    /// `queued -> draft` for unclaimed submissions queued before `cutoff`.
    async fn expire_queued_before(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
}
