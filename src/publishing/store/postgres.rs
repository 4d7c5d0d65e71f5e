use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{StoreError, SubmissionStore};
use crate::publishing::models::{
    BillingStatus, Submission, SubmissionStatus, TeamAccount, TeamTier,
};

const SUBMISSION_COLUMNS: &str = "id, public_id, team_id, owner_name, status, queued_at, paid, \
     charge_reference, charge_attempt, notification_pending, published_at";

const TEAM_COLUMNS: &str = "id, public_id, organization_name, subscription_status, \
     stripe_customer_id, stripe_subscription_status, billing_status_changed_at, slack_settings";

/// key: publish-store-postgres -> sqlx implementation over `submissions`/`teams`
#[derive(Clone)]
pub struct PgSubmissionStore {
    pool: PgPool,
}

impl PgSubmissionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_submissions(
        &self,
        filter: &str,
        team_id: Option<i64>,
    ) -> Result<Vec<Submission>, StoreError> {
        let sql = format!("SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE {filter}");
        let mut query = sqlx::query_as::<_, SubmissionRow>(&sql);
        if let Some(team_id) = team_id {
            query = query.bind(team_id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Submission::try_from).collect()
    }
}

#[derive(Debug, FromRow)]
struct SubmissionRow {
    id: i64,
    public_id: String,
    team_id: i64,
    owner_name: String,
    status: String,
    queued_at: Option<DateTime<Utc>>,
    paid: bool,
    charge_reference: Option<String>,
    charge_attempt: i32,
    notification_pending: bool,
    published_at: Option<DateTime<Utc>>,
}

impl TryFrom<SubmissionRow> for Submission {
    type Error = StoreError;

    fn try_from(row: SubmissionRow) -> Result<Self, Self::Error> {
        let status: SubmissionStatus = row.status.parse().map_err(|_| StoreError::Corrupt {
            public_id: row.public_id.clone(),
            reason: format!("unknown status `{}`", row.status),
        })?;
        if status == SubmissionStatus::Queued && row.queued_at.is_none() {
            return Err(StoreError::Corrupt {
                public_id: row.public_id,
                reason: "queued without queued_at".to_string(),
            });
        }
        Ok(Submission {
            id: row.id,
            public_id: row.public_id,
            team_id: row.team_id,
            owner_name: row.owner_name,
            status,
            queued_at: row.queued_at,
            paid: row.paid,
            charge_reference: row.charge_reference,
            charge_attempt: row.charge_attempt,
            notification_pending: row.notification_pending,
            published_at: row.published_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct TeamRow {
    id: i64,
    public_id: String,
    organization_name: String,
    subscription_status: Option<String>,
    stripe_customer_id: Option<String>,
    stripe_subscription_status: Option<String>,
    billing_status_changed_at: DateTime<Utc>,
    slack_settings: Option<Value>,
}

impl From<TeamRow> for TeamAccount {
    fn from(row: TeamRow) -> Self {
        TeamAccount {
            id: row.id,
            public_id: row.public_id,
            organization_name: row.organization_name,
            tier: TeamTier::from_subscription_status(row.subscription_status.as_deref()),
            stripe_customer_id: row.stripe_customer_id.filter(|value| !value.is_empty()),
            billing_status: BillingStatus::from_provider(
                row.stripe_subscription_status.as_deref(),
                row.billing_status_changed_at,
            ),
            slack_settings: row.slack_settings,
        }
    }
}

#[async_trait]
impl SubmissionStore for PgSubmissionStore {
    async fn submission(&self, public_id: &str) -> Result<Option<Submission>, StoreError> {
        let sql = format!("SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE public_id = $1");
        let row = sqlx::query_as::<_, SubmissionRow>(&sql)
            .bind(public_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Submission::try_from).transpose()
    }

    async fn team(&self, team_id: i64) -> Result<Option<TeamAccount>, StoreError> {
        let sql = format!("SELECT {TEAM_COLUMNS} FROM teams WHERE id = $1");
        let row = sqlx::query_as::<_, TeamRow>(&sql)
            .bind(team_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(TeamAccount::from))
    }

    async fn team_by_public_id(
        &self,
        public_id: &str,
    ) -> Result<Option<TeamAccount>, StoreError> {
        let sql = format!("SELECT {TEAM_COLUMNS} FROM teams WHERE public_id = $1");
        let row = sqlx::query_as::<_, TeamRow>(&sql)
            .bind(public_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(TeamAccount::from))
    }

    async fn published_count(&self, team_id: i64) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM submissions WHERE team_id = $1 AND status = 'published'",
        )
        .bind(team_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn claim_draft(
        &self,
        public_id: &str,
        claim_id: Uuid,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Submission>, StoreError> {
        let sql = format!(
            r#"
            UPDATE submissions
            SET claimed_by = $2, claimed_until = $4, updated_at = NOW()
            WHERE public_id = $1
              AND status = 'draft'
              AND (claimed_until IS NULL OR claimed_until < $3)
            RETURNING {SUBMISSION_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, SubmissionRow>(&sql)
            .bind(public_id)
            .bind(claim_id)
            .bind(now)
            .bind(lease_until)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Submission::try_from).transpose()
    }

    async fn publish_draft(
        &self,
        public_id: &str,
        claim: Option<Uuid>,
        charge_reference: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE submissions
            SET status = 'published',
                paid = $2,
                charge_reference = $3,
                published_at = $4,
                claimed_by = NULL,
                claimed_until = NULL,
                updated_at = NOW()
            WHERE public_id = $1
              AND status = 'draft'
              AND (claimed_by = $5 OR claimed_until IS NULL OR claimed_until < $4)
            "#,
        )
        .bind(public_id)
        .bind(charge_reference.is_some())
        .bind(charge_reference)
        .bind(now)
        .bind(claim)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn queue_draft(&self, public_id: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE submissions
            SET status = 'queued', queued_at = $2, updated_at = NOW()
            WHERE public_id = $1
              AND status = 'draft'
              AND (claimed_until IS NULL OR claimed_until < $2)
            "#,
        )
        .bind(public_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn queued_submissions(&self) -> Result<Vec<Submission>, StoreError> {
        self.fetch_submissions("status = 'queued' ORDER BY queued_at ASC, id ASC", None)
            .await
    }

    async fn queued_for_team(&self, team_id: i64) -> Result<Vec<Submission>, StoreError> {
        self.fetch_submissions(
            "team_id = $1 AND status = 'queued' ORDER BY queued_at ASC, id ASC",
            Some(team_id),
        )
        .await
    }

    async fn claim_queued(
        &self,
        public_id: &str,
        run_id: Uuid,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Submission>, StoreError> {
        let sql = format!(
            r#"
            UPDATE submissions
            SET claimed_by = $2, claimed_until = $4, updated_at = NOW()
            WHERE public_id = $1
              AND status = 'queued'
              AND (claimed_until IS NULL OR claimed_until < $3)
            RETURNING {SUBMISSION_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, SubmissionRow>(&sql)
            .bind(public_id)
            .bind(run_id)
            .bind(now)
            .bind(lease_until)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Submission::try_from).transpose()
    }

    async fn complete_queued(
        &self,
        public_id: &str,
        run_id: Uuid,
        charge_reference: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE submissions
            SET status = 'published',
                queued_at = NULL,
                paid = $3,
                charge_reference = $4,
                published_at = $5,
                claimed_by = NULL,
                claimed_until = NULL,
                updated_at = NOW()
            WHERE public_id = $1 AND status = 'queued' AND claimed_by = $2
            "#,
        )
        .bind(public_id)
        .bind(run_id)
        .bind(charge_reference.is_some())
        .bind(charge_reference)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_claim(
        &self,
        public_id: &str,
        run_id: Uuid,
        declined: bool,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE submissions
            SET claimed_by = NULL,
                claimed_until = NULL,
                charge_attempt = charge_attempt + CASE WHEN $3 THEN 1 ELSE 0 END,
                updated_at = NOW()
            WHERE public_id = $1 AND claimed_by = $2
            "#,
        )
        .bind(public_id)
        .bind(run_id)
        .bind(declined)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_notification_pending(
        &self,
        public_id: &str,
        pending: bool,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE submissions SET notification_pending = $2, updated_at = NOW() WHERE public_id = $1 AND status = 'published'",
        )
        .bind(public_id)
        .bind(pending)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn take_notification(&self, public_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE submissions
            SET notification_pending = FALSE, updated_at = NOW()
            WHERE public_id = $1 AND status = 'published' AND notification_pending
            "#,
        )
        .bind(public_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn pending_notifications(&self, limit: i64) -> Result<Vec<Submission>, StoreError> {
        let sql = format!(
            "SELECT {SUBMISSION_COLUMNS} FROM submissions \
             WHERE status = 'published' AND notification_pending \
             ORDER BY published_at ASC, id ASC LIMIT $1"
        );
        let rows = sqlx::query_as::<_, SubmissionRow>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Submission::try_from).collect()
    }

    async fn expire_queued_before(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE submissions
            SET status = 'draft', queued_at = NULL, updated_at = NOW()
            WHERE status = 'queued'
              AND queued_at < $1
              AND (claimed_until IS NULL OR claimed_until < $2)
            "#,
        )
        .bind(cutoff)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
