use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::billing::{BillingError, BillingGateway, ChargeOutcome};
use super::models::{AdmitOutcome, Submission, SubmissionStatus, TeamAccount, TeamTier};
use super::policy::PublishPolicy;
use super::sink::{announce, PublicationSink};
use super::store::{StoreError, SubmissionStore};

#[derive(Debug, Error)]
pub enum AdmitError {
    #[error("submission `{0}` not found")]
    SubmissionNotFound(String),
    #[error("team `{0}` not found")]
    TeamNotFound(String),
    #[error("submission `{0}` is already published")]
    AlreadyPublished(String),
    #[error("submission `{submission}` does not belong to team `{team}`")]
    TeamMismatch { submission: String, team: String },
    #[error("payment for submission `{submission}` failed: {reason}")]
    ChargeFailed { submission: String, reason: String },
    #[error("submission `{0}` changed concurrently, retry the request")]
    Conflict(String),
    #[error("billing unavailable: {0}")]
    BillingUnavailable(#[from] BillingError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// key: publish-admission -> decides free publish, charge-and-publish or queue
#[derive(Clone)]
pub struct PublishAdmission {
    store: Arc<dyn SubmissionStore>,
    billing: Arc<dyn BillingGateway>,
    sink: Arc<dyn PublicationSink>,
    policy: PublishPolicy,
}

impl PublishAdmission {
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        billing: Arc<dyn BillingGateway>,
        sink: Arc<dyn PublicationSink>,
        policy: PublishPolicy,
    ) -> Self {
        Self {
            store,
            billing,
            sink,
            policy,
        }
    }

    pub async fn admit(
        &self,
        submission_public_id: &str,
        team_public_id: &str,
    ) -> Result<AdmitOutcome, AdmitError> {
        self.admit_at(submission_public_id, team_public_id, Utc::now())
            .await
    }

    pub async fn admit_at(
        &self,
        submission_public_id: &str,
        team_public_id: &str,
        now: DateTime<Utc>,
    ) -> Result<AdmitOutcome, AdmitError> {
        let submission = self
            .store
            .submission(submission_public_id)
            .await?
            .ok_or_else(|| AdmitError::SubmissionNotFound(submission_public_id.to_string()))?;
        let team = self
            .store
            .team_by_public_id(team_public_id)
            .await?
            .ok_or_else(|| AdmitError::TeamNotFound(team_public_id.to_string()))?;

        if submission.team_id != team.id {
            warn!(
                submission = %submission.public_id,
                team = %team.public_id,
                "publish rejected: submission belongs to another team"
            );
            return Err(AdmitError::TeamMismatch {
                submission: submission.public_id,
                team: team.public_id,
            });
        }

        match submission.status {
            SubmissionStatus::Published => {
                return Err(AdmitError::AlreadyPublished(submission.public_id));
            }
            // The reconciliation worker owns queued submissions.
            SubmissionStatus::Queued => {
                if let Some(queued_at) = submission.queued_at {
                    return Ok(AdmitOutcome::Queued {
                        submission: submission.public_id,
                        queued_at,
                    });
                }
                return Err(AdmitError::Conflict(submission.public_id));
            }
            SubmissionStatus::Draft => {}
        }

        if team.tier == TeamTier::Unlimited {
            info!(team = %team.public_id, "unlimited tier bypasses quota and charge");
            return self.publish_free(&submission, &team, now).await;
        }

        let published_count = self.store.published_count(team.id).await?;
        if published_count < self.policy.free_quota {
            info!(
                team = %team.public_id,
                submission = %submission.public_id,
                published_count,
                free_quota = self.policy.free_quota,
                "publishing within free quota"
            );
            return self.publish_free(&submission, &team, now).await;
        }

        if self.has_usable_payment_method(&team, now).await? {
            return self.charge_and_publish(&submission, &team, now).await;
        }

        self.queue(&submission, &team, now).await
    }

    async fn has_usable_payment_method(
        &self,
        team: &TeamAccount,
        now: DateTime<Utc>,
    ) -> Result<bool, AdmitError> {
        if !self.policy.billing_standing_ok(team, now) {
            return Ok(false);
        }
        Ok(self.billing.has_payment_method(team).await?)
    }

    async fn publish_free(
        &self,
        submission: &Submission,
        team: &TeamAccount,
        now: DateTime<Utc>,
    ) -> Result<AdmitOutcome, AdmitError> {
        if !self
            .store
            .publish_draft(&submission.public_id, None, None, now)
            .await?
        {
            return self.lost_race(&submission.public_id).await;
        }
        let notification_pending =
            announce(self.store.as_ref(), self.sink.as_ref(), submission, team).await;
        info!(submission = %submission.public_id, team = %team.public_id, "submission free-published");
        Ok(AdmitOutcome::FreePublished {
            submission: submission.public_id.clone(),
            notification_pending,
        })
    }

    /// Leases the draft, charges, then publishes under the lease. Nothing else can
    /// publish or queue the draft while the charge is in flight.
    async fn charge_and_publish(
        &self,
        submission: &Submission,
        team: &TeamAccount,
        now: DateTime<Utc>,
    ) -> Result<AdmitOutcome, AdmitError> {
        let claim_id = Uuid::new_v4();
        let Some(claimed) = self
            .store
            .claim_draft(
                &submission.public_id,
                claim_id,
                now,
                now + self.policy.claim_lease,
            )
            .await?
        else {
            return self.lost_race(&submission.public_id).await;
        };

        let idempotency_key = claimed.idempotency_key();
        let description = format!("Welcomepage for {}", claimed.owner_name);
        let charged = self
            .billing
            .charge(
                team,
                self.policy.fee_cents,
                &self.policy.currency,
                &idempotency_key,
                &description,
            )
            .await;

        let reference = match charged {
            Ok(ChargeOutcome::Succeeded { reference }) => reference,
            Ok(ChargeOutcome::Declined { reason }) => {
                self.store
                    .release_claim(&claimed.public_id, claim_id, true)
                    .await?;
                warn!(
                    submission = %claimed.public_id,
                    team = %team.public_id,
                    %reason,
                    "publish charge declined"
                );
                return Err(AdmitError::ChargeFailed {
                    submission: claimed.public_id,
                    reason,
                });
            }
            Err(err) => {
                self.store
                    .release_claim(&claimed.public_id, claim_id, false)
                    .await?;
                return Err(err.into());
            }
        };

        if !self
            .store
            .publish_draft(&claimed.public_id, Some(claim_id), Some(&reference), Utc::now())
            .await?
        {
            // Only reachable once the lease expired; a later admit reuses this
            // idempotency key, so the provider returns this same charge.
            error!(
                submission = %claimed.public_id,
                charge = %reference,
                "draft lease lost after charge"
            );
            return Err(AdmitError::Conflict(claimed.public_id));
        }

        let notification_pending =
            announce(self.store.as_ref(), self.sink.as_ref(), &claimed, team).await;
        info!(
            submission = %claimed.public_id,
            team = %team.public_id,
            charge = %reference,
            amount_cents = self.policy.fee_cents,
            "submission charged and published"
        );
        Ok(AdmitOutcome::PaidPublished {
            submission: claimed.public_id,
            charge_reference: reference,
            amount_cents: self.policy.fee_cents,
            notification_pending,
        })
    }

    async fn queue(
        &self,
        submission: &Submission,
        team: &TeamAccount,
        now: DateTime<Utc>,
    ) -> Result<AdmitOutcome, AdmitError> {
        if !self.store.queue_draft(&submission.public_id, now).await? {
            return self.lost_race(&submission.public_id).await;
        }
        info!(
            submission = %submission.public_id,
            team = %team.public_id,
            "free quota exhausted without payment method, submission queued"
        );
        Ok(AdmitOutcome::Queued {
            submission: submission.public_id.clone(),
            queued_at: now,
        })
    }

    /// Maps the state a concurrent writer left behind onto an admit result.
    async fn lost_race(&self, public_id: &str) -> Result<AdmitOutcome, AdmitError> {
        let current = self.store.submission(public_id).await?;
        match current {
            Some(Submission {
                status: SubmissionStatus::Published,
                ..
            }) => Err(AdmitError::AlreadyPublished(public_id.to_string())),
            Some(Submission {
                status: SubmissionStatus::Queued,
                queued_at: Some(queued_at),
                ..
            }) => Ok(AdmitOutcome::Queued {
                submission: public_id.to_string(),
                queued_at,
            }),
            Some(_) => Err(AdmitError::Conflict(public_id.to_string())),
            None => Err(AdmitError::SubmissionNotFound(public_id.to_string())),
        }
    }
}
