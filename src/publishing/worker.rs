use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::time::{self, Duration as TokioDuration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::billing::{BillingError, BillingGateway, ChargeOutcome};
use super::models::{
    BatchReport, NotificationRetryReport, ReconcileReport, Submission, TeamAccount, TeamTier,
};
use super::policy::PublishPolicy;
use super::sink::{announce, PublicationSink};
use super::store::{StoreError, SubmissionStore};

const NOTIFICATION_RETRY_BATCH: i64 = 100;

/// Disposition of one queued submission inside a sweep.
enum ItemResult {
    Processed,
    Failed,
    Contended,
}

/// key: publish-reconciliation -> sweeps queued submissions once teams can pay
///
/// Holds no state between runs. Several instances may sweep at the same time: each
/// submission is claimed with a conditional update before it is charged, and the
/// charge carries the submission's idempotency key.
#[derive(Clone)]
pub struct ReconciliationWorker {
    store: Arc<dyn SubmissionStore>,
    billing: Arc<dyn BillingGateway>,
    sink: Arc<dyn PublicationSink>,
    policy: PublishPolicy,
}

impl ReconciliationWorker {
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

    /// One sweep bounded by the policy's sweep budget.
    pub async fn reconcile(&self) -> Result<ReconcileReport, StoreError> {
        self.reconcile_until(Instant::now() + self.policy.sweep_budget)
            .await
    }

    /// One sweep that stops picking up work once `deadline` has passed. Whatever is
    /// left stays queued for the next trigger.
    pub async fn reconcile_until(&self, deadline: Instant) -> Result<ReconcileReport, StoreError> {
        let started = Instant::now();
        let mut report = ReconcileReport {
            run_id: Uuid::new_v4(),
            ..ReconcileReport::default()
        };

        let queued = self.store.queued_submissions().await?;
        if queued.is_empty() {
            debug!(run = %report.run_id, "no queued submissions");
            report.duration_ms = started.elapsed().as_millis() as u64;
            return Ok(report);
        }

        let mut by_team: BTreeMap<i64, Vec<Submission>> = BTreeMap::new();
        for submission in queued {
            by_team.entry(submission.team_id).or_default().push(submission);
        }
        info!(
            run = %report.run_id,
            teams = by_team.len(),
            submissions = by_team.values().map(Vec::len).sum::<usize>(),
            "reconciling queued submissions"
        );

        let mut teams = by_team.into_iter();
        while let Some((team_id, submissions)) = teams.next() {
            if Instant::now() >= deadline {
                report.budget_exhausted = true;
                report.deferred_count += submissions.len() as u64
                    + teams.by_ref().map(|(_, rest)| rest.len() as u64).sum::<u64>();
                break;
            }

            let team = match self.store.team(team_id).await {
                Ok(Some(team)) => team,
                Ok(None) => {
                    warn!(team_id, count = submissions.len(), "team not found, skipping queued submissions");
                    report.skipped_count += 1;
                    report.skipped_submissions += submissions.len() as u64;
                    continue;
                }
                Err(err) => {
                    error!(?err, team_id, "failed to load team for queued submissions");
                    report.failed_count += submissions.len() as u64;
                    continue;
                }
            };

            if team.tier != TeamTier::Unlimited {
                match self.has_usable_payment_method(&team).await {
                    Ok(true) => {}
                    Ok(false) => {
                        info!(team = %team.public_id, count = submissions.len(), "team still has no payment method, skipping");
                        report.skipped_count += 1;
                        report.skipped_submissions += submissions.len() as u64;
                        continue;
                    }
                    Err(err) => {
                        warn!(?err, team = %team.public_id, "payment method lookup failed, leaving team queued");
                        report.failed_count += submissions.len() as u64;
                        continue;
                    }
                }
            }

            let mut pending = submissions.into_iter();
            while let Some(submission) = pending.next() {
                if Instant::now() >= deadline {
                    report.budget_exhausted = true;
                    report.deferred_count += 1 + pending.len() as u64;
                    break;
                }
                match self.settle(&team, &submission, report.run_id).await {
                    Ok(ItemResult::Processed) => report.processed_count += 1,
                    Ok(ItemResult::Failed) => report.failed_count += 1,
                    Ok(ItemResult::Contended) => report.contended_count += 1,
                    Err(err) => {
                        error!(?err, submission = %submission.public_id, "store error while settling queued submission");
                        report.failed_count += 1;
                    }
                }
            }
            if report.budget_exhausted {
                report.deferred_count += teams.by_ref().map(|(_, rest)| rest.len() as u64).sum::<u64>();
                break;
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            run = %report.run_id,
            processed = report.processed_count,
            failed = report.failed_count,
            skipped_teams = report.skipped_count,
            skipped_submissions = report.skipped_submissions,
            contended = report.contended_count,
            deferred = report.deferred_count,
            duration_ms = report.duration_ms,
            "queued submission reconciliation complete"
        );
        Ok(report)
    }

    async fn has_usable_payment_method(
        &self,
        team: &TeamAccount,
    ) -> Result<bool, BillingError> {
        if !self.policy.billing_standing_ok(team, Utc::now()) {
            return Ok(false);
        }
        self.billing.has_payment_method(team).await
    }

    /// Claim, charge, then complete. The claim is released on any failure so the
    /// next sweep picks the submission up again.
    async fn settle(
        &self,
        team: &TeamAccount,
        submission: &Submission,
        run_id: Uuid,
    ) -> Result<ItemResult, StoreError> {
        let now = Utc::now();
        let Some(claimed) = self
            .store
            .claim_queued(
                &submission.public_id,
                run_id,
                now,
                now + self.policy.claim_lease,
            )
            .await?
        else {
            debug!(submission = %submission.public_id, "queued submission claimed elsewhere");
            return Ok(ItemResult::Contended);
        };

        let reference = if team.tier == TeamTier::Unlimited {
            None
        } else {
            let description = format!("Welcomepage for {}", claimed.owner_name);
            let outcome = self
                .billing
                .charge(
                    team,
                    self.policy.fee_cents,
                    &self.policy.currency,
                    &claimed.idempotency_key(),
                    &description,
                )
                .await;
            match outcome {
                Ok(ChargeOutcome::Succeeded { reference }) => Some(reference),
                Ok(ChargeOutcome::Declined { reason }) => {
                    warn!(submission = %claimed.public_id, team = %team.public_id, %reason, "charge declined for queued submission");
                    self.store
                        .release_claim(&claimed.public_id, run_id, true)
                        .await?;
                    return Ok(ItemResult::Failed);
                }
                Err(err) => {
                    warn!(?err, submission = %claimed.public_id, team = %team.public_id, "billing unavailable for queued submission");
                    self.store
                        .release_claim(&claimed.public_id, run_id, false)
                        .await?;
                    return Ok(ItemResult::Failed);
                }
            }
        };

        let completed = self
            .store
            .complete_queued(&claimed.public_id, run_id, reference.as_deref(), Utc::now())
            .await?;
        if !completed {
            // Lease expired and another run took over; it reuses the same idempotency key.
            warn!(submission = %claimed.public_id, "claim lost before completion");
            return Ok(ItemResult::Contended);
        }

        info!(
            submission = %claimed.public_id,
            team = %team.public_id,
            charge = reference.as_deref().unwrap_or("none"),
            "queued submission published"
        );
        announce(self.store.as_ref(), self.sink.as_ref(), &claimed, team).await;
        Ok(ItemResult::Processed)
    }

    /// Retries announcements for published submissions whose delivery failed earlier.
    /// Each row is taken with a conditional update first, so overlapping batches
    /// never post the same announcement twice.
    pub async fn retry_notifications(&self) -> Result<NotificationRetryReport, StoreError> {
        let mut report = NotificationRetryReport::default();
        let pending = self
            .store
            .pending_notifications(NOTIFICATION_RETRY_BATCH)
            .await?;
        for submission in pending {
            let Some(team) = self.store.team(submission.team_id).await? else {
                warn!(submission = %submission.public_id, "announcement retry skipped, team missing");
                continue;
            };
            if !self.store.take_notification(&submission.public_id).await? {
                debug!(submission = %submission.public_id, "announcement retry taken elsewhere");
                report.contended += 1;
                continue;
            }
            report.retried += 1;
            if announce(self.store.as_ref(), self.sink.as_ref(), &submission, &team).await {
                report.still_pending += 1;
            } else {
                report.delivered += 1;
            }
        }
        Ok(report)
    }

    /// Returns long-queued submissions to draft when a staleness bound is configured.
    pub async fn expire_stale(&self) -> Result<u64, StoreError> {
        let Some(stale_after) = self.policy.stale_after else {
            return Ok(0);
        };
        let now = Utc::now();
        let expired = self
            .store
            .expire_queued_before(now - stale_after, now)
            .await?;
        if expired > 0 {
            info!(expired, "expired stale queued submissions");
        }
        Ok(expired)
    }

    /// Everything one scheduler trigger does.
    pub async fn run_batch(&self) -> Result<BatchReport, StoreError> {
        let started_at = Utc::now();
        let started = Instant::now();
        let deadline = started + self.policy.sweep_budget;

        let expired_count = self.expire_stale().await?;
        let queued_pages = self.reconcile_until(deadline).await?;
        let notifications = self.retry_notifications().await?;

        Ok(BatchReport {
            started_at,
            expired_count,
            queued_pages,
            notifications,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// key: publish-reconciliation-scheduler -> in-process trigger for deployments without cron
pub fn spawn(worker: ReconciliationWorker, interval_secs: u64) {
    let interval = TokioDuration::from_secs(interval_secs);
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match worker.run_batch().await {
                Ok(report) => debug!(
                    processed = report.queued_pages.processed_count,
                    duration_ms = report.duration_ms,
                    "publish queue tick finished"
                ),
                Err(err) => warn!(?err, "publish queue tick failed"),
            }
        }
    });
}
