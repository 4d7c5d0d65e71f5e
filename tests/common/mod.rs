#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;
use welcomepage_backend::publishing::{
    BillingError, BillingGateway, BillingStatus, ChargeOutcome, InMemorySubmissionStore,
    PublicationSink, PublishAdmission, PublishPolicy, ReconciliationWorker, SinkError,
    StoreError, Submission, SubmissionStatus, SubmissionStore, TeamAccount, TeamTier,
};

/// Billing double that behaves like a provider honouring idempotency keys: a key
/// that already succeeded replays the original charge instead of capturing again.
#[derive(Default)]
pub struct RecordingBilling {
    attempts: Mutex<Vec<String>>,
    captured: Mutex<HashMap<String, String>>,
    declined_submissions: Mutex<HashSet<String>>,
    unavailable: AtomicBool,
}

impl RecordingBilling {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn decline(&self, submission_public_id: &str) {
        self.declined_submissions
            .lock()
            .unwrap()
            .insert(submission_public_id.to_string());
    }

    pub fn accept(&self, submission_public_id: &str) {
        self.declined_submissions
            .lock()
            .unwrap()
            .remove(submission_public_id);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Every idempotency key presented, including replays and declines.
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    /// Charges that actually moved money, keyed by idempotency key.
    pub fn captured(&self) -> HashMap<String, String> {
        self.captured.lock().unwrap().clone()
    }

    pub fn captured_for(&self, submission_public_id: &str) -> usize {
        let needle = format!(":{submission_public_id}:");
        self.captured
            .lock()
            .unwrap()
            .keys()
            .filter(|key| key.contains(&needle))
            .count()
    }
}

#[async_trait]
impl BillingGateway for RecordingBilling {
    async fn has_payment_method(&self, team: &TeamAccount) -> Result<bool, BillingError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BillingError::Provider {
                status: 503,
                message: "provider down".into(),
            });
        }
        Ok(team.stripe_customer_id.is_some())
    }

    async fn charge(
        &self,
        _team: &TeamAccount,
        _amount_cents: i64,
        _currency: &str,
        idempotency_key: &str,
        _description: &str,
    ) -> Result<ChargeOutcome, BillingError> {
        tokio::task::yield_now().await;
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BillingError::Provider {
                status: 503,
                message: "provider down".into(),
            });
        }
        self.attempts
            .lock()
            .unwrap()
            .push(idempotency_key.to_string());

        let declined = self
            .declined_submissions
            .lock()
            .unwrap()
            .iter()
            .any(|id| idempotency_key.contains(&format!(":{id}:")));
        if declined {
            return Ok(ChargeOutcome::Declined {
                reason: "card_declined".into(),
            });
        }

        let mut captured = self.captured.lock().unwrap();
        let next = captured.len() + 1;
        let reference = captured
            .entry(idempotency_key.to_string())
            .or_insert_with(|| format!("pi_{next}"))
            .clone();
        Ok(ChargeOutcome::Succeeded { reference })
    }
}

#[derive(Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl PublicationSink for RecordingSink {
    async fn publish(&self, submission: &Submission, _team: &TeamAccount) -> Result<(), SinkError> {
        tokio::task::yield_now().await;
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Rejected("channel_not_found".into()));
        }
        self.delivered
            .lock()
            .unwrap()
            .push(submission.public_id.clone());
        Ok(())
    }
}

pub fn team(id: i64, public_id: &str, customer: Option<&str>) -> TeamAccount {
    TeamAccount {
        id,
        public_id: public_id.to_string(),
        organization_name: format!("{public_id} inc"),
        tier: TeamTier::Free,
        stripe_customer_id: customer.map(str::to_string),
        billing_status: if customer.is_some() {
            BillingStatus::Active
        } else {
            BillingStatus::None
        },
        slack_settings: None,
    }
}

pub struct Harness {
    pub store: InMemorySubmissionStore,
    pub billing: Arc<RecordingBilling>,
    pub sink: Arc<RecordingSink>,
    pub admission: PublishAdmission,
    pub worker: ReconciliationWorker,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(PublishPolicy::default())
    }

    pub fn with_policy(policy: PublishPolicy) -> Self {
        let store = InMemorySubmissionStore::new();
        Self::build(store.clone(), Arc::new(store), policy)
    }

    /// Admission and worker see a store whose `notification_pending` writes fail.
    pub fn with_failing_flag_writes() -> Self {
        let store = InMemorySubmissionStore::new();
        let failing = FlagWriteFailingStore {
            inner: store.clone(),
        };
        Self::build(store, Arc::new(failing), PublishPolicy::default())
    }

    fn build(
        store: InMemorySubmissionStore,
        seen_by_core: Arc<dyn SubmissionStore>,
        policy: PublishPolicy,
    ) -> Self {
        let billing = RecordingBilling::new();
        let sink = RecordingSink::new();
        let admission = PublishAdmission::new(
            seen_by_core.clone(),
            billing.clone(),
            sink.clone(),
            policy.clone(),
        );
        let worker =
            ReconciliationWorker::new(seen_by_core, billing.clone(), sink.clone(), policy);
        Self {
            store,
            billing,
            sink,
            admission,
            worker,
        }
    }

    /// A second worker over the same store, as another instance would be.
    pub fn second_worker(&self) -> ReconciliationWorker {
        ReconciliationWorker::new(
            Arc::new(self.store.clone()),
            self.billing.clone(),
            self.sink.clone(),
            PublishPolicy::default(),
        )
    }

    pub async fn seed_published(&self, team_id: i64, count: usize) {
        for index in 0..count {
            self.store
                .insert_published(team_id, &format!("pub-{team_id}-{index}"))
                .await;
        }
    }

    pub async fn status_of(&self, public_id: &str) -> SubmissionStatus {
        self.store
            .submission(public_id)
            .await
            .unwrap()
            .expect("submission exists")
            .status
    }

    /// Published and queued never hold at once for any stored submission.
    pub async fn assert_no_double_state(&self) {
        for submission in self.store.all_submissions().await {
            assert!(
                submission.is_draft() || !submission.publish_queued(),
                "{} is both published and queued",
                submission.public_id
            );
            assert_eq!(
                submission.queued_at.is_some(),
                submission.status == SubmissionStatus::Queued,
                "{} queued_at out of sync with status",
                submission.public_id
            );
        }
    }
}

/// Delegates to the in-memory store but fails every `set_notification_pending`.
pub struct FlagWriteFailingStore {
    inner: InMemorySubmissionStore,
}

#[async_trait]
impl SubmissionStore for FlagWriteFailingStore {
    async fn submission(&self, public_id: &str) -> Result<Option<Submission>, StoreError> {
        self.inner.submission(public_id).await
    }

    async fn team(&self, team_id: i64) -> Result<Option<TeamAccount>, StoreError> {
        self.inner.team(team_id).await
    }

    async fn team_by_public_id(&self, public_id: &str) -> Result<Option<TeamAccount>, StoreError> {
        self.inner.team_by_public_id(public_id).await
    }

    async fn published_count(&self, team_id: i64) -> Result<i64, StoreError> {
        self.inner.published_count(team_id).await
    }

    async fn claim_draft(
        &self,
        public_id: &str,
        claim_id: Uuid,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Submission>, StoreError> {
        self.inner.claim_draft(public_id, claim_id, now, lease_until).await
    }

    async fn publish_draft(
        &self,
        public_id: &str,
        claim: Option<Uuid>,
        charge_reference: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner
            .publish_draft(public_id, claim, charge_reference, now)
            .await
    }

    async fn queue_draft(&self, public_id: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        self.inner.queue_draft(public_id, now).await
    }

    async fn queued_submissions(&self) -> Result<Vec<Submission>, StoreError> {
        self.inner.queued_submissions().await
    }

    async fn queued_for_team(&self, team_id: i64) -> Result<Vec<Submission>, StoreError> {
        self.inner.queued_for_team(team_id).await
    }

    async fn claim_queued(
        &self,
        public_id: &str,
        run_id: Uuid,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Submission>, StoreError> {
        self.inner.claim_queued(public_id, run_id, now, lease_until).await
    }

    async fn complete_queued(
        &self,
        public_id: &str,
        run_id: Uuid,
        charge_reference: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner
            .complete_queued(public_id, run_id, charge_reference, now)
            .await
    }

    async fn release_claim(
        &self,
        public_id: &str,
        run_id: Uuid,
        declined: bool,
    ) -> Result<bool, StoreError> {
        self.inner.release_claim(public_id, run_id, declined).await
    }

    async fn set_notification_pending(
        &self,
        _public_id: &str,
        _pending: bool,
    ) -> Result<(), StoreError> {
        Err(StoreError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn take_notification(&self, public_id: &str) -> Result<bool, StoreError> {
        self.inner.take_notification(public_id).await
    }

    async fn pending_notifications(&self, limit: i64) -> Result<Vec<Submission>, StoreError> {
        self.inner.pending_notifications(limit).await
    }

    async fn expire_queued_before(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.inner.expire_queued_before(cutoff, now).await
    }
}
