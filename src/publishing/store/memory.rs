use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{StoreError, SubmissionStore};
use crate::publishing::models::{Submission, SubmissionStatus, TeamAccount};

#[derive(Debug, Clone)]
struct Entry {
    submission: Submission,
    claimed_by: Option<Uuid>,
    claimed_until: Option<DateTime<Utc>>,
}

impl Entry {
    fn leased_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.claimed_until, Some(until) if until >= now)
    }
}

#[derive(Default)]
struct State {
    teams: HashMap<i64, TeamAccount>,
    submissions: BTreeMap<String, Entry>,
    next_submission_id: i64,
}

/// key: publish-store-memory -> process-local store with the same compare-and-set rules
///
/// Every operation runs under one lock, so conditional updates are linearizable.
#[derive(Clone, Default)]
pub struct InMemorySubmissionStore {
    state: Arc<Mutex<State>>,
}

impl InMemorySubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert_team(&self, team: TeamAccount) {
        let mut state = self.state.lock().await;
        state.teams.insert(team.id, team);
    }

    /// Applies `update` to a stored team; returns `false` for an unknown id.
    pub async fn update_team<F>(&self, team_id: i64, update: F) -> bool
    where
        F: FnOnce(&mut TeamAccount),
    {
        let mut state = self.state.lock().await;
        match state.teams.get_mut(&team_id) {
            Some(team) => {
                update(team);
                true
            }
            None => false,
        }
    }

    /// Inserts a draft submission for `team_id`.
    pub async fn insert_draft(&self, team_id: i64, public_id: &str, owner_name: &str) -> Submission {
        self.insert_with_status(team_id, public_id, owner_name, SubmissionStatus::Draft, None)
            .await
    }

    /// Inserts an already free-published submission, used to seed quota usage.
    pub async fn insert_published(&self, team_id: i64, public_id: &str) -> Submission {
        self.insert_with_status(
            team_id,
            public_id,
            public_id,
            SubmissionStatus::Published,
            None,
        )
        .await
    }

    pub async fn insert_queued(
        &self,
        team_id: i64,
        public_id: &str,
        owner_name: &str,
        queued_at: DateTime<Utc>,
    ) -> Submission {
        self.insert_with_status(
            team_id,
            public_id,
            owner_name,
            SubmissionStatus::Queued,
            Some(queued_at),
        )
        .await
    }

    pub async fn all_submissions(&self) -> Vec<Submission> {
        let state = self.state.lock().await;
        state
            .submissions
            .values()
            .map(|entry| entry.submission.clone())
            .collect()
    }

    async fn insert_with_status(
        &self,
        team_id: i64,
        public_id: &str,
        owner_name: &str,
        status: SubmissionStatus,
        queued_at: Option<DateTime<Utc>>,
    ) -> Submission {
        let mut state = self.state.lock().await;
        state.next_submission_id += 1;
        let submission = Submission {
            id: state.next_submission_id,
            public_id: public_id.to_string(),
            team_id,
            owner_name: owner_name.to_string(),
            status,
            queued_at,
            paid: false,
            charge_reference: None,
            charge_attempt: 0,
            notification_pending: false,
            published_at: (status == SubmissionStatus::Published).then(Utc::now),
        };
        state.submissions.insert(
            public_id.to_string(),
            Entry {
                submission: submission.clone(),
                claimed_by: None,
                claimed_until: None,
            },
        );
        submission
    }
}

fn sorted_queue<'a>(entries: impl Iterator<Item = &'a Entry>) -> Vec<Submission> {
    let mut queued: Vec<Submission> = entries
        .filter(|entry| entry.submission.status == SubmissionStatus::Queued)
        .map(|entry| entry.submission.clone())
        .collect();
    queued.sort_by(|a, b| a.queued_at.cmp(&b.queued_at).then(a.id.cmp(&b.id)));
    queued
}

#[async_trait]
impl SubmissionStore for InMemorySubmissionStore {
    async fn submission(&self, public_id: &str) -> Result<Option<Submission>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .submissions
            .get(public_id)
            .map(|entry| entry.submission.clone()))
    }

    async fn team(&self, team_id: i64) -> Result<Option<TeamAccount>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.teams.get(&team_id).cloned())
    }

    async fn team_by_public_id(
        &self,
        public_id: &str,
    ) -> Result<Option<TeamAccount>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .teams
            .values()
            .find(|team| team.public_id == public_id)
            .cloned())
    }

    async fn published_count(&self, team_id: i64) -> Result<i64, StoreError> {
        let state = self.state.lock().await;
        let count = state
            .submissions
            .values()
            .filter(|entry| {
                entry.submission.team_id == team_id
                    && entry.submission.status == SubmissionStatus::Published
            })
            .count();
        Ok(count as i64)
    }

    async fn claim_draft(
        &self,
        public_id: &str,
        claim_id: Uuid,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Submission>, StoreError> {
        let mut state = self.state.lock().await;
        let Some(entry) = state.submissions.get_mut(public_id) else {
            return Ok(None);
        };
        if entry.submission.status != SubmissionStatus::Draft || entry.leased_at(now) {
            return Ok(None);
        }
        entry.claimed_by = Some(claim_id);
        entry.claimed_until = Some(lease_until);
        Ok(Some(entry.submission.clone()))
    }

    async fn publish_draft(
        &self,
        public_id: &str,
        claim: Option<Uuid>,
        charge_reference: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(entry) = state.submissions.get_mut(public_id) else {
            return Ok(false);
        };
        if entry.submission.status != SubmissionStatus::Draft {
            return Ok(false);
        }
        let holds_claim = claim.is_some() && entry.claimed_by == claim;
        if !holds_claim && entry.leased_at(now) {
            return Ok(false);
        }
        entry.claimed_by = None;
        entry.claimed_until = None;
        let submission = &mut entry.submission;
        submission.status = SubmissionStatus::Published;
        submission.paid = charge_reference.is_some();
        submission.charge_reference = charge_reference.map(str::to_string);
        submission.published_at = Some(now);
        Ok(true)
    }

    async fn queue_draft(&self, public_id: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(entry) = state.submissions.get_mut(public_id) else {
            return Ok(false);
        };
        if entry.submission.status != SubmissionStatus::Draft || entry.leased_at(now) {
            return Ok(false);
        }
        entry.submission.status = SubmissionStatus::Queued;
        entry.submission.queued_at = Some(now);
        Ok(true)
    }

    async fn queued_submissions(&self) -> Result<Vec<Submission>, StoreError> {
        let state = self.state.lock().await;
        Ok(sorted_queue(state.submissions.values()))
    }

    async fn queued_for_team(&self, team_id: i64) -> Result<Vec<Submission>, StoreError> {
        let state = self.state.lock().await;
        Ok(sorted_queue(
            state
                .submissions
                .values()
                .filter(|entry| entry.submission.team_id == team_id),
        ))
    }

    async fn claim_queued(
        &self,
        public_id: &str,
        run_id: Uuid,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Submission>, StoreError> {
        let mut state = self.state.lock().await;
        let Some(entry) = state.submissions.get_mut(public_id) else {
            return Ok(None);
        };
        if entry.submission.status != SubmissionStatus::Queued {
            return Ok(None);
        }
        if entry.leased_at(now) {
            return Ok(None);
        }
        entry.claimed_by = Some(run_id);
        entry.claimed_until = Some(lease_until);
        Ok(Some(entry.submission.clone()))
    }

    async fn complete_queued(
        &self,
        public_id: &str,
        run_id: Uuid,
        charge_reference: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(entry) = state.submissions.get_mut(public_id) else {
            return Ok(false);
        };
        if entry.submission.status != SubmissionStatus::Queued || entry.claimed_by != Some(run_id)
        {
            return Ok(false);
        }
        entry.claimed_by = None;
        entry.claimed_until = None;
        let submission = &mut entry.submission;
        submission.status = SubmissionStatus::Published;
        submission.queued_at = None;
        submission.paid = charge_reference.is_some();
        submission.charge_reference = charge_reference.map(str::to_string);
        submission.published_at = Some(now);
        Ok(true)
    }

    async fn release_claim(
        &self,
        public_id: &str,
        run_id: Uuid,
        declined: bool,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(entry) = state.submissions.get_mut(public_id) else {
            return Ok(false);
        };
        if entry.claimed_by != Some(run_id) {
            return Ok(false);
        }
        entry.claimed_by = None;
        entry.claimed_until = None;
        if declined {
            entry.submission.charge_attempt += 1;
        }
        Ok(true)
    }

    async fn set_notification_pending(
        &self,
        public_id: &str,
        pending: bool,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.submissions.get_mut(public_id) {
            if entry.submission.status == SubmissionStatus::Published {
                entry.submission.notification_pending = pending;
            }
        }
        Ok(())
    }

    async fn take_notification(&self, public_id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(entry) = state.submissions.get_mut(public_id) else {
            return Ok(false);
        };
        if entry.submission.status != SubmissionStatus::Published
            || !entry.submission.notification_pending
        {
            return Ok(false);
        }
        entry.submission.notification_pending = false;
        Ok(true)
    }

    async fn pending_notifications(&self, limit: i64) -> Result<Vec<Submission>, StoreError> {
        let state = self.state.lock().await;
        let mut pending: Vec<Submission> = state
            .submissions
            .values()
            .filter(|entry| {
                entry.submission.status == SubmissionStatus::Published
                    && entry.submission.notification_pending
            })
            .map(|entry| entry.submission.clone())
            .collect();
        pending.sort_by(|a, b| a.published_at.cmp(&b.published_at).then(a.id.cmp(&b.id)));
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn expire_queued_before(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let mut expired = 0;
        for entry in state.submissions.values_mut() {
            let stale = entry.submission.status == SubmissionStatus::Queued
                && matches!(entry.submission.queued_at, Some(at) if at < cutoff)
                && !entry.leased_at(now);
            if stale {
                entry.submission.status = SubmissionStatus::Draft;
                entry.submission.queued_at = None;
                expired += 1;
            }
        }
        Ok(expired)
    }
}
