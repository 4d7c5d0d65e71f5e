use chrono::{DateTime, Utc};
use tracing::warn;

use super::billing::BillingGateway;
use super::models::{QueuedSubmissionInfo, TeamQueueStatus};
use super::policy::PublishPolicy;
use super::store::{StoreError, SubmissionStore};

/// key: publish-status -> read-only queue view for team admins
///
/// Returns `None` for an unknown team. A billing lookup failure reports no payment
/// method and sets `payment_method_unknown` instead of failing.
pub async fn team_queue_status(
    store: &dyn SubmissionStore,
    billing: &dyn BillingGateway,
    policy: &PublishPolicy,
    team_public_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<TeamQueueStatus>, StoreError> {
    let Some(team) = store.team_by_public_id(team_public_id).await? else {
        return Ok(None);
    };

    let published_count = store.published_count(team.id).await?;
    let queued = store.queued_for_team(team.id).await?;

    let mut payment_method_unknown = false;
    let has_payment_method = if policy.billing_standing_ok(&team, now) {
        match billing.has_payment_method(&team).await {
            Ok(value) => value,
            Err(err) => {
                warn!(?err, team = %team.public_id, "payment method lookup failed for queue status");
                payment_method_unknown = true;
                false
            }
        }
    } else {
        false
    };

    let queued: Vec<QueuedSubmissionInfo> = queued
        .into_iter()
        .filter_map(|submission| {
            let queued_at = submission.queued_at?;
            Some(QueuedSubmissionInfo {
                submission_public_id: submission.public_id,
                owner_name: submission.owner_name,
                queued_at,
                days_queued: (now - queued_at).num_days().max(0),
            })
        })
        .collect();

    Ok(Some(TeamQueueStatus {
        team_public_id: team.public_id,
        team_name: team.organization_name,
        tier: team.tier,
        published_count,
        queued_count: queued.len() as i64,
        has_payment_method,
        payment_method_unknown,
        queued,
    }))
}
