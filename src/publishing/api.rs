use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use tracing::{info, warn};

use super::models::{AdmitOutcome, BatchReport, TeamQueueStatus};
use super::status::team_queue_status;
use super::PublishingContext;
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;

const WORKER_SECRET_HEADER: &str = "x-worker-secret";

pub fn routes() -> Router {
    Router::new()
        .route(
            "/api/teams/:team_public_id/submissions/:submission_public_id/publish",
            post(publish_submission),
        )
        .route("/api/queue/status/:team_public_id", get(queue_status))
        .route("/api/worker/queue_worker", post(run_queue_worker))
}

/// key: publish-api -> admission entrypoint, `202 Accepted` when deferred to the queue
pub async fn publish_submission(
    Extension(ctx): Extension<PublishingContext>,
    user: AuthUser,
    Path((team_public_id, submission_public_id)): Path<(String, String)>,
) -> AppResult<(StatusCode, Json<AdmitOutcome>)> {
    if user.team_public_id != team_public_id {
        warn!(
            user = %user.user_public_id,
            team = %team_public_id,
            "publish attempt for another team"
        );
        return Err(AppError::Forbidden);
    }

    let outcome = ctx
        .admission
        .admit(&submission_public_id, &team_public_id)
        .await?;
    let status = if outcome.is_queued() {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)))
}

/// key: publish-api -> admin view of a team's queue
pub async fn queue_status(
    Extension(ctx): Extension<PublishingContext>,
    user: AuthUser,
    Path(team_public_id): Path<String>,
) -> AppResult<Json<TeamQueueStatus>> {
    if !user.is_admin() {
        return Err(AppError::Forbidden);
    }
    if user.team_public_id != team_public_id {
        warn!(
            user = %user.user_public_id,
            requesting_team = %user.team_public_id,
            team = %team_public_id,
            "queue status requested for another team"
        );
        return Err(AppError::Forbidden);
    }

    let status = team_queue_status(
        ctx.store.as_ref(),
        ctx.billing.as_ref(),
        &ctx.policy,
        &team_public_id,
        Utc::now(),
    )
    .await?
    .ok_or(AppError::NotFound)?;
    Ok(Json(status))
}

/// key: publish-api -> cron trigger, guarded by a shared secret header
pub async fn run_queue_worker(
    Extension(ctx): Extension<PublishingContext>,
    headers: HeaderMap,
) -> AppResult<Json<BatchReport>> {
    let Some(expected) = ctx.worker_secret.as_deref() else {
        return Err(AppError::Message("worker secret not configured".into()));
    };
    let presented = headers
        .get(WORKER_SECRET_HEADER)
        .and_then(|value| value.to_str().ok());
    if presented != Some(expected) {
        warn!("unauthorized queue worker trigger");
        return Err(AppError::Unauthorized);
    }

    let report = ctx.worker.run_batch().await?;
    info!(
        processed = report.queued_pages.processed_count,
        failed = report.queued_pages.failed_count,
        skipped = report.queued_pages.skipped_count,
        expired = report.expired_count,
        duration_ms = report.duration_ms,
        "queue worker batch finished"
    );
    Ok(Json(report))
}
