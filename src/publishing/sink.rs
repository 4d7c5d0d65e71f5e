use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::models::{Submission, TeamAccount};
use super::store::SubmissionStore;

#[derive(Debug, Error)]
pub enum SinkError {
    /// The team has no announcement channel; there is nothing to deliver.
    #[error("team `{0}` has no publish channel configured")]
    NotConfigured(String),
    #[error("announcement transport failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("announcement rejected: {0}")]
    Rejected(String),
}

/// key: publish-sink -> announcement of a freshly published page
#[async_trait]
pub trait PublicationSink: Send + Sync {
    async fn publish(&self, submission: &Submission, team: &TeamAccount) -> Result<(), SinkError>;
}

/// key: publish-sink-slack -> chat.postMessage into the team's publish channel
pub struct SlackPublicationSink {
    api_base: String,
    webapp_base: String,
    client: Client,
}

impl SlackPublicationSink {
    pub fn from_env() -> Result<Self, SinkError> {
        Self::new(
            crate::config::SLACK_API_BASE.as_str(),
            crate::config::WEBAPP_BASE_URL.as_str(),
        )
    }

    pub fn new(api_base: impl Into<String>, webapp_base: impl Into<String>) -> Result<Self, SinkError> {
        Ok(Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            webapp_base: webapp_base.into().trim_end_matches('/').to_string(),
            client: Client::builder().timeout(Duration::from_secs(10)).build()?,
        })
    }
}

fn slack_target(team: &TeamAccount) -> Option<(&str, &str)> {
    let settings = team.slack_settings.as_ref()?;
    let token = settings["slack_app"]["bot_token"].as_str()?;
    let channel = settings["publish_channel"]["id"].as_str()?;
    Some((token, channel))
}

#[async_trait]
impl PublicationSink for SlackPublicationSink {
    async fn publish(&self, submission: &Submission, team: &TeamAccount) -> Result<(), SinkError> {
        let (token, channel) =
            slack_target(team).ok_or_else(|| SinkError::NotConfigured(team.public_id.clone()))?;
        let link = format!("{}/{}", self.webapp_base, submission.public_id);
        let payload = json!({
            "channel": channel,
            "text": format!(
                ":wave: {} just published their welcomepage: <{}|say hi>",
                submission.owner_name, link
            ),
            "unfurl_links": false,
        });

        let body: Value = self
            .client
            .post(format!("{}/chat.postMessage", self.api_base))
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        // Slack answers 200 with `ok: false` for application-level failures.
        if body["ok"].as_bool().unwrap_or(false) {
            Ok(())
        } else {
            Err(SinkError::Rejected(
                body["error"].as_str().unwrap_or("unknown_error").to_string(),
            ))
        }
    }
}

/// Delivers the announcement for a submission that is already published, with
/// `notification_pending` already clear. A failed delivery flags the row for the
/// retry sweep; it never touches the publish state and never fails the caller.
/// Returns whether the announcement is still pending.
pub(crate) async fn announce(
    store: &dyn SubmissionStore,
    sink: &dyn PublicationSink,
    submission: &Submission,
    team: &TeamAccount,
) -> bool {
    match sink.publish(submission, team).await {
        Ok(()) => {
            info!(
                submission = %submission.public_id,
                team = %team.public_id,
                "welcomepage announcement delivered"
            );
            false
        }
        Err(SinkError::NotConfigured(_)) => {
            debug!(
                submission = %submission.public_id,
                team = %team.public_id,
                "team has no publish channel, skipping announcement"
            );
            false
        }
        Err(err) => {
            warn!(
                ?err,
                submission = %submission.public_id,
                team = %team.public_id,
                "announcement failed, flagged for retry"
            );
            if let Err(store_err) = store
                .set_notification_pending(&submission.public_id, true)
                .await
            {
                error!(
                    ?store_err,
                    submission = %submission.public_id,
                    "failed to flag announcement for retry"
                );
            }
            true
        }
    }
}
