use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::models::TeamAccount;

/// Result of a charge the provider actually evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    Succeeded { reference: String },
    Declined { reason: String },
}

/// Failures where the provider gave no verdict. Safe to retry with the same idempotency key.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("billing provider unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("billing provider returned {status}: {message}")]
    Provider { status: u16, message: String },
    #[error("billing gateway is not configured")]
    NotConfigured,
}

/// key: publish-billing -> payment collaborator
#[async_trait]
pub trait BillingGateway: Send + Sync {
    async fn has_payment_method(&self, team: &TeamAccount) -> Result<bool, BillingError>;

    async fn charge(
        &self,
        team: &TeamAccount,
        amount_cents: i64,
        currency: &str,
        idempotency_key: &str,
        description: &str,
    ) -> Result<ChargeOutcome, BillingError>;
}

/// key: publish-billing-stripe -> off-session PaymentIntents against the customer's default card
pub struct StripeBillingGateway {
    base: String,
    secret_key: String,
    client: Client,
}

impl StripeBillingGateway {
    pub fn from_env() -> Option<Self> {
        let secret_key = crate::config::STRIPE_SECRET_KEY.clone()?;
        Self::new(crate::config::STRIPE_API_BASE.as_str(), secret_key).ok()
    }

    pub fn new(
        base: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Result<Self, BillingError> {
        Ok(Self {
            base: base.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
            client: Client::builder().timeout(Duration::from_secs(15)).build()?,
        })
    }

    async fn default_payment_method(
        &self,
        customer_id: &str,
    ) -> Result<Option<String>, BillingError> {
        let url = format!("{}/v1/customers/{}", self.base, customer_id);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.secret_key)
            .send()
            .await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: Value = resp.json().await?;
        if !status.is_success() {
            return Err(provider_error(status, &body));
        }
        if body["deleted"].as_bool().unwrap_or(false) {
            return Ok(None);
        }
        let method = body["invoice_settings"]["default_payment_method"]
            .as_str()
            .or_else(|| body["default_source"].as_str())
            .map(str::to_string);
        Ok(method)
    }
}

#[async_trait]
impl BillingGateway for StripeBillingGateway {
    async fn has_payment_method(&self, team: &TeamAccount) -> Result<bool, BillingError> {
        let Some(customer_id) = team.stripe_customer_id.as_deref() else {
            return Ok(false);
        };
        Ok(self.default_payment_method(customer_id).await?.is_some())
    }

    async fn charge(
        &self,
        team: &TeamAccount,
        amount_cents: i64,
        currency: &str,
        idempotency_key: &str,
        description: &str,
    ) -> Result<ChargeOutcome, BillingError> {
        let Some(customer_id) = team.stripe_customer_id.as_deref() else {
            return Ok(ChargeOutcome::Declined {
                reason: "no billing customer on file".to_string(),
            });
        };
        let Some(payment_method) = self.default_payment_method(customer_id).await? else {
            return Ok(ChargeOutcome::Declined {
                reason: "no default payment method".to_string(),
            });
        };

        let url = format!("{}/v1/payment_intents", self.base);
        let amount = amount_cents.to_string();
        let form = [
            ("amount", amount.as_str()),
            ("currency", currency),
            ("customer", customer_id),
            ("payment_method", payment_method.as_str()),
            ("confirm", "true"),
            ("off_session", "true"),
            ("description", description),
            ("metadata[team_public_id]", team.public_id.as_str()),
            ("metadata[source]", "welcomepage"),
        ];
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", idempotency_key)
            .form(&form)
            .send()
            .await?;
        let status = resp.status();
        let body: Value = resp.json().await?;

        if status.is_success() {
            let reference = body["id"].as_str().unwrap_or_default().to_string();
            return match body["status"].as_str() {
                Some("succeeded") | Some("processing") => {
                    debug!(%reference, team = %team.public_id, "payment intent confirmed");
                    Ok(ChargeOutcome::Succeeded { reference })
                }
                other => Ok(ChargeOutcome::Declined {
                    reason: format!("payment intent {}", other.unwrap_or("in unknown state")),
                }),
            };
        }

        if status == StatusCode::PAYMENT_REQUIRED || body["error"]["type"] == "card_error" {
            let reason = body["error"]["decline_code"]
                .as_str()
                .or_else(|| body["error"]["message"].as_str())
                .unwrap_or("card declined")
                .to_string();
            warn!(team = %team.public_id, %reason, "charge declined by provider");
            return Ok(ChargeOutcome::Declined { reason });
        }

        Err(provider_error(status, &body))
    }
}

fn provider_error(status: StatusCode, body: &Value) -> BillingError {
    BillingError::Provider {
        status: status.as_u16(),
        message: body["error"]["message"]
            .as_str()
            .unwrap_or("unexpected response")
            .to_string(),
    }
}
