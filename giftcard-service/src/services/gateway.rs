//! Payment gateway collaborator.
//!
//! The core only ever sends a charge (payment-method reference, amount,
//! currency) and reads back a confirmation flag plus an opaque reference id.
//! Refunds undo a confirmed charge when a later step of a purchase fails.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use service_core::observability::trace_headers;

use crate::services::error::ServiceError;
use crate::services::metrics::COMPENSATIONS_TOTAL;

#[derive(Debug, Clone, Serialize)]
pub struct ChargeRequest {
    /// Gateway token of the stored payment method.
    pub payment_method_reference: String,
    pub amount: Decimal,
    pub currency: String,
    /// Retrying a charge with the same key must not charge twice.
    pub idempotency_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChargeConfirmation {
    pub confirmed: bool,
    pub reference_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundRequest {
    pub reference_id: String,
    pub amount: Decimal,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// `Ok` with `confirmed == false` is a decline; `Err` means the outcome is
    /// unknown (transport failure, malformed reply, 5xx).
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeConfirmation, ServiceError>;

    async fn refund(&self, request: &RefundRequest) -> Result<(), ServiceError>;
}

#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: Client,
    base_url: String,
    api_key: Secret<String>,
}

impl HttpPaymentGateway {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Secret<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .headers(trace_headers(None));

        let key = self.api_key.expose_secret();
        if key.is_empty() {
            request
        } else {
            request.bearer_auth(key)
        }
    }

    fn describe_failure(status: StatusCode, body: &str) -> String {
        match serde_json::from_str::<GatewayErrorBody>(body) {
            Ok(GatewayErrorBody {
                code: Some(code),
                message,
            }) => format!("{} - {}", code, message.unwrap_or_default()),
            _ => format!("HTTP {}: {}", status, body),
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[tracing::instrument(skip(self, request), fields(amount = %request.amount, currency = %request.currency))]
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeConfirmation, ServiceError> {
        let response = self
            .request("/v1/charges")
            .header("Idempotency-Key", &request.idempotency_key)
            .json(request)
            .send()
            .await
            .map_err(|e| ServiceError::Gateway(format!("Charge request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ServiceError::Gateway(format!("Charge response unreadable: {}", e)))?;

        tracing::debug!(status = %status, "Payment gateway charge response");

        if status.is_success() {
            let confirmation: ChargeConfirmation = serde_json::from_str(&body)
                .map_err(|e| ServiceError::Gateway(format!("Malformed charge response: {}", e)))?;
            if confirmation.confirmed && confirmation.reference_id.is_none() {
                return Err(ServiceError::Gateway(
                    "Confirmed charge without a reference id".to_string(),
                ));
            }
            tracing::info!(
                confirmed = confirmation.confirmed,
                reference_id = ?confirmation.reference_id,
                "Payment gateway charge completed"
            );
            Ok(confirmation)
        } else if status == StatusCode::PAYMENT_REQUIRED {
            tracing::warn!(reason = %Self::describe_failure(status, &body), "Charge declined");
            Ok(ChargeConfirmation {
                confirmed: false,
                reference_id: None,
            })
        } else {
            let reason = Self::describe_failure(status, &body);
            tracing::error!(status = %status, reason = %reason, "Payment gateway charge failed");
            Err(ServiceError::Gateway(reason))
        }
    }

    #[tracing::instrument(skip(self, request), fields(reference_id = %request.reference_id, amount = %request.amount))]
    async fn refund(&self, request: &RefundRequest) -> Result<(), ServiceError> {
        let response = self
            .request("/v1/refunds")
            .header("Idempotency-Key", format!("refund-{}", request.reference_id))
            .json(request)
            .send()
            .await
            .map_err(|e| ServiceError::Gateway(format!("Refund request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            tracing::info!("Payment gateway refund accepted");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let reason = Self::describe_failure(status, &body);
        tracing::error!(status = %status, reason = %reason, "Payment gateway refund failed");
        Err(ServiceError::Gateway(reason))
    }
}

/// Send `request` until the gateway gives a definite answer, at most
/// `attempts` times. Every send carries the same idempotency key, so a charge
/// that landed behind a lost reply is reported back instead of taken twice.
///
/// An `Err` after the last attempt still means the outcome is unknown.
pub async fn charge_until_settled(
    gateway: &dyn PaymentGateway,
    request: &ChargeRequest,
    attempts: u32,
    delay: Duration,
) -> Result<ChargeConfirmation, ServiceError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;

    loop {
        match gateway.charge(request).await {
            Ok(confirmation) => return Ok(confirmation),
            Err(e) if attempt < attempts => {
                tracing::warn!(
                    attempt = attempt,
                    idempotency_key = %request.idempotency_key,
                    error = %e,
                    "Charge outcome unknown, resending"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay * attempt).await;
                }
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(
                    attempts = attempts,
                    idempotency_key = %request.idempotency_key,
                    error = %e,
                    "Charge outcome still unknown"
                );
                return Err(e);
            }
        }
    }
}

/// Refund a confirmed charge whose follow-up write failed.
///
/// Returns `Internal` when the refund itself fails: the customer has been
/// charged and holds nothing, which needs an operator.
pub async fn compensate(
    gateway: &dyn PaymentGateway,
    flow: &'static str,
    reference_id: &str,
    amount: Decimal,
) -> Result<(), ServiceError> {
    let request = RefundRequest {
        reference_id: reference_id.to_string(),
        amount,
        reason: format!("{} could not be completed", flow),
    };

    match gateway.refund(&request).await {
        Ok(()) => {
            COMPENSATIONS_TOTAL
                .with_label_values(&[flow, "refunded"])
                .inc();
            tracing::warn!(flow = flow, reference_id = %reference_id, "Charge refunded");
            Ok(())
        }
        Err(e) => {
            COMPENSATIONS_TOTAL
                .with_label_values(&[flow, "failed"])
                .inc();
            tracing::error!(
                flow = flow,
                reference_id = %reference_id,
                amount = %amount,
                error = %e,
                "Compensating refund failed"
            );
            Err(ServiceError::Internal(format!(
                "Charge {} could not be refunded: {}",
                reference_id, e
            )))
        }
    }
}
