//! HTTP client for the NOWPayments-compatible crypto payment processor.
//!
//! The processor exposes two status sources that are observed to disagree:
//! the single-resource endpoint can lag behind the paginated recent-payments
//! list. Both lookups therefore swallow transport and decode failures into
//! `None` ("status unknown"); the caller falls back to the last stored
//! status and lets the next poll or webhook catch up.

use async_trait::async_trait;
use boxoffice_core::{GatewayError, PaymentGateway, PaymentIntent, PaymentStatus};
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

pub struct NowPaymentsClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl NowPaymentsClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

/// The processor returns `payment_id` as a JSON number on some endpoints
/// and as a string on others.
fn de_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number payment id, got {other}"
        ))),
    }
}

#[derive(Debug, serde::Serialize)]
struct CreatePaymentRequest<'a> {
    price_amount: f64,
    price_currency: &'a str,
    pay_currency: &'a str,
    order_id: String,
    order_description: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreatePaymentResponse {
    #[serde(deserialize_with = "de_string_or_number")]
    payment_id: String,
    payment_status: String,
    pay_address: String,
    pay_amount: f64,
    pay_currency: String,
}

#[derive(Debug, Deserialize)]
struct PaymentStatusResponse {
    payment_status: String,
}

#[derive(Debug, Deserialize)]
struct PaymentListResponse {
    data: Vec<PaymentListEntry>,
}

#[derive(Debug, Deserialize)]
struct PaymentListEntry {
    #[serde(deserialize_with = "de_string_or_number")]
    payment_id: String,
    payment_status: String,
}

fn parse_status(raw: &str) -> Option<PaymentStatus> {
    match raw.parse() {
        Ok(status) => Some(status),
        Err(_) => {
            warn!(status = raw, "gateway returned a status outside the known vocabulary");
            None
        }
    }
}

#[async_trait]
impl PaymentGateway for NowPaymentsClient {
    async fn create_payment(
        &self,
        order_id: Uuid,
        amount: f64,
        currency: &str,
        pay_currency: &str,
    ) -> Result<PaymentIntent, GatewayError> {
        let request = CreatePaymentRequest {
            price_amount: amount,
            price_currency: currency,
            pay_currency,
            order_id: order_id.to_string(),
            order_description: "event ticket purchase",
        };

        let response = self
            .http
            .post(format!("{}/v1/payment", self.base_url))
            .header("x-api-key", self.api_key.as_str())
            .json(&request)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Unavailable(format!(
                "payment creation returned {status}"
            )));
        }

        let body: CreatePaymentResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        Ok(PaymentIntent {
            payment_id: body.payment_id,
            pay_address: body.pay_address,
            pay_amount: body.pay_amount,
            pay_currency: body.pay_currency,
            status: parse_status(&body.payment_status).unwrap_or(PaymentStatus::Waiting),
        })
    }

    async fn status_by_id(&self, payment_id: &str) -> Option<PaymentStatus> {
        let response = self
            .http
            .get(format!("{}/v1/payment/{payment_id}", self.base_url))
            .header("x-api-key", self.api_key.as_str())
            .send()
            .await;

        let response = match response {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                warn!(payment_id, status = %r.status(), "payment status endpoint returned non-2xx");
                return None;
            }
            Err(e) => {
                warn!(payment_id, error = %e, "payment status endpoint unreachable");
                return None;
            }
        };

        match response.json::<PaymentStatusResponse>().await {
            Ok(body) => parse_status(&body.payment_status),
            Err(e) => {
                warn!(payment_id, error = %e, "payment status response did not parse");
                None
            }
        }
    }

    async fn status_from_recent_list(&self, payment_id: &str) -> Option<PaymentStatus> {
        let response = self
            .http
            .get(format!(
                "{}/v1/payment/?limit=100&page=0&sortBy=created_at&orderBy=desc",
                self.base_url
            ))
            .header("x-api-key", self.api_key.as_str())
            .send()
            .await;

        let response = match response {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                warn!(payment_id, status = %r.status(), "recent-payments endpoint returned non-2xx");
                return None;
            }
            Err(e) => {
                warn!(payment_id, error = %e, "recent-payments endpoint unreachable");
                return None;
            }
        };

        let body = match response.json::<PaymentListResponse>().await {
            Ok(body) => body,
            Err(e) => {
                warn!(payment_id, error = %e, "recent-payments response did not parse");
                return None;
            }
        };

        body.data
            .iter()
            .find(|entry| entry.payment_id == payment_id)
            .and_then(|entry| parse_status(&entry.payment_status))
    }
}
