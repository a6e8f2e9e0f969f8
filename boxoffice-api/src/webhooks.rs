use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use boxoffice_core::PaymentStatus;
use boxoffice_gateway::{verify_ipn_signature, IPN_SIGNATURE_HEADER};
use boxoffice_order::ReconcileError;
use serde_json::Value;

use crate::error::ApiError;
use crate::state::AppState;

/// POST /v1/webhooks/payments
/// Receive payment status callbacks from the processor. The signature is
/// checked against the raw body before anything is parsed out of it; an
/// unauthenticated request touches no state.
pub async fn handle_payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let signature = headers
        .get(IPN_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if verify_ipn_signature(&body, signature, &state.ipn_secret).is_err() {
        tracing::warn!("rejected webhook with missing or invalid signature");
        return Err(ApiError::AuthenticationError(
            "invalid webhook signature".to_string(),
        ));
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|_| ApiError::ValidationError("webhook body is not JSON".to_string()))?;

    let payment_id = match &payload["payment_id"] {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => {
            return Err(ApiError::ValidationError(
                "webhook body has no payment_id".to_string(),
            ))
        }
    };

    let raw_status = payload["payment_status"].as_str().ok_or_else(|| {
        ApiError::ValidationError("webhook body has no payment_status".to_string())
    })?;

    let Ok(candidate) = raw_status.parse::<PaymentStatus>() else {
        // Outside the known vocabulary: acknowledge so the processor does
        // not retry forever, and let a later poll pick up anything real.
        tracing::warn!(%payment_id, status = raw_status, "ignoring webhook with unknown status");
        return Ok(StatusCode::OK);
    };

    tracing::info!(%payment_id, status = %candidate, "payment webhook received");

    match state.engine.apply_observation(&payment_id, candidate).await {
        Ok(_) => Ok(StatusCode::OK),
        Err(ReconcileError::NotFound(id)) => {
            Err(ApiError::NotFoundError(format!("payment not found: {id}")))
        }
        Err(e) => Err(e.into()),
    }
}
