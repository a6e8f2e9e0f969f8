use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use boxoffice_core::{Order, PaymentStatus};
use boxoffice_order::{ReconcileError, ResendError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: PaymentStatus,
    pub order: Order,
}

#[derive(Debug, Deserialize, Default)]
pub struct ResyncRequest {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct ResendResponse {
    pub sent: bool,
}

/// GET /v1/payments/{payment_id}/status
/// Poll the gateway and return the canonical status plus the full order
/// snapshot. Upstream trouble degrades to the stored status, never to an
/// error.
pub async fn payment_status(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    match state.engine.poll(&payment_id).await {
        Ok(order) => Ok(Json(StatusResponse {
            status: order.payment_status,
            order,
        })),
        Err(ReconcileError::NotFound(id)) => {
            Err(ApiError::NotFoundError(format!("payment not found: {id}")))
        }
        Err(e) => Err(e.into()),
    }
}

/// POST /v1/orders/{order_id}/resend-email
/// Manual ticket re-send for a finished order, cooldown-throttled.
pub async fn resend_email(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ResendResponse>, ApiError> {
    match state.engine.resend_ticket_email(order_id).await {
        Ok(()) => Ok(Json(ResendResponse { sent: true })),
        Err(ResendError::NotFound(id)) => {
            Err(ApiError::NotFoundError(format!("order not found: {id}")))
        }
        Err(ResendError::NotFinished(status)) => Err(ApiError::ConflictError(format!(
            "tickets can only be re-sent for finished orders (status {status})"
        ))),
        Err(ResendError::CooldownActive { retry_after_secs }) => {
            Err(ApiError::CooldownError { retry_after_secs })
        }
        Err(e) => Err(e.into()),
    }
}

/// POST /v1/admin/payments/{payment_id}/resync
/// Administrative reconciliation; `force` drives the order to `finished`
/// even out of a terminal state.
pub async fn admin_resync(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ResyncRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let provided = headers
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if state.admin_api_key.is_empty() || provided != state.admin_api_key {
        tracing::warn!(%payment_id, "rejected admin resync with bad credentials");
        return Err(ApiError::AuthenticationError(
            "invalid admin credentials".to_string(),
        ));
    }

    match state.engine.resync(&payment_id, req.force).await {
        Ok(order) => Ok(Json(StatusResponse {
            status: order.payment_status,
            order,
        })),
        Err(ReconcileError::NotFound(id)) => {
            Err(ApiError::NotFoundError(format!("payment not found: {id}")))
        }
        Err(e) => Err(e.into()),
    }
}
