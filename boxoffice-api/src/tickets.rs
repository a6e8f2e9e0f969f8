use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use boxoffice_core::{
    Order, OrderRepository, PaymentGateway, ReservationStatus, StockError, StockLedger, TicketType,
};
use boxoffice_order::{CancelError, ManagerError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct TicketAvailability {
    #[serde(rename = "type")]
    pub ticket_type: TicketType,
    pub available: u32,
    pub reserved: u32,
    pub total: u32,
    pub sold: u32,
    pub sold_out: bool,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    pub ticket_type: TicketType,
    pub quantity: u32,
    pub customer_email: String,
    pub customer_name: String,
}

#[derive(Debug, Serialize)]
pub struct PurchaseResponse {
    pub order_id: Uuid,
    pub payment_id: String,
    pub pay_address: String,
    pub pay_amount: f64,
    pub pay_currency: String,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub payment_id: String,
}

#[derive(Debug, Serialize)]
pub struct RemainingResponse {
    pub valid: bool,
    pub time_remaining: i64,
    pub expired: bool,
}

/// GET /v1/tickets
/// Availability per ticket type.
pub async fn list_tickets(
    State(state): State<AppState>,
) -> Result<Json<Vec<TicketAvailability>>, ApiError> {
    let levels = state.stock.list_stock().await?;

    let response = levels
        .into_iter()
        .map(|level| TicketAvailability {
            ticket_type: level.ticket_type,
            available: level.remaining(),
            reserved: level.reserved,
            total: level.total,
            sold: level.sold,
            sold_out: level.sold_out(),
        })
        .collect();

    Ok(Json(response))
}

/// POST /v1/purchases
/// Hold stock, create the payment with the processor, persist the order.
pub async fn create_purchase(
    State(state): State<AppState>,
    Json(req): Json<PurchaseRequest>,
) -> Result<(StatusCode, Json<PurchaseResponse>), ApiError> {
    if req.quantity < 1 {
        return Err(ApiError::ValidationError(
            "quantity must be at least 1".to_string(),
        ));
    }
    if !is_valid_email(&req.customer_email) {
        return Err(ApiError::ValidationError(
            "customer_email is not a valid email address".to_string(),
        ));
    }
    if req.customer_name.trim().is_empty() {
        return Err(ApiError::ValidationError(
            "customer_name must not be empty".to_string(),
        ));
    }

    // Prices are configured server-side; nothing about money is read from
    // the request.
    let rule = state.rules.rule_for(req.ticket_type);
    let mut order = Order::new(
        req.customer_name.trim().to_string(),
        req.customer_email.trim().to_string(),
        req.ticket_type,
        req.quantity,
        rule.price,
        state.rules.currency.clone(),
    );

    match state
        .reservations
        .reserve(
            order.order_id,
            req.ticket_type,
            req.quantity,
            &order.customer_email,
        )
        .await
    {
        Ok(_) => {}
        Err(ManagerError::Stock(StockError::Insufficient {
            ticket_type,
            requested,
            available,
        })) => {
            return Err(ApiError::ConflictError(format!(
                "insufficient stock for {ticket_type}: requested {requested}, available {available}"
            )));
        }
        Err(e) => return Err(e.into()),
    }

    let intent = match state
        .gateway
        .create_payment(
            order.order_id,
            order.total_amount,
            &order.currency,
            &state.pay_currency,
        )
        .await
    {
        Ok(intent) => intent,
        Err(e) => {
            tracing::error!(order_id = %order.order_id, error = %e, "payment creation failed");
            abort_hold(&state, order.order_id).await;
            return Err(e.into());
        }
    };

    order.payment_id = Some(intent.payment_id.clone());
    order.pay_address = Some(intent.pay_address.clone());
    order.pay_amount = Some(intent.pay_amount);
    order.pay_currency = Some(intent.pay_currency.clone());

    if let Err(e) = state.orders.create(&order).await {
        tracing::error!(order_id = %order.order_id, error = %e, "order write failed");
        abort_hold(&state, order.order_id).await;
        return Err(e.into());
    }

    state
        .reservations
        .attach_payment(order.order_id, &intent.payment_id)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(PurchaseResponse {
            order_id: order.order_id,
            payment_id: intent.payment_id,
            pay_address: intent.pay_address,
            pay_amount: intent.pay_amount,
            pay_currency: intent.pay_currency,
        }),
    ))
}

async fn abort_hold(state: &AppState, order_id: Uuid) {
    if let Err(e) = state.reservations.abort(order_id).await {
        tracing::warn!(%order_id, error = %e, "failed to abort hold after purchase failure");
    }
}

/// POST /v1/purchases/cancel
/// Customer cancellation, legal only while the payment is still waiting.
pub async fn cancel_purchase(
    State(state): State<AppState>,
    Json(req): Json<CancelRequest>,
) -> Result<StatusCode, ApiError> {
    match state.engine.cancel_purchase(&req.payment_id).await {
        Ok(_) => Ok(StatusCode::NO_CONTENT),
        Err(CancelError::NotFound(id)) => {
            Err(ApiError::NotFoundError(format!("payment not found: {id}")))
        }
        Err(CancelError::NotCancellable(status)) => Err(ApiError::ConflictError(format!(
            "order cannot be cancelled from status {status}"
        ))),
        Err(e) => Err(e.into()),
    }
}

/// GET /v1/payments/{payment_id}/remaining
/// How long the hold behind a pending payment is still good for.
pub async fn reservation_remaining(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
) -> Result<Json<RemainingResponse>, ApiError> {
    let reservation = state
        .reservations
        .get_by_payment(&payment_id)
        .await?
        .ok_or_else(|| ApiError::NotFoundError(format!("payment not found: {payment_id}")))?;

    let now = Utc::now();
    let valid = reservation.is_active() && !reservation.is_expired_at(now);
    let expired = reservation.status == ReservationStatus::Expired
        || (reservation.is_active() && reservation.is_expired_at(now));

    Ok(Json(RemainingResponse {
        valid,
        time_remaining: if valid { reservation.time_remaining(now) } else { 0 },
        expired,
    }))
}

/// Just enough validation to catch obviously broken addresses; the real
/// test of an address is whether mail to it delivers.
fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.contains(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("ada@example.com"));
        assert!(is_valid_email("a.b+c@mail.example.co"));
        assert!(!is_valid_email("ada"));
        assert!(!is_valid_email("ada@"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("ada@example"));
        assert!(!is_valid_email("ada@.com"));
        assert!(!is_valid_email("ada @example.com"));
        assert!(!is_valid_email(""));
    }
}
