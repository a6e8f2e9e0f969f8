use boxoffice_core::{
    Reservation, ReservationError, ReservationRepository, ReservationStatus, StockError,
    StockLedger, TicketType,
};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error(transparent)]
    Stock(#[from] StockError),

    #[error(transparent)]
    Reservation(#[from] ReservationError),
}

/// Creates and retires time-boxed holds against the stock ledger.
///
/// Confirm and cancel are replay-tolerant: applying either to a
/// reservation that already left `Active` changes nothing and reports
/// `None`, so the reconciliation engine can process duplicate webhooks and
/// overlapping polls without double-moving stock.
pub struct ReservationManager {
    ledger: Arc<dyn StockLedger>,
    reservations: Arc<dyn ReservationRepository>,
    ttl: Duration,
}

impl ReservationManager {
    pub fn new(
        ledger: Arc<dyn StockLedger>,
        reservations: Arc<dyn ReservationRepository>,
        ttl: Duration,
    ) -> Self {
        Self {
            ledger,
            reservations,
            ttl,
        }
    }

    /// Reserve `quantity` units. The ledger performs the atomic capacity
    /// check; on success a hold with `expires_at = now + TTL` is recorded.
    /// If recording the hold fails the units are released again so the
    /// ledger never leaks reserved stock.
    pub async fn reserve(
        &self,
        order_id: Uuid,
        ticket_type: TicketType,
        quantity: u32,
        customer_email: &str,
    ) -> Result<Reservation, ManagerError> {
        self.ledger.try_reserve(ticket_type, quantity).await?;

        let reservation = Reservation::new(
            order_id,
            ticket_type,
            quantity,
            customer_email.to_string(),
            self.ttl,
        );

        if let Err(e) = self.reservations.create(&reservation).await {
            if let Err(release_err) = self.ledger.release(ticket_type, quantity).await {
                warn!(
                    %order_id,
                    error = %release_err,
                    "failed to release stock after reservation write failure"
                );
            }
            return Err(e.into());
        }

        Ok(reservation)
    }

    /// Record the gateway-assigned payment id on an existing hold.
    pub async fn attach_payment(
        &self,
        order_id: Uuid,
        payment_id: &str,
    ) -> Result<(), ReservationError> {
        self.reservations.attach_payment(order_id, payment_id).await
    }

    pub async fn get_by_payment(
        &self,
        payment_id: &str,
    ) -> Result<Option<Reservation>, ReservationError> {
        self.reservations.get_by_payment(payment_id).await
    }

    pub async fn get_by_order(
        &self,
        order_id: Uuid,
    ) -> Result<Option<Reservation>, ReservationError> {
        self.reservations.get_by_order(order_id).await
    }

    /// Transition the hold to `Confirmed`. Returns the reservation only
    /// when this call performed the transition; replays get `None`.
    pub async fn confirm(
        &self,
        payment_id: &str,
    ) -> Result<Option<Reservation>, ReservationError> {
        let reservation = self.reservations.get_by_payment(payment_id).await?;
        let changed = self
            .reservations
            .transition(payment_id, ReservationStatus::Confirmed)
            .await?;
        Ok(if changed { reservation } else { None })
    }

    /// Transition the hold to `Cancelled` and release its stock. Returns
    /// the reservation only when this call performed the transition.
    pub async fn cancel(&self, payment_id: &str) -> Result<Option<Reservation>, ManagerError> {
        let reservation = self.reservations.get_by_payment(payment_id).await?;
        let changed = self
            .reservations
            .transition(payment_id, ReservationStatus::Cancelled)
            .await?;

        if !changed {
            return Ok(None);
        }

        if let Some(r) = &reservation {
            self.ledger.release(r.ticket_type, r.quantity).await?;
        }
        Ok(reservation)
    }

    /// Abandon a hold that never reached the gateway (payment-intent
    /// creation failed). Cancels by order id and releases the stock.
    pub async fn abort(&self, order_id: Uuid) -> Result<(), ManagerError> {
        let reservation = self.reservations.get_by_order(order_id).await?;
        let changed = self
            .reservations
            .transition_by_order(order_id, ReservationStatus::Cancelled)
            .await?;

        if changed {
            if let Some(r) = &reservation {
                self.ledger.release(r.ticket_type, r.quantity).await?;
            }
        }
        Ok(())
    }

    /// Expire every active hold past its deadline and release its stock.
    /// Each row transitions conditionally, so a concurrent double-run
    /// cannot double-release.
    pub async fn sweep_expired(&self) -> Result<usize, ManagerError> {
        let expired = self.reservations.expire_due(Utc::now()).await?;
        let count = expired.len();

        for reservation in expired {
            if let Err(e) = self
                .ledger
                .release(reservation.ticket_type, reservation.quantity)
                .await
            {
                warn!(
                    order_id = %reservation.order_id,
                    error = %e,
                    "failed to release stock for expired reservation"
                );
            }
        }

        if count > 0 {
            info!(count, "expired reservations swept");
        }
        Ok(count)
    }
}
