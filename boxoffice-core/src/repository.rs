use crate::error::{OrderError, ReservationError, StockError};
use crate::gateway::PaymentIntent;
use crate::order::{Order, PaymentStatus};
use crate::reservation::{Reservation, ReservationStatus};
use crate::ticket::{StockLevel, TicketType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Per-ticket-type capacity accounting.
///
/// `try_reserve` is the oversell guard: implementations must perform the
/// capacity check and the reserved-count increment as one atomic
/// conditional operation at the storage layer. Two concurrent calls racing
/// for the last unit must resolve to exactly one success.
#[async_trait]
pub trait StockLedger: Send + Sync {
    /// Initialize a ticket type's capacity. Idempotent: an existing row is
    /// left untouched.
    async fn seed(&self, ticket_type: TicketType, total: u32) -> Result<(), StockError>;

    async fn get_stock(&self, ticket_type: TicketType) -> Result<StockLevel, StockError>;

    async fn list_stock(&self) -> Result<Vec<StockLevel>, StockError>;

    /// Atomically check `remaining >= quantity` and move `quantity` into
    /// `reserved`. Fails with [`StockError::Insufficient`] and no mutation
    /// otherwise.
    async fn try_reserve(&self, ticket_type: TicketType, quantity: u32) -> Result<(), StockError>;

    /// Move `quantity` from `reserved` to `sold`. Conditional on
    /// `reserved >= quantity`; otherwise [`StockError::Inconsistent`] and
    /// no mutation. The caller logs it: this signals drifted accounting,
    /// not a user error.
    async fn confirm_sale(&self, ticket_type: TicketType, quantity: u32)
        -> Result<(), StockError>;

    /// Return `quantity` units from `reserved` to the pool, floored at zero.
    async fn release(&self, ticket_type: TicketType, quantity: u32) -> Result<(), StockError>;
}

#[async_trait]
pub trait ReservationRepository: Send + Sync {
    async fn create(&self, reservation: &Reservation) -> Result<(), ReservationError>;

    async fn get_by_order(&self, order_id: Uuid) -> Result<Option<Reservation>, ReservationError>;

    async fn get_by_payment(
        &self,
        payment_id: &str,
    ) -> Result<Option<Reservation>, ReservationError>;

    /// Record the gateway-assigned payment id once known. At most one
    /// reservation may carry a given payment id.
    async fn attach_payment(&self, order_id: Uuid, payment_id: &str)
        -> Result<(), ReservationError>;

    /// Conditional `Active -> to` transition. Returns `true` only when this
    /// call changed the row; a reservation already out of `Active` is left
    /// untouched and reported as `false` (replay tolerance).
    async fn transition(
        &self,
        payment_id: &str,
        to: ReservationStatus,
    ) -> Result<bool, ReservationError>;

    /// Same conditional transition, keyed by order id. Used while no
    /// payment id exists yet (the purchase flow holds stock before the
    /// gateway assigns one).
    async fn transition_by_order(
        &self,
        order_id: Uuid,
        to: ReservationStatus,
    ) -> Result<bool, ReservationError>;

    /// Expire every active reservation with `expires_at < now`, each via a
    /// conditional per-row transition, and return the rows that changed so
    /// the caller can release their stock. Safe to run concurrently with
    /// itself: a row transitions exactly once.
    async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<Reservation>, ReservationError>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn create(&self, order: &Order) -> Result<(), OrderError>;

    async fn get(&self, order_id: Uuid) -> Result<Option<Order>, OrderError>;

    /// Lookup by the gateway's payment id (unique when present).
    async fn get_by_payment(&self, payment_id: &str) -> Result<Option<Order>, OrderError>;

    /// Record the gateway-assigned payment details on a fresh order.
    async fn attach_payment(&self, order_id: Uuid, intent: &PaymentIntent)
        -> Result<(), OrderError>;

    /// Guarded status write: the row is updated only while its stored
    /// status is non-terminal. Returns `true` when the row changed.
    async fn update_status(
        &self,
        payment_id: &str,
        status: PaymentStatus,
    ) -> Result<bool, OrderError>;

    /// Unguarded administrative status write (the resync escape hatch).
    async fn force_status(
        &self,
        payment_id: &str,
        status: PaymentStatus,
    ) -> Result<bool, OrderError>;

    /// Store the ticket artifact and set `ticket_generated`, conditional on
    /// the flag being unset. Exactly one caller wins; the rest get `false`.
    async fn store_ticket(
        &self,
        payment_id: &str,
        ticket_code: &str,
        qr_payload: &str,
    ) -> Result<bool, OrderError>;

    /// Claim the one-shot ticket-email flag (`email_sent false -> true`).
    /// Exactly one concurrent caller wins.
    async fn claim_email_send(&self, payment_id: &str) -> Result<bool, OrderError>;

    /// Compensate a failed send: put the flag back so a later poll or
    /// resync can retry.
    async fn release_email_claim(&self, payment_id: &str) -> Result<(), OrderError>;

    async fn claim_confirmation_email_send(&self, payment_id: &str) -> Result<bool, OrderError>;

    async fn release_confirmation_email_claim(&self, payment_id: &str)
        -> Result<(), OrderError>;

    /// Stamp the cooldown clock for manual resends.
    async fn touch_last_email_sent(
        &self,
        order_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), OrderError>;
}
