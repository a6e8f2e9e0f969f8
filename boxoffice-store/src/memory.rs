//! In-memory implementations of the storage traits, used by tests and
//! local development. Conditional-write semantics match the Postgres
//! repositories: every check-and-mutate happens under one lock acquisition.

use async_trait::async_trait;
use boxoffice_core::{
    Order, OrderError, OrderRepository, PaymentIntent, PaymentStatus, Reservation,
    ReservationError, ReservationRepository, ReservationStatus, StockError, StockLedger,
    StockLevel, TicketType,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryStockLedger {
    inner: Mutex<HashMap<TicketType, StockLevel>>,
}

impl MemoryStockLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StockLedger for MemoryStockLedger {
    async fn seed(&self, ticket_type: TicketType, total: u32) -> Result<(), StockError> {
        let mut inner = self.inner.lock().expect("stock ledger lock poisoned");
        inner.entry(ticket_type).or_insert(StockLevel {
            ticket_type,
            total,
            sold: 0,
            reserved: 0,
        });
        Ok(())
    }

    async fn get_stock(&self, ticket_type: TicketType) -> Result<StockLevel, StockError> {
        let inner = self.inner.lock().expect("stock ledger lock poisoned");
        inner
            .get(&ticket_type)
            .copied()
            .ok_or_else(|| StockError::UnknownType(ticket_type.to_string()))
    }

    async fn list_stock(&self) -> Result<Vec<StockLevel>, StockError> {
        let inner = self.inner.lock().expect("stock ledger lock poisoned");
        let mut levels: Vec<StockLevel> = inner.values().copied().collect();
        levels.sort_by_key(|l| l.ticket_type.as_str());
        Ok(levels)
    }

    async fn try_reserve(&self, ticket_type: TicketType, quantity: u32) -> Result<(), StockError> {
        let mut inner = self.inner.lock().expect("stock ledger lock poisoned");
        let level = inner
            .get_mut(&ticket_type)
            .ok_or_else(|| StockError::UnknownType(ticket_type.to_string()))?;

        if level.remaining() < quantity {
            return Err(StockError::Insufficient {
                ticket_type,
                requested: quantity,
                available: level.remaining(),
            });
        }
        level.reserved += quantity;
        Ok(())
    }

    async fn confirm_sale(
        &self,
        ticket_type: TicketType,
        quantity: u32,
    ) -> Result<(), StockError> {
        let mut inner = self.inner.lock().expect("stock ledger lock poisoned");
        let level = inner
            .get_mut(&ticket_type)
            .ok_or_else(|| StockError::UnknownType(ticket_type.to_string()))?;

        if level.reserved < quantity {
            warn!(
                ticket_type = %ticket_type,
                quantity,
                reserved = level.reserved,
                "confirm_sale found fewer reserved units than expected"
            );
            return Err(StockError::Inconsistent {
                ticket_type,
                requested: quantity,
                reserved: level.reserved,
            });
        }
        level.reserved -= quantity;
        level.sold += quantity;
        Ok(())
    }

    async fn release(&self, ticket_type: TicketType, quantity: u32) -> Result<(), StockError> {
        let mut inner = self.inner.lock().expect("stock ledger lock poisoned");
        let level = inner
            .get_mut(&ticket_type)
            .ok_or_else(|| StockError::UnknownType(ticket_type.to_string()))?;
        level.reserved = level.reserved.saturating_sub(quantity);
        Ok(())
    }
}

#[derive(Default)]
struct ReservationState {
    by_order: HashMap<Uuid, Reservation>,
    by_payment: HashMap<String, Uuid>,
}

#[derive(Default)]
pub struct MemoryReservationRepository {
    inner: Mutex<ReservationState>,
}

impl MemoryReservationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReservationRepository for MemoryReservationRepository {
    async fn create(&self, reservation: &Reservation) -> Result<(), ReservationError> {
        let mut state = self.inner.lock().expect("reservation lock poisoned");
        if let Some(payment_id) = &reservation.payment_id {
            if state.by_payment.contains_key(payment_id) {
                return Err(ReservationError::DuplicatePayment(payment_id.clone()));
            }
            state
                .by_payment
                .insert(payment_id.clone(), reservation.order_id);
        }
        state
            .by_order
            .insert(reservation.order_id, reservation.clone());
        Ok(())
    }

    async fn get_by_order(&self, order_id: Uuid) -> Result<Option<Reservation>, ReservationError> {
        let state = self.inner.lock().expect("reservation lock poisoned");
        Ok(state.by_order.get(&order_id).cloned())
    }

    async fn get_by_payment(
        &self,
        payment_id: &str,
    ) -> Result<Option<Reservation>, ReservationError> {
        let state = self.inner.lock().expect("reservation lock poisoned");
        Ok(state
            .by_payment
            .get(payment_id)
            .and_then(|id| state.by_order.get(id))
            .cloned())
    }

    async fn attach_payment(
        &self,
        order_id: Uuid,
        payment_id: &str,
    ) -> Result<(), ReservationError> {
        let mut state = self.inner.lock().expect("reservation lock poisoned");
        if let Some(existing) = state.by_payment.get(payment_id) {
            if *existing != order_id {
                return Err(ReservationError::DuplicatePayment(payment_id.to_string()));
            }
        }
        let reservation = state
            .by_order
            .get_mut(&order_id)
            .ok_or_else(|| ReservationError::NotFound(order_id.to_string()))?;
        reservation.payment_id = Some(payment_id.to_string());
        reservation.updated_at = Utc::now();
        state.by_payment.insert(payment_id.to_string(), order_id);
        Ok(())
    }

    async fn transition(
        &self,
        payment_id: &str,
        to: ReservationStatus,
    ) -> Result<bool, ReservationError> {
        let mut state = self.inner.lock().expect("reservation lock poisoned");
        let Some(order_id) = state.by_payment.get(payment_id).copied() else {
            return Ok(false);
        };
        let Some(reservation) = state.by_order.get_mut(&order_id) else {
            return Ok(false);
        };
        if reservation.status != ReservationStatus::Active {
            return Ok(false);
        }
        reservation.status = to;
        reservation.updated_at = Utc::now();
        Ok(true)
    }

    async fn transition_by_order(
        &self,
        order_id: Uuid,
        to: ReservationStatus,
    ) -> Result<bool, ReservationError> {
        let mut state = self.inner.lock().expect("reservation lock poisoned");
        let Some(reservation) = state.by_order.get_mut(&order_id) else {
            return Ok(false);
        };
        if reservation.status != ReservationStatus::Active {
            return Ok(false);
        }
        reservation.status = to;
        reservation.updated_at = Utc::now();
        Ok(true)
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<Reservation>, ReservationError> {
        let mut state = self.inner.lock().expect("reservation lock poisoned");
        let mut expired = Vec::new();
        for reservation in state.by_order.values_mut() {
            if reservation.status == ReservationStatus::Active && reservation.expires_at < now {
                reservation.status = ReservationStatus::Expired;
                reservation.updated_at = now;
                expired.push(reservation.clone());
            }
        }
        Ok(expired)
    }
}

#[derive(Default)]
struct OrderState {
    by_id: HashMap<Uuid, Order>,
    by_payment: HashMap<String, Uuid>,
}

#[derive(Default)]
pub struct MemoryOrderRepository {
    inner: Mutex<OrderState>,
}

impl MemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_order<T>(
        &self,
        payment_id: &str,
        f: impl FnOnce(&mut Order) -> T,
    ) -> Result<Option<T>, OrderError> {
        let mut state = self.inner.lock().expect("order lock poisoned");
        let Some(order_id) = state.by_payment.get(payment_id).copied() else {
            return Ok(None);
        };
        Ok(state.by_id.get_mut(&order_id).map(f))
    }
}

#[async_trait]
impl OrderRepository for MemoryOrderRepository {
    async fn create(&self, order: &Order) -> Result<(), OrderError> {
        let mut state = self.inner.lock().expect("order lock poisoned");
        if let Some(payment_id) = &order.payment_id {
            if state.by_payment.contains_key(payment_id) {
                return Err(OrderError::DuplicatePayment(payment_id.clone()));
            }
            state.by_payment.insert(payment_id.clone(), order.order_id);
        }
        state.by_id.insert(order.order_id, order.clone());
        Ok(())
    }

    async fn get(&self, order_id: Uuid) -> Result<Option<Order>, OrderError> {
        let state = self.inner.lock().expect("order lock poisoned");
        Ok(state.by_id.get(&order_id).cloned())
    }

    async fn get_by_payment(&self, payment_id: &str) -> Result<Option<Order>, OrderError> {
        let state = self.inner.lock().expect("order lock poisoned");
        Ok(state
            .by_payment
            .get(payment_id)
            .and_then(|id| state.by_id.get(id))
            .cloned())
    }

    async fn attach_payment(
        &self,
        order_id: Uuid,
        intent: &PaymentIntent,
    ) -> Result<(), OrderError> {
        let mut state = self.inner.lock().expect("order lock poisoned");
        if let Some(existing) = state.by_payment.get(&intent.payment_id) {
            if *existing != order_id {
                return Err(OrderError::DuplicatePayment(intent.payment_id.clone()));
            }
        }
        let order = state
            .by_id
            .get_mut(&order_id)
            .ok_or_else(|| OrderError::NotFound(order_id.to_string()))?;
        order.payment_id = Some(intent.payment_id.clone());
        order.pay_address = Some(intent.pay_address.clone());
        order.pay_amount = Some(intent.pay_amount);
        order.pay_currency = Some(intent.pay_currency.clone());
        order.updated_at = Utc::now();
        state.by_payment.insert(intent.payment_id.clone(), order_id);
        Ok(())
    }

    async fn update_status(
        &self,
        payment_id: &str,
        status: PaymentStatus,
    ) -> Result<bool, OrderError> {
        let changed = self.with_order(payment_id, |order| {
            if order.payment_status.is_terminal() {
                return false;
            }
            order.payment_status = status;
            order.updated_at = Utc::now();
            true
        })?;
        Ok(changed.unwrap_or(false))
    }

    async fn force_status(
        &self,
        payment_id: &str,
        status: PaymentStatus,
    ) -> Result<bool, OrderError> {
        let changed = self.with_order(payment_id, |order| {
            order.payment_status = status;
            order.updated_at = Utc::now();
            true
        })?;
        Ok(changed.unwrap_or(false))
    }

    async fn store_ticket(
        &self,
        payment_id: &str,
        ticket_code: &str,
        qr_payload: &str,
    ) -> Result<bool, OrderError> {
        let claimed = self.with_order(payment_id, |order| {
            if order.ticket_generated {
                return false;
            }
            order.ticket_generated = true;
            order.ticket_code = Some(ticket_code.to_string());
            order.qr_payload = Some(qr_payload.to_string());
            order.updated_at = Utc::now();
            true
        })?;
        Ok(claimed.unwrap_or(false))
    }

    async fn claim_email_send(&self, payment_id: &str) -> Result<bool, OrderError> {
        let claimed = self.with_order(payment_id, |order| {
            if order.email_sent {
                return false;
            }
            order.email_sent = true;
            order.updated_at = Utc::now();
            true
        })?;
        Ok(claimed.unwrap_or(false))
    }

    async fn release_email_claim(&self, payment_id: &str) -> Result<(), OrderError> {
        self.with_order(payment_id, |order| {
            order.email_sent = false;
            order.updated_at = Utc::now();
        })?;
        Ok(())
    }

    async fn claim_confirmation_email_send(&self, payment_id: &str) -> Result<bool, OrderError> {
        let claimed = self.with_order(payment_id, |order| {
            if order.confirmation_email_sent {
                return false;
            }
            order.confirmation_email_sent = true;
            order.updated_at = Utc::now();
            true
        })?;
        Ok(claimed.unwrap_or(false))
    }

    async fn release_confirmation_email_claim(&self, payment_id: &str) -> Result<(), OrderError> {
        self.with_order(payment_id, |order| {
            order.confirmation_email_sent = false;
            order.updated_at = Utc::now();
        })?;
        Ok(())
    }

    async fn touch_last_email_sent(
        &self,
        order_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        let mut state = self.inner.lock().expect("order lock poisoned");
        let order = state
            .by_id
            .get_mut(&order_id)
            .ok_or_else(|| OrderError::NotFound(order_id.to_string()))?;
        order.last_email_sent_at = Some(at);
        order.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_concurrent_reserves_never_oversell() {
        let ledger = Arc::new(MemoryStockLedger::new());
        ledger.seed(TicketType::ThreeDay, 5).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                ledger.try_reserve(TicketType::ThreeDay, 1).await.is_ok()
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }

        assert_eq!(successes, 5);
        let level = ledger.get_stock(TicketType::ThreeDay).await.unwrap();
        assert_eq!(level.reserved, 5);
        assert_eq!(level.remaining(), 0);
        assert!(level.sold + level.reserved <= level.total);
    }

    #[tokio::test]
    async fn test_last_unit_race_has_one_winner() {
        let ledger = Arc::new(MemoryStockLedger::new());
        ledger.seed(TicketType::Vip, 1).await.unwrap();

        let a = {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move { ledger.try_reserve(TicketType::Vip, 1).await.is_ok() })
        };
        let b = {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move { ledger.try_reserve(TicketType::Vip, 1).await.is_ok() })
        };

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert!(a ^ b, "exactly one of the two racing reserves must win");
    }

    #[tokio::test]
    async fn test_confirm_sale_moves_reserved_to_sold() {
        let ledger = MemoryStockLedger::new();
        ledger.seed(TicketType::TwoDay, 30).await.unwrap();
        ledger.try_reserve(TicketType::TwoDay, 2).await.unwrap();
        ledger.confirm_sale(TicketType::TwoDay, 2).await.unwrap();

        let level = ledger.get_stock(TicketType::TwoDay).await.unwrap();
        assert_eq!(level.sold, 2);
        assert_eq!(level.reserved, 0);
        assert_eq!(level.remaining(), 28);

        // A second confirm for the same units reports the inconsistency.
        let second = ledger.confirm_sale(TicketType::TwoDay, 2).await;
        assert!(matches!(second, Err(StockError::Inconsistent { .. })));
        let level = ledger.get_stock(TicketType::TwoDay).await.unwrap();
        assert_eq!(level.sold, 2);
    }

    #[tokio::test]
    async fn test_release_floors_at_zero() {
        let ledger = MemoryStockLedger::new();
        ledger.seed(TicketType::Vip, 10).await.unwrap();
        ledger.try_reserve(TicketType::Vip, 1).await.unwrap();
        ledger.release(TicketType::Vip, 5).await.unwrap();

        let level = ledger.get_stock(TicketType::Vip).await.unwrap();
        assert_eq!(level.reserved, 0);
        assert_eq!(level.remaining(), 10);
    }

    #[tokio::test]
    async fn test_reservation_transition_is_single_shot() {
        let repo = MemoryReservationRepository::new();
        let mut reservation = Reservation::new(
            Uuid::new_v4(),
            TicketType::Vip,
            1,
            "guest@example.com".to_string(),
            Duration::minutes(15),
        );
        reservation.payment_id = Some("pay-1".to_string());
        repo.create(&reservation).await.unwrap();

        assert!(repo
            .transition("pay-1", ReservationStatus::Confirmed)
            .await
            .unwrap());
        // Replay: already out of Active, nothing changes.
        assert!(!repo
            .transition("pay-1", ReservationStatus::Confirmed)
            .await
            .unwrap());
        assert!(!repo
            .transition("pay-1", ReservationStatus::Cancelled)
            .await
            .unwrap());
        // Unknown payment ids are a quiet no-op, matching the SQL path.
        assert!(!repo
            .transition("pay-unknown", ReservationStatus::Cancelled)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_expire_due_is_idempotent() {
        let repo = MemoryReservationRepository::new();
        let mut due = Reservation::new(
            Uuid::new_v4(),
            TicketType::Vip,
            1,
            "a@example.com".to_string(),
            Duration::minutes(15),
        );
        due.payment_id = Some("pay-due".to_string());
        due.expires_at = Utc::now() - Duration::minutes(1);
        repo.create(&due).await.unwrap();

        let fresh = Reservation::new(
            Uuid::new_v4(),
            TicketType::Vip,
            1,
            "b@example.com".to_string(),
            Duration::minutes(15),
        );
        repo.create(&fresh).await.unwrap();

        let now = Utc::now();
        let first = repo.expire_due(now).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].order_id, due.order_id);

        let second = repo.expire_due(now).await.unwrap();
        assert!(second.is_empty(), "a double sweep must not re-expire rows");
    }

    #[tokio::test]
    async fn test_terminal_status_is_sticky() {
        let repo = MemoryOrderRepository::new();
        let mut order = Order::new(
            "Ada".to_string(),
            "ada@example.com".to_string(),
            TicketType::TwoDay,
            1,
            120.0,
            "USD".to_string(),
        );
        order.payment_id = Some("pay-9".to_string());
        repo.create(&order).await.unwrap();

        assert!(repo
            .update_status("pay-9", PaymentStatus::Finished)
            .await
            .unwrap());
        assert!(!repo
            .update_status("pay-9", PaymentStatus::Waiting)
            .await
            .unwrap());
        assert_eq!(
            repo.get_by_payment("pay-9").await.unwrap().unwrap().payment_status,
            PaymentStatus::Finished
        );

        // The administrative path is exempt from the guard.
        assert!(repo
            .force_status("pay-9", PaymentStatus::Finished)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_email_claim_has_one_winner_and_can_be_released() {
        let repo = MemoryOrderRepository::new();
        let mut order = Order::new(
            "Ada".to_string(),
            "ada@example.com".to_string(),
            TicketType::Vip,
            1,
            500.0,
            "USD".to_string(),
        );
        order.payment_id = Some("pay-3".to_string());
        repo.create(&order).await.unwrap();

        assert!(repo.claim_email_send("pay-3").await.unwrap());
        assert!(!repo.claim_email_send("pay-3").await.unwrap());

        // Failed delivery: the claim is put back for a later retry.
        repo.release_email_claim("pay-3").await.unwrap();
        assert!(repo.claim_email_send("pay-3").await.unwrap());
    }

    #[tokio::test]
    async fn test_store_ticket_claims_once() {
        let repo = MemoryOrderRepository::new();
        let mut order = Order::new(
            "Ada".to_string(),
            "ada@example.com".to_string(),
            TicketType::Vip,
            1,
            500.0,
            "USD".to_string(),
        );
        order.payment_id = Some("pay-4".to_string());
        repo.create(&order).await.unwrap();

        assert!(repo.store_ticket("pay-4", "BOX-1", "{}").await.unwrap());
        assert!(!repo.store_ticket("pay-4", "BOX-2", "{}").await.unwrap());

        let stored = repo.get_by_payment("pay-4").await.unwrap().unwrap();
        assert_eq!(stored.ticket_code.as_deref(), Some("BOX-1"));
    }
}
