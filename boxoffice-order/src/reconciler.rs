use crate::fulfillment::TicketService;
use crate::manager::ReservationManager;
use boxoffice_core::{
    resolve_status, NotificationDispatcher, NotifyError, Order, OrderError, OrderRepository,
    PaymentGateway, PaymentStatus, StockLedger,
};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("order not found for payment {0}")]
    NotFound(String),

    #[error(transparent)]
    Order(#[from] OrderError),
}

#[derive(Debug, thiserror::Error)]
pub enum CancelError {
    #[error("order not found for payment {0}")]
    NotFound(String),

    #[error("order cannot be cancelled from status {0}")]
    NotCancellable(PaymentStatus),

    #[error(transparent)]
    Order(#[from] OrderError),
}

#[derive(Debug, thiserror::Error)]
pub enum ResendError {
    #[error("order not found: {0}")]
    NotFound(Uuid),

    #[error("tickets can only be re-sent for finished orders (status {0})")]
    NotFinished(PaymentStatus),

    #[error("resend cooldown active, retry in {retry_after_secs}s")]
    CooldownActive { retry_after_secs: i64 },

    #[error(transparent)]
    Delivery(#[from] NotifyError),

    #[error(transparent)]
    Order(#[from] OrderError),
}

/// Applies payment-status observations to order records and drives the
/// downstream effects (stock confirmation or release, ticket issuance,
/// email dispatch) exactly once per paid order.
///
/// Observations arrive from three sources with no ordering guarantee:
/// webhook deliveries, client polls, and administrative resyncs. Every
/// effect is therefore guarded by a conditional storage write (reservation
/// transition, one-shot order flag), never by caller serialization.
pub struct ReconciliationEngine {
    orders: Arc<dyn OrderRepository>,
    reservations: Arc<ReservationManager>,
    ledger: Arc<dyn StockLedger>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn NotificationDispatcher>,
    tickets: TicketService,
    resend_cooldown: Duration,
}

impl ReconciliationEngine {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        reservations: Arc<ReservationManager>,
        ledger: Arc<dyn StockLedger>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn NotificationDispatcher>,
        resend_cooldown: Duration,
    ) -> Self {
        Self {
            orders,
            reservations,
            ledger,
            gateway,
            notifier,
            tickets: TicketService::new(),
            resend_cooldown,
        }
    }

    async fn load(&self, payment_id: &str) -> Result<Order, ReconcileError> {
        self.orders
            .get_by_payment(payment_id)
            .await?
            .ok_or_else(|| ReconcileError::NotFound(payment_id.to_string()))
    }

    /// Apply one observed status to the order identified by `payment_id`.
    ///
    /// Same-status observations return the current record unchanged, and a
    /// stored terminal status wins over any later signal; both are the
    /// normal outcome of duplicate webhooks racing polls, so neither is an
    /// error. Effects run before the status write: if the process dies
    /// mid-way, the next observation replays into the same conditional
    /// guards and completes what is missing.
    pub async fn apply_observation(
        &self,
        payment_id: &str,
        candidate: PaymentStatus,
    ) -> Result<Order, ReconcileError> {
        let order = self.load(payment_id).await?;

        if order.payment_status == candidate {
            return Ok(order);
        }

        if order.payment_status.is_terminal() {
            warn!(
                payment_id,
                stored = %order.payment_status,
                observed = %candidate,
                "ignoring status observation against a terminal order"
            );
            return Ok(order);
        }

        match candidate {
            PaymentStatus::Finished => {
                self.run_finished_effects(&order, payment_id).await?;
            }
            PaymentStatus::PartiallyPaid | PaymentStatus::Confirmed => {
                self.send_confirmation_once(&order, payment_id).await?;
            }
            PaymentStatus::Failed | PaymentStatus::Cancelled | PaymentStatus::Expired => {
                if let Err(e) = self.reservations.cancel(payment_id).await {
                    warn!(payment_id, error = %e, "failed to release hold for a dead payment");
                }
            }
            PaymentStatus::Waiting | PaymentStatus::Confirming | PaymentStatus::Sending => {
                // Intermediate movement: persist only, no effects.
            }
        }

        if !self.orders.update_status(payment_id, candidate).await? {
            // Lost a race against another observation that reached a
            // terminal status first; the stored record wins.
            warn!(payment_id, observed = %candidate, "status write refused by terminal guard");
        }

        self.load(payment_id).await
    }

    /// Poll both gateway status sources and reconcile if they report
    /// something new. When neither source can answer, the stored status is
    /// the answer; upstream failure never surfaces to the caller.
    pub async fn poll(&self, payment_id: &str) -> Result<Order, ReconcileError> {
        let stored = self.load(payment_id).await?;

        let list = self.gateway.status_from_recent_list(payment_id).await;
        let individual = if list.is_none() {
            self.gateway.status_by_id(payment_id).await
        } else {
            None
        };

        match resolve_status(list, individual) {
            Some(candidate) if candidate != stored.payment_status => {
                self.apply_observation(payment_id, candidate).await
            }
            _ => Ok(stored),
        }
    }

    /// Administrative resync. Without `force` this is an ordinary poll;
    /// with it the order is driven to `finished` regardless of stored
    /// state, the escape hatch for orders stuck behind a wrong terminal
    /// status. Effects stay flag-guarded, so forcing an already-finished
    /// order re-attempts only what is still missing.
    pub async fn resync(&self, payment_id: &str, force: bool) -> Result<Order, ReconcileError> {
        if !force {
            return self.poll(payment_id).await;
        }

        let order = self.load(payment_id).await?;
        info!(
            payment_id,
            from = %order.payment_status,
            "administrative resync forcing finished"
        );

        self.run_finished_effects(&order, payment_id).await?;
        self.orders
            .force_status(payment_id, PaymentStatus::Finished)
            .await?;
        self.load(payment_id).await
    }

    /// Customer-initiated cancellation, legal only while the payment is
    /// still `waiting`.
    pub async fn cancel_purchase(&self, payment_id: &str) -> Result<Order, CancelError> {
        let order = self
            .orders
            .get_by_payment(payment_id)
            .await?
            .ok_or_else(|| CancelError::NotFound(payment_id.to_string()))?;

        if order.payment_status != PaymentStatus::Waiting {
            return Err(CancelError::NotCancellable(order.payment_status));
        }

        if let Err(e) = self.reservations.cancel(payment_id).await {
            warn!(payment_id, error = %e, "failed to release hold during cancellation");
        }
        self.orders
            .update_status(payment_id, PaymentStatus::Cancelled)
            .await?;

        self.orders
            .get_by_payment(payment_id)
            .await?
            .ok_or_else(|| CancelError::NotFound(payment_id.to_string()))
    }

    /// Manual ticket re-send, throttled by the cooldown stamp and
    /// independent of the automatic first-send flag.
    pub async fn resend_ticket_email(&self, order_id: Uuid) -> Result<(), ResendError> {
        let order = self
            .orders
            .get(order_id)
            .await?
            .ok_or(ResendError::NotFound(order_id))?;

        if order.payment_status != PaymentStatus::Finished {
            return Err(ResendError::NotFinished(order.payment_status));
        }

        let now = Utc::now();
        if let Some(retry_after_secs) = order.resend_cooldown_remaining(self.resend_cooldown, now)
        {
            return Err(ResendError::CooldownActive { retry_after_secs });
        }

        self.notifier.send_ticket_email(&order).await?;
        self.orders.touch_last_email_sent(order_id, now).await?;
        Ok(())
    }

    /// The `finished` effect chain. Each leg guards itself:
    /// stock moves only on the hold's one-shot Active→Confirmed
    /// transition, the ticket artifact only on winning `ticket_generated`,
    /// the email only on winning `email_sent` (released again if delivery
    /// fails, so a forced resync can retry).
    async fn run_finished_effects(
        &self,
        order: &Order,
        payment_id: &str,
    ) -> Result<(), ReconcileError> {
        match self.reservations.confirm(payment_id).await {
            Ok(Some(reservation)) => {
                if let Err(e) = self
                    .ledger
                    .confirm_sale(reservation.ticket_type, reservation.quantity)
                    .await
                {
                    warn!(payment_id, error = %e, "stock confirmation skipped");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(payment_id, error = %e, "hold confirmation failed"),
        }

        if !order.ticket_generated {
            let artifact = self.tickets.generate(order);
            self.orders
                .store_ticket(payment_id, &artifact.ticket_code, &artifact.qr_payload)
                .await?;
        }

        if self.orders.claim_email_send(payment_id).await? {
            // Re-read so the email carries the stored ticket artifact.
            let fresh = self.load(payment_id).await?;
            match self.notifier.send_ticket_email(&fresh).await {
                Ok(()) => {
                    self.orders
                        .touch_last_email_sent(fresh.order_id, Utc::now())
                        .await?;
                }
                Err(e) => {
                    warn!(payment_id, error = %e, "ticket email failed, claim released");
                    self.orders.release_email_claim(payment_id).await?;
                }
            }
        }

        Ok(())
    }

    async fn send_confirmation_once(
        &self,
        order: &Order,
        payment_id: &str,
    ) -> Result<(), ReconcileError> {
        if self.orders.claim_confirmation_email_send(payment_id).await? {
            if let Err(e) = self.notifier.send_confirmation_email(order).await {
                warn!(payment_id, error = %e, "confirmation email failed, claim released");
                self.orders
                    .release_confirmation_email_claim(payment_id)
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxoffice_core::{ReservationRepository, StockError, TicketType};
    use boxoffice_gateway::MockGateway;
    use boxoffice_notify::RecordingDispatcher;
    use boxoffice_store::{MemoryOrderRepository, MemoryReservationRepository, MemoryStockLedger};

    struct Harness {
        engine: ReconciliationEngine,
        orders: Arc<MemoryOrderRepository>,
        ledger: Arc<MemoryStockLedger>,
        gateway: Arc<MockGateway>,
        notifier: Arc<RecordingDispatcher>,
        manager: Arc<ReservationManager>,
    }

    async fn harness() -> Harness {
        let ledger = Arc::new(MemoryStockLedger::new());
        ledger.seed(TicketType::TwoDay, 30).await.unwrap();
        ledger.seed(TicketType::ThreeDay, 20).await.unwrap();
        ledger.seed(TicketType::Vip, 10).await.unwrap();

        let reservations = Arc::new(MemoryReservationRepository::new());
        let orders = Arc::new(MemoryOrderRepository::new());
        let gateway = Arc::new(MockGateway::new());
        let notifier = Arc::new(RecordingDispatcher::new());

        let manager = Arc::new(ReservationManager::new(
            Arc::clone(&ledger) as Arc<dyn StockLedger>,
            Arc::clone(&reservations) as Arc<dyn ReservationRepository>,
            Duration::minutes(15),
        ));

        let engine = ReconciliationEngine::new(
            Arc::clone(&orders) as Arc<dyn OrderRepository>,
            Arc::clone(&manager),
            Arc::clone(&ledger) as Arc<dyn StockLedger>,
            Arc::clone(&gateway) as Arc<dyn PaymentGateway>,
            Arc::clone(&notifier) as Arc<dyn NotificationDispatcher>,
            Duration::hours(1),
        );

        Harness {
            engine,
            orders,
            ledger,
            gateway,
            notifier,
            manager,
        }
    }

    /// Run the purchase flow: hold stock, create the order, create the
    /// payment, link everything. Returns the payment id.
    async fn purchase(h: &Harness, ticket_type: TicketType, quantity: u32) -> String {
        let mut order = Order::new(
            "Ada Lovelace".to_string(),
            "ada@example.com".to_string(),
            ticket_type,
            quantity,
            120.0,
            "USD".to_string(),
        );

        h.manager
            .reserve(order.order_id, ticket_type, quantity, &order.customer_email)
            .await
            .unwrap();

        let intent = h
            .gateway
            .create_payment(order.order_id, order.total_amount, "USD", "btc")
            .await
            .unwrap();

        order.payment_id = Some(intent.payment_id.clone());
        order.pay_address = Some(intent.pay_address.clone());
        order.pay_amount = Some(intent.pay_amount);
        order.pay_currency = Some(intent.pay_currency.clone());
        h.orders.create(&order).await.unwrap();

        h.manager
            .attach_payment(order.order_id, &intent.payment_id)
            .await
            .unwrap();

        intent.payment_id
    }

    #[tokio::test]
    async fn test_finished_webhook_round_trip() {
        let h = harness().await;
        let payment_id = purchase(&h, TicketType::TwoDay, 2).await;

        let level = h.ledger.get_stock(TicketType::TwoDay).await.unwrap();
        assert_eq!(level.remaining(), 28);

        let order = h
            .engine
            .apply_observation(&payment_id, PaymentStatus::Finished)
            .await
            .unwrap();

        assert_eq!(order.payment_status, PaymentStatus::Finished);
        assert!(order.ticket_generated);
        assert!(order.email_sent);
        assert!(order.ticket_code.is_some());
        assert!(order.qr_payload.is_some());

        let level = h.ledger.get_stock(TicketType::TwoDay).await.unwrap();
        assert_eq!(level.sold, 2);
        assert_eq!(level.reserved, 0);
        assert_eq!(h.notifier.ticket_email_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_finished_webhook_changes_nothing() {
        let h = harness().await;
        let payment_id = purchase(&h, TicketType::TwoDay, 2).await;

        h.engine
            .apply_observation(&payment_id, PaymentStatus::Finished)
            .await
            .unwrap();
        // Identical delivery replayed.
        h.engine
            .apply_observation(&payment_id, PaymentStatus::Finished)
            .await
            .unwrap();

        let level = h.ledger.get_stock(TicketType::TwoDay).await.unwrap();
        assert_eq!(level.sold, 2, "stock must not move twice");
        assert_eq!(level.reserved, 0);
        assert_eq!(h.notifier.ticket_email_count(), 1, "one ticket email only");
    }

    #[tokio::test]
    async fn test_terminal_status_survives_late_signals() {
        let h = harness().await;
        let payment_id = purchase(&h, TicketType::Vip, 1).await;

        h.engine
            .apply_observation(&payment_id, PaymentStatus::Finished)
            .await
            .unwrap();

        for late in [
            PaymentStatus::Waiting,
            PaymentStatus::Confirming,
            PaymentStatus::Failed,
        ] {
            let order = h.engine.apply_observation(&payment_id, late).await.unwrap();
            assert_eq!(order.payment_status, PaymentStatus::Finished);
        }
    }

    #[tokio::test]
    async fn test_partial_payment_sends_confirmation_once() {
        let h = harness().await;
        let payment_id = purchase(&h, TicketType::Vip, 1).await;

        h.engine
            .apply_observation(&payment_id, PaymentStatus::PartiallyPaid)
            .await
            .unwrap();
        assert_eq!(h.notifier.confirmation_email_count(), 1);

        // Moving on to `confirmed` does not re-notify.
        h.engine
            .apply_observation(&payment_id, PaymentStatus::Confirmed)
            .await
            .unwrap();
        assert_eq!(h.notifier.confirmation_email_count(), 1);
    }

    #[tokio::test]
    async fn test_intermediate_statuses_have_no_effects() {
        let h = harness().await;
        let payment_id = purchase(&h, TicketType::Vip, 1).await;

        for status in [PaymentStatus::Confirming, PaymentStatus::Sending] {
            let order = h.engine.apply_observation(&payment_id, status).await.unwrap();
            assert_eq!(order.payment_status, status);
        }

        assert_eq!(h.notifier.sent().len(), 0);
        let level = h.ledger.get_stock(TicketType::Vip).await.unwrap();
        assert_eq!(level.sold, 0);
        assert_eq!(level.reserved, 1);
    }

    #[tokio::test]
    async fn test_failed_payment_releases_stock() {
        let h = harness().await;
        let payment_id = purchase(&h, TicketType::ThreeDay, 3).await;

        let order = h
            .engine
            .apply_observation(&payment_id, PaymentStatus::Failed)
            .await
            .unwrap();

        assert_eq!(order.payment_status, PaymentStatus::Failed);
        let level = h.ledger.get_stock(TicketType::ThreeDay).await.unwrap();
        assert_eq!(level.reserved, 0);
        assert_eq!(level.remaining(), 20);
        assert_eq!(h.notifier.sent().len(), 0);
    }

    #[tokio::test]
    async fn test_cancel_only_while_waiting() {
        let h = harness().await;
        let payment_id = purchase(&h, TicketType::Vip, 2).await;

        let order = h.engine.cancel_purchase(&payment_id).await.unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Cancelled);
        let level = h.ledger.get_stock(TicketType::Vip).await.unwrap();
        assert_eq!(level.remaining(), 10);

        // A finished order refuses cancellation and keeps its stock.
        let payment_id = purchase(&h, TicketType::Vip, 1).await;
        h.engine
            .apply_observation(&payment_id, PaymentStatus::Finished)
            .await
            .unwrap();
        let refused = h.engine.cancel_purchase(&payment_id).await;
        assert!(matches!(refused, Err(CancelError::NotCancellable(_))));
        let level = h.ledger.get_stock(TicketType::Vip).await.unwrap();
        assert_eq!(level.sold, 1);
    }

    #[tokio::test]
    async fn test_poll_prefers_list_and_falls_back() {
        let h = harness().await;
        let payment_id = purchase(&h, TicketType::Vip, 1).await;

        // The two sources disagree: the list wins.
        h.gateway.set_list_status(&payment_id, PaymentStatus::Finished);
        h.gateway
            .set_individual_status(&payment_id, PaymentStatus::Confirming);
        let order = h.engine.poll(&payment_id).await.unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Finished);
    }

    #[tokio::test]
    async fn test_poll_uses_individual_when_list_misses() {
        let h = harness().await;
        let payment_id = purchase(&h, TicketType::Vip, 1).await;

        h.gateway.drop_from_list(&payment_id);
        h.gateway
            .set_individual_status(&payment_id, PaymentStatus::Confirming);

        let order = h.engine.poll(&payment_id).await.unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Confirming);
    }

    #[tokio::test]
    async fn test_poll_falls_back_to_stored_when_gateway_dark() {
        let h = harness().await;
        let payment_id = purchase(&h, TicketType::Vip, 1).await;

        h.engine
            .apply_observation(&payment_id, PaymentStatus::Confirming)
            .await
            .unwrap();

        // Neither upstream source answers: the stored status is returned
        // untouched and nothing errors.
        h.gateway.drop_from_list(&payment_id);
        h.gateway.drop_from_individual(&payment_id);

        let order = h.engine.poll(&payment_id).await.unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Confirming);
    }

    #[tokio::test]
    async fn test_failed_email_leaves_flag_clear_for_forced_retry() {
        let h = harness().await;
        let payment_id = purchase(&h, TicketType::TwoDay, 1).await;

        h.notifier.set_failing(true);
        let order = h
            .engine
            .apply_observation(&payment_id, PaymentStatus::Finished)
            .await
            .unwrap();

        assert_eq!(order.payment_status, PaymentStatus::Finished);
        assert!(order.ticket_generated, "artifact generation is independent of delivery");
        assert!(!order.email_sent, "failed delivery must not burn the flag");
        assert_eq!(h.notifier.ticket_email_count(), 0);

        // Provider recovers; the administrative resync retries the send
        // without re-moving stock or re-generating the ticket.
        h.notifier.set_failing(false);
        let ticket_code = order.ticket_code.clone();
        let order = h.engine.resync(&payment_id, true).await.unwrap();

        assert!(order.email_sent);
        assert_eq!(order.ticket_code, ticket_code);
        assert_eq!(h.notifier.ticket_email_count(), 1);
        let level = h.ledger.get_stock(TicketType::TwoDay).await.unwrap();
        assert_eq!(level.sold, 1);
    }

    #[tokio::test]
    async fn test_forced_resync_overrides_wrong_terminal() {
        let h = harness().await;
        let payment_id = purchase(&h, TicketType::Vip, 1).await;

        // A premature failure signal killed the order...
        h.engine
            .apply_observation(&payment_id, PaymentStatus::Failed)
            .await
            .unwrap();

        // ...and the money arrived anyway. An ordinary observation cannot
        // revive it, the forced resync can.
        let stuck = h
            .engine
            .apply_observation(&payment_id, PaymentStatus::Finished)
            .await
            .unwrap();
        assert_eq!(stuck.payment_status, PaymentStatus::Failed);

        let revived = h.engine.resync(&payment_id, true).await.unwrap();
        assert_eq!(revived.payment_status, PaymentStatus::Finished);
        assert!(revived.ticket_generated);
        assert_eq!(h.notifier.ticket_email_count(), 1);
    }

    #[tokio::test]
    async fn test_resend_requires_finished_and_cooldown() {
        let h = harness().await;
        let payment_id = purchase(&h, TicketType::Vip, 1).await;
        let order = h.orders.get_by_payment(&payment_id).await.unwrap().unwrap();

        // Not paid yet.
        let early = h.engine.resend_ticket_email(order.order_id).await;
        assert!(matches!(early, Err(ResendError::NotFinished(_))));

        h.engine
            .apply_observation(&payment_id, PaymentStatus::Finished)
            .await
            .unwrap();
        assert_eq!(h.notifier.ticket_email_count(), 1);

        // The automatic send stamped the cooldown clock.
        let throttled = h.engine.resend_ticket_email(order.order_id).await;
        assert!(matches!(
            throttled,
            Err(ResendError::CooldownActive { retry_after_secs }) if retry_after_secs > 0
        ));
        assert_eq!(h.notifier.ticket_email_count(), 1);

        // Age the stamp past the cooldown: the resend goes through.
        h.orders
            .touch_last_email_sent(order.order_id, Utc::now() - Duration::hours(2))
            .await
            .unwrap();
        h.engine.resend_ticket_email(order.order_id).await.unwrap();
        assert_eq!(h.notifier.ticket_email_count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_payment_is_not_found() {
        let h = harness().await;
        let missing = h
            .engine
            .apply_observation("pay-missing", PaymentStatus::Finished)
            .await;
        assert!(matches!(missing, Err(ReconcileError::NotFound(_))));

        // And no state is created implicitly.
        assert!(h.orders.get_by_payment("pay-missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_confirm_sale_inconsistency_does_not_block_status() {
        let h = harness().await;
        let payment_id = purchase(&h, TicketType::Vip, 1).await;

        // Sabotage: the hold's stock was already released out-of-band.
        let reservation = h.manager.get_by_payment(&payment_id).await.unwrap().unwrap();
        h.ledger
            .release(reservation.ticket_type, reservation.quantity)
            .await
            .unwrap();
        let drained = h.ledger.confirm_sale(TicketType::Vip, 1).await;
        assert!(matches!(drained, Err(StockError::Inconsistent { .. })));

        // The finished observation still lands; the inconsistency is logged.
        let order = h
            .engine
            .apply_observation(&payment_id, PaymentStatus::Finished)
            .await
            .unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Finished);
        assert!(order.email_sent);
    }
}
