use async_trait::async_trait;
use boxoffice_core::{GatewayError, PaymentGateway, PaymentIntent, PaymentStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

/// Scripted gateway for development and tests.
///
/// Created payments start out `waiting` on both status sources; tests
/// script the two sources independently to exercise the precedence rule
/// and the unavailable-upstream fallbacks.
#[derive(Default)]
pub struct MockGateway {
    counter: AtomicU64,
    individual: Mutex<HashMap<String, PaymentStatus>>,
    list: Mutex<HashMap<String, PaymentStatus>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script what the single-resource endpoint reports for a payment.
    pub fn set_individual_status(&self, payment_id: &str, status: PaymentStatus) {
        self.individual
            .lock()
            .expect("mock gateway lock poisoned")
            .insert(payment_id.to_string(), status);
    }

    /// Script what the recent-payments list reports for a payment.
    pub fn set_list_status(&self, payment_id: &str, status: PaymentStatus) {
        self.list
            .lock()
            .expect("mock gateway lock poisoned")
            .insert(payment_id.to_string(), status);
    }

    /// Make a payment disappear from the recent-payments page.
    pub fn drop_from_list(&self, payment_id: &str) {
        self.list
            .lock()
            .expect("mock gateway lock poisoned")
            .remove(payment_id);
    }

    /// Make the single-resource endpoint stop answering for a payment.
    pub fn drop_from_individual(&self, payment_id: &str) {
        self.individual
            .lock()
            .expect("mock gateway lock poisoned")
            .remove(payment_id);
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_payment(
        &self,
        _order_id: Uuid,
        amount: f64,
        _currency: &str,
        pay_currency: &str,
    ) -> Result<PaymentIntent, GatewayError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let payment_id = format!("mock_pay_{n}");

        self.set_individual_status(&payment_id, PaymentStatus::Waiting);
        self.set_list_status(&payment_id, PaymentStatus::Waiting);

        Ok(PaymentIntent {
            payment_id,
            pay_address: format!("mock-address-{n}"),
            pay_amount: amount,
            pay_currency: pay_currency.to_string(),
            status: PaymentStatus::Waiting,
        })
    }

    async fn status_by_id(&self, payment_id: &str) -> Option<PaymentStatus> {
        self.individual
            .lock()
            .expect("mock gateway lock poisoned")
            .get(payment_id)
            .copied()
    }

    async fn status_from_recent_list(&self, payment_id: &str) -> Option<PaymentStatus> {
        self.list
            .lock()
            .expect("mock gateway lock poisoned")
            .get(payment_id)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_created_payments_start_waiting() {
        let gateway = MockGateway::new();
        let intent = gateway
            .create_payment(Uuid::new_v4(), 240.0, "USD", "btc")
            .await
            .unwrap();

        assert_eq!(intent.status, PaymentStatus::Waiting);
        assert_eq!(
            gateway.status_by_id(&intent.payment_id).await,
            Some(PaymentStatus::Waiting)
        );
        assert_eq!(
            gateway.status_from_recent_list(&intent.payment_id).await,
            Some(PaymentStatus::Waiting)
        );
    }

    #[tokio::test]
    async fn test_sources_are_scripted_independently() {
        let gateway = MockGateway::new();
        let intent = gateway
            .create_payment(Uuid::new_v4(), 240.0, "USD", "btc")
            .await
            .unwrap();

        gateway.set_list_status(&intent.payment_id, PaymentStatus::Finished);
        gateway.set_individual_status(&intent.payment_id, PaymentStatus::Confirming);

        assert_eq!(
            gateway.status_from_recent_list(&intent.payment_id).await,
            Some(PaymentStatus::Finished)
        );
        assert_eq!(
            gateway.status_by_id(&intent.payment_id).await,
            Some(PaymentStatus::Confirming)
        );

        gateway.drop_from_list(&intent.payment_id);
        assert_eq!(gateway.status_from_recent_list(&intent.payment_id).await, None);
    }
}
