use crate::error::GatewayError;
use crate::order::PaymentStatus;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A payment created with the processor: where to send funds, and how much.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub payment_id: String,
    pub pay_address: String,
    pub pay_amount: f64,
    pub pay_currency: String,
    pub status: PaymentStatus,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a payment with the processor for the given fiat amount.
    async fn create_payment(
        &self,
        order_id: Uuid,
        amount: f64,
        currency: &str,
        pay_currency: &str,
    ) -> Result<PaymentIntent, GatewayError>;

    /// Single-resource status endpoint. `None` when the gateway cannot
    /// answer (network failure, non-2xx, unknown id); callers fall back
    /// to the last stored status, never error out.
    async fn status_by_id(&self, payment_id: &str) -> Option<PaymentStatus>;

    /// Scan the paginated recent-payments endpoint for this id. `None`
    /// when the id is not on a recent page or the endpoint is unavailable.
    /// The list endpoint is observed to be fresher than the single-resource
    /// one, so callers prefer this result when both are present.
    async fn status_from_recent_list(&self, payment_id: &str) -> Option<PaymentStatus>;
}

/// Precedence rule for the two inconsistent upstream status sources:
/// the recent-payments list wins, the individual endpoint is the fallback.
pub fn resolve_status(
    list: Option<PaymentStatus>,
    individual: Option<PaymentStatus>,
) -> Option<PaymentStatus> {
    list.or(individual)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_wins_when_both_answer() {
        let resolved = resolve_status(
            Some(PaymentStatus::Finished),
            Some(PaymentStatus::Confirming),
        );
        assert_eq!(resolved, Some(PaymentStatus::Finished));

        // And in the opposite ordering of disagreement.
        let resolved = resolve_status(
            Some(PaymentStatus::Confirming),
            Some(PaymentStatus::Finished),
        );
        assert_eq!(resolved, Some(PaymentStatus::Confirming));
    }

    #[test]
    fn test_individual_is_fallback_only() {
        assert_eq!(
            resolve_status(None, Some(PaymentStatus::Waiting)),
            Some(PaymentStatus::Waiting)
        );
        assert_eq!(resolve_status(Some(PaymentStatus::Sending), None), Some(PaymentStatus::Sending));
        assert_eq!(resolve_status(None, None), None);
    }
}
