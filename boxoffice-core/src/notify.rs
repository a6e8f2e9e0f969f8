use crate::error::NotifyError;
use crate::order::Order;
use async_trait::async_trait;

/// Transactional email seam consumed by the reconciliation engine.
///
/// Implementations deliver; they do not decide whether a send is due.
/// First-send flags and the manual-resend cooldown are enforced by the
/// caller against the order record.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// Deliver the ticket email (QR payload attached) for a paid order.
    async fn send_ticket_email(&self, order: &Order) -> Result<(), NotifyError>;

    /// Deliver the payment-received confirmation email.
    async fn send_confirmation_email(&self, order: &Order) -> Result<(), NotifyError>;
}
