use async_trait::async_trait;
use boxoffice_core::{NotificationDispatcher, NotifyError, Order};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentEmail {
    Ticket { order_id: Uuid, to: String },
    Confirmation { order_id: Uuid, to: String },
}

/// Dispatcher that records instead of delivering. Tests assert on the
/// recorded sends; the failure toggle simulates a provider outage.
#[derive(Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<SentEmail>>,
    fail_sends: AtomicBool,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_sends.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().expect("recording lock poisoned").clone()
    }

    pub fn ticket_email_count(&self) -> usize {
        self.sent()
            .iter()
            .filter(|e| matches!(e, SentEmail::Ticket { .. }))
            .count()
    }

    pub fn confirmation_email_count(&self) -> usize {
        self.sent()
            .iter()
            .filter(|e| matches!(e, SentEmail::Confirmation { .. }))
            .count()
    }

    fn record(&self, email: SentEmail) -> Result<(), NotifyError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(NotifyError::Delivery("simulated provider outage".to_string()));
        }
        self.sent.lock().expect("recording lock poisoned").push(email);
        Ok(())
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn send_ticket_email(&self, order: &Order) -> Result<(), NotifyError> {
        self.record(SentEmail::Ticket {
            order_id: order.order_id,
            to: order.customer_email.clone(),
        })
    }

    async fn send_confirmation_email(&self, order: &Order) -> Result<(), NotifyError> {
        self.record(SentEmail::Confirmation {
            order_id: order.order_id,
            to: order.customer_email.clone(),
        })
    }
}
