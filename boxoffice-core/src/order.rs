use crate::ticket::TicketType;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Payment status in the processor's vocabulary.
///
/// Terminal statuses are final: a later webhook or poll carrying anything
/// else is a conflict, not a transition. Only an administrative resync may
/// move a terminal order, and only to `Finished`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Waiting,
    Confirming,
    Confirmed,
    Sending,
    PartiallyPaid,
    Finished,
    Failed,
    Expired,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Waiting => "waiting",
            PaymentStatus::Confirming => "confirming",
            PaymentStatus::Confirmed => "confirmed",
            PaymentStatus::Sending => "sending",
            PaymentStatus::PartiallyPaid => "partially_paid",
            PaymentStatus::Finished => "finished",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Expired => "expired",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Finished
                | PaymentStatus::Failed
                | PaymentStatus::Expired
                | PaymentStatus::Cancelled
        )
    }

    /// Whether a stored status may be replaced by `candidate`.
    ///
    /// Same status is a no-op, a terminal status absorbs everything; all
    /// other moves are allowed (the gateway's own sequencing of the
    /// intermediate statuses is not reliable enough to rank them).
    pub fn accepts(&self, candidate: PaymentStatus) -> bool {
        *self != candidate && !self.is_terminal()
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = crate::error::OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(PaymentStatus::Waiting),
            "confirming" => Ok(PaymentStatus::Confirming),
            "confirmed" => Ok(PaymentStatus::Confirmed),
            "sending" => Ok(PaymentStatus::Sending),
            "partially_paid" => Ok(PaymentStatus::PartiallyPaid),
            "finished" => Ok(PaymentStatus::Finished),
            "failed" => Ok(PaymentStatus::Failed),
            "expired" => Ok(PaymentStatus::Expired),
            "cancelled" => Ok(PaymentStatus::Cancelled),
            other => Err(crate::error::OrderError::UnknownStatus(other.to_string())),
        }
    }
}

/// The durable record of a purchase attempt. Never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: Uuid,
    pub customer_name: String,
    pub customer_email: String,
    pub ticket_type: TicketType,
    pub quantity: u32,
    pub unit_price: f64,
    pub total_amount: f64,
    pub currency: String,
    pub payment_id: Option<String>,
    pub payment_status: PaymentStatus,
    pub pay_address: Option<String>,
    pub pay_amount: Option<f64>,
    pub pay_currency: Option<String>,
    pub ticket_generated: bool,
    pub ticket_code: Option<String>,
    pub qr_payload: Option<String>,
    pub email_sent: bool,
    pub confirmation_email_sent: bool,
    pub last_email_sent_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        customer_name: String,
        customer_email: String,
        ticket_type: TicketType,
        quantity: u32,
        unit_price: f64,
        currency: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            order_id: Uuid::new_v4(),
            customer_name,
            customer_email,
            ticket_type,
            quantity,
            unit_price,
            total_amount: unit_price * quantity as f64,
            currency,
            payment_id: None,
            payment_status: PaymentStatus::Waiting,
            pay_address: None,
            pay_amount: None,
            pay_currency: None,
            ticket_generated: false,
            ticket_code: None,
            qr_payload: None,
            email_sent: false,
            confirmation_email_sent: false,
            last_email_sent_at: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Seconds left on the manual-resend cooldown, if one is running.
    pub fn resend_cooldown_remaining(&self, cooldown: Duration, now: DateTime<Utc>) -> Option<i64> {
        let last = self.last_email_sent_at?;
        let elapsed = now - last;
        if elapsed < cooldown {
            Some((cooldown - elapsed).num_seconds().max(1))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses_absorb() {
        for terminal in [
            PaymentStatus::Finished,
            PaymentStatus::Failed,
            PaymentStatus::Expired,
            PaymentStatus::Cancelled,
        ] {
            assert!(terminal.is_terminal());
            assert!(!terminal.accepts(PaymentStatus::Waiting));
            assert!(!terminal.accepts(PaymentStatus::Finished));
        }
    }

    #[test]
    fn test_same_status_is_noop() {
        assert!(!PaymentStatus::Waiting.accepts(PaymentStatus::Waiting));
        assert!(!PaymentStatus::Confirming.accepts(PaymentStatus::Confirming));
    }

    #[test]
    fn test_intermediate_statuses_move_freely() {
        assert!(PaymentStatus::Waiting.accepts(PaymentStatus::Finished));
        assert!(PaymentStatus::Confirming.accepts(PaymentStatus::Waiting));
        assert!(PaymentStatus::PartiallyPaid.accepts(PaymentStatus::Finished));
        assert!(PaymentStatus::Sending.accepts(PaymentStatus::Failed));
    }

    #[test]
    fn test_status_round_trip() {
        for s in [
            PaymentStatus::Waiting,
            PaymentStatus::Confirming,
            PaymentStatus::Confirmed,
            PaymentStatus::Sending,
            PaymentStatus::PartiallyPaid,
            PaymentStatus::Finished,
            PaymentStatus::Failed,
            PaymentStatus::Expired,
            PaymentStatus::Cancelled,
        ] {
            assert_eq!(s.as_str().parse::<PaymentStatus>().unwrap(), s);
        }
    }

    #[test]
    fn test_total_is_unit_times_quantity() {
        let order = Order::new(
            "Ada".to_string(),
            "ada@example.com".to_string(),
            TicketType::TwoDay,
            3,
            120.0,
            "USD".to_string(),
        );
        assert_eq!(order.total_amount, 360.0);
        assert_eq!(order.payment_status, PaymentStatus::Waiting);
        assert!(!order.ticket_generated);
    }

    #[test]
    fn test_resend_cooldown_arithmetic() {
        let mut order = Order::new(
            "Ada".to_string(),
            "ada@example.com".to_string(),
            TicketType::Vip,
            1,
            500.0,
            "USD".to_string(),
        );
        let now = Utc::now();
        let cooldown = Duration::hours(1);

        // Never sent: no cooldown.
        assert!(order.resend_cooldown_remaining(cooldown, now).is_none());

        // Sent 10 minutes ago: ~50 minutes remain.
        order.last_email_sent_at = Some(now - Duration::minutes(10));
        let remaining = order.resend_cooldown_remaining(cooldown, now).unwrap();
        assert!((2990..=3000).contains(&remaining), "got {remaining}");

        // Sent over an hour ago: cooldown elapsed.
        order.last_email_sent_at = Some(now - Duration::minutes(61));
        assert!(order.resend_cooldown_remaining(cooldown, now).is_none());
    }
}
