use crate::ticket::TicketType;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Reservation status. Transitions are monotonic: `Active` may move to any
/// of the other three, and nothing moves out of a terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Active,
    Confirmed,
    Cancelled,
    Expired,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = crate::error::ReservationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ReservationStatus::Active),
            "confirmed" => Ok(ReservationStatus::Confirmed),
            "cancelled" => Ok(ReservationStatus::Cancelled),
            "expired" => Ok(ReservationStatus::Expired),
            other => Err(crate::error::ReservationError::UnknownStatus(
                other.to_string(),
            )),
        }
    }
}

/// A time-boxed hold against the stock ledger, keyed by order and (once the
/// gateway has assigned one) payment identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub order_id: Uuid,
    pub payment_id: Option<String>,
    pub ticket_type: TicketType,
    pub quantity: u32,
    pub customer_email: String,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn new(
        order_id: Uuid,
        ticket_type: TicketType,
        quantity: u32,
        customer_email: String,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            order_id,
            payment_id: None,
            ticket_type,
            quantity,
            customer_email,
            status: ReservationStatus::Active,
            created_at: now,
            expires_at: now + ttl,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Seconds until expiry, clamped at zero.
    pub fn time_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }
}
