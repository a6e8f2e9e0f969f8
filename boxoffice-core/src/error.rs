use crate::ticket::TicketType;

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum StockError {
    #[error("insufficient stock for {ticket_type}: requested {requested}, available {available}")]
    Insufficient {
        ticket_type: TicketType,
        requested: u32,
        available: u32,
    },

    #[error(
        "ledger inconsistency for {ticket_type}: confirming {requested} but only {reserved} reserved"
    )]
    Inconsistent {
        ticket_type: TicketType,
        requested: u32,
        reserved: u32,
    },

    #[error("unknown ticket type: {0}")]
    UnknownType(String),

    #[error("storage backend error: {0}")]
    Backend(#[source] BoxedError),
}

#[derive(Debug, thiserror::Error)]
pub enum ReservationError {
    #[error("reservation not found: {0}")]
    NotFound(String),

    #[error("duplicate reservation for payment {0}")]
    DuplicatePayment(String),

    #[error("unknown reservation status: {0}")]
    UnknownStatus(String),

    #[error("storage backend error: {0}")]
    Backend(#[source] BoxedError),
}

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("order not found: {0}")]
    NotFound(String),

    #[error("duplicate order for payment {0}")]
    DuplicatePayment(String),

    #[error("unknown payment status: {0}")]
    UnknownStatus(String),

    #[error("storage backend error: {0}")]
    Backend(#[source] BoxedError),
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("payment gateway unavailable: {0}")]
    Unavailable(String),

    #[error("unexpected gateway response: {0}")]
    InvalidResponse(String),

    #[error("webhook signature missing or invalid")]
    Unauthorized,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("email delivery failed: {0}")]
    Delivery(String),
}
