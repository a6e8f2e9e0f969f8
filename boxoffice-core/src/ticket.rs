use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The fixed set of ticket types sold for the event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TicketType {
    #[serde(rename = "2-day")]
    TwoDay,
    #[serde(rename = "3-day")]
    ThreeDay,
    #[serde(rename = "vip")]
    Vip,
}

impl TicketType {
    pub const ALL: [TicketType; 3] = [TicketType::TwoDay, TicketType::ThreeDay, TicketType::Vip];

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketType::TwoDay => "2-day",
            TicketType::ThreeDay => "3-day",
            TicketType::Vip => "vip",
        }
    }
}

impl fmt::Display for TicketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketType {
    type Err = crate::error::StockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "2-day" => Ok(TicketType::TwoDay),
            "3-day" => Ok(TicketType::ThreeDay),
            "vip" => Ok(TicketType::Vip),
            other => Err(crate::error::StockError::UnknownType(other.to_string())),
        }
    }
}

/// Point-in-time snapshot of one ticket type's counters.
///
/// Invariant: `sold + reserved <= total`; `remaining` is derived, never stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StockLevel {
    pub ticket_type: TicketType,
    pub total: u32,
    pub sold: u32,
    pub reserved: u32,
}

impl StockLevel {
    pub fn remaining(&self) -> u32 {
        self.total.saturating_sub(self.sold + self.reserved)
    }

    pub fn sold_out(&self) -> bool {
        self.remaining() == 0
    }
}
