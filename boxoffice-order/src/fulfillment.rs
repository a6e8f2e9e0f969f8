use boxoffice_core::Order;
use chrono::Utc;

/// The ticket artifact attached to a paid order: a human-readable code and
/// the QR payload scanned at the door.
#[derive(Debug, Clone)]
pub struct TicketArtifact {
    pub ticket_code: String,
    pub qr_payload: String,
}

/// Generates ticket artifacts. Generation is pure; persisting the artifact
/// (and winning the one-shot `ticket_generated` flag) is the order store's
/// job.
pub struct TicketService;

impl TicketService {
    pub fn new() -> Self {
        Self
    }

    pub fn generate(&self, order: &Order) -> TicketArtifact {
        let ticket_code = Self::generate_code(order);
        let qr_payload = serde_json::json!({
            "ticket_code": ticket_code,
            "order_id": order.order_id,
            "ticket_type": order.ticket_type,
            "quantity": order.quantity,
            "issued_at": Utc::now().to_rfc3339(),
        })
        .to_string();

        TicketArtifact {
            ticket_code,
            qr_payload,
        }
    }

    // Format: BOX-{timestamp}-{short order id}
    fn generate_code(order: &Order) -> String {
        let timestamp = Utc::now().timestamp();
        let hex = order.order_id.simple().to_string();
        format!("BOX-{}-{}", timestamp, hex[..8].to_uppercase())
    }
}

impl Default for TicketService {
    fn default() -> Self {
        Self::new()
    }
}
