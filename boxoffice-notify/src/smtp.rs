//! SMTP dispatcher over Lettre.

use async_trait::async_trait;
use boxoffice_core::{NotificationDispatcher, NotifyError, Order};
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

/// Sends transactional email via SMTP, suitable for production use.
#[derive(Clone)]
pub struct SmtpDispatcher {
    smtp_server: String,
    smtp_port: u16,
    credentials: Credentials,
    from_email: String,
    from_name: String,
}

impl SmtpDispatcher {
    pub fn new(
        smtp_server: String,
        smtp_port: u16,
        smtp_username: String,
        smtp_password: String,
        from_email: String,
        from_name: String,
    ) -> Self {
        Self {
            smtp_server,
            smtp_port,
            credentials: Credentials::new(smtp_username, smtp_password),
            from_email,
            from_name,
        }
    }

    /// A fresh transport per send avoids connection pooling issues with
    /// providers that drop idle connections.
    fn build_transport(&self) -> Result<SmtpTransport, NotifyError> {
        Ok(SmtpTransport::relay(&self.smtp_server)
            .map_err(|e| NotifyError::Delivery(format!("SMTP relay error: {e}")))?
            .port(self.smtp_port)
            .credentials(self.credentials.clone())
            .build())
    }

    fn from_header(&self) -> String {
        format!("{} <{}>", self.from_name, self.from_email)
    }

    async fn deliver(&self, to: &str, subject: &str, body: String) -> Result<(), NotifyError> {
        let email = Message::builder()
            .from(
                self.from_header()
                    .parse()
                    .map_err(|e| NotifyError::Delivery(format!("Invalid from address: {e}")))?,
            )
            .to(to
                .parse()
                .map_err(|e| NotifyError::Delivery(format!("Invalid to address: {e}")))?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(body)
            .map_err(|e| NotifyError::Delivery(format!("Failed to build email: {e}")))?;

        let mailer = self.build_transport()?;

        tokio::task::spawn_blocking(move || {
            mailer
                .send(&email)
                .map_err(|e| NotifyError::Delivery(format!("Failed to send email: {e}")))
        })
        .await
        .map_err(|e| NotifyError::Delivery(format!("Email task failed: {e}")))?
        .map(|_| ())
    }
}

#[async_trait]
impl NotificationDispatcher for SmtpDispatcher {
    async fn send_ticket_email(&self, order: &Order) -> Result<(), NotifyError> {
        let ticket_code = order.ticket_code.as_deref().unwrap_or("(pending)");
        let qr_payload = order.qr_payload.as_deref().unwrap_or_default();

        let body = format!(
            "<p>Hi {name},</p>\
             <p>Your payment is complete. Here is your {quantity}x {ticket_type} ticket.</p>\
             <p>Ticket code: <strong>{ticket_code}</strong></p>\
             <p>Present this QR payload at the entrance:</p>\
             <pre>{qr_payload}</pre>",
            name = order.customer_name,
            quantity = order.quantity,
            ticket_type = order.ticket_type,
        );

        self.deliver(&order.customer_email, "Your tickets are ready", body)
            .await
    }

    async fn send_confirmation_email(&self, order: &Order) -> Result<(), NotifyError> {
        let body = format!(
            "<p>Hi {name},</p>\
             <p>We have seen your payment for order {order_id} and it is being \
             confirmed on the network. Your tickets will follow once the payment \
             settles.</p>",
            name = order.customer_name,
            order_id = order.order_id,
        );

        self.deliver(&order.customer_email, "Payment received", body)
            .await
    }
}
