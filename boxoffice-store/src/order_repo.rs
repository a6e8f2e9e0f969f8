use async_trait::async_trait;
use boxoffice_core::{Order, OrderError, OrderRepository, PaymentIntent, PaymentStatus};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // `column` is always a fixed identifier supplied by the trait impl
    // below, never request input.
    async fn claim_flag(&self, payment_id: &str, column: &str) -> Result<bool, OrderError> {
        let updated = sqlx::query(&format!(
            "UPDATE orders SET {column} = TRUE, updated_at = NOW() \
             WHERE payment_id = $1 AND {column} = FALSE"
        ))
        .bind(payment_id)
        .execute(&self.pool)
        .await
        .map_err(|e| OrderError::Backend(Box::new(e)))?
        .rows_affected();

        Ok(updated == 1)
    }

    async fn release_flag(&self, payment_id: &str, column: &str) -> Result<(), OrderError> {
        sqlx::query(&format!(
            "UPDATE orders SET {column} = FALSE, updated_at = NOW() WHERE payment_id = $1"
        ))
        .bind(payment_id)
        .execute(&self.pool)
        .await
        .map_err(|e| OrderError::Backend(Box::new(e)))?;

        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    order_id: Uuid,
    customer_name: String,
    customer_email: String,
    ticket_type: String,
    quantity: i32,
    unit_price: f64,
    total_amount: f64,
    currency: String,
    payment_id: Option<String>,
    payment_status: String,
    pay_address: Option<String>,
    pay_amount: Option<f64>,
    pay_currency: Option<String>,
    ticket_generated: bool,
    ticket_code: Option<String>,
    qr_payload: Option<String>,
    email_sent: bool,
    confirmation_email_sent: bool,
    last_email_sent_at: Option<DateTime<Utc>>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = OrderError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            order_id: row.order_id,
            customer_name: row.customer_name,
            customer_email: row.customer_email,
            ticket_type: row
                .ticket_type
                .parse()
                .map_err(|e| OrderError::Backend(Box::new(e)))?,
            quantity: row.quantity as u32,
            unit_price: row.unit_price,
            total_amount: row.total_amount,
            currency: row.currency,
            payment_id: row.payment_id,
            payment_status: row.payment_status.parse()?,
            pay_address: row.pay_address,
            pay_amount: row.pay_amount,
            pay_currency: row.pay_currency,
            ticket_generated: row.ticket_generated,
            ticket_code: row.ticket_code,
            qr_payload: row.qr_payload,
            email_sent: row.email_sent,
            confirmation_email_sent: row.confirmation_email_sent,
            last_email_sent_at: row.last_email_sent_at,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const ORDER_COLUMNS: &str = "order_id, customer_name, customer_email, ticket_type, quantity, \
                             unit_price, total_amount, currency, payment_id, payment_status, \
                             pay_address, pay_amount, pay_currency, ticket_generated, ticket_code, \
                             qr_payload, email_sent, confirmation_email_sent, last_email_sent_at, \
                             notes, created_at, updated_at";

const TERMINAL_GUARD: &str = "payment_status NOT IN ('finished', 'failed', 'expired', 'cancelled')";

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn create(&self, order: &Order) -> Result<(), OrderError> {
        let result = sqlx::query(
            r#"
            INSERT INTO orders
                (order_id, customer_name, customer_email, ticket_type, quantity,
                 unit_price, total_amount, currency, payment_id, payment_status,
                 pay_address, pay_amount, pay_currency, ticket_generated, ticket_code,
                 qr_payload, email_sent, confirmation_email_sent, last_email_sent_at,
                 notes, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, $20, $21, $22)
            "#,
        )
        .bind(order.order_id)
        .bind(&order.customer_name)
        .bind(&order.customer_email)
        .bind(order.ticket_type.as_str())
        .bind(order.quantity as i32)
        .bind(order.unit_price)
        .bind(order.total_amount)
        .bind(&order.currency)
        .bind(&order.payment_id)
        .bind(order.payment_status.as_str())
        .bind(&order.pay_address)
        .bind(order.pay_amount)
        .bind(&order.pay_currency)
        .bind(order.ticket_generated)
        .bind(&order.ticket_code)
        .bind(&order.qr_payload)
        .bind(order.email_sent)
        .bind(order.confirmation_email_sent)
        .bind(order.last_email_sent_at)
        .bind(&order.notes)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.as_database_error().is_some_and(|d| d.is_unique_violation()) => Err(
                OrderError::DuplicatePayment(order.payment_id.clone().unwrap_or_default()),
            ),
            Err(e) => Err(OrderError::Backend(Box::new(e))),
        }
    }

    async fn get(&self, order_id: Uuid) -> Result<Option<Order>, OrderError> {
        let row: Option<OrderRow> =
            sqlx::query_as(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = $1"))
                .bind(order_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| OrderError::Backend(Box::new(e)))?;

        row.map(Order::try_from).transpose()
    }

    async fn get_by_payment(&self, payment_id: &str) -> Result<Option<Order>, OrderError> {
        let row: Option<OrderRow> =
            sqlx::query_as(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE payment_id = $1"))
                .bind(payment_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| OrderError::Backend(Box::new(e)))?;

        row.map(Order::try_from).transpose()
    }

    async fn attach_payment(
        &self,
        order_id: Uuid,
        intent: &PaymentIntent,
    ) -> Result<(), OrderError> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET payment_id = $2, pay_address = $3, pay_amount = $4, pay_currency = $5,
                updated_at = NOW()
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .bind(&intent.payment_id)
        .bind(&intent.pay_address)
        .bind(intent.pay_amount)
        .bind(&intent.pay_currency)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 1 => Ok(()),
            Ok(_) => Err(OrderError::NotFound(order_id.to_string())),
            Err(e) if e.as_database_error().is_some_and(|d| d.is_unique_violation()) => {
                Err(OrderError::DuplicatePayment(intent.payment_id.clone()))
            }
            Err(e) => Err(OrderError::Backend(Box::new(e))),
        }
    }

    async fn update_status(
        &self,
        payment_id: &str,
        status: PaymentStatus,
    ) -> Result<bool, OrderError> {
        let updated = sqlx::query(&format!(
            "UPDATE orders SET payment_status = $2, updated_at = NOW() \
             WHERE payment_id = $1 AND {TERMINAL_GUARD}"
        ))
        .bind(payment_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| OrderError::Backend(Box::new(e)))?
        .rows_affected();

        Ok(updated == 1)
    }

    async fn force_status(
        &self,
        payment_id: &str,
        status: PaymentStatus,
    ) -> Result<bool, OrderError> {
        let updated = sqlx::query(
            "UPDATE orders SET payment_status = $2, updated_at = NOW() WHERE payment_id = $1",
        )
        .bind(payment_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| OrderError::Backend(Box::new(e)))?
        .rows_affected();

        Ok(updated == 1)
    }

    async fn store_ticket(
        &self,
        payment_id: &str,
        ticket_code: &str,
        qr_payload: &str,
    ) -> Result<bool, OrderError> {
        let updated = sqlx::query(
            r#"
            UPDATE orders
            SET ticket_generated = TRUE, ticket_code = $2, qr_payload = $3, updated_at = NOW()
            WHERE payment_id = $1 AND ticket_generated = FALSE
            "#,
        )
        .bind(payment_id)
        .bind(ticket_code)
        .bind(qr_payload)
        .execute(&self.pool)
        .await
        .map_err(|e| OrderError::Backend(Box::new(e)))?
        .rows_affected();

        Ok(updated == 1)
    }

    async fn claim_email_send(&self, payment_id: &str) -> Result<bool, OrderError> {
        self.claim_flag(payment_id, "email_sent").await
    }

    async fn release_email_claim(&self, payment_id: &str) -> Result<(), OrderError> {
        self.release_flag(payment_id, "email_sent").await
    }

    async fn claim_confirmation_email_send(&self, payment_id: &str) -> Result<bool, OrderError> {
        self.claim_flag(payment_id, "confirmation_email_sent").await
    }

    async fn release_confirmation_email_claim(&self, payment_id: &str) -> Result<(), OrderError> {
        self.release_flag(payment_id, "confirmation_email_sent").await
    }

    async fn touch_last_email_sent(
        &self,
        order_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        sqlx::query("UPDATE orders SET last_email_sent_at = $2, updated_at = NOW() WHERE order_id = $1")
            .bind(order_id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(|e| OrderError::Backend(Box::new(e)))?;

        Ok(())
    }
}
