use async_trait::async_trait;
use boxoffice_core::{Reservation, ReservationError, ReservationRepository, ReservationStatus};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

pub struct PgReservationRepository {
    pool: PgPool,
}

impl PgReservationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ReservationRow {
    order_id: Uuid,
    payment_id: Option<String>,
    ticket_type: String,
    quantity: i32,
    customer_email: String,
    status: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = ReservationError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        Ok(Reservation {
            order_id: row.order_id,
            payment_id: row.payment_id,
            ticket_type: row
                .ticket_type
                .parse()
                .map_err(|e| ReservationError::Backend(Box::new(e)))?,
            quantity: row.quantity as u32,
            customer_email: row.customer_email,
            status: row.status.parse()?,
            created_at: row.created_at,
            expires_at: row.expires_at,
            updated_at: row.updated_at,
        })
    }
}

const RESERVATION_COLUMNS: &str = "order_id, payment_id, ticket_type, quantity, customer_email, \
                                   status, created_at, expires_at, updated_at";

#[async_trait]
impl ReservationRepository for PgReservationRepository {
    async fn create(&self, reservation: &Reservation) -> Result<(), ReservationError> {
        sqlx::query(
            r#"
            INSERT INTO reservations
                (order_id, payment_id, ticket_type, quantity, customer_email, status,
                 created_at, expires_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(reservation.order_id)
        .bind(&reservation.payment_id)
        .bind(reservation.ticket_type.as_str())
        .bind(reservation.quantity as i32)
        .bind(&reservation.customer_email)
        .bind(reservation.status.as_str())
        .bind(reservation.created_at)
        .bind(reservation.expires_at)
        .bind(reservation.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| ReservationError::Backend(Box::new(e)))?;

        Ok(())
    }

    async fn get_by_order(&self, order_id: Uuid) -> Result<Option<Reservation>, ReservationError> {
        let row: Option<ReservationRow> = sqlx::query_as(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE order_id = $1"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ReservationError::Backend(Box::new(e)))?;

        row.map(Reservation::try_from).transpose()
    }

    async fn get_by_payment(
        &self,
        payment_id: &str,
    ) -> Result<Option<Reservation>, ReservationError> {
        let row: Option<ReservationRow> = sqlx::query_as(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE payment_id = $1"
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ReservationError::Backend(Box::new(e)))?;

        row.map(Reservation::try_from).transpose()
    }

    async fn attach_payment(
        &self,
        order_id: Uuid,
        payment_id: &str,
    ) -> Result<(), ReservationError> {
        let result = sqlx::query(
            "UPDATE reservations SET payment_id = $2, updated_at = NOW() WHERE order_id = $1",
        )
        .bind(order_id)
        .bind(payment_id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 1 => Ok(()),
            Ok(_) => Err(ReservationError::NotFound(order_id.to_string())),
            Err(e) if e.as_database_error().is_some_and(|d| d.is_unique_violation()) => {
                Err(ReservationError::DuplicatePayment(payment_id.to_string()))
            }
            Err(e) => Err(ReservationError::Backend(Box::new(e))),
        }
    }

    async fn transition(
        &self,
        payment_id: &str,
        to: ReservationStatus,
    ) -> Result<bool, ReservationError> {
        let updated = sqlx::query(
            r#"
            UPDATE reservations
            SET status = $2, updated_at = NOW()
            WHERE payment_id = $1 AND status = 'active'
            "#,
        )
        .bind(payment_id)
        .bind(to.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| ReservationError::Backend(Box::new(e)))?
        .rows_affected();

        Ok(updated == 1)
    }

    async fn transition_by_order(
        &self,
        order_id: Uuid,
        to: ReservationStatus,
    ) -> Result<bool, ReservationError> {
        let updated = sqlx::query(
            r#"
            UPDATE reservations
            SET status = $2, updated_at = NOW()
            WHERE order_id = $1 AND status = 'active'
            "#,
        )
        .bind(order_id)
        .bind(to.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| ReservationError::Backend(Box::new(e)))?
        .rows_affected();

        Ok(updated == 1)
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<Reservation>, ReservationError> {
        let rows: Vec<ReservationRow> = sqlx::query_as(&format!(
            r#"
            UPDATE reservations
            SET status = 'expired', updated_at = NOW()
            WHERE status = 'active' AND expires_at < $1
            RETURNING {RESERVATION_COLUMNS}
            "#
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ReservationError::Backend(Box::new(e)))?;

        rows.into_iter().map(Reservation::try_from).collect()
    }
}
