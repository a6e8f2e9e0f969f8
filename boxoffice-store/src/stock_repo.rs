use async_trait::async_trait;
use boxoffice_core::{StockError, StockLedger, StockLevel, TicketType};
use sqlx::PgPool;
use tracing::warn;

/// Postgres-backed stock ledger.
///
/// Every mutation is a single conditional UPDATE so that the capacity
/// check and the counter movement happen in one statement; the database,
/// not the caller, arbitrates races.
pub struct PgStockLedger {
    pool: PgPool,
}

impl PgStockLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_level(&self, ticket_type: TicketType) -> Result<StockLevel, StockError> {
        let row: Option<(i32, i32, i32)> =
            sqlx::query_as("SELECT total, sold, reserved FROM ticket_stock WHERE ticket_type = $1")
                .bind(ticket_type.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StockError::Backend(Box::new(e)))?;

        let (total, sold, reserved) =
            row.ok_or_else(|| StockError::UnknownType(ticket_type.to_string()))?;

        Ok(StockLevel {
            ticket_type,
            total: total as u32,
            sold: sold as u32,
            reserved: reserved as u32,
        })
    }
}

#[async_trait]
impl StockLedger for PgStockLedger {
    async fn seed(&self, ticket_type: TicketType, total: u32) -> Result<(), StockError> {
        sqlx::query(
            r#"
            INSERT INTO ticket_stock (ticket_type, total, sold, reserved)
            VALUES ($1, $2, 0, 0)
            ON CONFLICT (ticket_type) DO NOTHING
            "#,
        )
        .bind(ticket_type.as_str())
        .bind(total as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| StockError::Backend(Box::new(e)))?;

        Ok(())
    }

    async fn get_stock(&self, ticket_type: TicketType) -> Result<StockLevel, StockError> {
        self.fetch_level(ticket_type).await
    }

    async fn list_stock(&self) -> Result<Vec<StockLevel>, StockError> {
        let rows: Vec<(String, i32, i32, i32)> = sqlx::query_as(
            "SELECT ticket_type, total, sold, reserved FROM ticket_stock ORDER BY ticket_type",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StockError::Backend(Box::new(e)))?;

        rows.into_iter()
            .map(|(ticket_type, total, sold, reserved)| {
                Ok(StockLevel {
                    ticket_type: ticket_type.parse()?,
                    total: total as u32,
                    sold: sold as u32,
                    reserved: reserved as u32,
                })
            })
            .collect()
    }

    async fn try_reserve(&self, ticket_type: TicketType, quantity: u32) -> Result<(), StockError> {
        let updated = sqlx::query(
            r#"
            UPDATE ticket_stock
            SET reserved = reserved + $2, updated_at = NOW()
            WHERE ticket_type = $1 AND sold + reserved + $2 <= total
            "#,
        )
        .bind(ticket_type.as_str())
        .bind(quantity as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| StockError::Backend(Box::new(e)))?
        .rows_affected();

        if updated == 1 {
            return Ok(());
        }

        // Re-read only to produce a useful error; the decision was made
        // by the conditional update above.
        let level = self.fetch_level(ticket_type).await?;
        Err(StockError::Insufficient {
            ticket_type,
            requested: quantity,
            available: level.remaining(),
        })
    }

    async fn confirm_sale(
        &self,
        ticket_type: TicketType,
        quantity: u32,
    ) -> Result<(), StockError> {
        let updated = sqlx::query(
            r#"
            UPDATE ticket_stock
            SET reserved = reserved - $2, sold = sold + $2, updated_at = NOW()
            WHERE ticket_type = $1 AND reserved >= $2
            "#,
        )
        .bind(ticket_type.as_str())
        .bind(quantity as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| StockError::Backend(Box::new(e)))?
        .rows_affected();

        if updated == 1 {
            return Ok(());
        }

        let level = self.fetch_level(ticket_type).await?;
        warn!(
            ticket_type = %ticket_type,
            quantity,
            reserved = level.reserved,
            "confirm_sale found fewer reserved units than expected"
        );
        Err(StockError::Inconsistent {
            ticket_type,
            requested: quantity,
            reserved: level.reserved,
        })
    }

    async fn release(&self, ticket_type: TicketType, quantity: u32) -> Result<(), StockError> {
        sqlx::query(
            r#"
            UPDATE ticket_stock
            SET reserved = GREATEST(reserved - $2, 0), updated_at = NOW()
            WHERE ticket_type = $1
            "#,
        )
        .bind(ticket_type.as_str())
        .bind(quantity as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| StockError::Backend(Box::new(e)))?;

        Ok(())
    }
}
