use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orders::Order;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    KitchenError, KitchenTicket, OrderId, Result, TicketStatus, store::KitchenStore,
    ticket::check_order,
};

const TICKET_COLUMNS: &str = "order_body, status, accepted_at, finished_at, failure";

/// PostgreSQL-backed kitchen store.
#[derive(Clone)]
pub struct PostgresKitchenStore {
    pool: PgPool,
}

impl PostgresKitchenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies the kitchen schema, ignoring migrations owned by other services.
    pub async fn run_migrations(&self) -> Result<()> {
        let mut migrator = sqlx::migrate!("./migrations");
        migrator.set_ignore_missing(true);
        migrator.run(&self.pool).await?;
        Ok(())
    }

    async fn fetch(&self, order_id: OrderId) -> Result<Option<KitchenTicket>> {
        let row = sqlx::query(&format!(
            "SELECT {TICKET_COLUMNS} FROM kitchen_tickets WHERE order_id = $1"
        ))
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_ticket).transpose()
    }
}

fn row_to_ticket(row: &PgRow) -> Result<KitchenTicket> {
    let body: serde_json::Value = row.try_get("order_body")?;
    let status: String = row.try_get("status")?;
    Ok(KitchenTicket {
        order: serde_json::from_value(body)?,
        status: status.parse()?,
        accepted_at: row.try_get("accepted_at")?,
        finished_at: row.try_get("finished_at")?,
        failure: row.try_get("failure")?,
    })
}

#[async_trait]
impl KitchenStore for PostgresKitchenStore {
    async fn accept_order(&self, order: &Order, now: DateTime<Utc>) -> Result<KitchenTicket> {
        check_order(order)?;

        sqlx::query(
            r#"
            INSERT INTO kitchen_tickets (order_id, customer_id, order_body, status, accepted_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.customer_id.as_str())
        .bind(serde_json::to_value(order)?)
        .bind(TicketStatus::Accepted.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.fetch(order.id)
            .await?
            .ok_or(KitchenError::TicketNotFound(order.id))
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<KitchenTicket>> {
        self.fetch(order_id).await
    }

    async fn finish_order(&self, order_id: OrderId, now: DateTime<Utc>) -> Result<KitchenTicket> {
        sqlx::query(
            r#"
            UPDATE kitchen_tickets
            SET status = $2, finished_at = $3, failure = NULL
            WHERE order_id = $1 AND status <> $2
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(TicketStatus::Finished.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.fetch(order_id)
            .await?
            .ok_or(KitchenError::TicketNotFound(order_id))
    }

    async fn fail_order(
        &self,
        order_id: OrderId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<KitchenTicket> {
        sqlx::query(
            r#"
            UPDATE kitchen_tickets
            SET status = $2, finished_at = $3, failure = $4
            WHERE order_id = $1 AND status = $5
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(TicketStatus::Failed.as_str())
        .bind(now)
        .bind(reason)
        .bind(TicketStatus::Accepted.as_str())
        .execute(&self.pool)
        .await?;

        self.fetch(order_id)
            .await?
            .ok_or(KitchenError::TicketNotFound(order_id))
    }

    async fn unfinished_tickets(&self) -> Result<Vec<KitchenTicket>> {
        let rows = sqlx::query(&format!(
            "SELECT {TICKET_COLUMNS} FROM kitchen_tickets WHERE status = $1 ORDER BY accepted_at"
        ))
        .bind(TicketStatus::Accepted.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_ticket).collect()
    }
}
