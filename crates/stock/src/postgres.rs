use std::future::Future;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Booking, BookingId, ItemId, ItemMetadata, ItemQuantity, OrderId, Result, StockError,
    StockItem, StockLevel, store::ReservationStore,
};

/// Attempts per call before a serialization conflict is surfaced to the caller.
const MAX_ATTEMPTS: u32 = 5;

const ITEM_COLUMNS: &str =
    "id, quantity, name, price_id, description, img_path, created_at, updated_at";

const BOOKING_COLUMNS: &str = "booking_id, item_id, quantity, order_id, expires_at, created_at";

/// PostgreSQL-backed reservation store.
///
/// Quantity-changing calls run in `SERIALIZABLE` transactions and are
/// retried on serialization failures, so two concurrent bookings against
/// the same item can never both commit on a stale availability read.
#[derive(Clone)]
pub struct PostgresReservationStore {
    pool: PgPool,
}

impl PostgresReservationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies the stock schema. Other services may share the database, so
    /// migrations this crate does not know about are ignored.
    pub async fn run_migrations(&self) -> Result<()> {
        let mut migrator = sqlx::migrate!("./migrations");
        migrator.set_ignore_missing(true);
        migrator.run(&self.pool).await?;
        Ok(())
    }

    async fn begin_serializable(&self) -> Result<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut run: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match run().await {
                Err(StockError::Database(e))
                    if is_serialization_conflict(&e) && attempt < MAX_ATTEMPTS =>
                {
                    metrics::counter!("stock_serialization_retries_total").increment(1);
                    tracing::debug!(operation, attempt, "serialization conflict, retrying");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn book_once(
        &self,
        items: &[ItemQuantity],
        order_id: Option<OrderId>,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Vec<Booking>> {
        let mut tx = self.begin_serializable().await?;
        let mut created = Vec::with_capacity(items.len());

        for line in items {
            let on_hand = on_hand(&mut tx, &line.item_id)
                .await?
                .ok_or_else(|| StockError::ItemNotFound(line.item_id.clone()))?;
            let available = on_hand - booked_quantity(&mut tx, &line.item_id, now).await?;
            if available < line.quantity {
                // Dropping the transaction rolls back earlier lines.
                return Err(StockError::InsufficientStock {
                    item_id: line.item_id.clone(),
                    requested: line.quantity,
                    available,
                });
            }

            let booking = Booking {
                booking_id: BookingId::new(),
                item_id: line.item_id.clone(),
                quantity: line.quantity,
                order_id,
                expires_at,
                created_at: now,
            };
            sqlx::query(
                r#"
                INSERT INTO booked_items (booking_id, item_id, quantity, order_id, expires_at, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(booking.booking_id.as_uuid())
            .bind(booking.item_id.as_str())
            .bind(booking.quantity)
            .bind(order_id.map(|id| id.as_uuid()))
            .bind(expires_at)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            created.push(booking);
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn release_once(
        &self,
        items: &[ItemQuantity],
        order_id: Option<OrderId>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ItemQuantity>> {
        let mut tx = self.begin_serializable().await?;
        let order_uuid = order_id.map(|id| id.as_uuid());
        let mut released = Vec::with_capacity(items.len());

        for line in items {
            if line.quantity <= 0 {
                let freed: i64 = sqlx::query_scalar(
                    r#"
                    WITH removed AS (
                        DELETE FROM booked_items
                        WHERE item_id = $1 AND ($2::UUID IS NULL OR order_id = $2)
                        RETURNING quantity, expires_at
                    )
                    SELECT COALESCE(SUM(quantity) FILTER (WHERE expires_at > $3), 0)::BIGINT
                    FROM removed
                    "#,
                )
                .bind(line.item_id.as_str())
                .bind(order_uuid)
                .bind(now)
                .fetch_one(&mut *tx)
                .await?;
                released.push(ItemQuantity::new(line.item_id.clone(), freed));
                continue;
            }

            let rows = sqlx::query(
                r#"
                SELECT booking_id, quantity
                FROM booked_items
                WHERE item_id = $1 AND expires_at > $2 AND ($3::UUID IS NULL OR order_id = $3)
                ORDER BY created_at ASC, seq ASC
                "#,
            )
            .bind(line.item_id.as_str())
            .bind(now)
            .bind(order_uuid)
            .fetch_all(&mut *tx)
            .await?;

            let mut remaining = line.quantity;
            for row in rows {
                if remaining == 0 {
                    break;
                }
                let booking_id: Uuid = row.try_get("booking_id")?;
                let quantity: i64 = row.try_get("quantity")?;

                if quantity <= remaining {
                    sqlx::query("DELETE FROM booked_items WHERE booking_id = $1")
                        .bind(booking_id)
                        .execute(&mut *tx)
                        .await?;
                    remaining -= quantity;
                } else {
                    sqlx::query(
                        "UPDATE booked_items SET quantity = quantity - $2 WHERE booking_id = $1",
                    )
                    .bind(booking_id)
                    .bind(remaining)
                    .execute(&mut *tx)
                    .await?;
                    remaining = 0;
                }
            }

            released.push(ItemQuantity::new(
                line.item_id.clone(),
                line.quantity - remaining,
            ));
        }

        tx.commit().await?;
        Ok(released)
    }

    async fn finalize_once(
        &self,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<Vec<ItemQuantity>> {
        let mut tx = self.begin_serializable().await?;

        let rows = sqlx::query(
            r#"
            SELECT item_id, SUM(quantity)::BIGINT AS total
            FROM booked_items
            WHERE order_id = $1 AND expires_at > $2
            GROUP BY item_id
            ORDER BY item_id
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        if rows.is_empty() {
            return Err(StockError::NoActiveBookings(order_id));
        }

        let mut deducted = Vec::with_capacity(rows.len());
        for row in rows {
            let item_id = ItemId::new(row.try_get::<String, _>("item_id")?);
            let total: i64 = row.try_get("total")?;

            let on_hand = on_hand(&mut tx, &item_id)
                .await?
                .ok_or_else(|| StockError::ItemNotFound(item_id.clone()))?;
            if on_hand < total {
                return Err(StockError::InsufficientStock {
                    item_id,
                    requested: total,
                    available: on_hand,
                });
            }

            sqlx::query(
                "UPDATE stock_items SET quantity = quantity - $2, updated_at = $3 WHERE id = $1",
            )
            .bind(item_id.as_str())
            .bind(total)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            deducted.push(ItemQuantity {
                item_id,
                quantity: total,
            });
        }

        sqlx::query("DELETE FROM booked_items WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO finalized_orders (order_id, finalized_at) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(order_id.as_uuid())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(deducted)
    }

    async fn remove_once(&self, item_id: &ItemId, now: DateTime<Utc>) -> Result<StockItem> {
        let mut tx = self.begin_serializable().await?;

        let row = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM stock_items WHERE id = $1"
        ))
        .bind(item_id.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StockError::ItemNotFound(item_id.clone()))?;
        let item = row_to_item(&row)?;

        let booked = booked_quantity(&mut tx, item_id, now).await?;
        if booked > 0 {
            return Err(StockError::ActiveBookings {
                item_id: item_id.clone(),
                booked,
            });
        }

        sqlx::query("DELETE FROM booked_items WHERE item_id = $1")
            .bind(item_id.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM stock_items WHERE id = $1")
            .bind(item_id.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(item)
    }
}

#[async_trait]
impl ReservationStore for PostgresReservationStore {
    async fn upsert_item(
        &self,
        item_id: &ItemId,
        quantity: i64,
        metadata: &ItemMetadata,
        now: DateTime<Utc>,
    ) -> Result<StockItem> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO stock_items (id, quantity, name, price_id, description, img_path, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            ON CONFLICT (id) DO UPDATE SET
                quantity = stock_items.quantity + EXCLUDED.quantity,
                name = EXCLUDED.name,
                price_id = EXCLUDED.price_id,
                description = EXCLUDED.description,
                img_path = EXCLUDED.img_path,
                updated_at = EXCLUDED.updated_at
            RETURNING {ITEM_COLUMNS}
            "#
        ))
        .bind(item_id.as_str())
        .bind(quantity)
        .bind(&metadata.name)
        .bind(&metadata.price_id)
        .bind(&metadata.description)
        .bind(&metadata.img_path)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_out_of_range(&e) {
                StockError::Validation(format!("on-hand quantity of {item_id} would overflow"))
            } else {
                StockError::Database(e)
            }
        })?;

        row_to_item(&row)
    }

    async fn stock_level(
        &self,
        item_id: &ItemId,
        now: DateTime<Utc>,
    ) -> Result<Option<StockLevel>> {
        let row = sqlx::query(
            r#"
            SELECT s.id, s.quantity, s.name, s.price_id, s.description, s.img_path,
                   s.created_at, s.updated_at,
                   COALESCE((
                       SELECT SUM(b.quantity) FROM booked_items b
                       WHERE b.item_id = s.id AND b.expires_at > $2
                   ), 0)::BIGINT AS booked
            FROM stock_items s
            WHERE s.id = $1
            "#,
        )
        .bind(item_id.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let booked: i64 = row.try_get("booked")?;
                Ok(Some(StockLevel::new(row_to_item(&row)?, booked)))
            }
            None => Ok(None),
        }
    }

    async fn remove_item(&self, item_id: &ItemId, now: DateTime<Utc>) -> Result<StockItem> {
        self.with_retry("remove_item", move || self.remove_once(item_id, now))
            .await
    }

    async fn book(
        &self,
        items: &[ItemQuantity],
        order_id: Option<OrderId>,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Vec<Booking>> {
        self.with_retry("book", move || {
            self.book_once(items, order_id, now, expires_at)
        })
        .await
    }

    async fn release(
        &self,
        items: &[ItemQuantity],
        order_id: Option<OrderId>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ItemQuantity>> {
        self.with_retry("release", move || self.release_once(items, order_id, now))
            .await
    }

    async fn finalize(&self, order_id: OrderId, now: DateTime<Utc>) -> Result<Vec<ItemQuantity>> {
        self.with_retry("finalize", move || self.finalize_once(order_id, now))
            .await
    }

    async fn is_finalized(&self, order_id: OrderId) -> Result<bool> {
        let found: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM finalized_orders WHERE order_id = $1)",
        )
        .bind(order_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    async fn active_bookings_for_order(
        &self,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Booking>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {BOOKING_COLUMNS} FROM booked_items
            WHERE order_id = $1 AND expires_at > $2
            ORDER BY created_at ASC, seq ASC
            "#
        ))
        .bind(order_id.as_uuid())
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_booking).collect()
    }

    async fn active_bookings_for_item(
        &self,
        item_id: &ItemId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Booking>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {BOOKING_COLUMNS} FROM booked_items
            WHERE item_id = $1 AND expires_at > $2
            ORDER BY created_at ASC, seq ASC
            "#
        ))
        .bind(item_id.as_str())
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_booking).collect()
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM booked_items WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

async fn on_hand(conn: &mut PgConnection, item_id: &ItemId) -> Result<Option<i64>> {
    let quantity = sqlx::query_scalar("SELECT quantity FROM stock_items WHERE id = $1")
        .bind(item_id.as_str())
        .fetch_optional(&mut *conn)
        .await?;
    Ok(quantity)
}

async fn booked_quantity(
    conn: &mut PgConnection,
    item_id: &ItemId,
    now: DateTime<Utc>,
) -> Result<i64> {
    let booked = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(quantity), 0)::BIGINT
        FROM booked_items
        WHERE item_id = $1 AND expires_at > $2
        "#,
    )
    .bind(item_id.as_str())
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;
    Ok(booked)
}

fn is_serialization_conflict(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db_err) => {
            matches!(db_err.code().as_deref(), Some("40001") | Some("40P01"))
        }
        _ => false,
    }
}

/// SQLSTATE 22003, BIGINT arithmetic overflow.
fn is_out_of_range(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("22003"),
        _ => false,
    }
}

fn row_to_item(row: &PgRow) -> Result<StockItem> {
    Ok(StockItem {
        id: ItemId::new(row.try_get::<String, _>("id")?),
        quantity: row.try_get("quantity")?,
        metadata: ItemMetadata {
            name: row.try_get("name")?,
            price_id: row.try_get("price_id")?,
            description: row.try_get("description")?,
            img_path: row.try_get("img_path")?,
        },
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_booking(row: &PgRow) -> Result<Booking> {
    Ok(Booking {
        booking_id: BookingId::from_uuid(row.try_get::<Uuid, _>("booking_id")?),
        item_id: ItemId::new(row.try_get::<String, _>("item_id")?),
        quantity: row.try_get("quantity")?,
        order_id: row
            .try_get::<Option<Uuid>, _>("order_id")?
            .map(OrderId::from_uuid),
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
    })
}
