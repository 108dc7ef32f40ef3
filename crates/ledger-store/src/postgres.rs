use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    ActorId, LedgerError, LocationId, MovementEntry, MovementId, MovementKind, MovementQuery,
    NewMovement, ProductId, Result, StockKey, StockQuery, StockRecord, Version,
    store::{LedgerStore, LedgerTx},
};

const STOCK_COLUMNS: &str =
    "product_id, location_id, quantity, reserved, version, created_at, updated_at";

const MOVEMENT_COLUMNS: &str = "id, product_id, from_location_id, to_location_id, qty, kind, reason, performed_by, created_at";

/// PostgreSQL-backed ledger store.
///
/// Conditional writes are single `UPDATE … WHERE … RETURNING` statements, so
/// the row lock taken by the update is what serializes units on one key.
#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    /// Creates a new PostgreSQL ledger store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }
}

fn row_to_record(row: PgRow) -> Result<StockRecord> {
    Ok(StockRecord {
        product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
        location_id: LocationId::from_uuid(row.try_get::<Uuid, _>("location_id")?),
        quantity: row.try_get("quantity")?,
        reserved: row.try_get("reserved")?,
        version: Version::new(row.try_get("version")?),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_movement(row: PgRow) -> Result<MovementEntry> {
    let kind: String = row.try_get("kind")?;

    Ok(MovementEntry {
        id: MovementId::from_uuid(row.try_get::<Uuid, _>("id")?),
        product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
        from_location_id: row
            .try_get::<Option<Uuid>, _>("from_location_id")?
            .map(LocationId::from_uuid),
        to_location_id: row
            .try_get::<Option<Uuid>, _>("to_location_id")?
            .map(LocationId::from_uuid),
        qty: row.try_get("qty")?,
        kind: kind.parse::<MovementKind>()?,
        reason: row.try_get("reason")?,
        performed_by: row
            .try_get::<Option<Uuid>, _>("performed_by")?
            .map(ActorId::from_uuid),
        created_at: row.try_get("created_at")?,
    })
}

/// Transactional context of [`PostgresLedgerStore`], one database transaction.
pub struct PostgresLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PostgresLedgerTx {
    async fn get_or_create(&mut self, key: &StockKey) -> Result<StockRecord> {
        // A concurrent first insert makes this one wait for its commit and
        // then do nothing, so no duplicate-key error ever surfaces.
        sqlx::query(
            r#"
            INSERT INTO stock (product_id, location_id)
            VALUES ($1, $2)
            ON CONFLICT (product_id, location_id) DO NOTHING
            "#,
        )
        .bind(key.product_id.as_uuid())
        .bind(key.location_id.as_uuid())
        .execute(&mut *self.tx)
        .await?;

        let row = sqlx::query(&format!(
            "SELECT {STOCK_COLUMNS} FROM stock WHERE product_id = $1 AND location_id = $2"
        ))
        .bind(key.product_id.as_uuid())
        .bind(key.location_id.as_uuid())
        .fetch_one(&mut *self.tx)
        .await?;

        row_to_record(row)
    }

    async fn increment(&mut self, key: &StockKey, qty: i64) -> Result<StockRecord> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO stock (product_id, location_id, quantity)
            VALUES ($1, $2, $3)
            ON CONFLICT (product_id, location_id) DO UPDATE SET
                quantity = stock.quantity + EXCLUDED.quantity,
                version = stock.version + 1,
                updated_at = NOW()
            RETURNING {STOCK_COLUMNS}
            "#
        ))
        .bind(key.product_id.as_uuid())
        .bind(key.location_id.as_uuid())
        .bind(qty)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| match e {
            // 22003 numeric_value_out_of_range
            sqlx::Error::Database(ref db_err) if db_err.code().as_deref() == Some("22003") => {
                tracing::warn!(%key, qty, "receipt would overflow stock quantity");
                LedgerError::QuantityOverflow(*key)
            }
            other => LedgerError::from(other),
        })?;

        row_to_record(row)
    }

    async fn decrement_if_available(
        &mut self,
        key: &StockKey,
        qty: i64,
    ) -> Result<Option<StockRecord>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE stock SET
                quantity = quantity - $3,
                version = version + 1,
                updated_at = NOW()
            WHERE product_id = $1 AND location_id = $2 AND quantity >= $3
            RETURNING {STOCK_COLUMNS}
            "#
        ))
        .bind(key.product_id.as_uuid())
        .bind(key.location_id.as_uuid())
        .bind(qty)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(row_to_record).transpose()
    }

    async fn set_quantity_if_version(
        &mut self,
        key: &StockKey,
        quantity: i64,
        expected: Version,
    ) -> Result<Option<StockRecord>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE stock SET
                quantity = $3,
                version = version + 1,
                updated_at = NOW()
            WHERE product_id = $1 AND location_id = $2 AND version = $4
            RETURNING {STOCK_COLUMNS}
            "#
        ))
        .bind(key.product_id.as_uuid())
        .bind(key.location_id.as_uuid())
        .bind(quantity)
        .bind(expected.as_i64())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(row_to_record).transpose()
    }

    async fn set_quantity(&mut self, key: &StockKey, quantity: i64) -> Result<StockRecord> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO stock (product_id, location_id, quantity)
            VALUES ($1, $2, $3)
            ON CONFLICT (product_id, location_id) DO UPDATE SET
                quantity = EXCLUDED.quantity,
                version = stock.version + 1,
                updated_at = NOW()
            RETURNING {STOCK_COLUMNS}
            "#
        ))
        .bind(key.product_id.as_uuid())
        .bind(key.location_id.as_uuid())
        .bind(quantity)
        .fetch_one(&mut *self.tx)
        .await?;

        row_to_record(row)
    }

    async fn append_movement(&mut self, movement: NewMovement) -> Result<MovementEntry> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO movements (id, product_id, from_location_id, to_location_id, qty, kind, reason, performed_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {MOVEMENT_COLUMNS}
            "#
        ))
        .bind(MovementId::new().as_uuid())
        .bind(movement.product_id.as_uuid())
        .bind(movement.from_location_id.map(|id| id.as_uuid()))
        .bind(movement.to_location_id.map(|id| id.as_uuid()))
        .bind(movement.qty)
        .bind(movement.kind.as_str())
        .bind(&movement.reason)
        .bind(movement.performed_by.map(|id| id.as_uuid()))
        .fetch_one(&mut *self.tx)
        .await?;

        row_to_movement(row)
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    type Tx = PostgresLedgerTx;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(PostgresLedgerTx {
            tx: self.pool.begin().await?,
        })
    }

    async fn get(&self, key: &StockKey) -> Result<Option<StockRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {STOCK_COLUMNS} FROM stock WHERE product_id = $1 AND location_id = $2"
        ))
        .bind(key.product_id.as_uuid())
        .bind(key.location_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_record).transpose()
    }

    async fn query_stock(&self, query: StockQuery) -> Result<Vec<StockRecord>> {
        let mut sql = format!("SELECT {STOCK_COLUMNS} FROM stock WHERE 1=1");
        let mut param_count = 0;

        if query.product_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND product_id = ${param_count}"));
        }
        if query.location_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND location_id = ${param_count}"));
        }
        sql.push_str(" ORDER BY product_id ASC, location_id ASC");

        let mut sqlx_query = sqlx::query(&sql);
        if let Some(id) = query.product_id {
            sqlx_query = sqlx_query.bind(id.as_uuid());
        }
        if let Some(id) = query.location_id {
            sqlx_query = sqlx_query.bind(id.as_uuid());
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_record).collect()
    }

    async fn query_movements(&self, query: MovementQuery) -> Result<Vec<MovementEntry>> {
        let mut sql = format!("SELECT {MOVEMENT_COLUMNS} FROM movements WHERE 1=1");
        let mut param_count = 0;

        if query.product_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND product_id = ${param_count}"));
        }
        if query.location_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(
                " AND (from_location_id = ${param_count} OR to_location_id = ${param_count})"
            ));
        }
        if query.kind.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND kind = ${param_count}"));
        }
        if query.from_timestamp.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND created_at >= ${param_count}"));
        }
        if query.to_timestamp.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND created_at <= ${param_count}"));
        }

        sql.push_str(" ORDER BY created_at DESC, id DESC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);

        if let Some(id) = query.product_id {
            sqlx_query = sqlx_query.bind(id.as_uuid());
        }
        if let Some(id) = query.location_id {
            sqlx_query = sqlx_query.bind(id.as_uuid());
        }
        if let Some(kind) = query.kind {
            sqlx_query = sqlx_query.bind(kind.as_str());
        }
        if let Some(from) = query.from_timestamp {
            sqlx_query = sqlx_query.bind(from);
        }
        if let Some(to) = query.to_timestamp {
            sqlx_query = sqlx_query.bind(to);
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }
        if let Some(offset) = query.offset {
            sqlx_query = sqlx_query.bind(offset as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_movement).collect()
    }
}
