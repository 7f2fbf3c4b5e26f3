use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Product {
    pub id: Uuid,
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub currency: String,
    pub stock: i64,
    pub active: bool,
    #[serde(skip)]
    #[ts(skip)]
    pub last_sync_run_id: Option<Uuid>, // Sync run that last saw this SKU in the ERP
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Product data as reconciled from the ERP
#[derive(Debug, Clone)]
pub struct UpsertProduct {
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub currency: String,
    pub stock: i64,
}

/// Outcome of an upsert, so the sync job can count creations separately
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

const PRODUCT_COLUMNS: &str = "id, sku, name, description, price, currency, stock, active, last_sync_run_id, created_at, updated_at";

impl Product {
    pub async fn find_by_sku(pool: &SqlitePool, sku: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE sku = $1"
        ))
        .bind(sku)
        .fetch_optional(pool)
        .await
    }

    /// Active products ordered by name, optionally filtered by a name/SKU substring
    pub async fn list_active(
        pool: &SqlitePool,
        search: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let pattern = search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{s}%"));

        sqlx::query_as(&format!(
            r#"SELECT {PRODUCT_COLUMNS}
               FROM products
               WHERE active = 1
                 AND ($1 IS NULL OR name LIKE $1 OR sku LIKE $1)
               ORDER BY name ASC
               LIMIT $2"#
        ))
        .bind(pattern)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Refresh price and stock of an existing product. Returns false when the SKU is unknown.
    pub async fn update_price_stock(
        pool: &SqlitePool,
        sku: &str,
        price: f64,
        currency: &str,
        stock: i64,
        sync_run_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"UPDATE products
               SET price = $2, currency = $3, stock = $4, last_sync_run_id = $5, updated_at = $6
               WHERE sku = $1"#,
        )
        .bind(sku)
        .bind(price)
        .bind(currency)
        .bind(stock)
        .bind(sync_run_id)
        .bind(Utc::now())
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Insert a new product or overwrite the existing one with the same SKU, reactivating it
    pub async fn upsert(
        pool: &SqlitePool,
        data: &UpsertProduct,
        sync_run_id: Uuid,
    ) -> Result<UpsertOutcome, sqlx::Error> {
        let existing = Self::find_by_sku(pool, &data.sku).await?;
        let now = Utc::now();

        sqlx::query(
            r#"INSERT INTO products
                   (id, sku, name, description, price, currency, stock, active, last_sync_run_id, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, 1, $8, $9, $9)
               ON CONFLICT(sku) DO UPDATE SET
                   name = excluded.name,
                   description = excluded.description,
                   price = excluded.price,
                   currency = excluded.currency,
                   stock = excluded.stock,
                   active = 1,
                   last_sync_run_id = excluded.last_sync_run_id,
                   updated_at = excluded.updated_at"#,
        )
        .bind(Uuid::new_v4())
        .bind(&data.sku)
        .bind(&data.name)
        .bind(&data.description)
        .bind(data.price)
        .bind(&data.currency)
        .bind(data.stock)
        .bind(sync_run_id)
        .bind(now)
        .execute(pool)
        .await?;

        Ok(if existing.is_some() {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Created
        })
    }

    /// Stamp a product as listed by the sync run without changing its data
    pub async fn mark_seen(
        pool: &SqlitePool,
        sku: &str,
        sync_run_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE products SET last_sync_run_id = $2 WHERE sku = $1")
            .bind(sku)
            .bind(sync_run_id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Deactivate every active product the given sync run did not touch
    pub async fn deactivate_not_seen_in(
        pool: &SqlitePool,
        sync_run_id: Uuid,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"UPDATE products
               SET active = 0, updated_at = $2
               WHERE active = 1
                 AND (last_sync_run_id IS NULL OR last_sync_run_id != $1)"#,
        )
        .bind(sync_run_id)
        .bind(Utc::now())
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }
}
