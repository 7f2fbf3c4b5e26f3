use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use ts_rs::TS;
use utils::progress::{SyncKind, SyncStatus};
use uuid::Uuid;

/// One execution of the catalog sync job
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct SyncRun {
    pub id: Uuid,
    #[sqlx(try_from = "String")]
    pub kind: SyncKind,
    #[sqlx(try_from = "String")]
    pub status: SyncStatus,
    pub triggered_by: Option<Uuid>,
    pub processed: i64,
    pub created: i64,
    pub updated: i64,
    pub deactivated: i64,
    pub skipped: i64,
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Counters accumulated while a run reconciles the catalog
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct SyncCounters {
    pub processed: i64,
    pub created: i64,
    pub updated: i64,
    pub deactivated: i64,
    pub skipped: i64,
}

const SYNC_RUN_COLUMNS: &str = "id, kind, status, triggered_by, processed, created, updated, deactivated, skipped, message, started_at, finished_at";

impl SyncRun {
    pub async fn create(
        pool: &SqlitePool,
        kind: SyncKind,
        triggered_by: Option<Uuid>,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(&format!(
            r#"INSERT INTO sync_runs (id, kind, status, triggered_by, started_at)
               VALUES ($1, $2, $3, $4, $5)
               RETURNING {SYNC_RUN_COLUMNS}"#
        ))
        .bind(Uuid::new_v4())
        .bind(kind.to_string())
        .bind(SyncStatus::Running.to_string())
        .bind(triggered_by)
        .bind(Utc::now())
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(&format!(
            "SELECT {SYNC_RUN_COLUMNS} FROM sync_runs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Record the terminal status and counters of a run
    pub async fn finish(
        pool: &SqlitePool,
        id: Uuid,
        status: SyncStatus,
        counters: &SyncCounters,
        message: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"UPDATE sync_runs
               SET status = $2, processed = $3, created = $4, updated = $5,
                   deactivated = $6, skipped = $7, message = $8, finished_at = $9
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(status.to_string())
        .bind(counters.processed)
        .bind(counters.created)
        .bind(counters.updated)
        .bind(counters.deactivated)
        .bind(counters.skipped)
        .bind(message)
        .bind(Utc::now())
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn list_recent(pool: &SqlitePool, limit: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(&format!(
            "SELECT {SYNC_RUN_COLUMNS} FROM sync_runs ORDER BY started_at DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Runs left as running by a previous process can never finish; mark them failed.
    pub async fn fail_interrupted(pool: &SqlitePool) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"UPDATE sync_runs
               SET status = $1, message = $2, finished_at = $3
               WHERE status = $4"#,
        )
        .bind(SyncStatus::Error.to_string())
        .bind("interrupted by server restart")
        .bind(Utc::now())
        .bind(SyncStatus::Running.to_string())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
