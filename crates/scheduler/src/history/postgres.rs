//! PostgreSQL implementation of HistoryStore
//!
//! Writes to the `task_history` table created by the bundled migration.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{error, instrument};
use uuid::Uuid;

use super::{HistoryError, HistoryRecord, HistoryStore};

/// PostgreSQL implementation of HistoryStore
///
/// # Example
///
/// ```ignore
/// use conveyor_scheduler::PostgresHistoryStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/conveyor").await?;
/// let store = PostgresHistoryStore::new(pool);
/// store.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresHistoryStore {
    pool: PgPool,
}

impl PostgresHistoryStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled migrations
    pub async fn migrate(&self) -> Result<(), HistoryError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| HistoryError::Database(e.to_string()))
    }

    /// Most recent records of one owner, newest first
    #[instrument(skip(self))]
    pub async fn recent_for_owner(
        &self,
        owner_id: &str,
        limit: i64,
    ) -> Result<Vec<HistoryRecord>, HistoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner_id, task_id, status, priority, message, processing_time_ms,
                   result, error_message, metadata, started_at, completed_at
            FROM task_history
            WHERE owner_id = $1
            ORDER BY completed_at DESC
            LIMIT $2
            "#,
        )
        .bind(owner_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to load task history: {}", e);
            HistoryError::Database(e.to_string())
        })?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let status: String = row.get("status");
            let priority: String = row.get("priority");
            let metadata: serde_json::Value = row.get("metadata");

            records.push(HistoryRecord {
                id: row.get::<Uuid, _>("id"),
                owner_id: row.get("owner_id"),
                task_id: row.get::<Uuid, _>("task_id"),
                status: serde_json::from_value(serde_json::Value::String(status))
                    .map_err(|e| HistoryError::Serialization(e.to_string()))?,
                priority: serde_json::from_value(serde_json::Value::String(priority))
                    .map_err(|e| HistoryError::Serialization(e.to_string()))?,
                message: row.get("message"),
                processing_time_ms: row.get("processing_time_ms"),
                result: row.get("result"),
                error: row.get("error_message"),
                metadata: match metadata {
                    serde_json::Value::Object(map) => map,
                    _ => Default::default(),
                },
                started_at: row.get::<DateTime<Utc>, _>("started_at"),
                completed_at: row.get::<DateTime<Utc>, _>("completed_at"),
            });
        }

        Ok(records)
    }
}

#[async_trait]
impl HistoryStore for PostgresHistoryStore {
    #[instrument(skip(self, record), fields(task_id = %record.task_id))]
    async fn save(&self, record: HistoryRecord) -> Result<(), HistoryError> {
        sqlx::query(
            r#"
            INSERT INTO task_history (
                id, owner_id, task_id, status, priority, message, processing_time_ms,
                result, error_message, metadata, started_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(record.id)
        .bind(&record.owner_id)
        .bind(record.task_id)
        .bind(record.status.to_string())
        .bind(record.priority.to_string())
        .bind(&record.message)
        .bind(record.processing_time_ms)
        .bind(&record.result)
        .bind(&record.error)
        .bind(serde_json::Value::Object(record.metadata))
        .bind(record.started_at)
        .bind(record.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to insert task history: {}", e);
            HistoryError::Database(e.to_string())
        })?;

        Ok(())
    }
}
