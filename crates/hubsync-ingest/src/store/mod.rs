//! Postgres raw store
//!
//! Persists raw records per object kind for audit and replay, and doubles as
//! an ingestion sink and dead-letter sink. Upserts are keyed by record id
//! (engagements by id and object type), so replaying a sync is harmless.

pub mod query;

use anyhow::{Context, Result};
use async_trait::async_trait;
use hubsync_common::{DeadLetterEntry, ObjectKind};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{debug, info};

use crate::dead_letter::DeadLetterSink;
use crate::error::{DeadLetterError, ForwardingError};
use crate::sink::{IngestRecord, IngestionSink};

pub use query::{RawRecordQuery, SortOrder, StoredRecord};

/// Default connection pool size.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Raw record storage backed by Postgres
#[derive(Debug, Clone)]
pub struct PgRawStore {
    pool: PgPool,
}

impl PgRawStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` and apply pending migrations
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run raw store migrations")?;
        info!("Raw store migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert or refresh one record
    pub async fn upsert(&self, record: &IngestRecord) -> Result<()> {
        let normalized = serde_json::to_value(&record.normalized).context("Failed to encode normalized record")?;

        let table = record.kind.table_name();
        let (key_columns, key_values, conflict) = if record.kind.is_engagement() {
            ("id, object_type", "$1, $2", "id, object_type")
        } else {
            ("id", "$1", "id")
        };
        let first_value = if record.kind.is_engagement() { 3 } else { 2 };
        let statement = format!(
            r#"
            INSERT INTO {table} ({key_columns}, properties, normalized, created_at, updated_at, archived, synced_at)
            VALUES ({key_values}, ${p}, ${n}, ${c}, ${u}, ${a}, NOW())
            ON CONFLICT ({conflict}) DO UPDATE
              SET properties = EXCLUDED.properties,
                  normalized = EXCLUDED.normalized,
                  created_at = EXCLUDED.created_at,
                  updated_at = EXCLUDED.updated_at,
                  archived = EXCLUDED.archived,
                  synced_at = NOW()
            "#,
            p = first_value,
            n = first_value + 1,
            c = first_value + 2,
            u = first_value + 3,
            a = first_value + 4,
        );

        let mut query = sqlx::query(&statement).bind(&record.key.id);
        if record.kind.is_engagement() {
            query = query.bind(record.key.object_type.as_deref().unwrap_or("unknown"));
        }
        query
            .bind(Json(&record.properties))
            .bind(Json(normalized))
            .bind(record.created_at)
            .bind(record.updated_at)
            .bind(record.archived)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to upsert into {}", table))?;

        debug!(kind = %record.kind, record_id = %record.key, "Upserted raw record");
        Ok(())
    }

    /// Records of `kind` matching `query`
    pub async fn query(&self, query: &RawRecordQuery) -> Result<Vec<StoredRecord>> {
        query.fetch(&self.pool).await
    }

    /// Number of rows stored for `kind`
    pub async fn count(&self, kind: ObjectKind) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", kind.table_name()))
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("Failed to count {}", kind.table_name()))?;
        Ok(count)
    }
}

#[async_trait]
impl IngestionSink for PgRawStore {
    async fn write(&self, record: &IngestRecord) -> std::result::Result<(), ForwardingError> {
        self.upsert(record)
            .await
            .map_err(|e| ForwardingError::new(record.key.to_string(), format!("{:#}", e)))
    }
}

#[async_trait]
impl DeadLetterSink for PgRawStore {
    async fn write(&self, entry: &DeadLetterEntry) -> std::result::Result<(), DeadLetterError> {
        let original = serde_json::to_value(&entry.original_record)?;
        let record_id = Some(entry.original_record.id.as_str()).filter(|id| !id.trim().is_empty());

        sqlx::query(
            r#"
            INSERT INTO hubspot_dead_letters (object_kind, record_id, original_record, failure_reason, failed_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(entry.object_kind.as_str())
        .bind(record_id)
        .bind(Json(original))
        .bind(&entry.failure_reason)
        .bind(entry.failed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| DeadLetterError::Storage(e.to_string()))?;

        Ok(())
    }
}
