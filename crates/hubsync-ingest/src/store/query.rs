//! Typed queries over the raw record tables
//!
//! Filters are optional and compose through `sqlx::QueryBuilder`; every value
//! is bound, never spliced into the SQL text.

use chrono::{DateTime, Utc};
use hubsync_common::ObjectKind;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::collections::BTreeMap;

use anyhow::{Context, Result};

/// Largest page a query may request.
pub const MAX_QUERY_LIMIT: i64 = 10_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Oldest `updated_at` first
    #[default]
    Ascending,
    Descending,
}

impl SortOrder {
    fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        }
    }
}

/// A raw record as persisted
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: String,
    pub object_type: Option<String>,
    pub properties: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub archived: bool,
}

/// Query over one kind's raw table
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecordQuery {
    kind: ObjectKind,
    updated_after: Option<DateTime<Utc>>,
    updated_before: Option<DateTime<Utc>>,
    archived: Option<bool>,
    ids: Vec<String>,
    object_type: Option<String>,
    limit: Option<i64>,
    order: SortOrder,
}

impl RawRecordQuery {
    pub fn new(kind: ObjectKind) -> Self {
        Self {
            kind,
            updated_after: None,
            updated_before: None,
            archived: None,
            ids: Vec::new(),
            object_type: None,
            limit: None,
            order: SortOrder::default(),
        }
    }

    /// Records modified strictly after `ts`
    pub fn updated_after(mut self, ts: DateTime<Utc>) -> Self {
        self.updated_after = Some(ts);
        self
    }

    /// Records modified strictly before `ts`
    pub fn updated_before(mut self, ts: DateTime<Utc>) -> Self {
        self.updated_before = Some(ts);
        self
    }

    pub fn archived(mut self, archived: bool) -> Self {
        self.archived = Some(archived);
        self
    }

    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Engagement object type; ignored for other kinds
    pub fn object_type(mut self, object_type: impl Into<String>) -> Self {
        self.object_type = Some(object_type.into());
        self
    }

    /// Clamped to `1..=MAX_QUERY_LIMIT`
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit.clamp(1, MAX_QUERY_LIMIT));
        self
    }

    pub fn order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    /// Assemble the SELECT statement with bound parameters
    pub fn build(&self) -> QueryBuilder<'_, Postgres> {
        let object_type_column = if self.kind.is_engagement() {
            "object_type"
        } else {
            "NULL::TEXT AS object_type"
        };

        let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT id, {}, properties, created_at, updated_at, archived FROM {} WHERE TRUE",
            object_type_column,
            self.kind.table_name()
        ));

        if let Some(ts) = self.updated_after {
            query_builder.push(" AND updated_at > ").push_bind(ts);
        }
        if let Some(ts) = self.updated_before {
            query_builder.push(" AND updated_at < ").push_bind(ts);
        }
        if let Some(archived) = self.archived {
            query_builder.push(" AND archived = ").push_bind(archived);
        }
        if !self.ids.is_empty() {
            query_builder.push(" AND id IN (");
            let mut separated = query_builder.separated(", ");
            for id in &self.ids {
                separated.push_bind(id);
            }
            separated.push_unseparated(")");
        }
        if let (true, Some(object_type)) = (self.kind.is_engagement(), &self.object_type) {
            query_builder.push(" AND object_type = ").push_bind(object_type);
        }

        query_builder.push(" ORDER BY updated_at ").push(self.order.as_sql());
        query_builder.push(", id ASC");

        if let Some(limit) = self.limit {
            query_builder.push(" LIMIT ").push_bind(limit);
        }

        query_builder
    }

    pub async fn fetch(&self, pool: &PgPool) -> Result<Vec<StoredRecord>> {
        let mut query_builder = self.build();
        let rows = query_builder
            .build()
            .fetch_all(pool)
            .await
            .with_context(|| format!("Failed to query {}", self.kind.table_name()))?;

        rows.into_iter()
            .map(|row| -> Result<StoredRecord> {
                let properties: sqlx::types::Json<BTreeMap<String, String>> = row.try_get("properties")?;
                Ok(StoredRecord {
                    id: row.try_get("id")?,
                    object_type: row.try_get("object_type")?,
                    properties: properties.0,
                    created_at: row.try_get("created_at")?,
                    updated_at: row.try_get("updated_at")?,
                    archived: row.try_get("archived")?,
                })
            })
            .collect()
    }
}
