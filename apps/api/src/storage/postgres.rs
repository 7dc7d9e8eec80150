use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{Filter, ResumeStore};
use crate::errors::PipelineError;
use crate::models::resume::StandardizedResume;

/// Row in `candidate_records`. `id` and the audit timestamps are managed by
/// the store and never overwritten by an upsert.
#[derive(Debug, Clone, FromRow)]
struct CandidateRow {
    #[allow(dead_code)]
    id: Uuid,
    identity_key: Uuid,
    data: Value,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
    #[allow(dead_code)]
    updated_at: DateTime<Utc>,
}

impl CandidateRow {
    fn into_record(self) -> Result<StandardizedResume, PipelineError> {
        serde_json::from_value(self.data).map_err(|e| {
            PipelineError::PersistenceError(format!(
                "stored record {} is not a valid resume: {e}",
                self.identity_key
            ))
        })
    }
}

/// Postgres-backed corpus. Records live as JSONB keyed by a unique
/// `identity_key`; filters are evaluated on the decoded JSON.
#[derive(Clone)]
pub struct PgResumeStore {
    pool: PgPool,
}

impl PgResumeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn rows(&self, key: Option<Uuid>) -> Result<Vec<CandidateRow>, PipelineError> {
        let rows = match key {
            Some(key) => {
                sqlx::query_as::<_, CandidateRow>(
                    "SELECT * FROM candidate_records WHERE identity_key = $1",
                )
                .bind(key)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, CandidateRow>(
                    "SELECT * FROM candidate_records ORDER BY created_at, identity_key",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }
}

#[async_trait]
impl ResumeStore for PgResumeStore {
    async fn find(&self, filter: &Filter) -> Result<Vec<StandardizedResume>, PipelineError> {
        let rows = self.rows(filter.identity_key()).await?;
        let mut out = Vec::new();
        for row in rows {
            if filter.evaluate(&row.data) {
                out.push(row.into_record()?);
            }
        }
        Ok(out)
    }

    async fn insert_or_update(&self, record: &StandardizedResume) -> Result<Uuid, PipelineError> {
        let data = serde_json::to_value(record)
            .map_err(|e| PipelineError::PersistenceError(e.to_string()))?;

        let key: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO candidate_records (id, identity_key, data)
            VALUES ($1, $2, $3)
            ON CONFLICT (identity_key)
            DO UPDATE SET data = EXCLUDED.data, updated_at = NOW()
            RETURNING identity_key
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.identity_key)
        .bind(data)
        .fetch_one(&self.pool)
        .await?;

        Ok(key)
    }

    async fn delete(&self, filter: &Filter) -> Result<u64, PipelineError> {
        let keys: Vec<Uuid> = self
            .rows(filter.identity_key())
            .await?
            .into_iter()
            .filter(|row| filter.evaluate(&row.data))
            .map(|row| row.identity_key)
            .collect();
        if keys.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query("DELETE FROM candidate_records WHERE identity_key = ANY($1)")
            .bind(&keys)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<(), PipelineError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
