//! Per-identity stage-completion metadata.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::Serialize;
use uuid::Uuid;

use crate::errors::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Checkpoint {
    Extracted,
    Standardized,
    Validated,
    Persisted,
}

impl Checkpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Checkpoint::Extracted => "extracted",
            Checkpoint::Standardized => "standardized",
            Checkpoint::Validated => "validated",
            Checkpoint::Persisted => "persisted",
        }
    }
}

/// When each stage last completed for one identity key.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StageStatus {
    pub extracted: Option<DateTime<Utc>>,
    pub standardized: Option<DateTime<Utc>>,
    pub validated: Option<DateTime<Utc>>,
    pub persisted: Option<DateTime<Utc>>,
}

impl StageStatus {
    pub fn set(&mut self, checkpoint: Checkpoint, at: DateTime<Utc>) {
        let slot = match checkpoint {
            Checkpoint::Extracted => &mut self.extracted,
            Checkpoint::Standardized => &mut self.standardized,
            Checkpoint::Validated => &mut self.validated,
            Checkpoint::Persisted => &mut self.persisted,
        };
        *slot = Some(at);
    }

    /// Parses a Redis hash of `stage → RFC 3339 timestamp`. Unknown fields and
    /// unparsable timestamps are ignored.
    fn from_hash(fields: HashMap<String, String>) -> Self {
        let mut status = StageStatus::default();
        for checkpoint in [
            Checkpoint::Extracted,
            Checkpoint::Standardized,
            Checkpoint::Validated,
            Checkpoint::Persisted,
        ] {
            if let Some(at) = fields
                .get(checkpoint.as_str())
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            {
                status.set(checkpoint, at.with_timezone(&Utc));
            }
        }
        status
    }
}

#[async_trait]
pub trait StageLedger: Send + Sync {
    async fn mark(&self, key: Uuid, checkpoint: Checkpoint) -> Result<(), PipelineError>;

    async fn status(&self, key: Uuid) -> Result<StageStatus, PipelineError>;
}

/// Redis hash per identity key: `screener:stages:<uuid>`.
#[derive(Clone)]
pub struct RedisStageLedger {
    client: redis::Client,
}

impl RedisStageLedger {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    fn hash_key(key: Uuid) -> String {
        format!("screener:stages:{key}")
    }
}

#[async_trait]
impl StageLedger for RedisStageLedger {
    async fn mark(&self, key: Uuid, checkpoint: Checkpoint) -> Result<(), PipelineError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.hset::<_, _, _, ()>(
            Self::hash_key(key),
            checkpoint.as_str(),
            Utc::now().to_rfc3339(),
        )
        .await?;
        Ok(())
    }

    async fn status(&self, key: Uuid) -> Result<StageStatus, PipelineError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let fields: HashMap<String, String> = conn.hgetall(Self::hash_key(key)).await?;
        Ok(StageStatus::from_hash(fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_hash() {
        let mut fields = HashMap::new();
        fields.insert("extracted".to_string(), "2024-05-01T10:00:00+00:00".to_string());
        fields.insert("standardized".to_string(), "garbage".to_string());
        fields.insert("other".to_string(), "2024-05-01T10:00:00Z".to_string());

        let status = StageStatus::from_hash(fields);
        assert!(status.extracted.is_some());
        assert!(status.standardized.is_none());
        assert!(status.persisted.is_none());
    }

    #[test]
    fn test_set_fills_one_slot() {
        let mut status = StageStatus::default();
        let now = Utc::now();
        status.set(Checkpoint::Validated, now);
        assert_eq!(status.validated, Some(now));
        assert_eq!(status.persisted, None);
    }
}
