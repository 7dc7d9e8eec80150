//! Persistence Gateway over the resume corpus, plus the artifact store and
//! the stage ledger used for idempotency.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::errors::PipelineError;
use crate::models::resume::StandardizedResume;

pub mod artifacts;
pub mod filter;
pub mod ledger;
pub mod postgres;

pub use artifacts::{ArtifactStore, S3ArtifactStore};
pub use filter::Filter;
pub use ledger::{Checkpoint, RedisStageLedger, StageLedger, StageStatus};
pub use postgres::PgResumeStore;

/// Document-store boundary: `find`, `insert_or_update`, `delete`.
///
/// Identities cross this boundary as `Uuid`s; stores never leak their own
/// row identifiers.
#[async_trait]
pub trait ResumeStore: Send + Sync {
    /// Matching records, oldest first.
    async fn find(&self, filter: &Filter) -> Result<Vec<StandardizedResume>, PipelineError>;

    /// Inserts, or replaces every field of the record with the same
    /// identity key while keeping store-managed columns.
    async fn insert_or_update(&self, record: &StandardizedResume) -> Result<Uuid, PipelineError>;

    /// Number of records removed.
    async fn delete(&self, filter: &Filter) -> Result<u64, PipelineError>;

    /// Connectivity check run before a batch starts.
    async fn ping(&self) -> Result<(), PipelineError>;
}

/// Sole owner of the canonical stored records.
#[derive(Clone)]
pub struct ResumeGateway {
    store: Arc<dyn ResumeStore>,
}

impl ResumeGateway {
    pub fn new(store: Arc<dyn ResumeStore>) -> Self {
        Self { store }
    }

    /// Idempotent by identity key: repeated calls with the same record leave
    /// exactly one stored entity.
    pub async fn upsert(&self, record: &StandardizedResume) -> Result<Uuid, PipelineError> {
        let key = self.store.insert_or_update(record).await?;
        info!(identity_key = %key, name = %record.profile.name, "Record upserted");
        Ok(key)
    }

    pub async fn find(&self, filter: &Filter) -> Result<Vec<StandardizedResume>, PipelineError> {
        self.store.find(filter).await
    }

    pub async fn all(&self) -> Result<Vec<StandardizedResume>, PipelineError> {
        self.store.find(&Filter::All).await
    }

    pub async fn get(&self, key: Uuid) -> Result<StandardizedResume, PipelineError> {
        self.try_get(key)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("resume {key}")))
    }

    pub async fn try_get(&self, key: Uuid) -> Result<Option<StandardizedResume>, PipelineError> {
        Ok(self.store.find(&Filter::identity(key)).await?.into_iter().next())
    }

    pub async fn delete(&self, key: Uuid) -> Result<(), PipelineError> {
        match self.store.delete(&Filter::identity(key)).await? {
            0 => Err(PipelineError::NotFound(format!("resume {key}"))),
            _ => {
                info!(identity_key = %key, "Record deleted");
                Ok(())
            }
        }
    }

    pub async fn ping(&self) -> Result<(), PipelineError> {
        self.store.ping().await
    }
}
