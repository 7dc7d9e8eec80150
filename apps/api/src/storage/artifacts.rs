//! Intermediate artifacts: original uploads, extracted content, standardized
//! records and raw backend responses, keyed by filename stem.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::errors::PipelineError;

pub fn upload_key(filename: &str) -> String {
    format!("uploads/{filename}")
}

pub fn extracted_key(stem: &str) -> String {
    format!("extracted/{stem}.json")
}

pub fn standardized_key(stem: &str) -> String {
    format!("standardized/{stem}.json")
}

pub fn raw_response_key(stem: &str) -> String {
    format!("standardized/{stem}_raw.md")
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), PipelineError>;

    /// `None` when nothing is stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, PipelineError>;
}

pub async fn put_json<T: Serialize + Sync>(
    store: &dyn ArtifactStore,
    key: &str,
    value: &T,
) -> Result<(), PipelineError> {
    let body = serde_json::to_vec_pretty(value)
        .map_err(|e| PipelineError::PersistenceError(e.to_string()))?;
    store.put(key, Bytes::from(body), "application/json").await
}

/// A stored artifact that no longer parses is treated as absent.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn ArtifactStore,
    key: &str,
) -> Result<Option<T>, PipelineError> {
    Ok(store
        .get(key)
        .await?
        .and_then(|bytes| serde_json::from_slice(&bytes).ok()))
}

/// S3 / MinIO artifact store.
#[derive(Clone)]
pub struct S3ArtifactStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3ArtifactStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), PipelineError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| {
                PipelineError::PersistenceError(format!("S3 upload of {key} failed: {e}"))
            })?;
        debug!("Stored artifact s3://{}/{}", self.bucket, key);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, PipelineError> {
        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => {
                return Ok(None)
            }
            Err(e) => {
                return Err(PipelineError::PersistenceError(format!(
                    "S3 read of {key} failed: {e}"
                )));
            }
        };

        let body = response
            .body
            .collect()
            .await
            .map_err(|e| PipelineError::PersistenceError(format!("S3 read of {key} failed: {e}")))?;
        Ok(Some(body.into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryArtifacts;

    #[test]
    fn test_keys_follow_stem_layout() {
        assert_eq!(upload_key("jane doe.pdf"), "uploads/jane doe.pdf");
        assert_eq!(extracted_key("jane"), "extracted/jane.json");
        assert_eq!(standardized_key("jane"), "standardized/jane.json");
        assert_eq!(raw_response_key("jane"), "standardized/jane_raw.md");
    }

    #[tokio::test]
    async fn test_json_round_trip_and_corrupt_is_absent() {
        let store = MemoryArtifacts::default();
        put_json(&store, "a.json", &vec!["x", "ü"]).await.unwrap();
        let back: Option<Vec<String>> = get_json(&store, "a.json").await.unwrap();
        assert_eq!(back, Some(vec!["x".to_string(), "ü".to_string()]));

        store
            .put("b.json", Bytes::from_static(b"{not json"), "application/json")
            .await
            .unwrap();
        let corrupt: Option<Vec<String>> = get_json(&store, "b.json").await.unwrap();
        assert!(corrupt.is_none());
        let missing: Option<Vec<String>> = get_json(&store, "c.json").await.unwrap();
        assert!(missing.is_none());
    }
}
