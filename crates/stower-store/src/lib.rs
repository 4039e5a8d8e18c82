//! Object-store transport contract.
//!
//! The upload core talks to the store exclusively through [`ObjectStore`];
//! any backend implementing the trait is pluggable. This crate also ships
//! [`MemoryStore`], a journaling in-memory implementation used by the test
//! suites and by the CLI's rehearsal mode.

mod content_type;
mod memory;

pub use content_type::guess_content_type;
pub use memory::{MemoryStore, StoreOp};

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

/// Errors produced by object-store transports.
///
/// `NotFound` and `PermissionDenied` are distinct kinds so callers can tell
/// "the object is absent" from "the probe was forbidden" (see
/// [`object_exists`]).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    #[error("access denied: {0}")]
    PermissionDenied(String),

    #[error("no such multipart upload: {0}")]
    NoSuchUpload(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// A finished multipart part, echoed back at completion time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// 1-based part number.
    pub part_number: i32,
    /// Integrity token returned by the store for this part.
    pub etag: String,
}

/// Object metadata returned by `head_object` / `list_objects`.
#[derive(Debug, Clone)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub etag: Option<String>,
}

/// Extra key/value metadata attached to an object at upload time.
pub type ObjectMetadata = HashMap<String, String>;

/// The operation set the upload core depends on.
///
/// Implementations must be safe to share across worker tasks. Cancellation
/// is not threaded through the trait; callers check their token between
/// calls.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores one object in a single shot.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
        metadata: Option<&ObjectMetadata>,
    ) -> Result<(), StoreError>;

    /// Succeeds iff the bucket exists and is accessible.
    async fn head_bucket(&self, bucket: &str) -> Result<(), StoreError>;

    /// Returns metadata for an object, `StoreError::NotFound` if absent.
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectSummary, StoreError>;

    /// Lists all keys under `prefix`.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectSummary>, StoreError>;

    /// Starts a multipart upload, returning the server-issued upload-id.
    async fn create_multipart(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        metadata: Option<&ObjectMetadata>,
    ) -> Result<String, StoreError>;

    /// Uploads one numbered part, returning its etag.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String, StoreError>;

    /// Assembles the object from `parts`, which must be sorted ascending
    /// by part number.
    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), StoreError>;

    /// Releases the server-side state of an unfinished multipart upload.
    async fn abort_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StoreError>;
}

/// Checks whether an object exists.
///
/// Prefers `head_object`. Under restricted IAM a head can be forbidden
/// while listing is still allowed, so `PermissionDenied` falls back to a
/// `list_objects` probe on the key as prefix.
pub async fn object_exists(
    store: &dyn ObjectStore,
    bucket: &str,
    key: &str,
) -> Result<bool, StoreError> {
    match store.head_object(bucket, key).await {
        Ok(_) => Ok(true),
        Err(StoreError::NotFound { .. }) => Ok(false),
        Err(StoreError::PermissionDenied(reason)) => {
            debug!(
                bucket = %bucket,
                key = %key,
                reason = %reason,
                "head_object denied, probing via list_objects"
            );
            let objects = store.list_objects(bucket, key).await?;
            Ok(objects.iter().any(|o| o.key == key))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn object_exists_via_head() {
        let store = MemoryStore::new();
        store
            .put_object("b", "k", Bytes::from_static(b"x"), "text/plain", None)
            .await
            .unwrap();

        assert!(object_exists(&store, "b", "k").await.unwrap());
        assert!(!object_exists(&store, "b", "other").await.unwrap());
    }

    #[tokio::test]
    async fn object_exists_falls_back_to_list_when_head_denied() {
        let store = MemoryStore::new();
        store
            .put_object("b", "data/report.csv", Bytes::from_static(b"x"), "text/csv", None)
            .await
            .unwrap();
        store.deny_head_object(true);

        assert!(object_exists(&store, "b", "data/report.csv").await.unwrap());
        assert!(!object_exists(&store, "b", "data/missing.csv").await.unwrap());

        // Both probes should have gone through list_objects.
        let lists = store
            .journal()
            .iter()
            .filter(|op| matches!(op, StoreOp::ListObjects { .. }))
            .count();
        assert_eq!(lists, 2);
    }
}
