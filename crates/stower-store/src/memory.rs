//! In-memory object store.
//!
//! Journals every transport call so tests can assert on exactly which
//! operations a code path issued, and supports scripted failure injection
//! for exercising retry and abort paths. Multipart uploads are assembled
//! from their recorded parts at completion time.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use uuid::Uuid;

use crate::{CompletedPart, ObjectMetadata, ObjectStore, ObjectSummary, StoreError};

/// Record of one transport call, in invocation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    PutObject {
        bucket: String,
        key: String,
        size: u64,
        content_type: String,
    },
    HeadBucket {
        bucket: String,
    },
    HeadObject {
        bucket: String,
        key: String,
    },
    ListObjects {
        bucket: String,
        prefix: String,
    },
    CreateMultipart {
        bucket: String,
        key: String,
        upload_id: String,
    },
    UploadPart {
        upload_id: String,
        part_number: i32,
        size: u64,
    },
    CompleteMultipart {
        upload_id: String,
        part_numbers: Vec<i32>,
    },
    AbortMultipart {
        upload_id: String,
    },
}

struct StoredObject {
    body: Bytes,
    content_type: String,
    etag: String,
}

struct UploadState {
    bucket: String,
    key: String,
    content_type: String,
    parts: BTreeMap<i32, (String, Bytes)>,
}

#[derive(Default)]
struct Inner {
    // bucket -> key -> object
    objects: HashMap<String, BTreeMap<String, StoredObject>>,
    uploads: HashMap<String, UploadState>,
    journal: Vec<StoreOp>,
    fail_put: u32,
    fail_create: u32,
    fail_complete: u32,
    fail_parts: HashMap<i32, u32>,
    deny_head_object: bool,
}

/// Thread-safe in-memory [`ObjectStore`].
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the operation journal.
    pub fn journal(&self) -> Vec<StoreOp> {
        self.inner.lock().unwrap().journal.clone()
    }

    /// Number of `put_object` calls issued so far.
    pub fn puts(&self) -> usize {
        self.count(|op| matches!(op, StoreOp::PutObject { .. }))
    }

    /// Number of `create_multipart` calls issued so far.
    pub fn multipart_creates(&self) -> usize {
        self.count(|op| matches!(op, StoreOp::CreateMultipart { .. }))
    }

    /// Number of `complete_multipart` calls issued so far.
    pub fn multipart_completes(&self) -> usize {
        self.count(|op| matches!(op, StoreOp::CompleteMultipart { .. }))
    }

    /// Number of `abort_multipart` calls issued so far.
    pub fn multipart_aborts(&self) -> usize {
        self.count(|op| matches!(op, StoreOp::AbortMultipart { .. }))
    }

    /// Body of a stored object, if present.
    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        let inner = self.inner.lock().unwrap();
        inner
            .objects
            .get(bucket)
            .and_then(|b| b.get(key))
            .map(|o| o.body.clone())
    }

    /// Content type recorded for a stored object, if present.
    pub fn object_content_type(&self, bucket: &str, key: &str) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .objects
            .get(bucket)
            .and_then(|b| b.get(key))
            .map(|o| o.content_type.clone())
    }

    /// Number of multipart uploads that are neither completed nor aborted.
    pub fn open_uploads(&self) -> usize {
        self.inner.lock().unwrap().uploads.len()
    }

    /// Fails the next `times` `put_object` calls.
    pub fn fail_put_object(&self, times: u32) {
        self.inner.lock().unwrap().fail_put = times;
    }

    /// Fails the next `times` `create_multipart` calls.
    pub fn fail_create_multipart(&self, times: u32) {
        self.inner.lock().unwrap().fail_create = times;
    }

    /// Fails the next `times` `complete_multipart` calls.
    pub fn fail_complete_multipart(&self, times: u32) {
        self.inner.lock().unwrap().fail_complete = times;
    }

    /// Fails the next `times` `upload_part` calls for `part_number`.
    pub fn fail_upload_part(&self, part_number: i32, times: u32) {
        self.inner
            .lock()
            .unwrap()
            .fail_parts
            .insert(part_number, times);
    }

    /// Makes `head_object` answer `PermissionDenied` (for probing the
    /// list fallback).
    pub fn deny_head_object(&self, deny: bool) {
        self.inner.lock().unwrap().deny_head_object = deny;
    }

    fn count(&self, pred: impl Fn(&StoreOp) -> bool) -> usize {
        self.inner.lock().unwrap().journal.iter().filter(|op| pred(op)).count()
    }

    fn take_failure(counter: &mut u32) -> bool {
        if *counter > 0 {
            *counter -= 1;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
        _metadata: Option<&ObjectMetadata>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.journal.push(StoreOp::PutObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: body.len() as u64,
            content_type: content_type.to_string(),
        });
        if Self::take_failure(&mut inner.fail_put) {
            return Err(StoreError::Transport("injected put_object failure".into()));
        }
        inner.objects.entry(bucket.to_string()).or_default().insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
                etag: Uuid::new_v4().simple().to_string(),
            },
        );
        Ok(())
    }

    async fn head_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.journal.push(StoreOp::HeadBucket {
            bucket: bucket.to_string(),
        });
        Ok(())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectSummary, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.journal.push(StoreOp::HeadObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        if inner.deny_head_object {
            return Err(StoreError::PermissionDenied("HeadObject forbidden".into()));
        }
        match inner.objects.get(bucket).and_then(|b| b.get(key)) {
            Some(obj) => Ok(ObjectSummary {
                key: key.to_string(),
                size: obj.body.len() as u64,
                etag: Some(obj.etag.clone()),
            }),
            None => Err(StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
        }
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectSummary>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.journal.push(StoreOp::ListObjects {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
        });
        let objects = inner
            .objects
            .get(bucket)
            .map(|b| {
                b.iter()
                    .filter(|(key, _)| key.starts_with(prefix))
                    .map(|(key, obj)| ObjectSummary {
                        key: key.clone(),
                        size: obj.body.len() as u64,
                        etag: Some(obj.etag.clone()),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(objects)
    }

    async fn create_multipart(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        _metadata: Option<&ObjectMetadata>,
    ) -> Result<String, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_create > 0 {
            inner.fail_create -= 1;
            inner.journal.push(StoreOp::CreateMultipart {
                bucket: bucket.to_string(),
                key: key.to_string(),
                upload_id: String::new(),
            });
            return Err(StoreError::Transport(
                "injected create_multipart failure".into(),
            ));
        }
        let upload_id = Uuid::new_v4().to_string();
        inner.journal.push(StoreOp::CreateMultipart {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id: upload_id.clone(),
        });
        inner.uploads.insert(
            upload_id.clone(),
            UploadState {
                bucket: bucket.to_string(),
                key: key.to_string(),
                content_type: content_type.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.journal.push(StoreOp::UploadPart {
            upload_id: upload_id.to_string(),
            part_number,
            size: body.len() as u64,
        });
        if let Some(remaining) = inner.fail_parts.get_mut(&part_number) {
            if Self::take_failure(remaining) {
                return Err(StoreError::Transport(format!(
                    "injected failure for part {part_number}"
                )));
            }
        }
        let upload = inner
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| StoreError::NoSuchUpload(upload_id.to_string()))?;
        let etag = format!("etag-{part_number}-{}", Uuid::new_v4().simple());
        upload.parts.insert(part_number, (etag.clone(), body));
        Ok(etag)
    }

    async fn complete_multipart(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.journal.push(StoreOp::CompleteMultipart {
            upload_id: upload_id.to_string(),
            part_numbers: parts.iter().map(|p| p.part_number).collect(),
        });
        if Self::take_failure(&mut inner.fail_complete) {
            return Err(StoreError::Transport(
                "injected complete_multipart failure".into(),
            ));
        }
        let upload = inner
            .uploads
            .get(upload_id)
            .ok_or_else(|| StoreError::NoSuchUpload(upload_id.to_string()))?;

        // Real stores reject unsorted or unknown parts; mirror that here.
        let mut body = BytesMut::new();
        let mut previous = 0;
        for part in parts {
            if part.part_number <= previous {
                return Err(StoreError::Transport(format!(
                    "part numbers not strictly increasing at {}",
                    part.part_number
                )));
            }
            previous = part.part_number;
            let (etag, data) = upload.parts.get(&part.part_number).ok_or_else(|| {
                StoreError::Transport(format!("part {} was never uploaded", part.part_number))
            })?;
            if *etag != part.etag {
                return Err(StoreError::Transport(format!(
                    "etag mismatch for part {}",
                    part.part_number
                )));
            }
            body.extend_from_slice(data);
        }

        let (bucket, key, content_type) =
            (upload.bucket.clone(), upload.key.clone(), upload.content_type.clone());
        inner.uploads.remove(upload_id);
        inner.objects.entry(bucket).or_default().insert(
            key,
            StoredObject {
                body: body.freeze(),
                content_type,
                etag: format!("{}-{}", Uuid::new_v4().simple(), parts.len()),
            },
        );
        Ok(())
    }

    async fn abort_multipart(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.journal.push(StoreOp::AbortMultipart {
            upload_id: upload_id.to_string(),
        });
        inner
            .uploads
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NoSuchUpload(upload_id.to_string()))
    }
}
