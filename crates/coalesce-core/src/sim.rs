//! In-memory store simulator.
//!
//! A deterministic [`RemoteStore`] implementation for tests: sessions,
//! parts, and finished objects live in concurrent maps, uploads are
//! checksum-verified the way the real store verifies them, and faults can
//! be injected per operation to exercise the executor's retry and
//! integrity paths.
//!
//! The simulator ships as a public module so downstream users can drive
//! the whole engine in their own tests without a network.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::checksums::hex_sha1;
use crate::planner::PartSizing;
use crate::range::ByteRange;
use crate::source::{EncryptionInfo, FileInfo};
use crate::store::{
    DownloadedRange, ObjectDescriptor, PartDescriptor, RemoteStore, StoreError, StoreResult,
    UnfinishedSession,
};

/// A stored object.
#[derive(Debug, Clone)]
struct SimObject {
    name: String,
    content_type: String,
    file_info: FileInfo,
    data: Bytes,
}

/// An unfinished session and its accepted parts.
#[derive(Debug, Clone)]
struct SimSession {
    name: String,
    content_type: String,
    file_info: FileInfo,
    parts: BTreeMap<u32, (PartDescriptor, Bytes)>,
}

/// Deterministic in-memory object store.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use coalesce_core::range::ByteRange;
/// use coalesce_core::sim::StoreSimulator;
/// use coalesce_core::store::RemoteStore;
///
/// let sim = StoreSimulator::new();
/// let object_id = sim.put_object("seed.bin", Bytes::from_static(b"hello"));
///
/// # tokio_test::block_on(async {
/// let range = ByteRange::new(0, 5).unwrap();
/// let downloaded = sim.download_range(&object_id, range, None).await.unwrap();
/// assert_eq!(downloaded.bytes.as_ref(), b"hello");
/// # });
/// ```
#[derive(Debug, Default)]
pub struct StoreSimulator {
    objects: DashMap<String, SimObject>,
    sessions: DashMap<String, SimSession>,
    /// Remaining injected transient failures, keyed by operation name.
    transient_faults: DashMap<String, u32>,
    /// Objects whose downloads return corrupted bytes.
    corrupt_objects: DashMap<String, ()>,
    /// Operation names in call order, for asserting what ran.
    call_log: Mutex<Vec<String>>,
    sizing: Mutex<PartSizing>,
}

impl StoreSimulator {
    /// Create a simulator with default part sizing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a simulator that reports the given part sizing to the
    /// engine. Tests use this to shrink the minimum part size to
    /// test-friendly magnitudes.
    #[must_use]
    pub fn with_part_sizing(sizing: PartSizing) -> Self {
        let sim = Self::default();
        *sim.sizing.lock() = sizing;
        sim
    }

    /// Seed an object directly, returning its id.
    pub fn put_object(&self, name: &str, data: Bytes) -> String {
        let object_id = format!("obj-{}", uuid::Uuid::new_v4());
        self.objects.insert(
            object_id.clone(),
            SimObject {
                name: name.to_owned(),
                content_type: "application/octet-stream".to_owned(),
                file_info: FileInfo::new(),
                data,
            },
        );
        object_id
    }

    /// The raw bytes of a stored object.
    #[must_use]
    pub fn object_bytes(&self, object_id: &str) -> Option<Bytes> {
        self.objects.get(object_id).map(|o| o.data.clone())
    }

    /// Find a finished object by name.
    #[must_use]
    pub fn object_named(&self, name: &str) -> Option<(String, Bytes)> {
        self.objects
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| (entry.key().clone(), entry.data.clone()))
    }

    /// Whether an unfinished session still exists.
    #[must_use]
    pub fn session_exists(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Fail the next `count` invocations of `operation` with a transient
    /// error.
    pub fn inject_transient(&self, operation: &str, count: u32) {
        self.transient_faults.insert(operation.to_owned(), count);
    }

    /// Corrupt all future downloads of `object_id`: returned bytes are
    /// flipped while the reported checksum stays honest, so the caller's
    /// digest comparison must fail.
    pub fn corrupt_downloads_of(&self, object_id: &str) {
        self.corrupt_objects.insert(object_id.to_owned(), ());
    }

    /// How many times `operation` was invoked.
    #[must_use]
    pub fn call_count(&self, operation: &str) -> usize {
        self.call_log
            .lock()
            .iter()
            .filter(|op| op.as_str() == operation)
            .count()
    }

    /// Record a call and pop one injected fault, if armed.
    fn enter(&self, operation: &str) -> StoreResult<()> {
        self.call_log.lock().push(operation.to_owned());
        if let Some(mut remaining) = self.transient_faults.get_mut(operation) {
            if *remaining > 0 {
                *remaining -= 1;
                debug!(operation, "simulator: injected transient failure");
                return Err(StoreError::Transient {
                    message: format!("injected failure of {operation}"),
                });
            }
        }
        Ok(())
    }

    fn read_object(&self, object_id: &str) -> StoreResult<SimObject> {
        self.objects
            .get(object_id)
            .map(|o| o.clone())
            .ok_or_else(|| StoreError::Permanent {
                message: format!("no such object: {object_id}"),
            })
    }

    fn slice_object(object: &SimObject, range: ByteRange) -> StoreResult<Bytes> {
        let start = usize::try_from(range.start()).map_err(|_| StoreError::Permanent {
            message: format!("range {range} out of bounds"),
        })?;
        let end = usize::try_from(range.end()).map_err(|_| StoreError::Permanent {
            message: format!("range {range} out of bounds"),
        })?;
        if end > object.data.len() {
            return Err(StoreError::Permanent {
                message: format!(
                    "range {range} exceeds object length {}",
                    object.data.len()
                ),
            });
        }
        Ok(object.data.slice(start..end))
    }

    fn store_object(
        &self,
        name: &str,
        content_type: &str,
        file_info: &FileInfo,
        data: Bytes,
    ) -> ObjectDescriptor {
        let object_id = format!("obj-{}", uuid::Uuid::new_v4());
        let descriptor = ObjectDescriptor {
            object_id: object_id.clone(),
            name: name.to_owned(),
            length: data.len() as u64,
            content_sha1: Some(hex_sha1(&data)),
            content_type: content_type.to_owned(),
            file_info: file_info.clone(),
            created_at: Utc::now(),
        };
        self.objects.insert(
            object_id,
            SimObject {
                name: name.to_owned(),
                content_type: content_type.to_owned(),
                file_info: file_info.clone(),
                data,
            },
        );
        descriptor
    }
}

#[async_trait]
impl RemoteStore for StoreSimulator {
    fn part_sizing(&self) -> PartSizing {
        *self.sizing.lock()
    }

    async fn start_large_object(
        &self,
        name: &str,
        content_type: &str,
        file_info: &FileInfo,
        _destination_encryption: Option<&EncryptionInfo>,
    ) -> StoreResult<String> {
        self.enter("start_large_object")?;
        let session_id = format!("sess-{}", uuid::Uuid::new_v4());
        self.sessions.insert(
            session_id.clone(),
            SimSession {
                name: name.to_owned(),
                content_type: content_type.to_owned(),
                file_info: file_info.clone(),
                parts: BTreeMap::new(),
            },
        );
        Ok(session_id)
    }

    async fn upload_part(
        &self,
        session_id: &str,
        index: u32,
        data: Bytes,
        sha1: &str,
    ) -> StoreResult<PartDescriptor> {
        self.enter("upload_part")?;
        let actual = hex_sha1(&data);
        if actual != sha1 {
            return Err(StoreError::Permanent {
                message: format!("part {index} checksum mismatch: {sha1} vs {actual}"),
            });
        }
        let descriptor = PartDescriptor {
            index,
            checksum: actual,
            length: data.len() as u64,
            uploaded_at: Utc::now(),
        };
        let mut session =
            self.sessions
                .get_mut(session_id)
                .ok_or_else(|| StoreError::Permanent {
                    message: format!("no such session: {session_id}"),
                })?;
        session.parts.insert(index, (descriptor.clone(), data));
        Ok(descriptor)
    }

    async fn copy_part(
        &self,
        session_id: &str,
        index: u32,
        source_object_id: &str,
        range: ByteRange,
        _source_encryption: Option<&EncryptionInfo>,
    ) -> StoreResult<PartDescriptor> {
        self.enter("copy_part")?;
        let object = self.read_object(source_object_id)?;
        let data = Self::slice_object(&object, range)?;
        let descriptor = PartDescriptor {
            index,
            checksum: hex_sha1(&data),
            length: data.len() as u64,
            uploaded_at: Utc::now(),
        };
        let mut session =
            self.sessions
                .get_mut(session_id)
                .ok_or_else(|| StoreError::Permanent {
                    message: format!("no such session: {session_id}"),
                })?;
        session.parts.insert(index, (descriptor.clone(), data));
        Ok(descriptor)
    }

    async fn finish_large_object(
        &self,
        session_id: &str,
        parts: &[PartDescriptor],
    ) -> StoreResult<ObjectDescriptor> {
        self.enter("finish_large_object")?;
        let session = self
            .sessions
            .get(session_id)
            .map(|s| s.clone())
            .ok_or_else(|| StoreError::Permanent {
                message: format!("no such session: {session_id}"),
            })?;

        let mut assembled = BytesMut::new();
        for (expected_index, descriptor) in (1u32..).zip(parts) {
            if descriptor.index != expected_index {
                return Err(StoreError::Permanent {
                    message: format!(
                        "part list not contiguous: expected index {expected_index}, got {}",
                        descriptor.index
                    ),
                });
            }
            let (stored, data) =
                session
                    .parts
                    .get(&descriptor.index)
                    .ok_or_else(|| StoreError::Permanent {
                        message: format!("part {} was never uploaded", descriptor.index),
                    })?;
            if stored.checksum != descriptor.checksum {
                return Err(StoreError::Permanent {
                    message: format!("part {} checksum disagrees", descriptor.index),
                });
            }
            assembled.extend_from_slice(data);
        }

        let descriptor = self.store_object(
            &session.name,
            &session.content_type,
            &session.file_info,
            assembled.freeze(),
        );
        self.sessions.remove(session_id);
        Ok(descriptor)
    }

    async fn list_parts(&self, session_id: &str) -> StoreResult<Vec<PartDescriptor>> {
        self.enter("list_parts")?;
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| StoreError::Permanent {
                message: format!("no such session: {session_id}"),
            })?;
        Ok(session
            .parts
            .values()
            .map(|(descriptor, _)| descriptor.clone())
            .collect())
    }

    async fn list_unfinished_sessions(&self, name: &str) -> StoreResult<Vec<UnfinishedSession>> {
        self.enter("list_unfinished_sessions")?;
        Ok(self
            .sessions
            .iter()
            .filter(|entry| entry.name == name)
            .map(|entry| UnfinishedSession {
                session_id: entry.key().clone(),
                file_info: entry.file_info.clone(),
            })
            .collect())
    }

    async fn cancel_session(&self, session_id: &str) -> StoreResult<()> {
        self.enter("cancel_session")?;
        self.sessions
            .remove(session_id)
            .ok_or_else(|| StoreError::Permanent {
                message: format!("no such session: {session_id}"),
            })?;
        Ok(())
    }

    async fn download_range(
        &self,
        object_id: &str,
        range: ByteRange,
        _source_encryption: Option<&EncryptionInfo>,
    ) -> StoreResult<DownloadedRange> {
        self.enter("download_range")?;
        let object = self.read_object(object_id)?;
        let data = Self::slice_object(&object, range)?;
        let checksum = hex_sha1(&data);
        let bytes = if self.corrupt_objects.contains_key(object_id) {
            let mut corrupted = BytesMut::from(data.as_ref());
            corrupted[0] ^= 0xFF;
            corrupted.freeze()
        } else {
            data
        };
        Ok(DownloadedRange { bytes, checksum })
    }

    async fn upload_object(
        &self,
        name: &str,
        content_type: &str,
        file_info: &FileInfo,
        data: Bytes,
        sha1: &str,
    ) -> StoreResult<ObjectDescriptor> {
        self.enter("upload_object")?;
        let actual = hex_sha1(&data);
        if actual != sha1 {
            return Err(StoreError::Permanent {
                message: format!("object checksum mismatch: {sha1} vs {actual}"),
            });
        }
        Ok(self.store_object(name, content_type, file_info, data))
    }

    async fn copy_object(
        &self,
        name: &str,
        content_type: &str,
        file_info: &FileInfo,
        source_object_id: &str,
        range: ByteRange,
        _source_encryption: Option<&EncryptionInfo>,
    ) -> StoreResult<ObjectDescriptor> {
        self.enter("copy_object")?;
        let object = self.read_object(source_object_id)?;
        let data = Self::slice_object(&object, range)?;
        Ok(self.store_object(name, content_type, file_info, data))
    }
}
