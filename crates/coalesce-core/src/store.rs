//! The consumed store interface.
//!
//! The engine never talks to a wire protocol directly; everything it needs
//! from the backing object store is expressed as the [`RemoteStore`] trait.
//! A production implementation wraps the authenticated transport session;
//! tests use the in-memory [`StoreSimulator`](crate::sim::StoreSimulator).
//!
//! Session and part bookkeeping is durable state owned by the store. The
//! engine only observes it (via [`RemoteStore::list_parts`] and
//! [`RemoteStore::list_unfinished_sessions`]) to decide what remains to be
//! sent; it never mutates that state locally.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::planner::PartSizing;
use crate::range::ByteRange;
use crate::source::{EncryptionInfo, FileInfo};

/// Error returned by store operations.
///
/// The transient/permanent split drives the executor's retry policy:
/// transient failures are retried with backoff up to the configured budget,
/// permanent failures fail the part immediately.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A failure worth retrying (connection reset, throttling, timeout).
    #[error("transient store failure: {message}")]
    Transient {
        /// Description of the failure.
        message: String,
    },

    /// A failure that retrying will not fix (bad request, missing object,
    /// checksum rejection).
    #[error("store rejected request: {message}")]
    Permanent {
        /// Description of the rejection.
        message: String,
    },
}

impl StoreError {
    /// Whether the executor should retry this failure.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Convenience result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for crate::error::SynthesisError {
    fn from(err: StoreError) -> Self {
        Self::Store(anyhow::Error::new(err))
    }
}

/// Bookkeeping for one uploaded or copied part, as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartDescriptor {
    /// 1-based part index.
    pub index: u32,
    /// Hex SHA-1 of the part's content.
    pub checksum: String,
    /// Part length in bytes.
    pub length: u64,
    /// When the store accepted the part.
    pub uploaded_at: DateTime<Utc>,
}

/// A listing entry for an unfinished session, as returned by
/// [`RemoteStore::list_unfinished_sessions`].
#[derive(Debug, Clone)]
pub struct UnfinishedSession {
    /// The session identifier.
    pub session_id: String,
    /// The metadata map recorded when the session was started.
    pub file_info: FileInfo,
}

/// Metadata of a finished object; the terminal artifact of a synthesis.
#[derive(Debug, Clone)]
pub struct ObjectDescriptor {
    /// The store's identifier for the object.
    pub object_id: String,
    /// The object name.
    pub name: String,
    /// Total length in bytes.
    pub length: u64,
    /// Hex SHA-1 of the whole object, when the store reports one.
    pub content_sha1: Option<String>,
    /// MIME content type.
    pub content_type: String,
    /// The metadata map written on the object.
    pub file_info: FileInfo,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// A downloaded slice of a remote object, paired with the transport's
/// digest of exactly those bytes. The executor re-hashes the received
/// bytes and compares against `checksum` before using them.
#[derive(Debug, Clone)]
pub struct DownloadedRange {
    /// The slice content.
    pub bytes: Bytes,
    /// Hex SHA-1 of the slice as computed by the transport.
    pub checksum: String,
}

/// The operations the engine consumes from the backing object store.
///
/// Implementations are expected to perform their own authentication and
/// low-level retry of protocol hiccups; the [`StoreError`] split only
/// needs to be honest about which failures are worth the executor's
/// higher-level retry loop.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// The account's part sizing constraints. The minimum is dictated by
    /// the store and may differ per account.
    fn part_sizing(&self) -> PartSizing;

    /// Begin a multi-part session for `name`. Returns the session id.
    async fn start_large_object(
        &self,
        name: &str,
        content_type: &str,
        file_info: &FileInfo,
        destination_encryption: Option<&EncryptionInfo>,
    ) -> StoreResult<String>;

    /// Upload one part. `sha1` is the hex digest of `data`; the store
    /// verifies it before accepting the part.
    async fn upload_part(
        &self,
        session_id: &str,
        index: u32,
        data: Bytes,
        sha1: &str,
    ) -> StoreResult<PartDescriptor>;

    /// Server-side copy a byte range of an existing object in as one part.
    async fn copy_part(
        &self,
        session_id: &str,
        index: u32,
        source_object_id: &str,
        range: ByteRange,
        source_encryption: Option<&EncryptionInfo>,
    ) -> StoreResult<PartDescriptor>;

    /// Commit the session into a finished object. `parts` must be the
    /// complete, index-ordered part list.
    async fn finish_large_object(
        &self,
        session_id: &str,
        parts: &[PartDescriptor],
    ) -> StoreResult<ObjectDescriptor>;

    /// List the parts the store has accepted for a session.
    async fn list_parts(&self, session_id: &str) -> StoreResult<Vec<PartDescriptor>>;

    /// List unfinished sessions whose destination name equals `name`.
    async fn list_unfinished_sessions(&self, name: &str) -> StoreResult<Vec<UnfinishedSession>>;

    /// Abandon a session, discarding its uploaded parts.
    async fn cancel_session(&self, session_id: &str) -> StoreResult<()>;

    /// Download a byte range of an existing object.
    async fn download_range(
        &self,
        object_id: &str,
        range: ByteRange,
        source_encryption: Option<&EncryptionInfo>,
    ) -> StoreResult<DownloadedRange>;

    /// Single-request whole-object upload, for plans small enough to skip
    /// the multi-part machinery.
    async fn upload_object(
        &self,
        name: &str,
        content_type: &str,
        file_info: &FileInfo,
        data: Bytes,
        sha1: &str,
    ) -> StoreResult<ObjectDescriptor>;

    /// Single-request server-side copy of a byte range into a new object.
    async fn copy_object(
        &self,
        name: &str,
        content_type: &str,
        file_info: &FileInfo,
        source_object_id: &str,
        range: ByteRange,
        source_encryption: Option<&EncryptionInfo>,
    ) -> StoreResult<ObjectDescriptor>;
}
