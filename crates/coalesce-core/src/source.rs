//! Transfer sources and write intents.
//!
//! A [`SourceRef`] names where destination bytes come from: a local file on
//! disk or an object already stored remotely. A [`WriteIntent`] binds a
//! source range to a destination range; the resolver consumes an ordered
//! stream of intents to build the segment timeline.
//!
//! Only these two source kinds exist, so `SourceRef` is a closed enum
//! rather than an open trait.

use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::{Result, SynthesisError};
use crate::range::ByteRange;

/// Server-side encryption descriptor attached to a remote source or a
/// destination object. Opaque to the engine; passed through to the store's
/// copy and download operations unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionInfo {
    /// Encryption mode identifier (e.g. `"SSE-B2"`, `"SSE-C"`).
    pub mode: String,
    /// Optional key identifier for modes that reference a managed key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
}

/// A local on-disk source of bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSource {
    /// Path to the file.
    pub path: PathBuf,
    /// Content length, when already known. Unknown until the file is
    /// stat'd.
    pub length: Option<u64>,
    /// Hex SHA-1 of the whole file, when known up front. Reused as the
    /// finished object's digest when a single local source covers the
    /// entire destination.
    pub content_sha1: Option<String>,
}

impl LocalSource {
    /// Reference a local file of not-yet-known length.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            length: None,
            content_sha1: None,
        }
    }

    /// Reference a local file whose length is already known.
    #[must_use]
    pub fn with_length(path: impl Into<PathBuf>, length: u64) -> Self {
        Self {
            path: path.into(),
            length: Some(length),
            content_sha1: None,
        }
    }

    /// Resolve the file's length, stat'ing it if not yet known.
    pub async fn stat_length(&mut self) -> Result<u64> {
        if let Some(length) = self.length {
            return Ok(length);
        }
        let meta = tokio::fs::metadata(&self.path)
            .await
            .map_err(|e| SynthesisError::Store(anyhow::anyhow!(
                "cannot stat {}: {e}",
                self.path.display()
            )))?;
        self.length = Some(meta.len());
        Ok(meta.len())
    }

    /// Read `range` (absolute file offsets) from the file.
    pub async fn read_range(&self, range: ByteRange) -> Result<Bytes> {
        let mut file = tokio::fs::File::open(&self.path).await.map_err(|e| {
            SynthesisError::Store(anyhow::anyhow!("cannot open {}: {e}", self.path.display()))
        })?;
        file.seek(SeekFrom::Start(range.start())).await.map_err(|e| {
            SynthesisError::Store(anyhow::anyhow!("cannot seek {}: {e}", self.path.display()))
        })?;
        let len = usize::try_from(range.len()).map_err(|_| {
            SynthesisError::Store(anyhow::anyhow!("range {range} too large for this platform"))
        })?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).await.map_err(|e| {
            SynthesisError::Store(anyhow::anyhow!(
                "short read of {} at {range}: {e}",
                self.path.display()
            ))
        })?;
        Ok(Bytes::from(buf))
    }
}

/// An object already stored remotely, usable as a copy or download source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSource {
    /// The store's identifier for the object.
    pub object_id: String,
    /// Object length in bytes.
    pub length: u64,
    /// Source-side encryption, when the object is encrypted.
    pub encryption: Option<EncryptionInfo>,
}

impl RemoteSource {
    /// Reference a remote object by id and length.
    #[must_use]
    pub fn new(object_id: impl Into<String>, length: u64) -> Self {
        Self {
            object_id: object_id.into(),
            length,
            encryption: None,
        }
    }
}

/// Where a run of destination bytes comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRef {
    /// Bytes read from a local file and uploaded.
    Local(LocalSource),
    /// Bytes already present in the store, copied server-side or
    /// downloaded.
    Remote(RemoteSource),
}

impl SourceRef {
    /// Shorthand for a local file source.
    #[must_use]
    pub fn local(path: impl AsRef<Path>) -> Self {
        Self::Local(LocalSource::new(path.as_ref()))
    }

    /// Shorthand for a remote object source.
    #[must_use]
    pub fn remote(object_id: impl Into<String>, length: u64) -> Self {
        Self::Remote(RemoteSource::new(object_id, length))
    }

    /// Whether this source requires uploading local bytes.
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    /// Whether this source lives in the store already.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    /// A stable identity string for this source: the file path for local
    /// sources, the object id for remote ones. Deliberately excludes
    /// transient details such as modification time so that plan
    /// fingerprints survive process restarts.
    #[must_use]
    pub fn identity(&self) -> String {
        match self {
            Self::Local(local) => format!("local:{}", local.path.display()),
            Self::Remote(remote) => format!("remote:{}", remote.object_id),
        }
    }

    /// The source's content length, when known.
    #[must_use]
    pub fn length(&self) -> Option<u64> {
        match self {
            Self::Local(local) => local.length,
            Self::Remote(remote) => Some(remote.length),
        }
    }
}

/// A caller-supplied mapping of one source range onto one destination
/// range. Destination ranges of different intents may overlap; the
/// resolver applies the overlap policy to decide ownership.
#[derive(Debug, Clone)]
pub struct WriteIntent {
    /// Where the bytes come from.
    pub source: SourceRef,
    /// The byte range within the source.
    pub source_range: ByteRange,
    /// The byte range within the destination object.
    pub destination_range: ByteRange,
}

impl WriteIntent {
    /// Create a write intent.
    ///
    /// The source and destination ranges must have equal length; a
    /// mismatch is rejected with [`SynthesisError::InvalidRange`].
    pub fn new(
        source: SourceRef,
        source_range: ByteRange,
        destination_range: ByteRange,
    ) -> Result<Self> {
        if source_range.len() != destination_range.len() {
            return Err(SynthesisError::InvalidRange {
                start: destination_range.start(),
                end: destination_range.start() + source_range.len(),
            });
        }
        Ok(Self {
            source,
            source_range,
            destination_range,
        })
    }

    /// Wrap whole sources into back-to-back intents, computing destination
    /// offsets automatically. This is the concatenation helper: each source
    /// lands immediately after the previous one.
    ///
    /// Every source must have a known length.
    pub fn sequence(sources: impl IntoIterator<Item = SourceRef>) -> Result<Vec<Self>> {
        let mut intents = Vec::new();
        let mut cursor = 0u64;
        for source in sources {
            let Some(length) = source.length() else {
                return Err(SynthesisError::Store(anyhow::anyhow!(
                    "cannot sequence source of unknown length: {}",
                    source.identity()
                )));
            };
            let source_range = ByteRange::with_length(0, length)?;
            let destination_range = ByteRange::with_length(cursor, length)?;
            cursor += length;
            intents.push(Self {
                source,
                source_range,
                destination_range,
            });
        }
        Ok(intents)
    }
}

/// A string-keyed metadata map attached to sessions and finished objects.
pub type FileInfo = BTreeMap<String, String>;
