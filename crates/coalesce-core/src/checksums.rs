//! Content digest helpers.
//!
//! The backing store identifies part content by hex-encoded SHA-1, so both
//! the executor (while assembling payloads) and the resume matcher (while
//! re-deriving already-uploaded parts) hash through the helpers here.
//!
//! For payloads assembled incrementally from several segments, use
//! [`StreamingSha1`] to fold chunks in as they arrive instead of buffering
//! the whole part first.

use digest::Digest;

/// Compute the hex-encoded SHA-1 digest of `data`.
///
/// # Examples
///
/// ```
/// use coalesce_core::checksums::hex_sha1;
///
/// let digest = hex_sha1(b"hello");
/// assert_eq!(digest, "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");
/// ```
#[must_use]
pub fn hex_sha1(data: &[u8]) -> String {
    let hash = sha1::Sha1::digest(data);
    hex::encode(hash)
}

/// Incremental SHA-1 over a sequence of chunks.
///
/// # Examples
///
/// ```
/// use coalesce_core::checksums::{StreamingSha1, hex_sha1};
///
/// let mut hasher = StreamingSha1::new();
/// hasher.update(b"hel");
/// hasher.update(b"lo");
/// assert_eq!(hasher.finalize_hex(), hex_sha1(b"hello"));
/// ```
#[derive(Debug, Default)]
pub struct StreamingSha1 {
    inner: sha1::Sha1,
}

impl StreamingSha1 {
    /// Create a fresh hasher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a chunk into the digest.
    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
    }

    /// Consume the hasher and return the hex-encoded digest.
    #[must_use]
    pub fn finalize_hex(self) -> String {
        hex::encode(self.inner.finalize())
    }
}
