//! Error types for the synthesis engine.
//!
//! Defines [`SynthesisError`], a domain-specific error enum covering every
//! failure the planner and executor may produce. Planning-phase errors are
//! raised synchronously, before any network call; execution-phase errors
//! are raised per part and escalate to the whole synthesis call.
//!
//! Callers can use [`SynthesisError::is_resumable`] to distinguish failures
//! that a later call with auto-resume can pick up from failures that
//! indicate the plan itself is wrong and resuming will not help.

/// Convenience result type for synthesis operations.
pub type Result<T> = std::result::Result<T, SynthesisError>;

/// Synthesis engine error type.
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    // -----------------------------------------------------------------------
    // Planning errors (raised before any transfer)
    // -----------------------------------------------------------------------
    /// A byte range was malformed (`end <= start`).
    #[error("invalid byte range: [{start}, {end})")]
    InvalidRange {
        /// Start offset of the rejected range.
        start: u64,
        /// End offset of the rejected range.
        end: u64,
    },

    /// The write intents leave a hole in the destination object.
    #[error("cannot synthesize an object with holes; uncovered range: [{start}, {end})")]
    UnresolvedGap {
        /// First uncovered byte.
        start: u64,
        /// End of the uncovered run.
        end: u64,
    },

    /// A part cannot be made to satisfy the store's minimum part size, or
    /// the sizing parameters themselves are contradictory.
    #[error("part size constraint violated: {message}")]
    SizeConstraint {
        /// Description of the violated constraint.
        message: String,
    },

    // -----------------------------------------------------------------------
    // Resume errors
    // -----------------------------------------------------------------------
    /// Strict resume was requested but no unfinished session verified.
    #[error("no unfinished session for {destination_name} passed verification")]
    CorruptSession {
        /// The destination object name whose sessions were examined.
        destination_name: String,
    },

    /// A manually supplied session id does not exist in the store.
    #[error("session does not exist: {session_id}")]
    SessionNotFound {
        /// The session id that was not found.
        session_id: String,
    },

    // -----------------------------------------------------------------------
    // Execution errors
    // -----------------------------------------------------------------------
    /// Downloaded source bytes did not match their expected checksum.
    ///
    /// Raised when the download half of a hybrid part, or a verification
    /// slice, produces bytes whose digest disagrees with the expected value.
    /// The synthesis aborts rather than embedding corrupt bytes; parts that
    /// already committed remain in the session.
    #[error("source integrity failure on part {part_index}: expected {expected}, got {actual}")]
    SourceIntegrity {
        /// 1-based index of the part being assembled.
        part_index: u32,
        /// The expected digest (or byte description).
        expected: String,
        /// The digest (or byte description) actually observed.
        actual: String,
    },

    /// A part transfer exhausted its retry budget.
    #[error("part {part_index} failed after {attempts} attempts")]
    PartTransfer {
        /// 1-based index of the failed part.
        part_index: u32,
        /// Number of attempts made.
        attempts: u32,
        /// The last transport error observed.
        #[source]
        source: anyhow::Error,
    },

    /// The synthesis was cancelled before all parts were dispatched.
    ///
    /// Cancellation is not rollback: parts already uploaded remain valid in
    /// the backing session and a future call can resume from them.
    #[error("synthesis cancelled")]
    Cancelled,

    /// A store operation outside a part transfer failed.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl SynthesisError {
    /// Whether a later synthesis call with auto-resume enabled can pick up
    /// where this one left off.
    ///
    /// Transient transport failures, cancellation, and store errors leave
    /// the session intact and are worth retrying. Gaps and size-constraint
    /// violations mean the plan itself is wrong; integrity failures mean a
    /// source changed underneath the plan. Neither is repaired by resuming.
    #[must_use]
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            Self::PartTransfer { .. } | Self::Cancelled | Self::Store(_)
        )
    }
}
