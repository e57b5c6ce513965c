//! Plan execution against a bounded worker pool.
//!
//! The executor takes an immutable [`PartPlan`], a session, and the set of
//! parts a resumed session already holds, and drives everything else to
//! completion: uploads and server-side copies run as tokio tasks gated by
//! a semaphore sized to the configured parallelism, each with its own
//! timeout and exponential-backoff retry budget.
//!
//! Each part moves through `Pending → InFlight → Verified → Committed`,
//! or ends `Failed`. Parts inherited from a resumed session enter
//! `Committed` directly and are never re-transferred. Part indices are
//! assigned before any transfer starts; completions may land out of
//! order, but the finish call is only made once every part is committed.
//!
//! Download halves of hybrid parts and verification slices are re-hashed
//! on arrival; a digest disagreement aborts the whole synthesis with
//! [`SynthesisError::SourceIntegrity`] rather than embedding bytes that
//! differ from what was planned. Cancellation stops new dispatch
//! immediately and lets in-flight transfers drain; uploaded parts stay
//! valid in the session for a later resume.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::{Semaphore, watch};
use tracing::{debug, warn};

use crate::checksums::{StreamingSha1, hex_sha1};
use crate::config::EngineConfig;
use crate::error::{Result, SynthesisError};
use crate::planner::{PartKind, PartPlan, PlannedPart};
use crate::source::{FileInfo, SourceRef};
use crate::store::{ObjectDescriptor, PartDescriptor, RemoteStore, StoreError};

/// Lifecycle of one planned part during execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartState {
    Pending,
    InFlight,
    Verified,
    Committed,
    Failed,
}

/// Cancellation signal for an in-progress synthesis.
///
/// Dropping the handle does not cancel; call [`CancelHandle::cancel`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Create a connected handle/token pair.
    #[must_use]
    pub fn new() -> (Self, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, CancelToken { rx })
    }

    /// Request cancellation. No new part transfers are dispatched after
    /// this; transfers already in flight finish or abort on their own.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// The observing end of a [`CancelHandle`].
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// A token that can never fire; used when the caller supplies none.
    #[must_use]
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Outcome of one transfer attempt, before retry classification.
enum AttemptFailure {
    /// Retrying cannot help (integrity failure, store rejection).
    Fatal(SynthesisError),
    /// Worth another attempt if the budget allows.
    Transient(anyhow::Error),
}

type AttemptResult<T> = std::result::Result<T, AttemptFailure>;

/// Executes part plans against a store with bounded parallelism.
pub struct PlanExecutor<S: RemoteStore + ?Sized> {
    store: Arc<S>,
    config: EngineConfig,
}

impl<S: RemoteStore + ?Sized> std::fmt::Debug for PlanExecutor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanExecutor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: RemoteStore + ?Sized + 'static> PlanExecutor<S> {
    /// Create an executor over the given store.
    pub fn new(store: Arc<S>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Execute a multi-part plan within an existing session.
    ///
    /// `committed` holds the parts a resumed session already carries; they
    /// are committed without re-transfer. On success the session is
    /// finished and the object descriptor returned. On failure the session
    /// is left as-is so a later call can resume it.
    pub async fn execute(
        &self,
        plan: &PartPlan,
        session_id: &str,
        committed: BTreeMap<u32, PartDescriptor>,
        cancel: &CancelToken,
    ) -> Result<ObjectDescriptor> {
        let states: Arc<Mutex<BTreeMap<u32, PartState>>> = Arc::new(Mutex::new(
            plan.parts
                .iter()
                .map(|p| {
                    let state = if committed.contains_key(&p.index) {
                        PartState::Committed
                    } else {
                        PartState::Pending
                    };
                    (p.index, state)
                })
                .collect(),
        ));
        debug!(
            session_id,
            parts = plan.parts.len(),
            resumed = committed.len(),
            "executing part plan"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.parallelism));
        let mut handles = Vec::new();
        for part in &plan.parts {
            if committed.contains_key(&part.index) {
                debug!(part_index = part.index, "part already committed; skipping");
                continue;
            }
            let part = part.clone();
            let store = Arc::clone(&self.store);
            let config = self.config.clone();
            let semaphore = Arc::clone(&semaphore);
            let states = Arc::clone(&states);
            let cancel = cancel.clone();
            let session_id = session_id.to_owned();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| SynthesisError::Store(anyhow::anyhow!(e)))?;
                if cancel.is_cancelled() {
                    return Err(SynthesisError::Cancelled);
                }
                states.lock().insert(part.index, PartState::InFlight);
                let result = transfer_part(store.as_ref(), &config, &part, &session_id).await;
                let next = match &result {
                    Ok(_) => {
                        // The store confirmed the checksum; the part is
                        // verified, and its descriptor commits it.
                        states.lock().insert(part.index, PartState::Verified);
                        PartState::Committed
                    }
                    Err(_) => PartState::Failed,
                };
                states.lock().insert(part.index, next);
                result.map(|descriptor| (part.index, descriptor))
            }));
        }

        let mut descriptors = committed;
        let mut first_error: Option<SynthesisError> = None;
        for joined in futures::future::join_all(handles).await {
            let outcome = joined
                .map_err(|e| SynthesisError::Store(anyhow::anyhow!("worker panicked: {e}")))?;
            match outcome {
                Ok((index, descriptor)) => {
                    descriptors.insert(index, descriptor);
                }
                Err(err) => {
                    // Integrity failures dominate: they mean the result
                    // would have been wrong, not merely late.
                    let dominates = matches!(err, SynthesisError::SourceIntegrity { .. })
                        && !matches!(first_error, Some(SynthesisError::SourceIntegrity { .. }));
                    if first_error.is_none() || dominates {
                        first_error = Some(err);
                    }
                }
            }
        }
        if let Some(err) = first_error {
            warn!(session_id, error = %err, "synthesis aborted; session remains resumable");
            return Err(err);
        }

        debug_assert!(
            states.lock().values().all(|s| *s == PartState::Committed),
            "finish requires every part committed"
        );
        let parts: Vec<PartDescriptor> = descriptors.into_values().collect();
        let object = self
            .store
            .finish_large_object(session_id, &parts)
            .await
            .map_err(|e| SynthesisError::Store(anyhow::Error::new(e)))?;
        debug!(
            session_id,
            object_id = %object.object_id,
            length = object.length,
            "synthesis committed"
        );
        Ok(object)
    }

    /// Execute a single-part plan as one whole-object request, bypassing
    /// the session machinery entirely.
    pub async fn execute_single(
        &self,
        plan: &PartPlan,
        destination_name: &str,
        content_type: &str,
        file_info: &FileInfo,
    ) -> Result<ObjectDescriptor> {
        let part = plan
            .parts
            .first()
            .ok_or_else(|| SynthesisError::SizeConstraint {
                message: "cannot execute an empty plan".to_owned(),
            })?;

        let store = self.store.as_ref();
        match part.kind {
            PartKind::RemoteCopy => {
                let segment = &part.payload[0];
                let SourceRef::Remote(remote) = &segment.source else {
                    unreachable!("copy parts have remote payload");
                };
                with_retries(&self.config, part.index, || async move {
                    store
                        .copy_object(
                            destination_name,
                            content_type,
                            file_info,
                            &remote.object_id,
                            segment.source_range,
                            remote.encryption.as_ref(),
                        )
                        .await
                        .map_err(|e| classify_store_error(part.index, e))
                })
                .await
            }
            PartKind::LocalUpload | PartKind::HybridDownloadReupload => {
                with_retries(&self.config, part.index, || async move {
                    let (data, sha1) = assemble_payload(store, part).await?;
                    store
                        .upload_object(destination_name, content_type, file_info, data, &sha1)
                        .await
                        .map_err(|e| classify_store_error(part.index, e))
                })
                .await
            }
        }
    }
}

/// Transfer one part with timeout and retry.
async fn transfer_part<S: RemoteStore + ?Sized>(
    store: &S,
    config: &EngineConfig,
    part: &PlannedPart,
    session_id: &str,
) -> Result<PartDescriptor> {
    match part.kind {
        PartKind::RemoteCopy => {
            let segment = &part.payload[0];
            let SourceRef::Remote(remote) = &segment.source else {
                unreachable!("copy parts have remote payload");
            };
            with_retries(config, part.index, || async move {
                store
                    .copy_part(
                        session_id,
                        part.index,
                        &remote.object_id,
                        segment.source_range,
                        remote.encryption.as_ref(),
                    )
                    .await
                    .map_err(|e| classify_store_error(part.index, e))
            })
            .await
        }
        PartKind::LocalUpload | PartKind::HybridDownloadReupload => {
            with_retries(config, part.index, || async move {
                let (data, sha1) = assemble_payload(store, part).await?;
                store
                    .upload_part(session_id, part.index, data, &sha1)
                    .await
                    .map_err(|e| classify_store_error(part.index, e))
            })
            .await
        }
    }
}

/// Run one attempt per loop iteration, with a per-attempt timeout,
/// doubling the backoff between attempts. Fatal failures short-circuit.
async fn with_retries<T, F, Fut>(
    config: &EngineConfig,
    part_index: u32,
    mut attempt_fn: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AttemptResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let outcome = tokio::time::timeout(config.part_timeout, attempt_fn()).await;
        let last_error = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(AttemptFailure::Fatal(err))) => return Err(err),
            Ok(Err(AttemptFailure::Transient(err))) => err,
            Err(_elapsed) => anyhow::anyhow!(
                "attempt timed out after {:?}",
                config.part_timeout
            ),
        };
        if attempt >= config.retry_limit {
            return Err(SynthesisError::PartTransfer {
                part_index,
                attempts: attempt,
                source: last_error,
            });
        }
        let backoff = config.backoff_base * 2u32.saturating_pow(attempt - 1);
        warn!(
            part_index,
            attempt,
            backoff_ms = backoff.as_millis() as u64,
            error = %last_error,
            "part transfer attempt failed; backing off"
        );
        tokio::time::sleep(backoff).await;
    }
}

/// Assemble an upload part's payload, hashing as chunks arrive.
///
/// Local segments are read from disk; remote segments (the download half
/// of a hybrid part) are fetched and their digests re-checked against the
/// transport's report. Verification slices are downloaded, byte-compared
/// against the local payload, and discarded.
async fn assemble_payload<S: RemoteStore + ?Sized>(
    store: &S,
    part: &PlannedPart,
) -> AttemptResult<(Bytes, String)> {
    let mut assembled = BytesMut::new();
    let mut hasher = StreamingSha1::new();
    for segment in &part.payload {
        let chunk = match &segment.source {
            SourceRef::Local(local) => local
                .read_range(segment.source_range)
                .await
                .map_err(AttemptFailure::Fatal)?,
            SourceRef::Remote(remote) => {
                let downloaded = store
                    .download_range(
                        &remote.object_id,
                        segment.source_range,
                        remote.encryption.as_ref(),
                    )
                    .await
                    .map_err(|e| classify_store_error(part.index, e))?;
                let actual = hex_sha1(&downloaded.bytes);
                if actual != downloaded.checksum {
                    return Err(AttemptFailure::Fatal(SynthesisError::SourceIntegrity {
                        part_index: part.index,
                        expected: downloaded.checksum,
                        actual,
                    }));
                }
                downloaded.bytes
            }
        };

        if let Some(slice) = &segment.verify {
            let remote_copy = store
                .download_range(&slice.object_id, slice.range, slice.encryption.as_ref())
                .await
                .map_err(|e| classify_store_error(part.index, e))?;
            let actual = hex_sha1(&remote_copy.bytes);
            if actual != remote_copy.checksum {
                return Err(AttemptFailure::Fatal(SynthesisError::SourceIntegrity {
                    part_index: part.index,
                    expected: remote_copy.checksum,
                    actual,
                }));
            }
            if remote_copy.bytes != chunk {
                return Err(AttemptFailure::Fatal(SynthesisError::SourceIntegrity {
                    part_index: part.index,
                    expected: actual,
                    actual: hex_sha1(&chunk),
                }));
            }
            // Verified bytes are discarded; the local chunk is what gets
            // uploaded.
        }

        hasher.update(&chunk);
        assembled.extend_from_slice(&chunk);
    }

    // A part equal to one whole local source with a caller-declared digest
    // reuses that digest instead of the one just computed.
    if let [segment] = part.payload.as_slice() {
        if let SourceRef::Local(local) = &segment.source {
            let covers_whole = segment.source_range.start() == 0
                && Some(segment.source_range.end()) == local.length;
            if covers_whole {
                if let Some(known) = &local.content_sha1 {
                    return Ok((assembled.freeze(), known.clone()));
                }
            }
        }
    }
    Ok((assembled.freeze(), hasher.finalize_hex()))
}

/// Map a store failure into the retry classification.
fn classify_store_error(part_index: u32, err: StoreError) -> AttemptFailure {
    if err.is_transient() {
        AttemptFailure::Transient(anyhow::Error::new(err))
    } else {
        AttemptFailure::Fatal(SynthesisError::PartTransfer {
            part_index,
            attempts: 1,
            source: anyhow::Error::new(err),
        })
    }
}
