//! The synthesis entry point.
//!
//! [`Synthesizer::synthesize`] ties the pipeline together: resolve the
//! write intents into a timeline, plan the parts, fingerprint the plan,
//! look for a resumable session, and execute. Callers describe the whole
//! operation with a [`SynthesisRequest`]; the result is either the
//! finished object's descriptor or a typed error — never a silent partial
//! success.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};
use typed_builder::TypedBuilder;

use crate::config::EngineConfig;
use crate::error::{Result, SynthesisError};
use crate::executor::{CancelToken, PlanExecutor};
use crate::fingerprint::FINGERPRINT_METADATA_KEY;
use crate::planner::build_plan;
use crate::resume::ResumeMatcher;
use crate::source::{EncryptionInfo, FileInfo, WriteIntent};
use crate::store::{ObjectDescriptor, PartDescriptor, RemoteStore, StoreError};
use crate::timeline::{OverlapPolicy, SegmentTimeline};

/// One-shot notification fired right after a fresh session is created,
/// before any part transfer, carrying the session id. Lets callers record
/// the id for manual resume or cancellation bookkeeping.
pub type SessionNotifier = Box<dyn FnOnce(&str) + Send>;

/// Everything one synthesis call needs.
///
/// # Examples
///
/// ```no_run
/// use coalesce_core::engine::SynthesisRequest;
/// use coalesce_core::source::{SourceRef, WriteIntent};
///
/// let intents = WriteIntent::sequence([SourceRef::remote("obj-1", 8_000_000)]).unwrap();
/// let request = SynthesisRequest::builder()
///     .intents(intents)
///     .destination_name("merged.bin")
///     .build();
/// ```
#[derive(TypedBuilder)]
pub struct SynthesisRequest {
    /// The ordered write intents covering the destination object.
    pub intents: Vec<WriteIntent>,

    /// Name of the object to create.
    #[builder(setter(into))]
    pub destination_name: String,

    /// MIME content type for the finished object.
    #[builder(default = String::from("application/octet-stream"), setter(into))]
    pub content_type: String,

    /// Caller metadata written on the finished object. The engine adds the
    /// plan fingerprint under a reserved key when the plan is not purely
    /// local.
    #[builder(default)]
    pub metadata: FileInfo,

    /// How contested destination bytes are resolved.
    #[builder(default)]
    pub overlap_policy: OverlapPolicy,

    /// Explicit total length; defaults to the maximum destination end
    /// offset across the intents.
    #[builder(default, setter(strip_option))]
    pub total_length: Option<u64>,

    /// Cap on part size, tightened below the store's own maximum. Never
    /// clamps below the store's minimum.
    #[builder(default, setter(strip_option))]
    pub max_part_size: Option<u64>,

    /// Destination-side encryption recorded on the session.
    #[builder(default, setter(strip_option))]
    pub destination_encryption: Option<EncryptionInfo>,

    /// Whether to look for a resumable unfinished session before starting
    /// a fresh one.
    #[builder(default = true)]
    pub auto_resume: bool,

    /// Fail with [`SynthesisError::CorruptSession`] instead of silently
    /// starting fresh when no session verifies.
    #[builder(default = false)]
    pub strict_resume: bool,

    /// Resume this session without matching. The caller vouches that the
    /// session was started from an identical plan.
    #[builder(default, setter(strip_option, into))]
    pub explicit_session_id: Option<String>,

    /// Fired once when a fresh session is created; not fired on resume.
    #[builder(default, setter(strip_option))]
    pub session_started: Option<SessionNotifier>,

    /// Cooperative cancellation token for the execution phase.
    #[builder(default, setter(strip_option))]
    pub cancel: Option<CancelToken>,
}

impl std::fmt::Debug for SynthesisRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesisRequest")
            .field("intents", &self.intents.len())
            .field("destination_name", &self.destination_name)
            .field("content_type", &self.content_type)
            .field("overlap_policy", &self.overlap_policy)
            .field("auto_resume", &self.auto_resume)
            .field("strict_resume", &self.strict_resume)
            .field("explicit_session_id", &self.explicit_session_id)
            .finish_non_exhaustive()
    }
}

/// The synthesis engine: plans and executes object creation against one
/// store.
pub struct Synthesizer<S: RemoteStore + ?Sized> {
    store: Arc<S>,
    config: EngineConfig,
}

impl<S: RemoteStore + ?Sized> std::fmt::Debug for Synthesizer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synthesizer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: RemoteStore + ?Sized + 'static> Synthesizer<S> {
    /// Create an engine with default configuration.
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    /// Create an engine with explicit configuration.
    pub fn with_config(store: Arc<S>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Synthesize one object from the request's write intents.
    ///
    /// Planning happens synchronously and any planning error
    /// ([`SynthesisError::UnresolvedGap`],
    /// [`SynthesisError::SizeConstraint`], ...) is returned before a
    /// single store call is made. Execution errors leave the session
    /// resumable; see [`SynthesisError::is_resumable`].
    pub async fn synthesize(&self, request: SynthesisRequest) -> Result<ObjectDescriptor> {
        let SynthesisRequest {
            intents,
            destination_name,
            content_type,
            metadata,
            overlap_policy,
            total_length,
            max_part_size,
            destination_encryption,
            auto_resume,
            strict_resume,
            explicit_session_id,
            session_started,
            cancel,
        } = request;

        let timeline = SegmentTimeline::resolve(&intents, total_length, overlap_policy)?;

        let mut sizing = self.store.part_sizing();
        if let Some(cap) = max_part_size {
            sizing.maximum = cap.max(sizing.minimum);
            sizing.recommended = sizing.recommended.min(sizing.maximum);
        }
        let plan = build_plan(&timeline, &sizing)?;
        info!(
            destination_name = %destination_name,
            parts = plan.parts.len(),
            total_length = plan.total_length,
            purely_local = plan.is_purely_local(),
            "planned synthesis"
        );

        let executor = PlanExecutor::new(Arc::clone(&self.store), self.config.clone());

        if plan.is_single_part() {
            if explicit_session_id.is_some() {
                return Err(SynthesisError::Store(anyhow::anyhow!(
                    "cannot resume a single-part plan; it executes as one request"
                )));
            }
            return executor
                .execute_single(&plan, &destination_name, &content_type, &metadata)
                .await;
        }

        let mut file_info = metadata;
        if !plan.is_purely_local() {
            file_info.insert(
                FINGERPRINT_METADATA_KEY.to_owned(),
                plan.fingerprint.clone(),
            );
        }

        let (session_id, committed) = self
            .locate_session(
                &plan,
                &destination_name,
                &content_type,
                &file_info,
                destination_encryption.as_ref(),
                auto_resume,
                strict_resume,
                explicit_session_id,
                session_started,
            )
            .await?;

        let cancel = cancel.unwrap_or_else(CancelToken::never);
        executor.execute(&plan, &session_id, committed, &cancel).await
    }

    /// Decide which session to execute against: manual resume, matched
    /// resume, or a freshly started session.
    #[allow(clippy::too_many_arguments)]
    async fn locate_session(
        &self,
        plan: &crate::planner::PartPlan,
        destination_name: &str,
        content_type: &str,
        file_info: &FileInfo,
        destination_encryption: Option<&EncryptionInfo>,
        auto_resume: bool,
        strict_resume: bool,
        explicit_session_id: Option<String>,
        session_started: Option<SessionNotifier>,
    ) -> Result<(String, BTreeMap<u32, PartDescriptor>)> {
        if let Some(session_id) = explicit_session_id {
            // Manual resume is trusted verbatim: no matching, no checksum
            // verification. The committed set is whatever the store holds.
            let parts = self
                .store
                .list_parts(&session_id)
                .await
                .map_err(|e| match e {
                    StoreError::Permanent { .. } => SynthesisError::SessionNotFound {
                        session_id: session_id.clone(),
                    },
                    transient => SynthesisError::Store(anyhow::Error::new(transient)),
                })?;
            debug!(
                session_id = %session_id,
                committed = parts.len(),
                "manually resuming session"
            );
            let committed = parts.into_iter().map(|p| (p.index, p)).collect();
            return Ok((session_id, committed));
        }

        if auto_resume {
            let matcher = ResumeMatcher::new(self.store.as_ref());
            if let Some(resumed) = matcher
                .find_best_match(plan, destination_name, strict_resume)
                .await?
            {
                info!(
                    session_id = %resumed.session_id,
                    verified_parts = resumed.committed.len(),
                    "resuming unfinished session"
                );
                return Ok((resumed.session_id, resumed.committed));
            }
        }

        let session_id = self
            .store
            .start_large_object(
                destination_name,
                content_type,
                file_info,
                destination_encryption,
            )
            .await?;
        debug!(session_id = %session_id, destination_name = %destination_name, "started fresh session");
        if let Some(notify) = session_started {
            notify(&session_id);
        }
        Ok((session_id, BTreeMap::new()))
    }
}
