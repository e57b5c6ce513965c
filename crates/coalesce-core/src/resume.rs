//! Resume matching: recognizing an interrupted session worth continuing.
//!
//! Given a freshly computed [`PartPlan`] and the store's unfinished
//! sessions for the destination name, the matcher picks the best candidate
//! to resume — or none, in which case the engine starts a fresh session.
//!
//! Two modes apply, depending on the plan:
//!
//! - **Fingerprinted resume** — when the plan contains remote-derived
//!   parts, its structure was recorded in session metadata at start time.
//!   Only sessions whose stored fingerprint equals the desired plan's
//!   fingerprint are eligible.
//! - **Local-only resume** — a plan built purely from local files needs no
//!   fingerprint; every unfinished session for the name is a candidate.
//!
//! In both modes each already-uploaded part is verified against the plan:
//! lengths must match, and for parts whose bytes can be re-derived from
//! local files the recomputed SHA-1 must match the stored checksum. The
//! candidate with the most verified parts wins. A single mismatched part
//! rejects its whole session — a mismatch means the session was built from
//! different or since-changed inputs, and mixing its parts into this plan
//! would corrupt the result.

use std::collections::BTreeMap;

use tracing::debug;

use crate::checksums::StreamingSha1;
use crate::error::{Result, SynthesisError};
use crate::fingerprint::FINGERPRINT_METADATA_KEY;
use crate::planner::{PartPlan, PlannedPart};
use crate::source::SourceRef;
use crate::store::{PartDescriptor, RemoteStore};

/// A session selected for resumption, with its verified parts.
#[derive(Debug, Clone)]
pub struct ResumedSession {
    /// The session to continue.
    pub session_id: String,
    /// Verified already-uploaded parts, keyed by index. The executor marks
    /// these committed without re-transfer.
    pub committed: BTreeMap<u32, PartDescriptor>,
}

/// Selects the best resumable session for a plan.
#[derive(Debug)]
pub struct ResumeMatcher<'a, S: RemoteStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: RemoteStore + ?Sized> ResumeMatcher<'a, S> {
    /// Create a matcher over the given store.
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Find the best verified unfinished session for `plan` under
    /// `destination_name`.
    ///
    /// Returns `Ok(None)` when nothing matches — absence of a match is not
    /// an error unless `strict` is set, in which case it becomes
    /// [`SynthesisError::CorruptSession`].
    pub async fn find_best_match(
        &self,
        plan: &PartPlan,
        destination_name: &str,
        strict: bool,
    ) -> Result<Option<ResumedSession>> {
        let requires_fingerprint = !plan.is_purely_local();
        let candidates = self.store.list_unfinished_sessions(destination_name).await?;

        let mut best: Option<ResumedSession> = None;
        for candidate in candidates {
            if requires_fingerprint {
                let stored = candidate.file_info.get(FINGERPRINT_METADATA_KEY);
                if stored.map(String::as_str) != Some(plan.fingerprint.as_str()) {
                    debug!(
                        session_id = %candidate.session_id,
                        "rejecting candidate: fingerprint mismatch"
                    );
                    continue;
                }
            }

            let Some(committed) = self.verify_candidate(plan, &candidate.session_id).await? else {
                continue;
            };
            if committed.is_empty() {
                debug!(
                    session_id = %candidate.session_id,
                    "skipping candidate: no verified parts to reuse"
                );
                continue;
            }

            let better = best
                .as_ref()
                .is_none_or(|b| committed.len() > b.committed.len());
            if better {
                best = Some(ResumedSession {
                    session_id: candidate.session_id,
                    committed,
                });
            }
        }

        if let Some(resumed) = &best {
            debug!(
                session_id = %resumed.session_id,
                verified_parts = resumed.committed.len(),
                "selected resumable session"
            );
        } else if strict {
            return Err(SynthesisError::CorruptSession {
                destination_name: destination_name.to_owned(),
            });
        }
        Ok(best)
    }

    /// Verify every uploaded part of a candidate session against the plan.
    ///
    /// Returns the verified parts, or `None` if any part is unknown to the
    /// plan or fails its length/checksum comparison.
    async fn verify_candidate(
        &self,
        plan: &PartPlan,
        session_id: &str,
    ) -> Result<Option<BTreeMap<u32, PartDescriptor>>> {
        let uploaded = self.store.list_parts(session_id).await?;

        let mut committed = BTreeMap::new();
        for part in uploaded {
            let Some(planned) = plan.part(part.index) else {
                debug!(
                    session_id = %session_id,
                    part_index = part.index,
                    "rejecting candidate: uploaded part unknown to the plan"
                );
                return Ok(None);
            };

            if planned.len() != part.length {
                debug!(
                    session_id = %session_id,
                    part_index = part.index,
                    expected = planned.len(),
                    actual = part.length,
                    "rejecting candidate: part length mismatch"
                );
                return Ok(None);
            }

            if let Some(expected) = derive_part_sha1(planned).await? {
                if expected != part.checksum {
                    debug!(
                        session_id = %session_id,
                        part_index = part.index,
                        "rejecting candidate: part checksum mismatch"
                    );
                    return Ok(None);
                }
            }

            committed.insert(part.index, part);
        }
        Ok(Some(committed))
    }
}

/// Recompute a planned part's SHA-1 from local files.
///
/// Returns `None` for parts containing remote payload: re-deriving those
/// would require downloading, which resume matching deliberately avoids —
/// such parts verify by length alone.
pub(crate) async fn derive_part_sha1(part: &PlannedPart) -> Result<Option<String>> {
    if !part.is_locally_derivable() {
        return Ok(None);
    }
    let mut hasher = StreamingSha1::new();
    for segment in &part.payload {
        let SourceRef::Local(local) = &segment.source else {
            unreachable!("locally derivable parts contain only local segments");
        };
        let bytes = local.read_range(segment.source_range).await?;
        hasher.update(&bytes);
    }
    Ok(Some(hasher.finalize_hex()))
}
