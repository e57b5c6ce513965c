//! Intent resolution: from overlapping write intents to a segment timeline.
//!
//! The resolver consumes an ordered sequence of [`WriteIntent`]s whose
//! destination ranges may overlap and produces a [`SegmentTimeline`]: a
//! minimal, gap-free, non-overlapping partition of `[0, total_length)` in
//! which every byte is owned by exactly one source range.
//!
//! Overlaps are resolved deterministically. Within one source class
//! (local vs. remote) the last intent to claim a byte wins. Across classes
//! the [`OverlapPolicy`] decides:
//!
//! - [`OverlapPolicy::PreferLocal`] and [`OverlapPolicy::PreferRemote`]
//!   hand the whole overlapping region to the named class.
//! - [`OverlapPolicy::VerifyAgainstLocal`] (the default) hands ownership to
//!   the local bytes but splits the displaced remote coverage into prefix,
//!   core, and suffix; the core is recorded on the winning segments as a
//!   [`RemoteSlice`] to be downloaded and byte-compared during execution.
//!   The extra copy granularity this forces is the documented price of the
//!   verification.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SynthesisError};
use crate::range::ByteRange;
use crate::source::{EncryptionInfo, SourceRef, WriteIntent};

/// Policy for destination ranges claimed by both a local and a remote
/// source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverlapPolicy {
    /// The local source owns every contested byte.
    PreferLocal,
    /// The remote source owns every contested byte.
    PreferRemote,
    /// The local source owns contested bytes, and the displaced remote
    /// bytes are downloaded and compared against them during execution.
    #[default]
    VerifyAgainstLocal,
}

/// A remote object slice scheduled for download-and-compare verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSlice {
    /// The store's identifier for the remote object.
    pub object_id: String,
    /// The byte range within the remote object.
    pub range: ByteRange,
    /// Source-side encryption of the remote object, if any.
    pub encryption: Option<EncryptionInfo>,
}

/// One entry of the resolved timeline: a contiguous destination run mapped
/// to exactly one source range.
#[derive(Debug, Clone)]
pub struct Segment {
    /// The destination bytes this segment covers.
    pub destination_range: ByteRange,
    /// The owning source.
    pub source: SourceRef,
    /// The byte range within the owning source.
    pub source_range: ByteRange,
    /// Remote bytes to download and compare against this segment's payload
    /// before committing (set only under
    /// [`OverlapPolicy::VerifyAgainstLocal`]).
    pub verify: Option<RemoteSlice>,
}

impl Segment {
    /// The segment length in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.destination_range.len()
    }

    /// Always `false`; segments cover at least one byte.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// The sub-segment covering `dest_sub`, which must lie inside this
    /// segment's destination range. Source and verification ranges are
    /// offset-adjusted to match.
    pub(crate) fn slice(&self, dest_sub: ByteRange) -> Result<Self> {
        let offset = dest_sub.start() - self.destination_range.start();
        let source_range = self.source_range.slice(offset, dest_sub.len())?;
        let verify = match &self.verify {
            Some(slice) => Some(RemoteSlice {
                object_id: slice.object_id.clone(),
                range: slice.range.slice(offset, dest_sub.len())?,
                encryption: slice.encryption.clone(),
            }),
            None => None,
        };
        Ok(Self {
            destination_range: dest_sub,
            source: self.source.clone(),
            source_range,
            verify,
        })
    }
}

/// The resolved, gap-free partition of the destination object.
#[derive(Debug, Clone)]
pub struct SegmentTimeline {
    segments: Vec<Segment>,
    total_length: u64,
}

impl SegmentTimeline {
    /// The ordered segments tiling `[0, total_length)`.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Total destination length in bytes.
    #[must_use]
    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// Resolve an ordered intent sequence into a timeline.
    ///
    /// `total_length` defaults to the maximum destination end offset seen;
    /// an explicit value smaller than the coverage is rejected, a larger
    /// one surfaces as a tail gap.
    pub fn resolve(
        intents: &[WriteIntent],
        total_length: Option<u64>,
        policy: OverlapPolicy,
    ) -> Result<Self> {
        let max_end = intents
            .iter()
            .map(|i| i.destination_range.end())
            .max()
            .unwrap_or(0);
        let total = total_length.unwrap_or(max_end);
        if total == 0 {
            return Err(SynthesisError::UnresolvedGap { start: 0, end: 0 });
        }
        if total < max_end {
            return Err(SynthesisError::InvalidRange {
                start: total,
                end: max_end,
            });
        }

        // Per-class coverage with last-writer-wins inside each class.
        let mut local_claims = Vec::new();
        let mut remote_claims = Vec::new();
        for (idx, intent) in intents.iter().enumerate() {
            let claims = if intent.source.is_local() {
                &mut local_claims
            } else {
                &mut remote_claims
            };
            claim_last_writer_wins(claims, intent.destination_range, idx);
        }

        let (winners, fillers) = match policy {
            OverlapPolicy::PreferLocal | OverlapPolicy::VerifyAgainstLocal => {
                (&local_claims, &remote_claims)
            }
            OverlapPolicy::PreferRemote => (&remote_claims, &local_claims),
        };

        // Winners keep their claims whole; fillers keep whatever the
        // winners left uncovered.
        let mut assigned: Vec<Claim> = winners.clone();
        for filler in fillers {
            let mut pieces = vec![filler.dest];
            for winner in winners {
                pieces = pieces
                    .iter()
                    .flat_map(|p| p.subtract(&winner.dest))
                    .collect();
            }
            for dest in pieces {
                assigned.push(Claim {
                    dest,
                    intent: filler.intent,
                });
            }
        }
        assigned.sort_by_key(|c| c.dest.start());

        // Gap check: the assignment must tile [0, total).
        let mut cursor = 0u64;
        for claim in &assigned {
            if claim.dest.start() > cursor {
                return Err(SynthesisError::UnresolvedGap {
                    start: cursor,
                    end: claim.dest.start(),
                });
            }
            cursor = claim.dest.end();
        }
        if cursor < total {
            return Err(SynthesisError::UnresolvedGap {
                start: cursor,
                end: total,
            });
        }

        let mut segments = Vec::with_capacity(assigned.len());
        for claim in &assigned {
            let intent = &intents[claim.intent];
            if policy == OverlapPolicy::VerifyAgainstLocal && intent.source.is_local() {
                // Split at remote coverage boundaries so the contested
                // cores carry verification slices.
                for piece in split_at_claim_boundaries(claim.dest, &remote_claims) {
                    let verify = remote_claims
                        .iter()
                        .find(|r| r.dest.intersect(&piece).is_some())
                        .map(|r| remote_slice_for(&intents[r.intent], piece))
                        .transpose()?;
                    segments.push(segment_for(intent, piece, verify)?);
                }
            } else {
                segments.push(segment_for(intent, claim.dest, None)?);
            }
        }

        let segments = merge_adjacent(segments)?;
        debug!(
            intents = intents.len(),
            segments = segments.len(),
            total_length = total,
            ?policy,
            "resolved segment timeline"
        );
        Ok(Self {
            segments,
            total_length: total,
        })
    }
}

/// A destination run claimed by one intent (identified by index).
#[derive(Debug, Clone, Copy)]
struct Claim {
    dest: ByteRange,
    intent: usize,
}

/// Insert `dest` into `claims`, letting it displace any earlier claim it
/// overlaps (last writer wins).
fn claim_last_writer_wins(claims: &mut Vec<Claim>, dest: ByteRange, intent: usize) {
    let mut next = Vec::with_capacity(claims.len() + 1);
    for claim in claims.iter() {
        for piece in claim.dest.subtract(&dest) {
            next.push(Claim {
                dest: piece,
                intent: claim.intent,
            });
        }
    }
    next.push(Claim { dest, intent });
    next.sort_by_key(|c| c.dest.start());
    *claims = next;
}

/// Split `dest` at the boundaries of the given claims, so every resulting
/// piece lies either fully inside or fully outside each claim.
fn split_at_claim_boundaries(dest: ByteRange, claims: &[Claim]) -> Vec<ByteRange> {
    let mut cuts: Vec<u64> = claims
        .iter()
        .flat_map(|c| [c.dest.start(), c.dest.end()])
        .collect();
    cuts.sort_unstable();
    dest.split_at(&cuts)
}

/// Build the verification slice of `remote_intent` corresponding to the
/// destination core `dest`.
fn remote_slice_for(remote_intent: &WriteIntent, dest: ByteRange) -> Result<RemoteSlice> {
    let SourceRef::Remote(remote) = &remote_intent.source else {
        unreachable!("verification slices only reference remote intents");
    };
    let offset = dest.start() - remote_intent.destination_range.start();
    Ok(RemoteSlice {
        object_id: remote.object_id.clone(),
        range: remote_intent.source_range.slice(offset, dest.len())?,
        encryption: remote.encryption.clone(),
    })
}

/// Build the segment of `intent` covering the destination run `dest`.
fn segment_for(intent: &WriteIntent, dest: ByteRange, verify: Option<RemoteSlice>) -> Result<Segment> {
    let offset = dest.start() - intent.destination_range.start();
    Ok(Segment {
        destination_range: dest,
        source: intent.source.clone(),
        source_range: intent.source_range.slice(offset, dest.len())?,
        verify,
    })
}

/// Coalesce neighboring segments that come from the same source with
/// contiguous source ranges, keeping the partition minimal. Segments
/// carrying verification slices are left alone.
fn merge_adjacent(segments: Vec<Segment>) -> Result<Vec<Segment>> {
    let mut merged: Vec<Segment> = Vec::with_capacity(segments.len());
    for segment in segments {
        if let Some(last) = merged.last_mut() {
            let contiguous = last.destination_range.end() == segment.destination_range.start()
                && last.source_range.end() == segment.source_range.start()
                && last.source == segment.source
                && last.verify.is_none()
                && segment.verify.is_none();
            if contiguous {
                last.destination_range = ByteRange::new(
                    last.destination_range.start(),
                    segment.destination_range.end(),
                )?;
                last.source_range =
                    ByteRange::new(last.source_range.start(), segment.source_range.end())?;
                continue;
            }
        }
        merged.push(segment);
    }
    Ok(merged)
}
