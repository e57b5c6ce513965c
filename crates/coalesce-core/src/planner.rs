//! Part planning: from a segment timeline to a transfer-ready part list.
//!
//! The planner walks the resolved timeline left to right and greedily packs
//! contiguous segments into parts sized for the store's multi-part
//! protocol. The packing is greedy by contract, not globally optimal:
//! an optimal packer would change plan fingerprints and therefore break
//! every recorded resume token.
//!
//! Remote segments long enough to stand alone become server-side
//! [`PartKind::RemoteCopy`] parts (split into near-equal slices when they
//! exceed the maximum part size). Remote segments too short to stand alone
//! cannot be copied server-side at all — the store refuses undersized copy
//! parts — so they are folded into the neighboring upload run, marking that
//! part [`PartKind::HybridDownloadReupload`]: the short remote bytes are
//! downloaded and re-uploaded together with the adjacent local bytes.
//!
//! Upload runs are cut at the recommended part size. A run shorter than
//! `recommended + minimum` is never split further, so the only part allowed
//! to fall below the minimum is the terminal one.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::MAX_PART_COUNT;
use crate::error::{Result, SynthesisError};
use crate::fingerprint;
use crate::range::ByteRange;
use crate::timeline::{Segment, SegmentTimeline};

/// Store default for the smallest part accepted by upload/copy calls.
pub const DEFAULT_MINIMUM_PART_SIZE: u64 = 5_000_000;

/// Store default for the preferred upload part size.
pub const DEFAULT_RECOMMENDED_PART_SIZE: u64 = 100_000_000;

/// Store default for the largest single part.
pub const DEFAULT_MAXIMUM_PART_SIZE: u64 = 5_000_000_000;

/// Part sizing constraints, as dictated by the backing store (the minimum
/// is dynamic per account) and optionally tightened by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartSizing {
    /// Floor below which a part cannot be uploaded or copied independently
    /// (except as the terminal part of the object).
    pub minimum: u64,
    /// Preferred size for upload parts; the greedy cut width.
    pub recommended: u64,
    /// Hard ceiling on any single part.
    pub maximum: u64,
}

impl Default for PartSizing {
    fn default() -> Self {
        Self {
            minimum: DEFAULT_MINIMUM_PART_SIZE,
            recommended: DEFAULT_RECOMMENDED_PART_SIZE,
            maximum: DEFAULT_MAXIMUM_PART_SIZE,
        }
    }
}

impl PartSizing {
    /// Create a validated sizing: `0 < minimum <= recommended <= maximum`.
    pub fn new(minimum: u64, recommended: u64, maximum: u64) -> Result<Self> {
        let sizing = Self {
            minimum,
            recommended,
            maximum,
        };
        sizing.validate()?;
        Ok(sizing)
    }

    fn validate(&self) -> Result<()> {
        if self.minimum == 0 {
            return Err(SynthesisError::SizeConstraint {
                message: "minimum part size must be positive".to_owned(),
            });
        }
        if self.minimum > self.recommended {
            return Err(SynthesisError::SizeConstraint {
                message: format!(
                    "minimum part size ({}) exceeds recommended part size ({})",
                    self.minimum, self.recommended
                ),
            });
        }
        if self.recommended > self.maximum {
            return Err(SynthesisError::SizeConstraint {
                message: format!(
                    "recommended part size ({}) exceeds maximum part size ({})",
                    self.recommended, self.maximum
                ),
            });
        }
        Ok(())
    }

    /// Raise the recommended size so an object of `total_length` bytes
    /// stays under the store's part-count ceiling with headroom to spare.
    /// Mixed upload/copy plans do not pack perfectly, hence the 1.5 factor.
    fn tuned_for(mut self, total_length: u64) -> Result<Self> {
        let floor = (3 * total_length).div_ceil(2 * u64::from(MAX_PART_COUNT));
        self.recommended = self.recommended.max(floor.min(self.maximum));
        self.validate()?;
        Ok(self)
    }
}

/// How a planned part reaches the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PartKind {
    /// Local bytes read from disk and uploaded.
    LocalUpload,
    /// A server-side copy of a remote byte range.
    RemoteCopy,
    /// A part whose remote payload is too short to copy server-side: the
    /// remote bytes are downloaded and re-uploaded together with the
    /// neighboring local bytes.
    HybridDownloadReupload,
}

/// One unit of transfer in a part plan.
#[derive(Debug, Clone)]
pub struct PlannedPart {
    /// 1-based part index; assignment order is destination order.
    pub index: u32,
    /// How this part is transferred.
    pub kind: PartKind,
    /// The destination bytes this part covers.
    pub destination_range: ByteRange,
    /// The segments whose bytes make up this part, in destination order.
    pub payload: Vec<Segment>,
}

impl PlannedPart {
    /// The part length in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.destination_range.len()
    }

    /// Always `false`; parts cover at least one byte.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether this part's payload can be re-derived from local files
    /// alone (used by the resume matcher to recompute checksums without
    /// touching the network).
    #[must_use]
    pub fn is_locally_derivable(&self) -> bool {
        self.payload.iter().all(|s| s.source.is_local())
    }
}

/// The immutable output of planning: an ordered, contiguous part list and
/// the plan's structural fingerprint.
#[derive(Debug, Clone)]
pub struct PartPlan {
    /// The parts, ordered by index.
    pub parts: Vec<PlannedPart>,
    /// Total destination length in bytes.
    pub total_length: u64,
    /// Stable digest of the plan structure; see [`crate::fingerprint`].
    pub fingerprint: String,
}

impl PartPlan {
    /// Whether the plan consists of exactly one part, in which case the
    /// single-request whole-object path is used instead of a session.
    #[must_use]
    pub fn is_single_part(&self) -> bool {
        self.parts.len() == 1
    }

    /// Whether every byte of the plan comes from local files, with no
    /// remote copies, downloads, or verification slices. Purely local
    /// plans do not record a fingerprint in session metadata.
    #[must_use]
    pub fn is_purely_local(&self) -> bool {
        self.parts.iter().all(|p| {
            p.kind == PartKind::LocalUpload && p.payload.iter().all(|s| s.verify.is_none())
        })
    }

    /// Look up a part by its 1-based index.
    #[must_use]
    pub fn part(&self, index: u32) -> Option<&PlannedPart> {
        let slot = index.checked_sub(1)? as usize;
        self.parts.get(slot)
    }
}

/// Build a part plan from a resolved timeline.
///
/// Raised errors are all [`SynthesisError::SizeConstraint`]: contradictory
/// sizing parameters, or a plan that cannot fit under the store's
/// part-count ceiling. Both surface before any transfer starts.
pub fn build_plan(timeline: &SegmentTimeline, sizing: &PartSizing) -> Result<PartPlan> {
    sizing.validate()?;
    let sizing = (*sizing).tuned_for(timeline.total_length())?;

    let mut raw: Vec<RawPart> = Vec::new();
    let segments = timeline.segments();

    // A lone short remote segment is forced through as a single copy part:
    // the store allows a short *whole object* copy, just not a short part
    // among others.
    let single_short_copy = segments.len() == 1
        && segments[0].source.is_remote()
        && segments[0].len() < sizing.minimum;
    if single_short_copy {
        raw.push(RawPart {
            kind: PartKind::RemoteCopy,
            payload: vec![segments[0].clone()],
        });
        return assemble(raw, timeline.total_length());
    }

    let mut buffer = UploadRun::default();
    for segment in segments {
        let standalone_copy = segment.source.is_remote() && segment.len() >= sizing.minimum;
        if standalone_copy {
            if !buffer.is_empty() && buffer.len() < sizing.minimum {
                let missing = sizing.minimum - buffer.len();
                if segment.len() - missing < sizing.minimum {
                    // Borrowing enough to fill the buffer would leave the
                    // copy undersized, so the whole copy joins the upload
                    // run instead.
                    buffer.push(segment.clone());
                    flush_keeping_tail(&mut buffer, &mut raw, &sizing)?;
                    continue;
                }
                // Borrow the copy's head to top the buffer up to the
                // minimum, then flush and copy the remainder server-side.
                let head = segment.slice(segment.destination_range.slice(0, missing)?)?;
                let rest = segment
                    .slice(segment.destination_range.slice(missing, segment.len() - missing)?)?;
                buffer.push(head);
                flush_all(&mut buffer, &mut raw, &sizing)?;
                emit_copy_parts(&rest, &mut raw, &sizing)?;
            } else {
                flush_all(&mut buffer, &mut raw, &sizing)?;
                emit_copy_parts(segment, &mut raw, &sizing)?;
            }
        } else {
            buffer.push(segment.clone());
            flush_keeping_tail(&mut buffer, &mut raw, &sizing)?;
        }
    }
    flush_all(&mut buffer, &mut raw, &sizing)?;

    let plan = assemble(raw, timeline.total_length())?;

    // The packing above never leaves an undersized non-terminal part, but
    // the invariant is cheap to state and fatal to get wrong downstream.
    for part in &plan.parts[..plan.parts.len().saturating_sub(1)] {
        if part.len() < sizing.minimum {
            return Err(SynthesisError::SizeConstraint {
                message: format!(
                    "non-terminal part {} is {} bytes, below the {} byte minimum",
                    part.index,
                    part.len(),
                    sizing.minimum
                ),
            });
        }
    }

    debug!(
        parts = plan.parts.len(),
        total_length = plan.total_length,
        fingerprint = %plan.fingerprint,
        "built part plan"
    );
    Ok(plan)
}

/// A part before index assignment.
struct RawPart {
    kind: PartKind,
    payload: Vec<Segment>,
}

/// Accumulator for contiguous segments destined to be uploaded together.
#[derive(Default)]
struct UploadRun {
    segments: Vec<Segment>,
}

impl UploadRun {
    fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    fn len(&self) -> u64 {
        self.segments.iter().map(Segment::len).sum()
    }

    fn push(&mut self, segment: Segment) {
        self.segments.push(segment);
    }

    /// Convert into a raw part. Hybrid if any payload byte is remote.
    fn into_raw(self) -> RawPart {
        let kind = if self.segments.iter().any(|s| s.source.is_remote()) {
            PartKind::HybridDownloadReupload
        } else {
            PartKind::LocalUpload
        };
        RawPart {
            kind,
            payload: self.segments,
        }
    }

    /// Split off a head of exactly `width` bytes, slicing a segment in two
    /// if the cut lands inside one.
    fn partition(self, width: u64) -> Result<(Self, Self)> {
        let mut head = Self::default();
        let mut tail = Self::default();
        let mut taken = 0u64;
        for segment in self.segments {
            let remaining = width - taken;
            if remaining == 0 {
                tail.push(segment);
            } else if segment.len() <= remaining {
                taken += segment.len();
                head.push(segment);
            } else {
                let cut_head = segment.slice(segment.destination_range.slice(0, remaining)?)?;
                let cut_tail = segment.slice(
                    segment
                        .destination_range
                        .slice(remaining, segment.len() - remaining)?,
                )?;
                taken = width;
                head.push(cut_head);
                tail.push(cut_tail);
            }
        }
        Ok((head, tail))
    }

    /// Split into part-sized runs: heads of exactly the recommended size,
    /// and a tail that is never split below `recommended + minimum` (an
    /// undersized non-terminal tail would force a needless download if a
    /// copy segment follows).
    fn split(mut self, sizing: &PartSizing) -> Result<Vec<Self>> {
        let mut runs = Vec::new();
        while self.len() >= sizing.recommended + sizing.minimum {
            let (head, tail) = self.partition(sizing.recommended)?;
            runs.push(head);
            self = tail;
        }
        runs.push(self);
        Ok(runs)
    }
}

/// Flush the whole buffer into raw parts.
fn flush_all(buffer: &mut UploadRun, raw: &mut Vec<RawPart>, sizing: &PartSizing) -> Result<()> {
    if buffer.is_empty() {
        return Ok(());
    }
    for run in std::mem::take(buffer).split(sizing)? {
        if !run.is_empty() {
            raw.push(run.into_raw());
        }
    }
    Ok(())
}

/// Flush every full-width run, keeping the tail in the buffer so the next
/// incoming segment may still extend it.
fn flush_keeping_tail(
    buffer: &mut UploadRun,
    raw: &mut Vec<RawPart>,
    sizing: &PartSizing,
) -> Result<()> {
    let mut runs = std::mem::take(buffer).split(sizing)?;
    let tail = runs.pop().unwrap_or_default();
    for run in runs {
        if !run.is_empty() {
            raw.push(run.into_raw());
        }
    }
    *buffer = tail;
    Ok(())
}

/// Split a standalone copy segment into near-equal copy parts no larger
/// than the maximum part size.
fn emit_copy_parts(segment: &Segment, raw: &mut Vec<RawPart>, sizing: &PartSizing) -> Result<()> {
    let length = segment.len();
    let mut part_count = length / sizing.maximum;
    let mut last_length = length % sizing.maximum;
    if last_length == 0 {
        last_length = sizing.maximum;
    } else {
        part_count += 1;
    }

    let sizes: Vec<u64> = if part_count == 1 {
        vec![last_length]
    } else {
        // A runt tail is ugly and can dip below the minimum; even the
        // sizes out instead.
        if last_length < length / (part_count + 1) {
            part_count += 1;
        }
        let base = length / part_count;
        let remainder = length % part_count;
        (0..part_count)
            .map(|i| base + u64::from(i < remainder))
            .collect()
    };

    let mut offset = 0u64;
    for size in sizes {
        let piece = segment
            .destination_range
            .slice(offset, size)
            .and_then(|dest| segment.slice(dest))?;
        raw.push(RawPart {
            kind: PartKind::RemoteCopy,
            payload: vec![piece],
        });
        offset += size;
    }
    Ok(())
}

/// Assign indices, check the part-count ceiling, and fingerprint.
fn assemble(raw: Vec<RawPart>, total_length: u64) -> Result<PartPlan> {
    if raw.len() > MAX_PART_COUNT as usize {
        return Err(SynthesisError::SizeConstraint {
            message: format!(
                "plan requires {} parts, above the {MAX_PART_COUNT} part ceiling",
                raw.len()
            ),
        });
    }

    let mut parts = Vec::with_capacity(raw.len());
    for (slot, raw_part) in raw.into_iter().enumerate() {
        let first = raw_part
            .payload
            .first()
            .ok_or_else(|| SynthesisError::SizeConstraint {
                message: "planned part with empty payload".to_owned(),
            })?;
        let last = raw_part.payload.last().unwrap_or(first);
        let destination_range = ByteRange::new(
            first.destination_range.start(),
            last.destination_range.end(),
        )?;
        parts.push(PlannedPart {
            index: u32::try_from(slot + 1).map_err(|_| SynthesisError::SizeConstraint {
                message: "part index overflow".to_owned(),
            })?,
            kind: raw_part.kind,
            destination_range,
            payload: raw_part.payload,
        });
    }

    let fingerprint = fingerprint::fingerprint_parts(&parts);
    Ok(PartPlan {
        parts,
        total_length,
        fingerprint,
    })
}
