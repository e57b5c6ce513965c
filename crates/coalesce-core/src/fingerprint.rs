//! Stable structural fingerprints for part plans.
//!
//! A fingerprint is a pure function of the plan's structure — the ordered
//! `(source identity, source range, destination range)` tuples across all
//! parts — and of nothing else. File modification times, process lifetime,
//! and transfer configuration do not participate, so re-deriving a plan
//! for the same semantic input always yields the same digest, even after a
//! restart. That is what makes the digest usable as a resume token: it is
//! stored in session metadata under [`FINGERPRINT_METADATA_KEY`] and a
//! later synthesis call with the same intents recognizes the in-flight
//! session by digest equality.
//!
//! SHA-256 keeps the collision probability low enough that digest-equal
//! plans are treated as the same plan.

use digest::Digest;
use serde::Serialize;

use crate::planner::PlannedPart;
use crate::range::ByteRange;

/// Reserved metadata key under which the fingerprint travels on sessions
/// and finished objects.
pub const FINGERPRINT_METADATA_KEY: &str = "coalesce-plan-fingerprint";

/// One payload segment's contribution to the fingerprint.
#[derive(Serialize)]
struct Entry {
    source: String,
    source_range: ByteRange,
    destination_range: ByteRange,
}

/// Compute the hex SHA-256 fingerprint of a part list.
///
/// The encoding is the canonical JSON of the per-part entry lists; any
/// change to a source identity, a source range, or a destination range
/// changes the digest.
#[must_use]
pub fn fingerprint_parts(parts: &[PlannedPart]) -> String {
    let entries: Vec<Vec<Entry>> = parts
        .iter()
        .map(|part| {
            part.payload
                .iter()
                .map(|segment| Entry {
                    source: segment.source.identity(),
                    source_range: segment.source_range,
                    destination_range: segment.destination_range,
                })
                .collect()
        })
        .collect();

    let mut hasher = sha2::Sha256::new();
    // Serializing plain structs of strings and integers cannot fail; an
    // empty encoding would still produce a stable (if degenerate) digest.
    if let Ok(encoded) = serde_json::to_vec(&entries) {
        hasher.update(&encoded);
    }
    hex::encode(hasher.finalize())
}
