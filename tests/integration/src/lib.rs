//! End-to-end scenario tests for the coalesce synthesis engine.
//!
//! Every test drives the public [`coalesce_core::Synthesizer`] entry point
//! against the in-memory [`coalesce_core::sim::StoreSimulator`]; no
//! network or external store is involved.

use std::io::Write;
use std::sync::{Arc, Once};

use coalesce_core::planner::PartSizing;
use coalesce_core::range::ByteRange;
use coalesce_core::sim::StoreSimulator;
use coalesce_core::source::{LocalSource, SourceRef, WriteIntent};

static INIT: Once = Once::new();

/// Initialize tracing (once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// A simulator whose part sizing is scaled down to test-friendly
/// magnitudes: 4 KiB minimum, 8 KiB recommended.
#[must_use]
pub fn small_part_sim() -> Arc<StoreSimulator> {
    init_tracing();
    Arc::new(StoreSimulator::with_part_sizing(
        PartSizing::new(4096, 8192, 1_000_000).expect("test sizing"),
    ))
}

/// Deterministic pseudo-random content: each `seed` yields a distinct
/// byte pattern.
#[must_use]
pub fn patterned(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i.wrapping_mul(31).wrapping_add(seed as usize) % 251) as u8)
        .collect()
}

/// Write `data` to a fresh temp file.
#[must_use]
pub fn write_file(data: &[u8]) -> tempfile::NamedTempFile {
    let mut tmp = tempfile::NamedTempFile::new().expect("tempfile");
    tmp.write_all(data).expect("write");
    tmp
}

/// A write intent mapping a whole local file onto `dest`.
#[must_use]
pub fn local_intent(file: &tempfile::NamedTempFile, dest: ByteRange) -> WriteIntent {
    WriteIntent::new(
        SourceRef::Local(LocalSource::with_length(file.path(), dest.len())),
        ByteRange::with_length(0, dest.len()).expect("range"),
        dest,
    )
    .expect("intent")
}

/// A write intent mapping a whole remote object onto `dest`.
#[must_use]
pub fn remote_intent(object_id: &str, dest: ByteRange) -> WriteIntent {
    WriteIntent::new(
        SourceRef::remote(object_id, dest.len()),
        ByteRange::with_length(0, dest.len()).expect("range"),
        dest,
    )
    .expect("intent")
}

/// Shorthand range constructor.
#[must_use]
pub fn range(start: u64, end: u64) -> ByteRange {
    ByteRange::new(start, end).expect("range")
}

mod test_integrity;
mod test_resume;
mod test_synthesis;
