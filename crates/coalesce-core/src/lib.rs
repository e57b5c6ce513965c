//! Client-side synthesis engine for large objects in remote stores.
//!
//! Coalesce builds a single remote object out of an ordered collection of
//! source ranges that may be local (on-disk bytes) or remote (ranges of
//! objects already in the backing store), with overlapping destination
//! ranges resolved deterministically. It plans the minimal set of store
//! operations — uploads, server-side copies, and download-and-re-upload
//! hybrids — under the store's minimum-part-size constraint, recognizes
//! and resumes interrupted sessions by plan fingerprint, and executes the
//! part list with bounded parallelism and checksum verification.
//!
//! # Architecture
//!
//! ```text
//! WriteIntent stream
//!        |
//!        v
//! IntentResolver (timeline)      overlap policy, last-writer-wins
//!        |
//!        v
//!   SegmentTimeline
//!        |
//!        v
//!   PartPlanner (planner)        greedy packing, hybrid folding
//!        |
//!        v
//!  PartPlan + fingerprint
//!        |
//!        v
//!   ResumeMatcher (resume)       checksum-verified session reuse
//!        |
//!        v
//!   PlanExecutor (executor)      bounded workers, retries, verification
//!        |
//!        v
//!   ObjectDescriptor
//! ```
//!
//! The backing store is consumed behind the [`store::RemoteStore`] trait;
//! [`sim::StoreSimulator`] is an in-memory implementation for tests.

pub mod checksums;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod planner;
pub mod range;
pub mod resume;
pub mod sim;
pub mod source;
pub mod store;
pub mod timeline;

pub use config::EngineConfig;
pub use engine::{SynthesisRequest, Synthesizer};
pub use error::{Result, SynthesisError};
pub use executor::{CancelHandle, CancelToken};
pub use planner::{PartKind, PartPlan, PartSizing, PlannedPart};
pub use range::ByteRange;
pub use source::{LocalSource, RemoteSource, SourceRef, WriteIntent};
pub use store::{ObjectDescriptor, RemoteStore};
pub use timeline::{OverlapPolicy, Segment, SegmentTimeline};
