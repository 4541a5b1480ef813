//! Warden static analysis.
//!
//! Given an instruction-level execution trace captured during
//! simulation, this crate recovers the set of contracts the transaction
//! touched, resolves proxy indirection, decompiles each contract
//! through the external toolchain, and renders human-readable
//! pseudocode and sequence diagrams via the text-generation
//! collaborator. All expensive boundary calls are memoized in
//! write-once caches.

pub mod cache;
pub mod decompiler;
pub mod error;
pub mod functions;
pub mod pipeline;
pub mod proxy;
pub mod textgen;
pub mod trace;

pub use error::AnalysisError;
