//! Error taxonomy for the static-analysis pipeline.
//!
//! Analysis failures are operator-facing: they are logged and surfaced
//! through the admin API, but they never block the interception and
//! approval flow, which has already completed by the time analysis runs.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The decompiler runner or text-generation API could not be reached,
    /// or returned a malformed body.
    #[error("analysis transport error: {0}")]
    Transport(String),

    /// The decompiler command ran but exited non-zero.
    #[error("decompiler exited with status {exit}: {stderr}")]
    DecompilerFailed { exit: i32, stderr: String },

    /// A collaborator call exceeded its (generous but finite) timeout.
    #[error("analysis request timed out")]
    Timeout,

    /// The text-generation API answered without usable content.
    #[error("text generation failed: {0}")]
    TextGen(String),

    /// Chain reads (storage slot, code) failed while resolving a contract.
    #[error("chain read failed: {0}")]
    ChainRead(String),
}
