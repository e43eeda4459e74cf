//! Error types for the engine boundary.
//!
//! Verification failures are not errors: they are [`crate::VerificationResult`]
//! values absorbed by the engine. The only failure a caller can observe is
//! delivering to an engine whose loop has ended.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The engine loop is no longer running.
    #[error("access engine stopped")]
    Stopped,
}
