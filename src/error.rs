//! Error taxonomy for the consultation engine.
//!
//! Three failure classes cross the engine boundary: a session that could not
//! be established, a protocol reply that could not be decoded, and a network
//! failure that survived the transport's retry budget. Caller-input
//! validation lives in the boundary layer (the CLI), not here.

/// Errors surfaced by the consultation engine.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// No usable session could be established. Fatal; never retried.
    #[error("session error: {0}")]
    Session(String),

    /// The portal answered with something that is not a protocol reply
    /// (an HTML document, an undecodable payload, an empty page code).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Transport-level failure after exhausting the retry budget.
    #[error("network error: {0}")]
    Network(String),
}

/// Convenience result type.
pub type EngineResult<T> = Result<T, EngineError>;
