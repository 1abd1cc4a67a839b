use thiserror::Error;

/// Top-level error type for the `catflap-api` crate.
///
/// Covers every failure mode of the gateway session: connection
/// establishment, mid-flight disconnects, rejected calls, and framing.
/// `catflap-core` maps these into user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Connection ──────────────────────────────────────────────────
    /// WebSocket connection could not be established.
    #[error("gateway connection failed: {0}")]
    Connect(String),

    /// The gateway closed the connection.
    #[error("gateway closed the connection (code {code}): {reason}")]
    Closed { code: u16, reason: String },

    /// The session dropped while a call was in flight.
    #[error("connection lost before the gateway answered")]
    ConnectionLost,

    /// A call did not complete within the configured request timeout.
    #[error("request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// The session has been shut down; no further calls are possible.
    #[error("session is shut down")]
    SessionClosed,

    // ── Protocol ────────────────────────────────────────────────────
    /// The gateway answered a call with an error payload.
    #[error("gateway rejected '{event}': {message}")]
    Rejected { event: String, message: String },

    /// A frame could not be serialized for sending.
    #[error("frame serialization failed: {message}")]
    Serialization { message: String },

    /// URL parsing error.
    #[error("invalid gateway URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::Closed { .. } | Self::ConnectionLost | Self::Timeout { .. }
        )
    }
}
