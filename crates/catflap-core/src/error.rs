// ── Core error types ──
//
// User-facing errors from catflap-core. Consumers never see raw frame or
// socket failures directly; the `From<catflap_api::Error>` impl translates
// transport-layer errors into domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to gateway: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Gateway disconnected")]
    GatewayDisconnected,

    #[error("Gateway request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Device not found: {identifier}")]
    DeviceNotFound { identifier: String },

    #[error("Pet not found: {identifier}")]
    PetNotFound { identifier: String },

    #[error("Transit policy not found: {identifier}")]
    PolicyNotFound { identifier: String },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Operation rejected by gateway: {message}")]
    Rejected { message: String },

    #[error("Unexpected gateway response for '{operation}': {reason}")]
    UnexpectedResponse { operation: String, reason: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<catflap_api::Error> for CoreError {
    fn from(err: catflap_api::Error) -> Self {
        match err {
            catflap_api::Error::Connect(reason) => CoreError::ConnectionFailed { reason },
            catflap_api::Error::Closed { code, reason } => CoreError::ConnectionFailed {
                reason: format!("gateway closed the connection (code {code}): {reason}"),
            },
            catflap_api::Error::ConnectionLost | catflap_api::Error::SessionClosed => {
                CoreError::GatewayDisconnected
            }
            catflap_api::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            catflap_api::Error::Rejected { event, message } => CoreError::Rejected {
                message: format!("{event}: {message}"),
            },
            catflap_api::Error::Serialization { message } => {
                CoreError::Internal(format!("serialization error: {message}"))
            }
            catflap_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("invalid gateway URL: {e}"),
            },
        }
    }
}
