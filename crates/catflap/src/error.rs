//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` variants into user-facing errors with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use catflap_core::CoreError;

/// Exit codes per the CLI conventions.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not connect to the gateway")]
    #[diagnostic(
        code(catflap::connection_failed),
        help(
            "Check your network and the gateway URL.\n\
             Reason: {reason}"
        )
    )]
    ConnectionFailed { reason: String },

    // ── Authentication ───────────────────────────────────────────────

    #[error("No token configured for profile '{profile}'")]
    #[diagnostic(
        code(catflap::no_credentials),
        help(
            "Configure a token with: catflap config init\n\
             Or set the CATFLAP_TOKEN environment variable."
        )
    )]
    NoCredentials { profile: String },

    // ── Resources ────────────────────────────────────────────────────

    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(catflap::not_found),
        help("Run: catflap {list_command} to see available {resource_type}s")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    // ── Gateway ──────────────────────────────────────────────────────

    #[error("Gateway rejected the request: {message}")]
    #[diagnostic(code(catflap::rejected))]
    Rejected { message: String },

    #[error("Request timed out after {seconds}s")]
    #[diagnostic(
        code(catflap::timeout),
        help("Increase timeout with --timeout or check gateway responsiveness.")
    )]
    Timeout { seconds: u64 },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(catflap::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(catflap::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: catflap config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error(transparent)]
    #[diagnostic(code(catflap::config))]
    Config(Box<figment::Error>),

    // ── Interactive ──────────────────────────────────────────────────

    #[error("Destructive operation '{action}' requires confirmation")]
    #[diagnostic(
        code(catflap::confirmation_required),
        help("Use --yes (-y) to skip confirmation in non-interactive contexts.")
    )]
    NonInteractiveRequiresYes { action: String },

    // ── IO / Serialization ───────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON payload: {0}")]
    #[diagnostic(code(catflap::json))]
    Json(#[from] serde_json::Error),
}

impl From<figment::Error> for CliError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::NonInteractiveRequiresYes { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { reason } => CliError::ConnectionFailed { reason },

            CoreError::GatewayDisconnected => CliError::ConnectionFailed {
                reason: "gateway connection was lost".into(),
            },

            CoreError::Timeout { timeout_secs } => CliError::Timeout {
                seconds: timeout_secs,
            },

            CoreError::DeviceNotFound { identifier } => CliError::NotFound {
                resource_type: "device".into(),
                identifier,
                list_command: "devices list".into(),
            },

            CoreError::PetNotFound { identifier } => CliError::NotFound {
                resource_type: "pet".into(),
                identifier,
                list_command: "pets list".into(),
            },

            CoreError::PolicyNotFound { identifier } => CliError::NotFound {
                resource_type: "policy".into(),
                identifier,
                list_command: "policies list <device>".into(),
            },

            CoreError::Rejected { message } | CoreError::UnexpectedResponse { reason: message, .. } => {
                CliError::Rejected { message }
            }

            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },

            CoreError::Internal(message) => CliError::Rejected { message },
        }
    }
}

impl From<catflap_config::ConfigError> for CliError {
    fn from(err: catflap_config::ConfigError) -> Self {
        match err {
            catflap_config::ConfigError::NoCredentials { profile } => {
                CliError::NoCredentials { profile }
            }
            catflap_config::ConfigError::Validation { field, reason } => {
                CliError::Validation { field, reason }
            }
            catflap_config::ConfigError::Figment(e) => CliError::Config(e),
            catflap_config::ConfigError::Io(e) => CliError::Io(e),
            catflap_config::ConfigError::Serialization(e) => CliError::Validation {
                field: "config".into(),
                reason: e.to_string(),
            },
        }
    }
}
