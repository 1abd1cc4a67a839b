//! Shared helpers for command handlers.

use std::sync::Arc;

use catflap_core::{Device, Gateway};

use crate::error::CliError;

/// Look up a device by id in the gateway's store.
pub fn resolve_device(gateway: &Gateway, identifier: &str) -> Result<Arc<Device>, CliError> {
    gateway
        .store()
        .device_by_id(identifier)
        .ok_or_else(|| CliError::NotFound {
            resource_type: "device".into(),
            identifier: identifier.into(),
            list_command: "devices list".into(),
        })
}

/// Prompt for confirmation, auto-approving if `--yes` was passed.
pub fn confirm(message: &str, yes_flag: bool) -> Result<bool, CliError> {
    if yes_flag {
        return Ok(true);
    }
    let confirmed = dialoguer::Confirm::new()
        .with_prompt(message)
        .default(false)
        .interact()
        .map_err(|e| CliError::Io(std::io::Error::other(e)))?;
    Ok(confirmed)
}

/// Render an optional timestamp for table cells.
pub fn fmt_timestamp(ts: Option<chrono::DateTime<chrono::Utc>>) -> String {
    ts.map_or_else(|| "-".into(), |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}
