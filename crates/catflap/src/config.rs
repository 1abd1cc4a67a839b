//! Profile resolution with CLI-flag overrides.

use std::time::Duration;

use secrecy::SecretString;

use catflap_config::{Config, Profile};
use catflap_core::GatewayConfig;
use catflap_core::config::DEFAULT_GATEWAY_URL;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Which profile name is active: `--profile` beats the config default.
pub fn active_profile_name(global: &GlobalOpts, cfg: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| cfg.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Build a `GatewayConfig` from the config file, profile, and CLI overrides.
pub fn resolve_gateway_config(global: &GlobalOpts) -> Result<GatewayConfig, CliError> {
    let cfg = catflap_config::load_config_or_default();
    let profile_name = active_profile_name(global, &cfg);

    // A token flag/env is enough to connect without any profile.
    if let Some(ref token) = global.token {
        let url_str = global.gateway.as_deref().unwrap_or(DEFAULT_GATEWAY_URL);
        let url: url::Url = url_str.parse().map_err(|_| CliError::Validation {
            field: "gateway".into(),
            reason: format!("invalid URL: {url_str}"),
        })?;

        let mut config = GatewayConfig::new(url, SecretString::from(token.clone()));
        config.request_timeout = Duration::from_secs(global.timeout);
        return Ok(config);
    }

    let Some(profile) = cfg.profiles.get(&profile_name) else {
        if cfg.profiles.is_empty() {
            return Err(CliError::NoCredentials {
                profile: profile_name,
            });
        }
        let mut available: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
        available.sort_unstable();
        return Err(CliError::ProfileNotFound {
            name: profile_name,
            available: available.join(", "),
        });
    };

    let mut config = catflap_config::profile_to_gateway_config(profile, &profile_name)?;

    // CLI flags beat profile values.
    if let Some(ref url_str) = global.gateway {
        config.url = url_str.parse().map_err(|_| CliError::Validation {
            field: "gateway".into(),
            reason: format!("invalid URL: {url_str}"),
        })?;
    }
    if profile.timeout.is_none() {
        config.request_timeout = Duration::from_secs(global.timeout);
    }

    Ok(config)
}

/// Redact a profile for display.
pub fn describe_profile(name: &str, profile: &Profile) -> String {
    let gateway = profile.gateway.as_deref().unwrap_or(DEFAULT_GATEWAY_URL);
    let token = if profile.token.is_some() {
        "<in config>"
    } else if profile.token_env.is_some() {
        "<from env>"
    } else {
        "<keyring>"
    };
    format!("{name}: gateway={gateway} token={token}")
}
