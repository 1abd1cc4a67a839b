// Shared transport configuration for the gateway WebSocket session.
//
// The gateway authenticates the upgrade request itself: the account token
// and a platform tag travel as headers, so there is no separate login
// round-trip.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use url::Url;

use crate::error::Error;

/// Configuration for establishing the gateway session.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// WebSocket endpoint, e.g. `wss://gateway.catflap.io/ws`.
    pub url: Url,

    /// Opaque account token, sent as a bearer credential.
    pub token: SecretString,

    /// Platform tag identifying this client to the gateway.
    pub platform: String,

    /// How long a single call may wait for its response.
    pub request_timeout: Duration,
}

impl TransportConfig {
    pub fn new(url: Url, token: SecretString) -> Self {
        Self {
            url,
            token,
            platform: default_platform(),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Build the WebSocket upgrade request with auth headers attached.
    pub(crate) fn upgrade_request(&self) -> Result<ClientRequestBuilder, Error> {
        let uri: tungstenite::http::Uri = self
            .url
            .as_str()
            .parse()
            .map_err(|e: tungstenite::http::uri::InvalidUri| Error::Connect(e.to_string()))?;

        Ok(ClientRequestBuilder::new(uri)
            .with_header(
                "Authorization",
                format!("Bearer {}", self.token.expose_secret()),
            )
            .with_header("x-platform", self.platform.clone()))
    }
}

fn default_platform() -> String {
    format!("catflap-rs/{}", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upgrade_request_builds_for_valid_url() {
        let config = TransportConfig::new(
            Url::parse("wss://gateway.example.net/ws").expect("static url"),
            SecretString::from("tok-123"),
        );
        assert!(config.upgrade_request().is_ok());
    }

    #[test]
    fn default_platform_carries_crate_version() {
        let config = TransportConfig::new(
            Url::parse("wss://gateway.example.net/ws").expect("static url"),
            SecretString::from("tok-123"),
        );
        assert!(config.platform.starts_with("catflap-rs/"));
    }
}
