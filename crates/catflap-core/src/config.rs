// ── Gateway connection configuration ──

use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use catflap_api::{ReconnectConfig, TransportConfig};

/// Default public gateway endpoint.
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.catflap.io/ws";

/// Everything needed to establish and maintain a gateway session.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// WebSocket endpoint of the gateway.
    pub url: Url,

    /// Opaque account token (treated as a credential, never logged).
    pub token: SecretString,

    /// How long a single request may wait for its response.
    pub request_timeout: Duration,

    /// Reconnect/backoff behavior for the underlying session.
    pub reconnect: ReconnectConfig,
}

impl GatewayConfig {
    pub fn new(url: Url, token: SecretString) -> Self {
        Self {
            url,
            token,
            request_timeout: Duration::from_secs(30),
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Translate into the transport layer's connection settings.
    pub(crate) fn transport(&self) -> TransportConfig {
        let mut transport = TransportConfig::new(self.url.clone(), self.token.clone());
        transport.request_timeout = self.request_timeout;
        transport
    }
}
