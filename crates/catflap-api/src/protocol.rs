// ── Gateway wire frames ──
//
// Every text frame on the socket is one JSON object tagged by `type`:
// client → server requests, server → client responses (correlated by id),
// and uncorrelated server pushes. Unknown or malformed frames are logged
// and skipped — the stream must survive protocol extensions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single frame on the gateway socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    /// Client-initiated call, answered by a `Response` with the same id.
    Request {
        id: u64,
        event: String,
        #[serde(default)]
        data: Value,
    },

    /// Answer to a `Request`. Exactly one of `data`/`error` is meaningful.
    Response {
        id: u64,
        #[serde(default)]
        data: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Server-pushed named event, not tied to any request.
    Event {
        event: String,
        #[serde(default)]
        data: Value,
    },
}

/// Parse a text frame, logging and discarding anything unintelligible.
pub fn parse_frame(text: &str) -> Option<Frame> {
    match serde_json::from_str(text) {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::debug!(error = %e, "discarding unparseable gateway frame");
            None
        }
    }
}
