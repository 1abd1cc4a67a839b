//! Gateway session with request/response multiplexing and auto-reconnect.
//!
//! One background task owns the WebSocket. Callers issue [`Session::call`]
//! and the task correlates the response by frame id; server pushes are
//! fanned out through a [`tokio::sync::broadcast`] channel. Reconnection
//! uses exponential backoff + jitter, and every (re)establishment emits a
//! synthetic [`CONNECT_EVENT`] push so consumers can refresh their
//! server-side subscriptions.
//!
//! # Example
//!
//! ```rust,ignore
//! use catflap_api::{ReconnectConfig, Session, TransportConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let cancel = CancellationToken::new();
//! let session = Session::connect(transport, ReconnectConfig::default(), cancel.clone());
//!
//! let mut pushes = session.subscribe();
//! let devices = session.call("getDevices", serde_json::json!({"subscribe": true})).await?;
//!
//! while let Ok(push) = pushes.recv().await {
//!     println!("{}: {}", push.event, push.data);
//! }
//!
//! session.shutdown();
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::protocol::{Frame, parse_frame};
use crate::transport::TransportConfig;

// ── Channel capacities ───────────────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const CALL_CHANNEL_CAPACITY: usize = 64;

/// Name of the synthetic push emitted after every successful connect.
///
/// The gateway forgets per-connection subscriptions on disconnect, so
/// consumers listen for this to re-issue their `subscribe: true` calls.
pub const CONNECT_EVENT: &str = "connect";

// ── PushEvent ────────────────────────────────────────────────────────

/// A named event pushed by the gateway (or synthesized by the session).
#[derive(Debug, Clone)]
pub struct PushEvent {
    /// Event name, e.g. `"deviceUpdate"`, `"eventUpdate"`.
    pub event: String,

    /// Raw payload; `catflap-core` converts this into typed entities.
    pub data: Value,

    /// When this client received the frame.
    pub received_at: DateTime<Utc>,
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for session reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

// ── Session handle ───────────────────────────────────────────────────

struct Call {
    event: String,
    data: Value,
    reply: oneshot::Sender<Result<Value, Error>>,
}

struct PendingCall {
    event: String,
    reply: oneshot::Sender<Result<Value, Error>>,
}

/// Handle to a running gateway session.
///
/// Calls may be issued from any task. Drop all handles and call
/// [`shutdown`](Self::shutdown) to tear down the background task.
pub struct Session {
    call_tx: mpsc::Sender<Call>,
    event_rx: broadcast::Receiver<Arc<PushEvent>>,
    cancel: CancellationToken,
    request_timeout: Duration,
}

impl Session {
    /// Spawn the session task and return immediately.
    ///
    /// The first connection attempt happens asynchronously; calls issued
    /// before it completes are queued and answered once the socket is up
    /// (or fail with [`Error::Timeout`]).
    pub fn connect(
        transport: TransportConfig,
        reconnect: ReconnectConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (event_tx, event_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (call_tx, call_rx) = mpsc::channel(CALL_CHANNEL_CAPACITY);
        let request_timeout = transport.request_timeout;

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            session_loop(transport, call_rx, event_tx, reconnect, task_cancel).await;
        });

        Self {
            call_tx,
            event_rx,
            cancel,
            request_timeout,
        }
    }

    /// Issue a named call and await the gateway's correlated response.
    pub async fn call(&self, event: &str, data: Value) -> Result<Value, Error> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.call_tx
            .send(Call {
                event: event.to_owned(),
                data,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::SessionClosed)?;

        match tokio::time::timeout(self.request_timeout, reply_rx).await {
            Err(_) => Err(Error::Timeout {
                timeout_secs: self.request_timeout.as_secs(),
            }),
            Ok(Err(_)) => Err(Error::ConnectionLost),
            Ok(Ok(result)) => result,
        }
    }

    /// Get a new broadcast receiver for pushed events.
    ///
    /// Multiple consumers can subscribe concurrently. A consumer that
    /// falls behind receives [`broadcast::error::RecvError::Lagged`].
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<PushEvent>> {
        self.event_rx.resubscribe()
    }

    /// Signal the background task to shut down gracefully.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Background session loop ──────────────────────────────────────────

/// Main loop: connect → serve calls and pushes → on error, backoff → reconnect.
async fn session_loop(
    transport: TransportConfig,
    mut call_rx: mpsc::Receiver<Call>,
    event_tx: broadcast::Sender<Arc<PushEvent>>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = serve_connection(&transport, &mut call_rx, &event_tx, &cancel) => {
                match result {
                    Ok(ConnectionEnd::HandlesDropped) => {
                        tracing::debug!("all session handles dropped, stopping");
                        break;
                    }
                    // Clean disconnect (server close frame or stream end):
                    // reset the attempt counter and reconnect immediately.
                    Ok(ConnectionEnd::Remote) => {
                        tracing::info!("gateway disconnected cleanly, reconnecting");
                        attempt = 0;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, attempt, "gateway session error");

                        if let Some(max) = reconnect.max_retries {
                            if attempt >= max {
                                tracing::error!(
                                    max_retries = max,
                                    "gateway reconnection limit reached, giving up"
                                );
                                break;
                            }
                        }

                        let delay = calculate_backoff(attempt, &reconnect);
                        tracing::info!(
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            attempt,
                            "waiting before reconnect"
                        );

                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }

                        attempt += 1;
                    }
                }
            }
        }
    }
}

/// Why a single connection ended.
enum ConnectionEnd {
    /// Server closed the socket or the stream ended.
    Remote,
    /// Every `Session` handle was dropped; nothing left to serve.
    HandlesDropped,
}

/// Establish one connection and serve it until it drops.
async fn serve_connection(
    transport: &TransportConfig,
    call_rx: &mut mpsc::Receiver<Call>,
    event_tx: &broadcast::Sender<Arc<PushEvent>>,
    cancel: &CancellationToken,
) -> Result<ConnectionEnd, Error> {
    tracing::info!(url = %transport.url, "connecting to gateway");

    let request = transport.upgrade_request()?;
    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| Error::Connect(e.to_string()))?;

    tracing::info!("gateway connected");

    // Subscriptions are per-connection server-side; tell consumers to
    // re-establish theirs.
    let _ = event_tx.send(Arc::new(PushEvent {
        event: CONNECT_EVENT.to_owned(),
        data: Value::Null,
        received_at: Utc::now(),
    }));

    let (mut write, mut read) = ws_stream.split();
    let mut pending: HashMap<u64, PendingCall> = HashMap::new();
    let mut next_id: u64 = 1;

    let end = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break Ok(ConnectionEnd::Remote),
            call = call_rx.recv() => {
                let Some(call) = call else {
                    break Ok(ConnectionEnd::HandlesDropped);
                };
                let id = next_id;
                next_id += 1;

                match send_request(&mut write, id, &call).await {
                    Ok(()) => {
                        pending.insert(id, PendingCall { event: call.event, reply: call.reply });
                    }
                    Err(e) => {
                        let _ = call.reply.send(Err(Error::ConnectionLost));
                        break Err(e);
                    }
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        if let Some(frame) = parse_frame(&text) {
                            dispatch_frame(frame, &mut pending, event_tx);
                        }
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        // tungstenite answers pongs automatically
                        tracing::trace!("gateway ping");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            tracing::info!(code = %cf.code, reason = %cf.reason, "gateway close frame");
                        } else {
                            tracing::info!("gateway close frame (no payload)");
                        }
                        break Ok(ConnectionEnd::Remote);
                    }
                    Some(Err(e)) => break Err(Error::Connect(e.to_string())),
                    None => {
                        tracing::info!("gateway stream ended");
                        break Ok(ConnectionEnd::Remote);
                    }
                    _ => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    };

    // Whatever ended the connection, nothing will answer these anymore.
    for (_, call) in pending.drain() {
        let _ = call.reply.send(Err(Error::ConnectionLost));
    }

    end
}

async fn send_request<S>(write: &mut S, id: u64, call: &Call) -> Result<(), Error>
where
    S: SinkExt<tungstenite::Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let frame = Frame::Request {
        id,
        event: call.event.clone(),
        data: call.data.clone(),
    };
    let text = serde_json::to_string(&frame).map_err(|e| Error::Serialization {
        message: e.to_string(),
    })?;

    tracing::debug!(id, event = %call.event, "sending call");
    write
        .send(tungstenite::Message::Text(text.into()))
        .await
        .map_err(|e| Error::Connect(e.to_string()))
}

/// Route one parsed frame: complete the matching pending call, or
/// broadcast a push. Unexpected frames are logged and dropped.
fn dispatch_frame(
    frame: Frame,
    pending: &mut HashMap<u64, PendingCall>,
    event_tx: &broadcast::Sender<Arc<PushEvent>>,
) {
    match frame {
        Frame::Response { id, data, error } => match pending.remove(&id) {
            Some(call) => {
                let result = match error {
                    Some(message) => Err(Error::Rejected {
                        event: call.event,
                        message,
                    }),
                    None => Ok(data),
                };
                let _ = call.reply.send(result);
            }
            None => {
                tracing::warn!(id, "response for unknown call id");
            }
        },
        Frame::Event { event, data } => {
            // Send errors just mean no active subscribers right now.
            let _ = event_tx.send(Arc::new(PushEvent {
                event,
                data,
                received_at: Utc::now(),
            }));
        }
        Frame::Request { id, event, .. } => {
            tracing::warn!(id, event = %event, "gateway sent a request frame, ignoring");
        }
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) + jitter`
///
/// Jitter is +-25%, derived deterministically from the attempt number so
/// that concurrent clients still spread out without an RNG dependency.
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
    let capped = base.min(config.max_delay.as_secs_f64());

    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pending_call(event: &str) -> (PendingCall, oneshot::Receiver<Result<Value, Error>>) {
        let (tx, rx) = oneshot::channel();
        (
            PendingCall {
                event: event.into(),
                reply: tx,
            },
            rx,
        )
    }

    #[test]
    fn default_reconnect_config() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!(config.max_retries.is_none());
    }

    #[test]
    fn backoff_increases_exponentially() {
        let config = ReconnectConfig::default();

        let d0 = calculate_backoff(0, &config);
        let d1 = calculate_backoff(1, &config);
        let d2 = calculate_backoff(2, &config);

        assert!(d1 > d0, "d1 ({d1:?}) should be greater than d0 ({d0:?})");
        assert!(d2 > d1, "d2 ({d2:?}) should be greater than d1 ({d1:?})");
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_retries: None,
        };

        let d10 = calculate_backoff(10, &config);
        // With jitter factor up to 1.25, max effective is 12.5s
        assert!(
            d10 <= Duration::from_secs(13),
            "delay at attempt 10 ({d10:?}) should be capped near max_delay"
        );
    }

    #[test]
    fn response_frame_completes_pending_call() {
        let (event_tx, _) = broadcast::channel(16);
        let mut pending = HashMap::new();
        let (call, mut rx) = pending_call("getDevice");
        pending.insert(3, call);

        dispatch_frame(
            Frame::Response {
                id: 3,
                data: json!({"deviceId": "OC-001"}),
                error: None,
            },
            &mut pending,
            &event_tx,
        );

        assert!(pending.is_empty());
        let result = rx.try_recv().unwrap().unwrap();
        assert_eq!(result["deviceId"], "OC-001");
    }

    #[test]
    fn error_response_rejects_pending_call() {
        let (event_tx, _) = broadcast::channel(16);
        let mut pending = HashMap::new();
        let (call, mut rx) = pending_call("getEvent");
        pending.insert(11, call);

        dispatch_frame(
            Frame::Response {
                id: 11,
                data: Value::Null,
                error: Some("event expired".into()),
            },
            &mut pending,
            &event_tx,
        );

        match rx.try_recv().unwrap() {
            Err(Error::Rejected { event, message }) => {
                assert_eq!(event, "getEvent");
                assert_eq!(message, "event expired");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn response_for_unknown_id_is_dropped() {
        let (event_tx, _) = broadcast::channel(16);
        let mut pending = HashMap::new();

        dispatch_frame(
            Frame::Response {
                id: 99,
                data: Value::Null,
                error: None,
            },
            &mut pending,
            &event_tx,
        );
        // nothing to assert beyond "did not panic"
    }

    #[test]
    fn push_frame_is_broadcast() {
        let (event_tx, mut event_rx) = broadcast::channel(16);
        let mut pending = HashMap::new();

        dispatch_frame(
            Frame::Event {
                event: "eventUpdate".into(),
                data: json!({"deviceId": "OC-001", "eventId": 42}),
            },
            &mut pending,
            &event_tx,
        );

        let push = event_rx.try_recv().unwrap();
        assert_eq!(push.event, "eventUpdate");
        assert_eq!(push.data["eventId"], 42);
    }
}
