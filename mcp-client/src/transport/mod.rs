//! The byte-level transport layer (component A): framing and bidirectional
//! messaging with one MCP server instance, over either a subprocess (stdio)
//! or an SSE+POST remote endpoint (sse).
//!
//! Both variants are built on the same request-multiplexing primitive,
//! [`RequestMultiplexer`]: a monotonic ID counter plus an ID-keyed map of
//! one-shot completion slots. The transport owns both, per the design's
//! rationale that only the transport itself knows when a frame has actually
//! been written and when a reconnect invalidates in-flight requests.

pub mod sse;
pub mod stdio;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use mcp_types::JSONRPC_VERSION;
use mcp_types::JSONRPCError;
use mcp_types::JSONRPCErrorError;
use mcp_types::JSONRPCMessage;
use mcp_types::JSONRPCNotification;
use mcp_types::JSONRPCRequest;
use mcp_types::JSONRPCResponse;
use mcp_types::RequestId;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::sync::oneshot;
use tokio::time;
use tracing::info;
use tracing::warn;

pub use sse::SseTransport;
pub use stdio::StdioTransport;

/// Capacity of the bounded channel used to hand outgoing frames to the
/// background writer task of the stdio transport.
pub(crate) const CHANNEL_CAPACITY: usize = 128;

/// Per-request wait before `send` gives up and surfaces a timeout (§5).
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type PendingSender = oneshot::Sender<JSONRPCMessage>;

/// Marker error for a genuine transport-level read-wait timeout, distinct
/// from the other failure modes `anyhow::Error` carries across the
/// transport/session boundary. [`crate::error::McpClientError::from`]
/// downcasts for this so a 30s `wait_for_response` timeout surfaces to the
/// caller as `McpClientError::Timeout` rather than the catch-all
/// `TransportBroken` (§8.4).
#[derive(Debug, thiserror::Error)]
#[error("request timed out after {0:?}")]
pub struct RequestTimedOut(pub Duration);

/// The narrow, static contract the session layer consumes. Implemented by
/// [`StdioTransport`] and [`SseTransport`]; the session holds one by trait
/// object so the transport kind can be chosen at runtime from configuration.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Serialize and transmit a request frame. If `wait_for_response` is
    /// `false`, return as soon as the frame is queued for write (`Ok(None)`).
    /// If `true`, block until a response with a matching `id` is delivered,
    /// the 30s timeout elapses, or the transport fails.
    async fn send(
        &self,
        method: &str,
        params: Option<Value>,
        wait_for_response: bool,
    ) -> anyhow::Result<Option<Value>>;

    /// Serialize and transmit a notification. No response is awaited.
    async fn notify(&self, method: &str, params: Option<Value>) -> anyhow::Result<()>;

    /// Idempotently tear down background tasks and underlying resources.
    async fn close(&self);
}

/// Shared request/response correlation state: ID allocation plus the
/// pending-registry. Every outstanding request has exactly one slot here,
/// and every slot is resolved exactly once — by a response, by a JSON-RPC
/// error envelope, or left unresolved to expire via the caller's timeout.
#[derive(Clone)]
pub(crate) struct RequestMultiplexer {
    id_counter: Arc<AtomicI64>,
    pending: Arc<Mutex<HashMap<i64, PendingSender>>>,
}

impl RequestMultiplexer {
    pub(crate) fn new() -> Self {
        Self {
            id_counter: Arc::new(AtomicI64::new(1)),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn next_id(&self) -> i64 {
        self.id_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Build a request frame with a freshly allocated ID and register its
    /// pending slot *before* returning it, so a response that arrives
    /// immediately after the frame is written cannot race ahead of the
    /// registration.
    async fn begin_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> (JSONRPCRequest, oneshot::Receiver<JSONRPCMessage>) {
        let id = self.next_id();
        let request = JSONRPCRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: RequestId::Integer(id),
            method: method.to_string(),
            params,
        };
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);
        (request, rx)
    }

    fn build_notification(method: &str, params: Option<Value>) -> JSONRPCNotification {
        JSONRPCNotification {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
        }
    }

    /// Await the pending slot for `id`, with the shared 30s request timeout.
    /// On timeout the slot is removed here, per the invariant that the
    /// timing-out caller is the one who deletes it.
    async fn wait_for_response(
        &self,
        id: i64,
        rx: oneshot::Receiver<JSONRPCMessage>,
    ) -> anyhow::Result<Value> {
        let message = match time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(message)) => message,
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&id);
                return Err(anyhow!(
                    "response channel closed before a reply was received"
                ));
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(anyhow::Error::new(RequestTimedOut(REQUEST_TIMEOUT)));
            }
        };

        match message {
            JSONRPCMessage::Response(JSONRPCResponse { result, .. }) => Ok(result),
            JSONRPCMessage::Error(JSONRPCError { error, .. }) => Err(anyhow!(
                "server returned JSON-RPC error: code = {}, message = {}",
                error.code,
                error.message
            )),
            other => Err(anyhow!(
                "unexpected message variant received in reply path: {other:?}"
            )),
        }
    }

    /// Route one inbound message to its pending slot, or log it. This is the
    /// single place both transports' reader tasks funnel decoded frames
    /// through, so response/notification handling stays identical between
    /// them.
    pub(crate) async fn handle_incoming(&self, message: JSONRPCMessage) {
        match message {
            JSONRPCMessage::Response(resp) => self.dispatch(resp.id.clone(), JSONRPCMessage::Response(resp)).await,
            JSONRPCMessage::Error(err) => self.dispatch(err.id.clone(), JSONRPCMessage::Error(err)).await,
            JSONRPCMessage::Notification(notification) => {
                info!(method = %notification.method, "<- notification");
            }
            JSONRPCMessage::Request(request) => {
                info!(method = %request.method, "<- server-initiated request ignored");
            }
        }
    }

    async fn dispatch(&self, id: RequestId, message: JSONRPCMessage) {
        let id = match id {
            RequestId::Integer(i) => i,
            RequestId::String(_) => {
                warn!("response with string ID - this client only allocates integer IDs");
                return;
            }
        };
        let slot = self.pending.lock().await.remove(&id);
        match slot {
            Some(tx) => {
                // Ignore send errors - the receiver may have timed out already.
                let _ = tx.send(message);
            }
            None => warn!(id, "no pending request found for response"),
        }
    }

    /// Resolve the pending slot for `id`, if any, with a synthesized
    /// JSON-RPC error. Used when a write fails outright (e.g. a non-2xx
    /// POST) so the caller doesn't have to wait out the full timeout for a
    /// failure we already know about.
    pub(crate) async fn fail(&self, id: i64, message: impl Into<String>) {
        if let Some(tx) = self.pending.lock().await.remove(&id) {
            let err = JSONRPCError {
                jsonrpc: JSONRPC_VERSION.to_owned(),
                id: RequestId::Integer(id),
                error: JSONRPCErrorError {
                    code: -32000,
                    message: message.into(),
                    data: None,
                },
            };
            let _ = tx.send(JSONRPCMessage::Error(err));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn begin_request_registers_a_slot_before_returning() {
        let mux = RequestMultiplexer::new();
        let (request, _rx) = mux.begin_request("tools/list", None).await;
        let id = match request.id {
            RequestId::Integer(i) => i,
            RequestId::String(_) => unreachable!(),
        };
        assert_eq!(mux.pending.lock().await.len(), 1);
        assert!(mux.pending.lock().await.contains_key(&id));
    }

    #[tokio::test]
    async fn handle_incoming_resolves_the_matching_slot_and_removes_it() {
        let mux = RequestMultiplexer::new();
        let (request, rx) = mux.begin_request("tools/list", None).await;
        let id = match request.id.clone() {
            RequestId::Integer(i) => i,
            RequestId::String(_) => unreachable!(),
        };

        mux.handle_incoming(JSONRPCMessage::Response(JSONRPCResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: request.id,
            result: serde_json::json!({"ok": true}),
        }))
        .await;

        assert!(mux.pending.lock().await.is_empty());
        let message = rx.await.expect("slot was resolved");
        assert!(matches!(message, JSONRPCMessage::Response(_)));

        // A second resolution attempt for the same id finds no slot: the
        // registry never holds more than one sender per id, so a late or
        // duplicate response is silently dropped rather than double-resolving.
        mux.dispatch(RequestId::Integer(id), JSONRPCMessage::Notification(JSONRPCNotification {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: "noop".to_string(),
            params: None,
        }))
        .await;
    }

    #[tokio::test]
    async fn fail_synthesizes_an_error_envelope_for_the_pending_slot() {
        let mux = RequestMultiplexer::new();
        let (request, rx) = mux.begin_request("tools/call", None).await;
        let id = match request.id {
            RequestId::Integer(i) => i,
            RequestId::String(_) => unreachable!(),
        };

        mux.fail(id, "write failed").await;

        let message = rx.await.expect("slot was resolved");
        match message {
            JSONRPCMessage::Error(err) => assert_eq!(err.error.message, "write failed"),
            other => panic!("expected an error envelope, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fail_on_an_unknown_id_is_a_no_op() {
        let mux = RequestMultiplexer::new();
        mux.fail(999, "no such request").await;
        assert!(mux.pending.lock().await.is_empty());
    }
}
