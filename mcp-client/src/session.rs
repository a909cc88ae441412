//! The JSON-RPC session state machine (component B): initialization
//! handshake, typed request dispatch, tool-list caching, and tool
//! invocation, layered over a [`Transport`].

use std::sync::Arc;
use std::time::Duration;

use mcp_types::CallToolRequest;
use mcp_types::CallToolRequestParams;
use mcp_types::ClientCapabilities;
use mcp_types::ContentBlock;
use mcp_types::Implementation;
use mcp_types::InitializeRequest;
use mcp_types::InitializeRequestParams;
use mcp_types::InitializedNotification;
use mcp_types::ListToolsRequest;
use mcp_types::MCP_SCHEMA_VERSION;
use mcp_types::ModelContextProtocolNotification;
use mcp_types::ModelContextProtocolRequest;
use mcp_types::ToolsCapability;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time;
use tracing::debug;
use tracing::info;

use crate::error::McpClientError;
use crate::error::Result;
use crate::tools::ToolDescriptor;
use crate::transport::Transport;

/// The wait bound applied to the fire-and-forget (`wait_for_response: false`)
/// path of [`McpClient::request`], distinct from the 30s read wait
/// [`crate::transport`] enforces for the four core RPCs that actually wait
/// on a response (§3 Session). It is deliberately *not* layered on top of
/// that 30s wait: a second, shorter timeout racing the transport's own
/// would drop the in-flight `send()` future before the transport's timeout
/// branch gets a chance to remove its own pending-registry slot, leaking it
/// (§5, §8.4).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(8_000);

/// A live connection to one MCP server: owns the transport, the
/// initialization state, and the tool-list cache.
pub struct McpClient {
    transport: Box<dyn Transport>,
    client_info: Implementation,
    request_timeout: Duration,
    tools_cache: Mutex<Option<Arc<[ToolDescriptor]>>>,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("client_info", &self.client_info)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl McpClient {
    /// Perform the `initialize` / `notifications/initialized` handshake over
    /// an already-constructed transport and return a ready client.
    pub async fn new(
        transport: Box<dyn Transport>,
        client_name: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = Self {
            transport,
            client_info: Implementation {
                name: client_name.into(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            request_timeout,
            tools_cache: Mutex::new(None),
        };

        let init_params = InitializeRequestParams {
            protocol_version: MCP_SCHEMA_VERSION.to_string(),
            capabilities: ClientCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: Some(true),
                }),
            },
            client_info: client.client_info.clone(),
        };
        let init_result = client
            .send_request::<InitializeRequest>(init_params)
            .await
            .map_err(|err| McpClientError::InitializationFailed(err.to_string()))?;
        info!(
            server = %init_result.server_info.name,
            protocol_version = %init_result.protocol_version,
            "MCP session initialized",
        );

        client
            .send_notification::<InitializedNotification>(None)
            .await
            .map_err(|err| McpClientError::InitializationFailed(err.to_string()))?;

        Ok(client)
    }

    /// Low-level pass-through to the transport.
    ///
    /// When `wait_for_response` is true (every core RPC: `initialize`,
    /// `tools/list`, `tools/call`), the transport's own 30s read-wait is the
    /// sole timeout (§3, §4.B) — it is not wrapped in a second, shorter
    /// session-level one, since that second timeout could fire first and
    /// drop the `send()` future while the transport's own timeout branch is
    /// still suspended, leaking the pending-registry slot it would
    /// otherwise remove. When `wait_for_response` is false there is no read
    /// wait to race against, so `request_timeout` bounds the enqueue path
    /// directly.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        wait_for_response: bool,
    ) -> Result<Option<Value>> {
        if wait_for_response {
            return self
                .transport
                .send(method, params, true)
                .await
                .map_err(McpClientError::from);
        }

        match time::timeout(self.request_timeout, self.transport.send(method, params, false)).await {
            Ok(result) => result.map_err(McpClientError::from),
            Err(_) => Err(McpClientError::Timeout(self.request_timeout)),
        }
    }

    async fn send_request<R: ModelContextProtocolRequest>(&self, params: R::Params) -> Result<R::Result> {
        let params_value = to_params_value(&params)?;
        let result = self
            .request(R::METHOD, params_value, true)
            .await?
            .ok_or_else(|| McpClientError::ProtocolError(format!("`{}` returned no result", R::METHOD)))?;
        serde_json::from_value(result)
            .map_err(|err| McpClientError::ProtocolError(format!("malformed `{}` result: {err}", R::METHOD)))
    }

    async fn send_notification<N: ModelContextProtocolNotification>(&self, params: N::Params) -> Result<()> {
        let params_value = to_params_value(&params)?;
        self.transport
            .notify(N::METHOD, params_value)
            .await
            .map_err(McpClientError::from)
    }

    /// Return the cached tool-descriptor list, or fetch and cache it if
    /// `refresh` is set or nothing has been cached yet (§4.B).
    pub async fn tools(&self, refresh: bool) -> Result<Arc<[ToolDescriptor]>> {
        if !refresh {
            if let Some(cached) = self.tools_cache.lock().await.as_ref() {
                return Ok(Arc::clone(cached));
            }
        }

        let result = self.send_request::<ListToolsRequest>(None).await?;
        let descriptors = result
            .tools
            .iter()
            .map(ToolDescriptor::from_mcp_tool)
            .collect::<Result<Vec<_>>>()?;
        let descriptors: Arc<[ToolDescriptor]> = descriptors.into();
        *self.tools_cache.lock().await = Some(Arc::clone(&descriptors));
        Ok(descriptors)
    }

    /// Call a tool by name and join its text content with `\n` (§4.B).
    /// Non-text content items are dropped rather than raised, per the
    /// pass-through policy this crate's design doc records for the
    /// `isError`/non-text open question.
    pub async fn execute_tool(&self, name: &str, parameters: Option<Value>) -> Result<String> {
        let params = CallToolRequestParams {
            name: name.to_string(),
            arguments: parameters,
        };
        let result = self.send_request::<CallToolRequest>(params).await?;
        if result.is_error == Some(true) {
            debug!(tool = name, "tool call reported isError: true; passing content through");
        }

        let joined = result
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        Ok(joined)
    }

    /// Idempotently tear down the underlying transport.
    pub async fn close(&self) {
        self.transport.close().await;
    }
}

fn to_params_value<T: serde::Serialize>(params: &T) -> Result<Option<Value>> {
    match serde_json::to_value(params) {
        Ok(Value::Null) => Ok(None),
        Ok(other) => Ok(Some(other)),
        Err(err) => Err(McpClientError::ProtocolError(format!("failed to serialize params: {err}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    /// An in-process stand-in transport (§4.H): no subprocess, no network,
    /// just canned responses keyed by method name, so the session layer can
    /// be exercised without real I/O.
    struct FakeTransport {
        initialize_calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send(
            &self,
            method: &str,
            _params: Option<Value>,
            _wait_for_response: bool,
        ) -> anyhow::Result<Option<Value>> {
            match method {
                "initialize" => {
                    self.initialize_calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Some(serde_json::json!({
                        "protocolVersion": MCP_SCHEMA_VERSION,
                        "serverInfo": {"name": "fake", "version": "0"},
                        "capabilities": {},
                    })))
                }
                "tools/list" => Ok(Some(serde_json::json!({
                    "tools": [{
                        "name": "echo",
                        "description": "d",
                        "inputSchema": {
                            "type": "object",
                            "properties": {"text": {"type": "string", "description": "t"}},
                        },
                    }],
                }))),
                "tools/call" => Ok(Some(serde_json::json!({
                    "content": [
                        {"type": "text", "text": "a"},
                        {"type": "text", "text": "b"},
                    ],
                }))),
                other => Err(anyhow::anyhow!("unexpected method in test: {other}")),
            }
        }

        async fn notify(&self, _method: &str, _params: Option<Value>) -> anyhow::Result<()> {
            Ok(())
        }

        async fn close(&self) {}
    }

    async fn connected_client() -> McpClient {
        let transport = FakeTransport {
            initialize_calls: AtomicUsize::new(0),
        };
        McpClient::new(Box::new(transport), "test-client", DEFAULT_REQUEST_TIMEOUT)
            .await
            .expect("handshake succeeds")
    }

    #[tokio::test]
    async fn tools_list_round_trips_into_a_descriptor() {
        let client = connected_client().await;
        let tools = client.tools(false).await.expect("tools/list succeeds");
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
        assert_eq!(tools[0].description, "d");
        assert!(tools[0].parameters.contains_key("text"));
    }

    #[tokio::test]
    async fn tools_are_cached_until_refresh_is_requested() {
        let client = connected_client().await;
        let first = client.tools(false).await.expect("first call");
        let second = client.tools(false).await.expect("cached call");
        assert!(Arc::ptr_eq(&first, &second));

        let refreshed = client.tools(true).await.expect("refreshed call");
        assert!(!Arc::ptr_eq(&first, &refreshed));
    }

    #[tokio::test]
    async fn execute_tool_joins_text_content_with_newlines() {
        let client = connected_client().await;
        let output = client
            .execute_tool("echo", Some(serde_json::json!({"text": "x"})))
            .await
            .expect("tool call succeeds");
        assert_eq!(output, "a\nb");
    }
}
