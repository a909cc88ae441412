//! Wire types for the Model Context Protocol (MCP).
//!
//! These types cover the JSON-RPC 2.0 envelope MCP rides on top of, plus the
//! request/result/notification shapes for the subset of MCP this client
//! implements: `initialize`, `notifications/initialized`, `tools/list`, and
//! `tools/call`. We keep the types TS/JSON-schema friendly (via `ts-rs` and
//! `schemars`) so a host that embeds them in its own protocol structures, or
//! exports them to a TypeScript front end, can do so without re-deriving.
//!
//! The crate is deliberately narrow: prompts, resources, and sampling are
//! out of scope (see the crate-level docs in `mcp-client`), but the
//! `ModelContextProtocolRequest`/`ModelContextProtocolNotification` traits
//! are the extension seam a future crate would add them through.

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use ts_rs::TS;

/// The MCP protocol revision this client speaks.
pub const MCP_SCHEMA_VERSION: &str = "2025-03-26";

/// The `jsonrpc` field every frame carries.
pub const JSONRPC_VERSION: &str = "2.0";

/// ID of a request, which can be either a string or an integer.
///
/// This client only ever allocates `Integer` IDs (see `mcp-client`'s request
/// multiplexer), but a conforming server is free to echo a string ID back if
/// a future extension sends one, so both forms are represented here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, TS)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    #[ts(type = "number")]
    Integer(i64),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::String(s) => f.write_str(s),
            RequestId::Integer(i) => i.fmt(f),
        }
    }
}

/// A JSON-RPC request: has `id` and `method`, and an optional `params`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, TS)]
pub struct JSONRPCRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub params: Option<serde_json::Value>,
}

/// A JSON-RPC notification: has `method` and an optional `params`, no `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, TS)]
pub struct JSONRPCNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub params: Option<serde_json::Value>,
}

/// A successful JSON-RPC response: has `id` and `result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, TS)]
pub struct JSONRPCResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    pub result: serde_json::Value,
}

/// The `error` object carried by a JSON-RPC error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, TS)]
pub struct JSONRPCErrorError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub data: Option<serde_json::Value>,
}

/// A JSON-RPC error response: has `id` and `error`, never both `error` and `result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, TS)]
pub struct JSONRPCError {
    pub jsonrpc: String,
    pub id: RequestId,
    pub error: JSONRPCErrorError,
}

/// Any single frame that can cross the wire in either direction.
///
/// Deserialization tries variants in the order below: a response and an
/// error frame are distinguished from a request by the presence of
/// `result`/`error` rather than `method`; a request is distinguished from a
/// notification by the presence of `id`. Declaration order matters here
/// because `#[serde(untagged)]` takes the first variant that deserializes
/// successfully, and a request's JSON also satisfies a notification's shape
/// once `id` is ignored as an unknown field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, TS)]
#[serde(untagged)]
pub enum JSONRPCMessage {
    Response(JSONRPCResponse),
    Error(JSONRPCError),
    Request(JSONRPCRequest),
    Notification(JSONRPCNotification),
}

/// A typed MCP request. Implemented by zero-sized marker types (see
/// [`InitializeRequest`], [`ListToolsRequest`], [`CallToolRequest`]) so
/// `McpClient::send_request::<R>` can infer both the method name and the
/// params/result types from a single type parameter.
pub trait ModelContextProtocolRequest {
    const METHOD: &'static str;
    type Params: Serialize + DeserializeOwned;
    type Result: Serialize + DeserializeOwned;
}

/// A typed MCP notification, the no-response counterpart of
/// [`ModelContextProtocolRequest`].
pub trait ModelContextProtocolNotification {
    const METHOD: &'static str;
    type Params: Serialize + DeserializeOwned;
}

/// Capability flags a client advertises for the `tools` feature area.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, TS)]
pub struct ToolsCapability {
    #[serde(rename = "listChanged", default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub list_changed: Option<bool>,
}

/// Capabilities a client advertises during `initialize`. MCP defines several
/// more (`sampling`, `roots`, ...); this client only ever sets `tools`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, TS)]
pub struct ClientCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub tools: Option<ToolsCapability>,
}

/// Capabilities a server reports back in its `initialize` result. Left
/// opaque since this client does not branch on server capability flags yet.
pub type ServerCapabilities = serde_json::Value;

/// `{name, version}` identifying either end of the connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, TS)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, TS)]
pub struct InitializeRequestParams {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: ClientCapabilities,
    #[serde(rename = "clientInfo")]
    pub client_info: Implementation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, TS)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(rename = "serverInfo")]
    pub server_info: Implementation,
    pub capabilities: ServerCapabilities,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub instructions: Option<String>,
}

pub struct InitializeRequest;

impl ModelContextProtocolRequest for InitializeRequest {
    const METHOD: &'static str = "initialize";
    type Params = InitializeRequestParams;
    type Result = InitializeResult;
}

pub struct InitializedNotification;

impl ModelContextProtocolNotification for InitializedNotification {
    const METHOD: &'static str = "notifications/initialized";
    type Params = Option<serde_json::Value>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, TS)]
pub struct ListToolsRequestParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub cursor: Option<String>,
}

/// Definition for a tool the client can call, as reported by `tools/list`.
///
/// `input_schema` is kept as a raw JSON Schema fragment rather than parsed
/// eagerly here: `mcp-client`'s tool model (see `mcp_client::tools`) is
/// responsible for sanitizing and recursing into it to build a
/// [`mcp_client::tools::Parameter`](../mcp_client/tools/struct.Parameter.html) tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, TS)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub output_schema: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub annotations: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, TS)]
pub struct ListToolsResult {
    pub tools: Vec<Tool>,
    #[serde(rename = "nextCursor", default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub next_cursor: Option<String>,
}

pub struct ListToolsRequest;

impl ModelContextProtocolRequest for ListToolsRequest {
    const METHOD: &'static str = "tools/list";
    type Params = Option<ListToolsRequestParams>;
    type Result = ListToolsResult;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, TS)]
pub struct CallToolRequestParams {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub arguments: Option<serde_json::Value>,
}

/// One item of a `tools/call` result's `content` array. MCP defines `text`,
/// `image`, and `resource` variants; everything beyond `text` is kept as a
/// raw value because this client only joins text content (see §4.B of the
/// design doc this crate implements) and must not fail to parse a result
/// just because a server included an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, TS)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, TS)]
pub struct CallToolResult {
    pub content: Vec<ContentBlock>,
    #[serde(rename = "isError", default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub is_error: Option<bool>,
}

pub struct CallToolRequest;

impl ModelContextProtocolRequest for CallToolRequest {
    const METHOD: &'static str = "tools/call";
    type Params = CallToolRequestParams;
    type Result = CallToolResult;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn request_id_displays_both_forms() {
        assert_eq!(RequestId::Integer(7).to_string(), "7");
        assert_eq!(RequestId::String("abc".to_string()).to_string(), "abc");
    }

    #[test]
    fn message_untagged_dispatch_distinguishes_all_four_shapes() {
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/list",
        });
        assert!(matches!(
            serde_json::from_value::<JSONRPCMessage>(request).expect("valid frame"),
            JSONRPCMessage::Request(_)
        ));

        let notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized",
        });
        assert!(matches!(
            serde_json::from_value::<JSONRPCMessage>(notification).expect("valid frame"),
            JSONRPCMessage::Notification(_)
        ));

        let response = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {"tools": []},
        });
        assert!(matches!(
            serde_json::from_value::<JSONRPCMessage>(response).expect("valid frame"),
            JSONRPCMessage::Response(_)
        ));

        let error = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32000, "message": "boom"},
        });
        assert!(matches!(
            serde_json::from_value::<JSONRPCMessage>(error).expect("valid frame"),
            JSONRPCMessage::Error(_)
        ));
    }

    #[test]
    fn content_block_ignores_non_text_variants() {
        let result: CallToolResult = serde_json::from_value(serde_json::json!({
            "content": [
                {"type": "text", "text": "a"},
                {"type": "image", "data": "...", "mimeType": "image/png"},
            ],
        }))
        .expect("valid result");
        assert_eq!(result.content.len(), 2);
        assert!(matches!(result.content[0], ContentBlock::Text { .. }));
        assert!(matches!(result.content[1], ContentBlock::Other));
    }
}
