//! Error taxonomy surfaced across the public API.
//!
//! Internal plumbing (transport glue, JSON (de)serialization, URL parsing)
//! keeps using `anyhow::Error` for context-chaining, the way the rest of
//! this crate's ancestry does. [`McpClientError`] is the boundary type: it's
//! what `new_client`, `McpClient::tools`, and `McpClient::execute_tool`
//! actually return, so a caller can match on a failure kind instead of a
//! message string.

use thiserror::Error;

use crate::transport::RequestTimedOut;

/// Errors surfaced to the orchestration layer.
#[derive(Debug, Error)]
pub enum McpClientError {
    /// Unknown `transport_type`, or a `config` shape that doesn't match the
    /// requested transport (e.g. `sse` without a `url`).
    #[error("invalid transport configuration: {0}")]
    InvalidTransport(String),

    /// The `initialize` round trip (or, for SSE, the pre-handshake for the
    /// messages URL) failed or timed out.
    #[error("MCP session initialization failed: {0}")]
    InitializationFailed(String),

    /// The underlying channel is gone: subprocess exited and the restart
    /// attempt also failed, the SSE stream failed permanently, or a write
    /// could not be queued.
    #[error("MCP transport is broken: {0}")]
    TransportBroken(String),

    /// A request-level 30s wait elapsed with no matching response.
    #[error("MCP request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A malformed response shape, or a JSON-RPC `error` envelope surfaced
    /// from the server.
    #[error("MCP protocol error: {0}")]
    ProtocolError(String),

    /// Reserved for a future policy decision on `isError: true` in a
    /// `tools/call` result (see the Open Question this crate's design doc
    /// records). Not constructed by the default code path today: a tool
    /// error is passed through as joined text, not raised.
    #[error("tool `{name}` reported an error: {message}")]
    ToolError { name: String, message: String },
}

impl From<anyhow::Error> for McpClientError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<RequestTimedOut>() {
            Ok(RequestTimedOut(duration)) => McpClientError::Timeout(duration),
            Err(err) => McpClientError::TransportBroken(format!("{err:#}")),
        }
    }
}

pub type Result<T> = std::result::Result<T, McpClientError>;
