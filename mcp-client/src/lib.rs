//! A minimal async client for the Model Context Protocol (MCP).
//!
//! This crate mediates between an LLM orchestration layer that wants a
//! uniform "list tools / call tool by name" interface and one of two
//! transport backends: a local subprocess over stdio, or a remote SSE+POST
//! HTTP endpoint. See the crate's design doc for the full decomposition;
//! in short:
//!
//! - [`transport`] (component A) owns framing, request multiplexing, and
//!   the background reader task for each backend.
//! - [`session`] (component B) layers the JSON-RPC initialization
//!   handshake, ID/timeout bookkeeping, and tool caching on top.
//! - [`tools`] (component D) converts a server's `inputSchema` into a
//!   host-neutral [`tools::Parameter`] tree and emits it back out as
//!   provider-specific function schemas.
//! - [`error`] is the typed boundary the functions below actually return.
//!
//! The entry point most callers want is [`new_client`].

pub mod error;
pub mod session;
pub mod tools;
pub mod transport;

use std::collections::HashMap;
use std::ffi::OsString;
use std::time::Duration;

pub use error::McpClientError;
pub use error::Result;
pub use session::DEFAULT_REQUEST_TIMEOUT;
pub use session::McpClient;
pub use tools::Parameter;
pub use tools::ParameterType;
pub use tools::ToolDescriptor;

use transport::SseTransport;
use transport::StdioTransport;
use transport::Transport;

/// Which of the two transport backends to use, selected by the
/// orchestration layer (§6 External interfaces).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    Sse,
}

impl TransportKind {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "stdio" => Some(Self::Stdio),
            "sse" => Some(Self::Sse),
            _ => None,
        }
    }
}

/// The backend-specific connection details the orchestration layer hands
/// in alongside a [`TransportKind`]. Exactly one variant matches the
/// requested kind; a mismatch (e.g. `Sse` kind with `Stdio` config) is an
/// [`McpClientError::InvalidTransport`].
#[derive(Debug, Clone)]
pub enum TransportConfig {
    Stdio {
        command: OsString,
        args: Vec<OsString>,
        env: Option<HashMap<String, String>>,
    },
    Sse {
        url: String,
        headers: Option<HashMap<String, String>>,
    },
}

/// Construct and initialize an [`McpClient`] over the requested transport.
///
/// Mirrors the orchestration layer's external call shape (§6):
/// `new_client(name, transport_type, config, request_timeout?,
/// reverse_proxy_url?)`. `reverse_proxy_url`, when set, overrides the
/// `url` in an `Sse` config so a host can route a server's SSE traffic
/// through a proxy without the caller reconstructing the config.
pub async fn new_client(
    name: impl Into<String>,
    transport_type: &str,
    config: TransportConfig,
    request_timeout: Option<Duration>,
    reverse_proxy_url: Option<&str>,
) -> Result<McpClient> {
    let kind = TransportKind::parse(transport_type)
        .ok_or_else(|| McpClientError::InvalidTransport(format!("unknown transport type: {transport_type}")))?;

    let transport: Box<dyn Transport> = match (kind, config) {
        (TransportKind::Stdio, TransportConfig::Stdio { command, args, env }) => {
            Box::new(StdioTransport::spawn(command, args, env).await.map_err(|err| {
                McpClientError::InitializationFailed(format!("failed to spawn stdio transport: {err:#}"))
            })?)
        }
        (TransportKind::Sse, TransportConfig::Sse { url, headers }) => {
            let url = reverse_proxy_url.unwrap_or(url.as_str());
            Box::new(SseTransport::connect(url, headers).await.map_err(|err| {
                McpClientError::InitializationFailed(format!("SSE handshake failed: {err:#}"))
            })?)
        }
        (TransportKind::Stdio, TransportConfig::Sse { .. }) => {
            return Err(McpClientError::InvalidTransport(
                "transport_type \"stdio\" requires a stdio config (command/args/env)".to_string(),
            ));
        }
        (TransportKind::Sse, TransportConfig::Stdio { .. }) => {
            return Err(McpClientError::InvalidTransport(
                "transport_type \"sse\" requires an sse config (url/headers)".to_string(),
            ));
        }
    };

    McpClient::new(transport, name, request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_transport_type_is_rejected_before_any_io() {
        let err = new_client(
            "test",
            "carrier-pigeon",
            TransportConfig::Stdio {
                command: "true".into(),
                args: vec![],
                env: None,
            },
            None,
            None,
        )
        .await
        .expect_err("unknown transport type must be rejected");
        assert!(matches!(err, McpClientError::InvalidTransport(_)));
    }

    #[tokio::test]
    async fn mismatched_config_for_stdio_is_rejected() {
        let err = new_client(
            "test",
            "stdio",
            TransportConfig::Sse {
                url: "https://example.invalid/sse".to_string(),
                headers: None,
            },
            None,
            None,
        )
        .await
        .expect_err("sse config under stdio transport_type must be rejected");
        assert!(matches!(err, McpClientError::InvalidTransport(_)));
    }
}
