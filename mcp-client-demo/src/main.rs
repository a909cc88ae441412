//! A small runnable demo of `mcp-client` (§4.G): connects over either
//! transport, lists the server's tools, and optionally calls one by name.
//! Serves as a smoke test and as documentation-by-example of the public
//! API; it is not part of the crate's core budget.

use std::collections::HashMap;
use std::ffi::OsString;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use clap::ArgAction;
use clap::Parser;
use clap::ValueEnum;
use mcp_client::TransportConfig;

#[derive(Clone, Copy, ValueEnum)]
enum Transport {
    Stdio,
    Sse,
}

impl Transport {
    fn as_str(self) -> &'static str {
        match self {
            Transport::Stdio => "stdio",
            Transport::Sse => "sse",
        }
    }
}

#[derive(Parser)]
#[command(author, version, about = "Connect to an MCP server and call a tool")]
struct Cli {
    /// Which transport backend to use.
    #[arg(long, value_enum)]
    transport: Transport,

    /// Command to spawn for the stdio transport.
    #[arg(long)]
    command: Option<String>,

    /// Extra arguments passed to the spawned command. Repeatable.
    #[arg(long = "arg", action = ArgAction::Append)]
    args: Vec<String>,

    /// Extra environment variables for the spawned command, as `KEY=VALUE`.
    /// Repeatable.
    #[arg(long = "env", value_name = "KEY=VALUE", action = ArgAction::Append)]
    env: Vec<String>,

    /// SSE stream URL for the sse transport.
    #[arg(long)]
    url: Option<String>,

    /// Bearer token forwarded as `Authorization: Bearer <token>` to the SSE
    /// transport; this is the only credential handling this demo does.
    #[arg(long)]
    bearer_token: Option<String>,

    /// Reverse proxy URL overriding the SSE connection URL, per the
    /// orchestration layer's `new_client(..., reverse_proxy_url)` parameter.
    #[arg(long)]
    reverse_proxy_url: Option<String>,

    /// Name this client reports to the server during `initialize`.
    #[arg(long, default_value = "mcp-client-demo")]
    client_name: String,

    /// Per-request timeout in milliseconds.
    #[arg(long, default_value_t = 8_000)]
    request_timeout_ms: u64,

    /// If set, call this tool after listing tools and print its result.
    #[arg(long)]
    tool: Option<String>,

    /// JSON object of arguments to pass to `--tool`.
    #[arg(long, default_value = "{}")]
    arguments: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config = match cli.transport {
        Transport::Stdio => {
            let command = cli
                .command
                .clone()
                .context("--command is required for the stdio transport")?;
            TransportConfig::Stdio {
                command: OsString::from(command),
                args: cli.args.iter().map(OsString::from).collect(),
                env: parse_env(&cli.env)?,
            }
        }
        Transport::Sse => {
            let url = cli.url.clone().context("--url is required for the sse transport")?;
            let mut headers = HashMap::new();
            if let Some(token) = &cli.bearer_token {
                headers.insert("Authorization".to_string(), format!("Bearer {token}"));
            }
            TransportConfig::Sse {
                url,
                headers: if headers.is_empty() { None } else { Some(headers) },
            }
        }
    };

    let client = mcp_client::new_client(
        cli.client_name.clone(),
        cli.transport.as_str(),
        config,
        Some(Duration::from_millis(cli.request_timeout_ms)),
        cli.reverse_proxy_url.as_deref(),
    )
    .await
    .context("failed to connect to MCP server")?;

    let tools = client.tools(false).await.context("tools/list failed")?;
    println!("discovered {} tool(s):", tools.len());
    for tool in tools.iter() {
        println!("  - {}: {}", tool.name, tool.description);
    }

    if let Some(tool_name) = &cli.tool {
        let arguments: serde_json::Value =
            serde_json::from_str(&cli.arguments).context("--arguments must be valid JSON")?;
        let result = client
            .execute_tool(tool_name, Some(arguments))
            .await
            .with_context(|| format!("tools/call failed for `{tool_name}`"))?;
        println!("\n{tool_name} ->\n{result}");
    }

    client.close().await;
    Ok(())
}

fn parse_env(entries: &[String]) -> Result<Option<HashMap<String, String>>> {
    if entries.is_empty() {
        return Ok(None);
    }
    let mut env = HashMap::new();
    for entry in entries {
        let (key, value) = entry
            .split_once('=')
            .with_context(|| format!("--env entry `{entry}` must be KEY=VALUE"))?;
        env.insert(key.to_string(), value.to_string());
    }
    Ok(Some(env))
}
