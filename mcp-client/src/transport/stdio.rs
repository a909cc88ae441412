//! Subprocess transport: one JSON frame per line over a child process's
//! stdio (§4.A.1).
//!
//! A single supervisor task owns both halves of the pipe and the restart
//! policy: on a broken pipe or a closed stdout it sleeps briefly, restarts
//! the child exactly once, and resumes. Requests that were in flight at the
//! moment of a restart are not retried — their pending slots simply age out
//! via [`RequestMultiplexer`]'s 30s timeout, since nothing will ever
//! resolve them against the new child process.

use std::collections::HashMap;
use std::ffi::OsString;
use std::process::Stdio as StdStdio;
use std::time::Duration;

use anyhow::Context;
use anyhow::anyhow;
use async_trait::async_trait;
use mcp_types::JSONRPCMessage;
use serde_json::Value;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::process::Child;
use tokio::process::ChildStdin;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::RequestMultiplexer;
use super::Transport;
use super::CHANNEL_CAPACITY;

/// Backoff between a broken pipe/closed stdout and the single restart
/// attempt.
const RESTART_BACKOFF: Duration = Duration::from_millis(500);

/// Bound on how long shutdown waits for background tasks to notice and
/// exit (§5 Shutdown).
const SHUTDOWN_JOIN_BOUND: Duration = Duration::from_secs(1);

pub struct StdioTransport {
    mux: RequestMultiplexer,
    outgoing_tx: mpsc::Sender<JSONRPCMessage>,
    shutdown_tx: watch::Sender<bool>,
    supervisor: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl StdioTransport {
    /// Spawn `program` with `args`, overlaying `extra_env` onto a curated
    /// allow-list of ambient environment variables, and start the
    /// supervisor task.
    pub async fn spawn(
        program: OsString,
        args: Vec<OsString>,
        extra_env: Option<HashMap<String, String>>,
    ) -> anyhow::Result<Self> {
        let env = create_env_for_mcp_server(extra_env);
        let mux = RequestMultiplexer::new();
        let (outgoing_tx, outgoing_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Spawn eagerly so construction fails fast if the command is bad,
        // matching the spec's "transport-construction errors raised from
        // construction" requirement; the supervisor then inherits this
        // first child instead of spawning its own.
        let child = spawn_child(&program, &args, &env)
            .await
            .with_context(|| format!("failed to spawn MCP server process: {program:?}"))?;

        let supervisor = tokio::spawn(run_supervisor(
            program,
            args,
            env,
            child,
            mux.clone(),
            outgoing_rx,
            shutdown_rx,
        ));

        Ok(Self {
            mux,
            outgoing_tx,
            shutdown_tx,
            supervisor: tokio::sync::Mutex::new(Some(supervisor)),
        })
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(
        &self,
        method: &str,
        params: Option<Value>,
        wait_for_response: bool,
    ) -> anyhow::Result<Option<Value>> {
        let (request, rx) = self.mux.begin_request(method, params).await;
        let id = match &request.id {
            mcp_types::RequestId::Integer(i) => *i,
            mcp_types::RequestId::String(_) => unreachable!("this client only allocates integer IDs"),
        };

        if self
            .outgoing_tx
            .send(JSONRPCMessage::Request(request))
            .await
            .is_err()
        {
            self.mux.fail(id, "writer task is gone").await;
            return Err(anyhow!("failed to queue request - writer task is gone"));
        }

        if !wait_for_response {
            return Ok(None);
        }
        self.mux.wait_for_response(id, rx).await.map(Some)
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> anyhow::Result<()> {
        let notification = RequestMultiplexer::build_notification(method, params);
        self.outgoing_tx
            .send(JSONRPCMessage::Notification(notification))
            .await
            .map_err(|_| anyhow!("failed to queue notification `{method}` - writer task is gone"))
    }

    async fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.supervisor.lock().await.take() {
            let _ = tokio::time::timeout(SHUTDOWN_JOIN_BOUND, handle).await;
        }
    }
}

async fn spawn_child(
    program: &OsString,
    args: &[OsString],
    env: &HashMap<String, String>,
) -> std::io::Result<Child> {
    Command::new(program)
        .args(args)
        .env_clear()
        .envs(env)
        .stdin(StdStdio::piped())
        .stdout(StdStdio::piped())
        .stderr(StdStdio::piped())
        .kill_on_drop(true)
        .spawn()
}

/// Owns the child process and both pipe halves for the transport's
/// lifetime, restarting the child once per I/O failure.
async fn run_supervisor(
    program: OsString,
    args: Vec<OsString>,
    env: HashMap<String, String>,
    mut child: Child,
    mux: RequestMultiplexer,
    mut outgoing_rx: mpsc::Receiver<JSONRPCMessage>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    'outer: loop {
        let Some(stdin) = child.stdin.take() else {
            error!("failed to capture child stdin");
            return;
        };
        let Some(stdout) = child.stdout.take() else {
            error!("failed to capture child stdout");
            return;
        };
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(stderr));
        }

        let mut stdin = stdin;
        let mut lines = BufReader::new(stdout).lines();

        let failure = loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        let _ = stdin.shutdown().await;
                        break 'outer;
                    }
                }
                outgoing = outgoing_rx.recv() => {
                    match outgoing {
                        Some(message) => {
                            if let Err(err) = write_frame(&mut stdin, &message).await {
                                warn!("write to MCP server stdin failed: {err:#}");
                                break err;
                            }
                        }
                        None => break 'outer,
                    }
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            if line.trim().is_empty() {
                                continue;
                            }
                            debug!(%line, "MCP message from server");
                            match serde_json::from_str::<JSONRPCMessage>(&line) {
                                Ok(message) => mux.handle_incoming(message).await,
                                Err(err) => warn!("discarding non-JSON line from MCP server: {err}; line = {line}"),
                            }
                        }
                        Ok(None) => break anyhow!("MCP server closed stdout"),
                        Err(err) => break anyhow!("failed to read MCP server stdout: {err}"),
                    }
                }
            }
        };

        if *shutdown_rx.borrow() {
            break 'outer;
        }

        warn!("MCP server connection lost ({failure:#}); restarting once");
        tokio::time::sleep(RESTART_BACKOFF).await;
        match spawn_child(&program, &args, &env).await {
            Ok(new_child) => {
                info!("MCP server process restarted");
                child = new_child;
            }
            Err(err) => {
                error!("failed to restart MCP server process: {err}");
                break 'outer;
            }
        }
    }
}

async fn write_frame(stdin: &mut ChildStdin, message: &JSONRPCMessage) -> anyhow::Result<()> {
    let json = serde_json::to_string(message)?;
    stdin.write_all(json.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    Ok(())
}

async fn drain_stderr(stderr: tokio::process::ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        warn!(target: "mcp_server_stderr", "{line}");
    }
}

/// Environment variables always forwarded to a spawned MCP server, per
/// https://modelcontextprotocol.io/docs/tools/debugging#environment-variables:
/// servers inherit only a curated subset automatically.
#[rustfmt::skip]
#[cfg(unix)]
const DEFAULT_ENV_VARS: &[&str] = &[
    "HOME", "LOGNAME", "PATH", "SHELL", "USER", "__CF_USER_TEXT_ENCODING",
    "LANG", "LC_ALL", "TERM", "TMPDIR", "TZ",
];

#[cfg(windows)]
const DEFAULT_ENV_VARS: &[&str] = &[
    "PATH", "PATHEXT", "USERNAME", "USERDOMAIN", "USERPROFILE", "TEMP", "TMP",
];

fn create_env_for_mcp_server(extra_env: Option<HashMap<String, String>>) -> HashMap<String, String> {
    DEFAULT_ENV_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok().map(|value| (var.to_string(), value)))
        .chain(extra_env.unwrap_or_default())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_env_for_mcp_server_overlays_extra_env() {
        let env_var = "USER";
        let existing = std::env::var(env_var).unwrap_or_default();
        let overridden = format!("{existing}-extra");
        let extra_env = HashMap::from([(env_var.to_owned(), overridden.clone())]);

        let env = create_env_for_mcp_server(Some(extra_env));
        assert!(env.contains_key("PATH"));
        assert_eq!(Some(&overridden), env.get(env_var));
    }

    #[test]
    fn create_env_for_mcp_server_without_extra_env_uses_allowlist_only() {
        let env = create_env_for_mcp_server(None);
        for key in env.keys() {
            assert!(DEFAULT_ENV_VARS.contains(&key.as_str()));
        }
    }
}
