//! SSE transport: a long-lived `GET .../sse` stream carrying JSON-RPC
//! responses, paired with per-request `POST` to a "messages URL" the server
//! advertises during a handshake (§4.A.2).
//!
//! Unlike the stdio transport, reconnection here doesn't restart a process —
//! it re-opens the GET and redoes the `session`/`endpoint` handshake, which
//! is why the messages URL lives behind a lock rather than being fixed at
//! construction time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::anyhow;
use async_trait::async_trait;
use eventsource_stream::Event;
use eventsource_stream::Eventsource;
use futures::Stream;
use futures::StreamExt;
use mcp_types::JSONRPCMessage;
use reqwest::Url;
use reqwest::header::ACCEPT;
use reqwest::header::ACCEPT_ENCODING;
use reqwest::header::CACHE_CONTROL;
use reqwest::header::CONTENT_TYPE;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderName;
use reqwest::header::HeaderValue;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::sync::watch;
use tokio::time;
use tracing::info;
use tracing::warn;

use super::RequestMultiplexer;
use super::Transport;

/// Bound on the initial `session`/`endpoint` handshake (§4.A.2).
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Backoff between a dropped SSE stream and the next reconnect attempt.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

pub struct SseTransport {
    client: reqwest::Client,
    headers: Arc<HeaderMap>,
    messages_url: Arc<Mutex<Option<Url>>>,
    mux: RequestMultiplexer,
    shutdown_tx: watch::Sender<bool>,
    reader_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SseTransport {
    /// Open the SSE stream at `stream_url`, block until the `session` and
    /// `endpoint` bootstrap events are seen, and start the background
    /// reader that routes subsequent events and reconnects on failure.
    pub async fn connect(stream_url: &str, headers: Option<HashMap<String, String>>) -> anyhow::Result<Self> {
        let stream_url =
            Url::parse(stream_url).with_context(|| format!("invalid SSE stream URL: {stream_url}"))?;
        let header_map = Arc::new(build_header_map(headers.as_ref())?);
        let client = reqwest::Client::builder()
            .build()
            .context("failed to construct HTTP client")?;

        let (session_id, messages_url, events) = time::timeout(
            HANDSHAKE_TIMEOUT,
            handshake(&client, &stream_url, &header_map),
        )
        .await
        .map_err(|_| anyhow!("SSE handshake timed out after {HANDSHAKE_TIMEOUT:?}"))??;
        info!(session_id, %messages_url, "SSE handshake complete");

        let mux = RequestMultiplexer::new();
        let messages_url = Arc::new(Mutex::new(Some(messages_url)));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let reader_task = tokio::spawn(run_reader(
            client.clone(),
            stream_url,
            Arc::clone(&header_map),
            Arc::clone(&messages_url),
            mux.clone(),
            shutdown_rx,
            Some(events),
        ));

        Ok(Self {
            client,
            headers: header_map,
            messages_url,
            mux,
            shutdown_tx,
            reader_task: Mutex::new(Some(reader_task)),
        })
    }
}

#[async_trait]
impl Transport for SseTransport {
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

        let Some(url) = self.messages_url.lock().await.clone() else {
            self.mux.fail(id, "no messages URL available - handshake in progress").await;
            return Err(anyhow!("SSE transport has no messages URL (reconnecting)"));
        };

        let body = serde_json::to_vec(&JSONRPCMessage::Request(request))?;
        let response = self
            .client
            .post(url)
            .headers((*self.headers).clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => {
                let status = resp.status();
                self.mux.fail(id, format!("server rejected POST: {status}")).await;
                return Err(anyhow!("POST to messages URL returned {status}"));
            }
            Err(err) => {
                self.mux.fail(id, format!("{err:#}")).await;
                return Err(err.into());
            }
        }

        if !wait_for_response {
            return Ok(None);
        }
        self.mux.wait_for_response(id, rx).await.map(Some)
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> anyhow::Result<()> {
        let notification = RequestMultiplexer::build_notification(method, params);
        let Some(url) = self.messages_url.lock().await.clone() else {
            return Err(anyhow!("SSE transport has no messages URL (reconnecting)"));
        };
        let body = serde_json::to_vec(&JSONRPCMessage::Notification(notification))?;
        self.client
            .post(url)
            .headers((*self.headers).clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.reader_task.lock().await.take() {
            let _ = time::timeout(Duration::from_secs(1), handle).await;
        }
    }
}

fn build_header_map(headers: Option<&HashMap<String, String>>) -> anyhow::Result<HeaderMap> {
    let mut header_map = HeaderMap::new();
    if let Some(headers) = headers {
        for (key, value) in headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .with_context(|| format!("invalid header name: {key}"))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("invalid header value for {key}"))?;
            header_map.insert(name, value);
        }
    }
    header_map.insert(
        "X-CLIENT-ID",
        HeaderValue::from_str(&uuid::Uuid::new_v4().to_string())
            .context("generated client UUID was not a valid header value")?,
    );
    Ok(header_map)
}

type EventSource = eventsource_stream::EventStream<
    std::pin::Pin<Box<dyn Stream<Item = reqwest::Result<bytes::Bytes>> + Send>>,
>;

/// Open the GET stream and read events until both bootstrap events
/// (`session`, `endpoint`) have been seen, returning the still-open stream
/// so the caller can keep reading from exactly where the handshake left off.
async fn handshake(
    client: &reqwest::Client,
    stream_url: &Url,
    headers: &HeaderMap,
) -> anyhow::Result<(String, Url, EventSource)> {
    let response = client
        .get(stream_url.clone())
        .headers(headers.clone())
        .header(ACCEPT, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache")
        .header(ACCEPT_ENCODING, "identity")
        .send()
        .await?
        .error_for_status()?;

    let boxed_stream: std::pin::Pin<
        Box<dyn Stream<Item = reqwest::Result<bytes::Bytes>> + Send>,
    > = Box::pin(response.bytes_stream());
    let mut events: EventSource = boxed_stream.eventsource();

    let mut session_id: Option<String> = None;
    let mut messages_url: Option<Url> = None;
    while messages_url.is_none() {
        let event = events
            .next()
            .await
            .ok_or_else(|| anyhow!("SSE stream ended before handshake completed"))??;
        match event.event.as_str() {
            "session" => session_id = Some(event.data),
            "endpoint" => messages_url = Some(resolve_messages_url(stream_url, &event.data)?),
            _ => {}
        }
    }

    Ok((
        session_id.unwrap_or_default(),
        messages_url.ok_or_else(|| anyhow!("SSE stream never sent an endpoint event"))?,
        events,
    ))
}

/// Resolve the `endpoint` event's payload against `stream_url`'s
/// scheme+host+port when it's a path rather than an absolute URL.
fn resolve_messages_url(stream_url: &Url, endpoint: &str) -> anyhow::Result<Url> {
    match Url::parse(endpoint) {
        Ok(absolute) => Ok(absolute),
        Err(_) => stream_url
            .join(endpoint)
            .with_context(|| format!("could not resolve endpoint path `{endpoint}` against {stream_url}")),
    }
}

async fn run_reader(
    client: reqwest::Client,
    stream_url: Url,
    headers: Arc<HeaderMap>,
    messages_url: Arc<Mutex<Option<Url>>>,
    mux: RequestMultiplexer,
    mut shutdown_rx: watch::Receiver<bool>,
    initial_events: Option<EventSource>,
) {
    let mut events = initial_events;

    loop {
        let mut stream = match events.take() {
            Some(stream) => stream,
            None => match handshake(&client, &stream_url, &headers).await {
                Ok((session_id, url, stream)) => {
                    info!(session_id, %url, "SSE stream reconnected");
                    *messages_url.lock().await = Some(url);
                    stream
                }
                Err(err) => {
                    warn!("SSE reconnect handshake failed: {err:#}");
                    if *shutdown_rx.borrow() {
                        return;
                    }
                    time::sleep(RECONNECT_BACKOFF).await;
                    continue;
                }
            },
        };

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return;
                    }
                }
                next = stream.next() => {
                    match next {
                        Some(Ok(event)) => route_event(event, &mux, &messages_url, &stream_url).await,
                        Some(Err(err)) => {
                            warn!("SSE stream error: {err}");
                            break;
                        }
                        None => {
                            warn!("SSE stream ended");
                            break;
                        }
                    }
                }
            }
        }

        *messages_url.lock().await = None;
        if *shutdown_rx.borrow() {
            return;
        }
        time::sleep(RECONNECT_BACKOFF).await;
    }
}

async fn route_event(
    event: Event,
    mux: &RequestMultiplexer,
    messages_url: &Arc<Mutex<Option<Url>>>,
    stream_url: &Url,
) {
    match event.event.as_str() {
        "session" => info!(session_id = %event.data, "SSE session re-announced"),
        "endpoint" => match resolve_messages_url(stream_url, &event.data) {
            Ok(url) => *messages_url.lock().await = Some(url),
            Err(err) => warn!("failed to resolve re-announced endpoint: {err:#}"),
        },
        _ => {
            let data = event.data.trim();
            if data.is_empty() {
                return;
            }
            match serde_json::from_str::<JSONRPCMessage>(data) {
                Ok(message) => mux.handle_incoming(message).await,
                Err(err) => warn!("failed to decode SSE payload as JSON-RPC: {err}; payload={data}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_messages_url_joins_a_relative_path() {
        let stream_url = Url::parse("https://h:443/mcp/sse").expect("valid url");
        let resolved = resolve_messages_url(&stream_url, "/mcp/msg?sid=S-abc").expect("resolves");
        assert_eq!(resolved.as_str(), "https://h:443/mcp/msg?sid=S-abc");
    }

    #[test]
    fn resolve_messages_url_keeps_an_absolute_url_as_is() {
        let stream_url = Url::parse("https://h:443/mcp/sse").expect("valid url");
        let resolved =
            resolve_messages_url(&stream_url, "https://other-host/mcp/msg").expect("resolves");
        assert_eq!(resolved.as_str(), "https://other-host/mcp/msg");
    }
}
