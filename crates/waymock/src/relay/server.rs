//! The relay server.
//!
//! Accepts real HTTP traffic, finds the owning connection for the best
//! matching committed route, obtains a response through a correlated
//! `responses/create` call over the control channel, and returns it.
//! Registration (commit/reset/close) flows through a single owning event
//! task; matching snapshots each route group before awaiting anything, so a
//! slow or dead worker never blocks unrelated requests.

use super::cors::{
    default_access_control_headers, set_default_access_control_headers, DEFAULT_PREFLIGHT_STATUS,
    RESPONSE_FILL_HEADERS,
};
use super::routes::RouteTable;
use crate::config::{RelayConfig, UnhandledRequestPolicy};
use crate::http::serialized::SerializedRequest;
use crate::http::{HttpHeaders, HttpRequest, HttpResponse, Method};
use crate::interceptor::UnhandledRequestCallback;
use crate::transport::{ControlEvent, ControlMessage, RelayChannel};
use crate::url::normalize_match_url;
use anyhow::Context;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Service-level error: returning it closes the connection without writing
/// a response, which is how unmatched non-OPTIONS requests are signalled.
#[derive(Debug, thiserror::Error)]
#[error("no committed route answered the request")]
pub struct UnhandledRequest;

struct RelayState {
    routes: RouteTable,
    channel: Arc<dyn RelayChannel>,
    response_timeout: Duration,
    policy: UnhandledRequestPolicy,
    on_unhandled: Option<UnhandledRequestCallback>,
}

/// The relay server value: owns its route groups and its transport
/// reference. Constructed once; there are no process-wide globals.
pub struct RelayServer {
    config: RelayConfig,
    state: Arc<RelayState>,
}

impl RelayServer {
    pub fn new(config: RelayConfig, channel: Arc<dyn RelayChannel>) -> Self {
        let state = Arc::new(RelayState {
            routes: RouteTable::new(),
            channel,
            response_timeout: config.response_timeout(),
            policy: config.on_unhandled,
            on_unhandled: None,
        });
        Self { config, state }
    }

    /// Install a callback invoked for every unhandled request, in addition
    /// to the configured logging policy.
    pub fn with_unhandled_callback(
        mut self,
        callback: impl Fn(&HttpRequest) + Send + Sync + 'static,
    ) -> Self {
        let state = Arc::get_mut(&mut self.state)
            .expect("with_unhandled_callback must be called before start()");
        state.on_unhandled = Some(Arc::new(callback));
        self
    }

    /// Bind the HTTP listener and start serving. Returns once the listener
    /// is bound; traffic and registration are handled on background tasks.
    pub async fn start(self) -> Result<RunningRelay, anyhow::Error> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port))
            .await
            .with_context(|| {
                format!(
                    "failed to bind relay listener on {}:{}",
                    self.config.host, self.config.port
                )
            })?;
        let local_addr = listener.local_addr()?;
        info!("Relay listening on http://{local_addr}");

        let (shutdown_tx, _) = broadcast::channel(1);

        let state = Arc::clone(&self.state);
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            run_event_loop(state, &mut shutdown_rx).await;
        });

        let state = Arc::clone(&self.state);
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            run_accept_loop(state, listener, &mut shutdown_rx).await;
        });

        Ok(RunningRelay {
            local_addr,
            shutdown_tx,
        })
    }
}

/// Handle to a started relay.
pub struct RunningRelay {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
}

impl RunningRelay {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Base URL of the HTTP listener.
    pub fn url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for RunningRelay {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Single owner of route-group mutation: commits, resets, and closed
/// connections are applied here, serially, in arrival order.
async fn run_event_loop(state: Arc<RelayState>, shutdown_rx: &mut broadcast::Receiver<()>) {
    loop {
        tokio::select! {
            event = state.channel.next_event() => {
                let Some(event) = event else {
                    debug!("control channel closed; stopping registration loop");
                    break;
                };
                match event {
                    ControlEvent::Message { connection, message, ack } => match message {
                        ControlMessage::Commit(commit) => {
                            match state.routes.commit(connection, &commit) {
                                Ok(()) => {
                                    debug!(%connection, handler_id = %commit.handler_id,
                                        method = %commit.method, url = %commit.url, "route committed");
                                    ack.ok();
                                }
                                Err(source) => {
                                    warn!(%connection, url = %commit.url, error = %source,
                                        "rejected route commit");
                                    ack.err(source.to_string());
                                }
                            }
                        }
                        ControlMessage::Reset { commits } => {
                            let commits = commits.unwrap_or_default();
                            match state.routes.reset(connection, &commits) {
                                Ok(()) => {
                                    debug!(%connection, count = commits.len(), "routes reset");
                                    ack.ok();
                                }
                                Err(source) => {
                                    warn!(%connection, error = %source, "rejected route reset");
                                    ack.err(source.to_string());
                                }
                            }
                        }
                    },
                    ControlEvent::Closed { connection } => {
                        debug!(%connection, "worker connection closed; dropping its routes");
                        state.routes.remove_connection(connection);
                    }
                }
            }
            _ = shutdown_rx.recv() => break,
        }
    }
}

async fn run_accept_loop(
    state: Arc<RelayState>,
    listener: TcpListener,
    shutdown_rx: &mut broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, remote_addr)) => {
                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |request| {
                                let state = Arc::clone(&state);
                                async move { handle_relay_request(state, request).await }
                            });
                            if let Err(source) =
                                http1::Builder::new().serve_connection(io, service).await
                            {
                                // Unmatched non-OPTIONS requests end up here.
                                debug!("connection from {remote_addr} ended: {source}");
                            }
                        });
                    }
                    Err(source) => {
                        error!("accept error: {source}");
                    }
                }
            }
            _ = shutdown_rx.recv() => break,
        }
    }
}

async fn handle_relay_request(
    state: Arc<RelayState>,
    request: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, UnhandledRequest> {
    let method_raw = request.method().as_str().to_string();
    let host = request
        .headers()
        .get(hyper::header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost")
        .to_string();
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();
    let url = format!("http://{host}{path_and_query}");

    let headers: HttpHeaders = request
        .headers()
        .iter()
        .map(|(name, value)| (name.as_str(), value.to_str().unwrap_or("")))
        .collect();

    let body = match request.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(source) => {
            warn!(url = %url, "failed to read request body: {source}");
            Bytes::new()
        }
    };

    let Ok(method) = method_raw.parse::<Method>() else {
        match state.policy {
            UnhandledRequestPolicy::Ignore => {}
            UnhandledRequestPolicy::Warn => {
                warn!(method = %method_raw, url = %url, "unsupported method; terminating connection");
            }
            UnhandledRequestPolicy::Error => {
                error!(method = %method_raw, url = %url, "unsupported method; terminating connection");
            }
        }
        return Err(UnhandledRequest);
    };

    let request = HttpRequest {
        method,
        url,
        headers,
        body,
    };

    if let Some(mut response) = create_response_for_request(&state, &request).await {
        set_default_access_control_headers(&mut response, &RESPONSE_FILL_HEADERS);
        return Ok(into_hyper_response(response));
    }

    if method == Method::Options {
        debug!(url = %request.url, "unmatched preflight; returning default response");
        let mut response = HttpResponse {
            status: DEFAULT_PREFLIGHT_STATUS,
            headers: HttpHeaders::new(),
            body: Bytes::new(),
        };
        let all: Vec<&str> = default_access_control_headers()
            .iter()
            .map(|(name, _)| *name)
            .collect();
        set_default_access_control_headers(&mut response, &all);
        return Ok(into_hyper_response(response));
    }

    report_unhandled(&state, &request);
    Err(UnhandledRequest)
}

/// Scan the method's route group in reverse commit order and round-trip the
/// first match to its owning worker. A bypass reply, a timeout, or a closed
/// connection all continue the scan with the next older entry.
async fn create_response_for_request(
    state: &RelayState,
    request: &HttpRequest,
) -> Option<HttpResponse> {
    let Ok(normalized) = normalize_match_url(&request.url) else {
        return None;
    };

    let serialized = SerializedRequest::from_request(request);
    let snapshot = state.routes.snapshot(request.method);

    for entry in snapshot.iter().rev() {
        if !entry.pattern.is_match(&normalized) {
            continue;
        }

        let call = state
            .channel
            .create_response(entry.connection, &entry.handler_id, serialized.clone());

        match timeout(state.response_timeout, call).await {
            Ok(Ok(Some(reply))) => match reply.into_response() {
                Ok(response) => return Some(response),
                Err(source) => {
                    warn!(handler_id = %entry.handler_id, error = %source,
                        "malformed worker reply; treating as bypass");
                }
            },
            Ok(Ok(None)) => {
                debug!(handler_id = %entry.handler_id, "worker bypassed; continuing scan");
            }
            Ok(Err(source)) => {
                warn!(handler_id = %entry.handler_id, error = %source,
                    "worker connection failed during response lookup; treating as bypass");
            }
            Err(_) => {
                warn!(handler_id = %entry.handler_id,
                    timeout_ms = state.response_timeout.as_millis() as u64,
                    "response lookup timed out; treating as bypass");
            }
        }
    }

    None
}

fn report_unhandled(state: &RelayState, request: &HttpRequest) {
    if let Some(callback) = &state.on_unhandled {
        callback(request);
    }
    match state.policy {
        UnhandledRequestPolicy::Ignore => {}
        UnhandledRequestPolicy::Warn => {
            warn!(method = %request.method, url = %request.url,
                "unhandled relay request; terminating connection");
        }
        UnhandledRequestPolicy::Error => {
            error!(method = %request.method, url = %request.url,
                "unhandled relay request; terminating connection");
        }
    }
}

fn into_hyper_response(response: HttpResponse) -> Response<Full<Bytes>> {
    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = Response::builder().status(status);
    for (name, value) in response.headers.iter() {
        builder = builder.header(name, value);
    }
    builder.body(Full::new(response.body)).unwrap_or_else(|_| {
        Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Full::new(Bytes::from_static(b"response build error")))
            .expect("static fallback response must build")
    })
}
