use crate::assets::serve_asset;
use crate::bridge::{FrontController, LegacyRuntime};
use crate::error::{full_body, json_error_response, BoxError, FacadeErrorCode, FacadeResponse};
use crate::native;
use crate::normalize::{decode_path, encode_path, normalize};
use crate::routing::{RouteDecision, Router};
use http_body_util::BodyExt;
use hyper::body::{Body, Incoming};
use hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode, Uri};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Header name for request ID
const X_REQUEST_ID: &str = "x-request-id";
const PERMISSIONS_POLICY: &str = "permissions-policy";
const WELL_KNOWN_PREFIX: &str = "/.well-known/";

/// Read-only state shared by every request
pub struct FacadeState<R> {
    router: Router,
    front_controller: FrontController,
    runtime: Arc<R>,
    log_routes: bool,
    internal_token: Option<String>,
}

impl<R: LegacyRuntime> FacadeState<R> {
    pub fn new(router: Router, front_controller: FrontController, runtime: Arc<R>) -> Self {
        Self {
            router,
            front_controller,
            runtime,
            log_routes: false,
            internal_token: None,
        }
    }

    /// Log every routing decision
    pub fn with_log_routes(mut self, enabled: bool) -> Self {
        self.log_routes = enabled;
        self
    }

    /// Require a bearer token on the native API
    pub fn with_internal_token(mut self, token: Option<String>) -> Self {
        self.internal_token = token;
        self
    }
}

/// HTTP front of the legacy application
pub struct FacadeServer<R> {
    listener: TcpListener,
    state: Arc<FacadeState<R>>,
    shutdown_rx: watch::Receiver<bool>,
    grace_period: Duration,
}

impl<R: LegacyRuntime> FacadeServer<R> {
    pub async fn bind(
        addr: &str,
        state: FacadeState<R>,
        shutdown_rx: watch::Receiver<bool>,
        grace_period: Duration,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            state: Arc::new(state),
            shutdown_rx,
            grace_period,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until shutdown is signalled, then drain and tear down the runtime.
    pub async fn run(self) -> anyhow::Result<()> {
        info!(addr = %self.local_addr()?, "Facade listening (HTTP/1.1 and HTTP/2)");

        let mut connections = JoinSet::new();
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let state = Arc::clone(&self.state);
                            let conn_shutdown = self.shutdown_rx.clone();
                            connections.spawn(async move {
                                if let Err(e) = handle_connection(stream, addr, state, conn_shutdown).await {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                _ = shutdown_requested(&mut shutdown_rx) => {
                    info!("Facade shutting down, no longer accepting connections");
                    break;
                }
            }
        }

        drop(self.listener);

        let in_flight = connections.len();
        let drained = tokio::time::timeout(self.grace_period, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        match drained {
            Ok(()) => info!(connections = in_flight, "In-flight connections drained"),
            Err(_) => {
                warn!(
                    remaining = connections.len(),
                    grace_period_secs = self.grace_period.as_secs(),
                    "Grace period elapsed, closing remaining connections"
                );
                connections.abort_all();
                while connections.join_next().await.is_some() {}
            }
        }

        self.state.runtime.shutdown().await;
        info!("Legacy runtime shut down");
        Ok(())
    }
}

/// Resolves once shutdown is signalled; never if the sender went away.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn handle_connection<R: LegacyRuntime>(
    stream: TcpStream,
    addr: SocketAddr,
    state: Arc<FacadeState<R>>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let state = Arc::clone(&state);
        async move { Ok::<_, hyper::Error>(handle_request(req, state).await) }
    });

    let builder = AutoBuilder::new(TokioExecutor::new());
    let conn = builder.serve_connection_with_upgrades(io, service);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            result.map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;
        }
        _ = shutdown_requested(&mut shutdown_rx) => {
            debug!(addr = %addr, "Draining connection");
            conn.as_mut().graceful_shutdown();
            conn.await.map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;
        }
    }

    Ok(())
}

/// Answer one request and stamp facade-wide headers.
pub async fn handle_request<R: LegacyRuntime>(
    mut req: Request<Incoming>,
    state: Arc<FacadeState<R>>,
) -> FacadeResponse {
    let request_id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        req.headers_mut().insert(X_REQUEST_ID, value);
    }

    let mut response = route_request(req, &state, &request_id).await;

    // Legacy scripts register unload handlers
    response
        .headers_mut()
        .insert(PERMISSIONS_POLICY, HeaderValue::from_static("unload=*"));
    response
}

async fn route_request<R: LegacyRuntime>(
    req: Request<Incoming>,
    state: &FacadeState<R>,
    request_id: &str,
) -> FacadeResponse {
    let path = decode_path(req.uri().path());

    if path == "/health" {
        return health_response();
    }
    if path == "/metrics" {
        return metrics_response();
    }
    if path.starts_with(WELL_KNOWN_PREFIX) {
        return json_error_response(FacadeErrorCode::NotFound, "not found");
    }
    if native::is_storage_locations_path(&path) {
        return native::storage_locations(
            req.method(),
            req.uri(),
            req.headers(),
            state.internal_token.as_deref(),
        );
    }

    serve_legacy(req, &path, state, request_id).await
}

/// Route a legacy path. `path` is the percent-decoded request path.
async fn serve_legacy<R: LegacyRuntime>(
    mut req: Request<Incoming>,
    path: &str,
    state: &FacadeState<R>,
    request_id: &str,
) -> FacadeResponse {
    let normalized = normalize(path);
    if encode_path(normalized.as_str()) != req.uri().path() {
        debug!(
            from = %req.uri().path(),
            to = %normalized.as_str(),
            stripped_entry = normalized.stripped_entry,
            aliased = normalized.aliased,
            "Rewrote request path"
        );
        let uri = with_path(req.uri(), normalized.as_str());
        *req.uri_mut() = uri;
    }

    let decision = state.router.decide(normalized.as_str());
    let method = req.method().clone();
    let response = dispatch(req, &decision, state).await;

    if state.log_routes {
        log_route_decision(&decision, &method, normalized.as_str(), &response, request_id);
    }
    response
}

async fn dispatch<R: LegacyRuntime>(
    req: Request<Incoming>,
    decision: &RouteDecision,
    state: &FacadeState<R>,
) -> FacadeResponse {
    if let Some(code) = decision.disposition.deny_code() {
        let message = if code.status_code() == StatusCode::FORBIDDEN {
            "forbidden"
        } else {
            "not found"
        };
        return json_error_response(code, message);
    }

    if decision.disposition.is_forward() {
        let req = req.map(|body| body.map_err(BoxError::from).boxed());
        return state
            .front_controller
            .dispatch(state.runtime.as_ref(), req)
            .await;
    }

    match &decision.asset {
        Some(file) => serve_asset(file, req.method(), req.headers()).await,
        None => json_error_response(FacadeErrorCode::NotFound, "not found"),
    }
}

fn log_route_decision(
    decision: &RouteDecision,
    method: &hyper::Method,
    path: &str,
    response: &FacadeResponse,
    request_id: &str,
) {
    let bytes = response
        .body()
        .size_hint()
        .exact()
        .or_else(|| {
            response
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
        })
        .unwrap_or(0);
    info!(
        route = decision.label,
        method = %method,
        path,
        status = response.status().as_u16(),
        bytes,
        request_id,
        "Route decision"
    );
}

/// Replace the path of a URI with a decoded path, keeping its query
fn with_path(uri: &Uri, path: &str) -> Uri {
    let path = encode_path(path);
    let path_and_query = match uri.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path,
    };
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = path_and_query.parse().ok();
    Uri::from_parts(parts).unwrap_or_else(|_| uri.clone())
}

fn health_response() -> FacadeResponse {
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json")
        .body(full_body(r#"{"status":"ok"}"#))
        .expect("valid response with static header")
}

fn metrics_response() -> FacadeResponse {
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(full_body("metrics not implemented\n"))
        .expect("valid response with static header")
}
