//! Legacy runtime bridge
//!
//! Dynamic requests are funneled through the legacy application's single front
//! controller. The facade rewrites the visible script to that controller and
//! hands the original path over out of band as `PATH_INFO`; the runtime that
//! actually executes the legacy code sits behind [`LegacyRuntime`].

use crate::error::{json_error_response, BoxError, FacadeErrorCode, FacadeResponse, ResponseBody};
use crate::normalize::{decode_path, encode_path};
use http_body_util::BodyExt;
use hyper::header::HeaderValue;
use hyper::{Request, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Script name used when the front controller has no usable file name
pub const DEFAULT_SCRIPT_NAME: &str = "/index.php";

/// Header carrying the absolute path of the script to execute
pub const X_SCRIPT_FILENAME: &str = "x-script-filename";
/// Header carrying the visible script name
pub const X_SCRIPT_NAME: &str = "x-script-name";
/// Header carrying the original request path
pub const X_PATH_INFO: &str = "x-path-info";
/// Header carrying the document root
pub const X_DOCUMENT_ROOT: &str = "x-document-root";
/// Response header an upstream runtime sets to refuse a request
pub const X_RUNTIME_REJECTED: &str = "x-runtime-rejected";

/// Headers only the facade may set; client copies are dropped
const FACADE_ONLY_HEADERS: [&str; 5] = [
    X_SCRIPT_FILENAME,
    X_SCRIPT_NAME,
    X_PATH_INFO,
    X_DOCUMENT_ROOT,
    X_RUNTIME_REJECTED,
];

/// Failure reported by a legacy runtime
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The runtime refused the request before executing it
    #[error("request rejected by legacy runtime: {0}")]
    Rejected(String),
    /// The runtime failed while executing the request
    #[error("legacy runtime execution failed: {0}")]
    Execution(String),
}

/// A request synthesized for the front controller
#[derive(Debug)]
pub struct BridgeRequest {
    pub document_root: PathBuf,
    /// Absolute path of the front controller script
    pub script_filename: PathBuf,
    /// Visible script name, the controller's path under the document root
    pub script_name: String,
    /// Original request path, percent-decoded
    pub path_info: String,
    /// Request with its URI rewritten to the front controller
    pub request: Request<ResponseBody>,
}

/// Executes legacy application requests
pub trait LegacyRuntime: Send + Sync + 'static {
    fn serve(
        &self,
        request: BridgeRequest,
    ) -> impl Future<Output = Result<FacadeResponse, BridgeError>> + Send;

    /// Release runtime resources. Called once after the listener has drained.
    fn shutdown(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// The legacy application's single entry point
#[derive(Debug, Clone)]
pub struct FrontController {
    document_root: PathBuf,
    script_filename: PathBuf,
    script_name: String,
}

impl FrontController {
    pub fn new(document_root: PathBuf, script_filename: PathBuf) -> Self {
        let script_name = visible_script_name(&document_root, &script_filename);
        Self {
            document_root,
            script_filename,
            script_name,
        }
    }

    /// Name the front controller is requested under, e.g. `/index.php`
    pub fn script_name(&self) -> &str {
        &self.script_name
    }

    /// Rewrite a request so the front controller handles it.
    ///
    /// The query string is kept; the original path becomes `path_info`.
    pub fn synthesize(&self, request: Request<ResponseBody>) -> BridgeRequest {
        let (mut parts, body) = request.into_parts();
        let path_info = decode_path(parts.uri.path());

        let script_path = encode_path(&self.script_name);
        let path_and_query = match parts.uri.query() {
            Some(query) => format!("{}?{}", script_path, query),
            None => script_path.clone(),
        };
        let mut uri_parts = parts.uri.clone().into_parts();
        uri_parts.path_and_query = path_and_query.parse().ok();
        match Uri::from_parts(uri_parts) {
            Ok(uri) => parts.uri = uri,
            Err(e) => {
                debug!(error = %e, "Falling back to bare front controller URI");
                parts.uri = script_path
                    .parse()
                    .unwrap_or_else(|_| Uri::from_static(DEFAULT_SCRIPT_NAME));
            }
        }

        BridgeRequest {
            document_root: self.document_root.clone(),
            script_filename: self.script_filename.clone(),
            script_name: self.script_name.clone(),
            path_info,
            request: Request::from_parts(parts, body),
        }
    }

    /// Run a request through the runtime, turning failures into responses.
    pub async fn dispatch<R: LegacyRuntime>(
        &self,
        runtime: &R,
        request: Request<ResponseBody>,
    ) -> FacadeResponse {
        let bridged = self.synthesize(request);
        let path_info = bridged.path_info.clone();

        match runtime.serve(bridged).await {
            Ok(response) => response,
            Err(BridgeError::Rejected(reason)) => {
                debug!(path = %path_info, reason = %reason, "Legacy runtime rejected request");
                json_error_response(FacadeErrorCode::RequestRejected, "request rejected by legacy runtime")
            }
            Err(e @ BridgeError::Execution(_)) => {
                error!(path = %path_info, error = %e, "Legacy runtime error");
                json_error_response(FacadeErrorCode::RuntimeError, "legacy runtime execution error")
            }
        }
    }
}

/// `/` plus the script's path below the document root, slash-separated.
///
/// A script outside the root is named by its file name alone.
fn visible_script_name(document_root: &Path, script_filename: &Path) -> String {
    let relative: Vec<String> = script_filename
        .strip_prefix(document_root)
        .map(|rest| {
            rest.components()
                .filter_map(|c| match c {
                    Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();
    if !relative.is_empty() {
        return format!("/{}", relative.join("/"));
    }
    match script_filename.file_name() {
        Some(name) => format!("/{}", name.to_string_lossy()),
        None => DEFAULT_SCRIPT_NAME.to_string(),
    }
}

/// Connection settings for [`UpstreamRuntime`]
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL of the runtime host, e.g. `http://127.0.0.1:9000`
    pub base_url: String,
    pub request_timeout: Duration,
    pub max_idle_per_host: usize,
    pub idle_timeout: Duration,
}

impl UpstreamConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: Duration::from_secs(120),
            max_idle_per_host: 10,
            idle_timeout: Duration::from_secs(90),
        }
    }
}

/// Forwards front-controller requests to a runtime host over HTTP.
///
/// The out-of-band values travel as `X-Script-*`, `X-Path-Info` and
/// `X-Document-Root` headers. A response carrying `X-Runtime-Rejected` is
/// reported as a rejection.
pub struct UpstreamRuntime {
    client: Client<HttpConnector, ResponseBody>,
    authority: String,
    scheme: String,
    config: UpstreamConfig,
}

impl UpstreamRuntime {
    pub fn new(config: UpstreamConfig) -> anyhow::Result<Self> {
        let base: Uri = config
            .base_url
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid runtime URL '{}': {}", config.base_url, e))?;
        let authority = base
            .authority()
            .ok_or_else(|| anyhow::anyhow!("Runtime URL '{}' has no host", config.base_url))?
            .to_string();
        let scheme = base.scheme_str().unwrap_or("http").to_string();
        if scheme != "http" {
            anyhow::bail!("Runtime URL '{}' must use http", config.base_url);
        }

        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.enforce_http(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(config.idle_timeout)
            .build(connector);

        debug!(
            authority = %authority,
            timeout_secs = config.request_timeout.as_secs(),
            "Upstream runtime client initialized"
        );

        Ok(Self {
            client,
            authority,
            scheme,
            config,
        })
    }

    fn upstream_request(&self, bridged: BridgeRequest) -> Result<Request<ResponseBody>, BridgeError> {
        let (parts, body) = bridged.request.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or(DEFAULT_SCRIPT_NAME);
        let uri = format!("{}://{}{}", self.scheme, self.authority, path_and_query);

        let mut builder = Request::builder().method(parts.method).uri(uri);
        for (key, value) in parts.headers.iter() {
            if FACADE_ONLY_HEADERS.contains(&key.as_str()) {
                debug!(header = %key, "Dropping client-supplied runtime header");
                continue;
            }
            builder = builder.header(key, value);
        }

        let out_of_band = [
            (X_SCRIPT_FILENAME, bridged.script_filename.to_string_lossy().into_owned()),
            (X_SCRIPT_NAME, encode_path(&bridged.script_name)),
            (X_PATH_INFO, encode_path(&bridged.path_info)),
            (X_DOCUMENT_ROOT, bridged.document_root.to_string_lossy().into_owned()),
        ];
        for (name, value) in out_of_band {
            let value = HeaderValue::from_str(&value)
                .map_err(|e| BridgeError::Rejected(format!("invalid {} value: {}", name, e)))?;
            builder = builder.header(name, value);
        }

        builder
            .body(body)
            .map_err(|e| BridgeError::Rejected(e.to_string()))
    }
}

impl LegacyRuntime for UpstreamRuntime {
    async fn serve(&self, request: BridgeRequest) -> Result<FacadeResponse, BridgeError> {
        let upstream = self.upstream_request(request)?;
        let timeout = self.config.request_timeout;

        let response = match tokio::time::timeout(timeout, self.client.request(upstream)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(BridgeError::Execution(e.to_string())),
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "Legacy runtime timed out");
                return Err(BridgeError::Execution(format!(
                    "timed out after {} seconds",
                    timeout.as_secs()
                )));
            }
        };

        if let Some(reason) = response.headers().get(X_RUNTIME_REJECTED) {
            let reason = reason.to_str().unwrap_or("rejected").to_string();
            return Err(BridgeError::Rejected(reason));
        }

        let (parts, body) = response.into_parts();
        Ok(FacadeResponse::from_parts(
            parts,
            body.map_err(BoxError::from).boxed(),
        ))
    }

    async fn shutdown(&self) {
        debug!(authority = %self.authority, "Upstream runtime released");
    }
}
