//! Static asset families, candidate-root resolution and serving

use crate::error::{empty_body, json_error_response, BoxError, FacadeErrorCode, FacadeResponse};
use chrono::{Duration as ChronoDuration, Utc};
use futures_util::StreamExt;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use hyper::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT_RANGES, ALLOW, CACHE_CONTROL, CONTENT_LENGTH,
    CONTENT_RANGE, CONTENT_TYPE, EXPIRES, IF_MODIFIED_SINCE, IF_RANGE, LAST_MODIFIED, RANGE,
};
use hyper::{Method, Response, StatusCode};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

/// Cache directive for assets whose name changes whenever their content does
pub const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

const ASSET_PREFIXES: &[&str] = &["css", "dist", "js", "images", "plugins", "vendor"];
const ASSET_EXTENSIONS: &[&str] = &[
    "css", "png", "jpg", "js", "svg", "ico", "gif", "pdf", "woff", "woff2", "otf", "ttf",
];
const DOWNLOAD_PREFIX: &str = "downloads";
const DOWNLOAD_EXTENSIONS: &[&str] = &["pdf", "xml", "html", "csv", "zip", "rtf"];
const PUBLIC_FILES: &[&str] = &["/ead.dtd", "/favicon.ico", "/robots.txt"];
const SITEMAP_PREFIX: &str = "/sitemap";

/// Families of paths served straight from disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticFamily {
    /// Stylesheets, scripts, images, fonts and vendored bundles
    Asset,
    /// Generated documents under the downloads prefix
    Download,
    /// A handful of fixed public files at the root
    Public,
}

impl StaticFamily {
    /// Classify a normalized path, if it belongs to a static family.
    pub fn classify(path: &str) -> Option<Self> {
        if ASSET_PREFIXES
            .iter()
            .any(|prefix| has_prefix_and_extension(path, prefix, ASSET_EXTENSIONS))
        {
            return Some(StaticFamily::Asset);
        }
        if has_prefix_and_extension(path, DOWNLOAD_PREFIX, DOWNLOAD_EXTENSIONS) {
            return Some(StaticFamily::Download);
        }
        if PUBLIC_FILES.contains(&path) || path.starts_with(SITEMAP_PREFIX) {
            return Some(StaticFamily::Public);
        }
        None
    }
}

/// `/<prefix>/<anything>.<ext>` with `ext` drawn from `extensions`
fn has_prefix_and_extension(path: &str, prefix: &str, extensions: &[&str]) -> bool {
    let Some(rest) = path
        .strip_prefix('/')
        .and_then(|p| p.strip_prefix(prefix))
        .and_then(|p| p.strip_prefix('/'))
    else {
        return false;
    };
    match rest.rsplit_once('.') {
        Some((_, ext)) => extensions.contains(&ext),
        None => false,
    }
}

/// Resolves static paths against the overlay and application roots
#[derive(Debug, Clone)]
pub struct AssetResolver {
    app_root: PathBuf,
    overlay_root: Option<PathBuf>,
}

impl AssetResolver {
    pub fn new(app_root: PathBuf, overlay_root: Option<PathBuf>) -> Self {
        Self {
            app_root,
            overlay_root,
        }
    }

    /// Candidate files for a path, highest priority first.
    ///
    /// The overlay root only takes part for the download family.
    pub fn candidates(&self, path: &str, family: StaticFamily) -> Vec<PathBuf> {
        let rel = path.trim_start_matches('/');
        let mut candidates = Vec::with_capacity(2);
        if family == StaticFamily::Download {
            if let Some(overlay) = &self.overlay_root {
                candidates.push(overlay.join(rel));
            }
        }
        candidates.push(self.app_root.join(rel));
        candidates
    }

    /// First existing regular file among the candidates
    pub fn resolve(&self, path: &str, family: StaticFamily) -> Option<PathBuf> {
        self.candidates(path, family)
            .into_iter()
            .find(|candidate| is_regular_file(candidate))
    }

    /// Whether the path names a regular file under the application root
    pub fn exists_in_app_root(&self, path: &str) -> bool {
        is_regular_file(&self.app_root.join(path.trim_start_matches('/')))
    }
}

fn is_regular_file(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

/// Inclusive byte range of an asset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// The `Range` header names no byte of the asset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeNotSatisfiable;

/// Parse a single `bytes=` range against an asset of `size` bytes.
///
/// Headers this cannot honour (other units, several ranges, bad syntax) give
/// `Ok(None)` and the whole asset is served.
pub fn parse_range(header: &str, size: u64) -> Result<Option<ByteRange>, RangeNotSatisfiable> {
    let Some(spec) = header.trim().strip_prefix("bytes=") else {
        return Ok(None);
    };
    if spec.contains(',') {
        return Ok(None);
    }
    let Some((first, last)) = spec.split_once('-') else {
        return Ok(None);
    };
    let (first, last) = (first.trim(), last.trim());

    if first.is_empty() {
        // Suffix form: the final N bytes
        let Ok(suffix) = last.parse::<u64>() else {
            return Ok(None);
        };
        if suffix == 0 || size == 0 {
            return Err(RangeNotSatisfiable);
        }
        return Ok(Some(ByteRange {
            start: size.saturating_sub(suffix),
            end: size - 1,
        }));
    }

    let Ok(start) = first.parse::<u64>() else {
        return Ok(None);
    };
    let end = if last.is_empty() {
        None
    } else {
        match last.parse::<u64>() {
            Ok(end) if end >= start => Some(end),
            _ => return Ok(None),
        }
    };
    if start >= size {
        return Err(RangeNotSatisfiable);
    }
    let end = end.map_or(size - 1, |end| end.min(size - 1));
    Ok(Some(ByteRange { start, end }))
}

fn unix_secs(time: SystemTime) -> Option<u64> {
    time.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}

fn header_date(headers: &HeaderMap, name: HeaderName) -> Option<SystemTime> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| httpdate::parse_http_date(v).ok())
}

/// `If-Modified-Since` holds and the asset is no newer
fn not_modified(headers: &HeaderMap, modified: Option<SystemTime>) -> bool {
    match (header_date(headers, IF_MODIFIED_SINCE), modified) {
        (Some(since), Some(modified)) => unix_secs(modified) <= unix_secs(since),
        _ => false,
    }
}

/// `Range` is honoured unless an `If-Range` validator no longer matches
fn range_applies(headers: &HeaderMap, modified: Option<SystemTime>) -> bool {
    if !headers.contains_key(IF_RANGE) {
        return true;
    }
    // Entity tags are never issued, so only a date can match
    match (header_date(headers, IF_RANGE), modified) {
        (Some(date), Some(modified)) => unix_secs(modified) <= unix_secs(date),
        _ => false,
    }
}

/// Stream a resolved asset with long-lived cache headers.
///
/// Conditional and single-range requests are answered from file metadata.
pub async fn serve_asset(file: &Path, method: &Method, headers: &HeaderMap) -> FacadeResponse {
    if method != Method::GET && method != Method::HEAD {
        let mut response =
            json_error_response(FacadeErrorCode::MethodNotAllowed, "method not allowed");
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static("GET, HEAD"));
        return response;
    }

    let mut handle = match File::open(file).await {
        Ok(handle) => handle,
        Err(e) => {
            warn!(path = %file.display(), error = %e, "Failed to open static asset");
            return json_error_response(FacadeErrorCode::NotFound, "not found");
        }
    };
    let metadata = match handle.metadata().await {
        Ok(metadata) if metadata.is_file() => metadata,
        Ok(_) => return json_error_response(FacadeErrorCode::NotFound, "not found"),
        Err(e) => {
            warn!(path = %file.display(), error = %e, "Failed to stat static asset");
            return json_error_response(FacadeErrorCode::NotFound, "not found");
        }
    };
    let size = metadata.len();
    let modified = metadata.modified().ok();

    let mime = mime_guess::from_path(file).first_or_octet_stream();
    let expires = (Utc::now() + ChronoDuration::days(365))
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    let mut builder = Response::builder()
        .header(CONTENT_TYPE, mime.as_ref())
        .header(CACHE_CONTROL, IMMUTABLE_CACHE_CONTROL)
        .header(EXPIRES, expires)
        .header(ACCEPT_RANGES, "bytes");
    if let Some(modified) = modified {
        builder = builder.header(LAST_MODIFIED, httpdate::fmt_http_date(modified));
    }

    if not_modified(headers, modified) {
        return builder
            .status(StatusCode::NOT_MODIFIED)
            .body(empty_body())
            .expect("valid response with guessed mime and formatted dates");
    }

    let requested = headers
        .get(RANGE)
        .and_then(|v| v.to_str().ok())
        .filter(|_| range_applies(headers, modified));
    let range = match requested.map(|spec| parse_range(spec, size)) {
        Some(Ok(range)) => range,
        Some(Err(RangeNotSatisfiable)) => {
            debug!(path = %file.display(), size, "Range not satisfiable");
            let mut response = json_error_response(
                FacadeErrorCode::RangeNotSatisfiable,
                "range not satisfiable",
            );
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", size)) {
                response.headers_mut().insert(CONTENT_RANGE, value);
            }
            return response;
        }
        None => None,
    };

    let (start, length) = match range {
        Some(range) => {
            builder = builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(
                    CONTENT_RANGE,
                    format!("bytes {}-{}/{}", range.start, range.end, size),
                );
            (range.start, range.len())
        }
        None => {
            builder = builder.status(StatusCode::OK);
            (0, size)
        }
    };
    builder = builder.header(CONTENT_LENGTH, length);

    if method == Method::HEAD {
        return builder
            .body(empty_body())
            .expect("valid response with guessed mime and formatted dates");
    }

    if start > 0 {
        if let Err(e) = handle.seek(SeekFrom::Start(start)).await {
            warn!(path = %file.display(), error = %e, "Failed to seek static asset");
            return json_error_response(FacadeErrorCode::NotFound, "not found");
        }
    }
    let stream = ReaderStream::new(handle.take(length))
        .map(|chunk| chunk.map(Frame::data).map_err(BoxError::from));

    builder
        .body(BodyExt::boxed(StreamBody::new(stream)))
        .expect("valid response with guessed mime and formatted dates")
}
