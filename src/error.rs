//! Error handling and JSON error responses for the facade

use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;

/// Error carried by response bodies: hyper errors or file reads
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Response body type shared by every handler
pub type ResponseBody = BoxBody<Bytes, BoxError>;

/// Response type shared by every handler
pub type FacadeResponse = Response<ResponseBody>;

/// Error codes for per-request failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FacadeErrorCode {
    /// Path lives under the private prefix
    PrivatePath,
    /// Path targets an upload configuration directory
    UploadConfig,
    /// Path names a file on disk that is not served directly
    DirectFileAccess,
    /// Static asset pattern matched but no file exists
    NotFound,
    /// Method not supported for this resource
    MethodNotAllowed,
    /// Requested byte range lies outside the asset
    RangeNotSatisfiable,
    /// Missing or wrong bearer token
    Unauthorized,
    /// Legacy runtime refused the request
    RequestRejected,
    /// Legacy runtime failed while executing the request
    RuntimeError,
}

impl FacadeErrorCode {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            FacadeErrorCode::PrivatePath => StatusCode::NOT_FOUND,
            FacadeErrorCode::UploadConfig => StatusCode::FORBIDDEN,
            FacadeErrorCode::DirectFileAccess => StatusCode::FORBIDDEN,
            FacadeErrorCode::NotFound => StatusCode::NOT_FOUND,
            FacadeErrorCode::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            FacadeErrorCode::RangeNotSatisfiable => StatusCode::RANGE_NOT_SATISFIABLE,
            FacadeErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            FacadeErrorCode::RequestRejected => StatusCode::BAD_REQUEST,
            FacadeErrorCode::RuntimeError => StatusCode::BAD_GATEWAY,
        }
    }

    /// Get the error code as a string for the X-Facade-Error header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            FacadeErrorCode::PrivatePath => "PRIVATE_PATH",
            FacadeErrorCode::UploadConfig => "UPLOAD_CONFIG",
            FacadeErrorCode::DirectFileAccess => "DIRECT_FILE_ACCESS",
            FacadeErrorCode::NotFound => "NOT_FOUND",
            FacadeErrorCode::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            FacadeErrorCode::RangeNotSatisfiable => "RANGE_NOT_SATISFIABLE",
            FacadeErrorCode::Unauthorized => "UNAUTHORIZED",
            FacadeErrorCode::RequestRejected => "REQUEST_REJECTED",
            FacadeErrorCode::RuntimeError => "RUNTIME_ERROR",
        }
    }
}

/// JSON error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// The error code
    pub code: FacadeErrorCode,
    /// Human-readable error message
    pub message: String,
    /// HTTP status code (for reference)
    pub status: u16,
}

impl ErrorResponse {
    pub fn new(code: FacadeErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status_code().as_u16(),
            code,
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"code":"{}","message":"{}","status":{}}}"#,
                self.code.as_header_value(),
                self.message.replace('\"', "\\\""),
                self.status
            )
        })
    }
}

/// Wrap bytes in the shared response body type
pub fn full_body(bytes: impl Into<Bytes>) -> ResponseBody {
    Full::new(bytes.into()).map_err(|never| match never {}).boxed()
}

/// An empty response body
pub fn empty_body() -> ResponseBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}

/// Create a JSON error response with X-Facade-Error header
pub fn json_error_response(code: FacadeErrorCode, message: impl Into<String>) -> FacadeResponse {
    let error = ErrorResponse::new(code, message);
    let body = error.to_json();

    Response::builder()
        .status(code.status_code())
        .header("Content-Type", "application/json")
        .header("X-Facade-Error", code.as_header_value())
        .body(full_body(body))
        .expect("valid response with StatusCode enum and static headers")
}
