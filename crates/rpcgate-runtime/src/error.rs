//! Error types and HTTP error rendering

use crate::body::{full, with_trailers, ResponseBody};
use crate::config::GatewayConfig;
use crate::marshal::{MarshalError, Marshaler, Payload, RegistryError};
use crate::metadata::{accepts_trailers, announce_trailers, append_header_metadata, trailer_headers};
use crate::pattern::InvalidPattern;
use crate::populate::PopulateError;
use crate::template::TemplateError;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::request::Parts;
use http::{HeaderValue, Response, StatusCode};
use rpcgate_core::{Code, ServerMetadata, Status};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, warn};

/// Body written when an error status cannot be marshaled
pub const FALLBACK_ERROR_BODY: &str = r#"{"code": 13, "message": "failed to marshal error message"}"#;

/// Gateway errors
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] InvalidPattern),

    #[error("invalid template: {0}")]
    Template(#[from] TemplateError),

    #[error("invalid binding: {0}")]
    Binding(String),

    #[error("marshaler registration failed: {0}")]
    Registry(#[from] RegistryError),

    /// Malformed request body, query or header
    #[error("{0}")]
    Decode(String),

    #[error(transparent)]
    Populate(#[from] PopulateError),

    #[error(transparent)]
    Rpc(#[from] Status),

    /// A status rendered with an explicit HTTP status code
    #[error("{source}")]
    HttpStatus { status: StatusCode, source: Status },

    #[error("failed to marshal response: {0}")]
    Marshal(#[from] MarshalError),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("failed to write response: {0}")]
    TransportWrite(String),
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    /// The RPC status reported to the client
    pub fn to_status(&self) -> Status {
        match self {
            GatewayError::Rpc(status) => status.clone(),
            GatewayError::HttpStatus { source, .. } => source.clone(),
            GatewayError::Decode(_) | GatewayError::Populate(_) => {
                Status::invalid_argument(self.to_string())
            }
            GatewayError::Marshal(_) => Status::internal(self.to_string()),
            _ => Status::unknown(self.to_string()),
        }
    }

    /// HTTP status of the error response
    pub fn http_status(&self) -> StatusCode {
        match self {
            GatewayError::HttpStatus { status, .. } => *status,
            _ => http_status_from_code(self.to_status().code()),
        }
    }
}

/// HTTP status for an RPC status code. Unrecognized codes map to 500.
pub fn http_status_from_code(code: Code) -> StatusCode {
    match code {
        Code::OK => StatusCode::OK,
        Code::CANCELLED => StatusCode::REQUEST_TIMEOUT,
        Code::UNKNOWN => StatusCode::INTERNAL_SERVER_ERROR,
        Code::INVALID_ARGUMENT => StatusCode::BAD_REQUEST,
        Code::DEADLINE_EXCEEDED => StatusCode::GATEWAY_TIMEOUT,
        Code::NOT_FOUND => StatusCode::NOT_FOUND,
        Code::ALREADY_EXISTS => StatusCode::CONFLICT,
        Code::PERMISSION_DENIED => StatusCode::FORBIDDEN,
        Code::UNAUTHENTICATED => StatusCode::UNAUTHORIZED,
        Code::RESOURCE_EXHAUSTED => StatusCode::TOO_MANY_REQUESTS,
        // not 412
        Code::FAILED_PRECONDITION => StatusCode::BAD_REQUEST,
        Code::ABORTED => StatusCode::CONFLICT,
        Code::OUT_OF_RANGE => StatusCode::BAD_REQUEST,
        Code::UNIMPLEMENTED => StatusCode::NOT_IMPLEMENTED,
        Code::INTERNAL => StatusCode::INTERNAL_SERVER_ERROR,
        Code::UNAVAILABLE => StatusCode::SERVICE_UNAVAILABLE,
        Code::DATA_LOSS => StatusCode::INTERNAL_SERVER_ERROR,
        other => {
            warn!(code = other.as_i32(), "unknown rpc status code");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// What an error handler knows about the failed request
pub struct ErrorContext<'a> {
    pub request: &'a Parts,
    /// Outbound codec selected for the request
    pub marshaler: &'a dyn Marshaler,
    /// Metadata received from the backend before the failure
    pub metadata: &'a ServerMetadata,
    pub config: &'a GatewayConfig,
}

/// Renders a request failure as an HTTP response
pub type ErrorHandler =
    Arc<dyn Fn(&ErrorContext<'_>, &GatewayError) -> Response<ResponseBody> + Send + Sync>;

/// Maps an error received mid-stream to the status sent in the final
/// `{"error": ...}` chunk
pub type StreamErrorHandler = Arc<dyn Fn(Status) -> Status + Send + Sync>;

/// Marshal the error's status with the outbound codec and write it with
/// the mapped HTTP status, backend header metadata and, when the client
/// accepts them, trailers.
pub fn default_error_handler(ctx: &ErrorContext<'_>, err: &GatewayError) -> Response<ResponseBody> {
    let status = err.to_status();
    let payload = Payload::Status(&status);
    let buf = match ctx.marshaler.marshal(payload) {
        Ok(buf) => buf,
        Err(merr) => {
            error!(error = %merr, status = %status, "failed to marshal error message");
            return fallback_response();
        }
    };

    let content_type = ctx.marshaler.content_type_for(payload);
    let mut builder = Response::builder().status(err.http_status());
    if let Some(headers) = builder.headers_mut() {
        if let Ok(value) = HeaderValue::from_str(&content_type) {
            headers.insert(CONTENT_TYPE, value);
        }
        append_header_metadata(headers, ctx.metadata, ctx.config);
    }

    let body = if accepts_trailers(&ctx.request.headers) && !ctx.metadata.trailer.is_empty() {
        if let Some(headers) = builder.headers_mut() {
            announce_trailers(headers, ctx.metadata, ctx.config);
        }
        with_trailers(buf, trailer_headers(ctx.metadata, ctx.config))
    } else {
        full(buf)
    };

    builder.body(body).unwrap_or_else(|err| {
        error!(error = %err, "failed to build error response");
        fallback_response()
    })
}

/// Default [`StreamErrorHandler`]: the status is sent unchanged
pub fn default_stream_error_handler(status: Status) -> Status {
    status
}

/// `500` with [`FALLBACK_ERROR_BODY`]
pub fn fallback_response() -> Response<ResponseBody> {
    let mut response = Response::new(full(Bytes::from_static(FALLBACK_ERROR_BODY.as_bytes())));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
