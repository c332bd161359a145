use http::StatusCode;
use thiserror::Error;

use crate::telemetry::metrics::values;

/// HTTP result type, T is typically a hyper::Response
/// HttpError is used to generate a synthetic error response
pub type HttpResult<T> = std::result::Result<T, HttpError>;

/// Describes things that can go wrong while dispatching a request
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HttpError {
    #[error("Method {0} is not supported")]
    MethodNotAllowed(String),

    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("Failed to read request body: {0}")]
    BodyRead(String),

    #[error("No upstream candidates")]
    NoUpstream,

    #[error("Failed to generate upstream request for backend: {0}")]
    FailedToGenerateUpstreamRequest(String),

    #[error("Failed to get response from backend: {0}")]
    FailedToGetResponseFromBackend(String),

    #[error("Backend did not answer within {0} ms")]
    UpstreamTimeout(u64),
}

impl HttpError {
    /// Short label for metrics
    pub fn error_type(&self) -> &'static str {
        match self {
            HttpError::MethodNotAllowed(_) => values::ERROR_METHOD,
            HttpError::PayloadTooLarge { .. } => values::ERROR_BODY_TOO_LARGE,
            HttpError::BodyRead(_) => values::ERROR_BODY_READ,
            HttpError::NoUpstream => "no_upstream",
            HttpError::FailedToGenerateUpstreamRequest(_) => "upstream_request",
            HttpError::FailedToGetResponseFromBackend(_) => "backend_error",
            HttpError::UpstreamTimeout(_) => "backend_timeout",
        }
    }
}

impl From<HttpError> for StatusCode {
    fn from(e: HttpError) -> StatusCode {
        StatusCode::from(&e)
    }
}

impl From<&HttpError> for StatusCode {
    fn from(e: &HttpError) -> StatusCode {
        match e {
            // unsupported methods are answered as a proxy error, not 405
            HttpError::MethodNotAllowed(_) => StatusCode::BAD_GATEWAY,
            HttpError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            HttpError::BodyRead(_) => StatusCode::BAD_REQUEST,
            HttpError::NoUpstream => StatusCode::SERVICE_UNAVAILABLE,
            HttpError::FailedToGenerateUpstreamRequest(_) => StatusCode::INTERNAL_SERVER_ERROR,
            HttpError::FailedToGetResponseFromBackend(_) => StatusCode::BAD_GATEWAY,
            HttpError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}
