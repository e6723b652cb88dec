// HTTP API error types
use axum::{http::StatusCode, response::IntoResponse, Json};

use crate::response::Envelope;
use crate::schema::FieldErrors;
use crate::store::StoreError;

/// HTTP API error with appropriate status codes and client-friendly messages.
///
/// Every variant renders as a `success=false` envelope with a stable
/// `error_code`. Nothing here is retried; a failure is local to the request
/// that produced it.
#[derive(Debug)]
pub enum ApiError {
    /// Missing or inconsistent route registration. Fatal: the endpoint
    /// author has to fix the table, the client cannot.
    Configuration(String),

    // 405
    MethodNotAllowed { method: String, path: String },

    /// Malformed transport payload (unparseable JSON body, bad multipart).
    BadRequest(String),

    /// Schema validation failed; the full field-level error map is preserved.
    Validation {
        message: String,
        field_errors: FieldErrors,
    },

    /// A schema accepted the input but failed to load it. The defect lives
    /// in the schema, not the request; detail stays in the logs.
    Schema { schema: String },

    // 401
    Unauthorized(String),

    // 409
    Conflict(String),

    // 404
    NotFound(String),

    /// Unsupported upsert operation.
    InvalidOperation(String),

    /// Storage backend failure. Raw detail is logged, never surfaced.
    Store(String),

    // 500
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::Schema { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidOperation(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable error code for client handling.
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Configuration(_) => "CONFIGURATION_ERROR",
            ApiError::MethodNotAllowed { .. } => "METHOD_NOT_ALLOWED",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Validation { .. } => "VALIDATION_ERROR",
            ApiError::Schema { .. } => "SCHEMA_ERROR",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::InvalidOperation(_) => "INVALID_OPERATION",
            ApiError::Store(_) => "STORE_ERROR",
            ApiError::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Client-safe message. Validation errors carry the serialized field
    /// error map so no detail is lost; store and schema failures collapse to
    /// a generic message.
    pub fn message(&self) -> String {
        match self {
            ApiError::Configuration(msg)
            | ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Conflict(msg)
            | ApiError::NotFound(msg)
            | ApiError::InvalidOperation(msg)
            | ApiError::Internal(msg) => msg.clone(),
            ApiError::MethodNotAllowed { method, path } => {
                format!("{method} method is not allowed on {path}")
            }
            ApiError::Validation {
                message,
                field_errors,
            } => serde_json::to_string(field_errors).unwrap_or_else(|_| message.clone()),
            ApiError::Schema { schema } => {
                format!("A field in {schema} is misbehaving. Please contact the administrator")
            }
            ApiError::Store(_) => "An error occurred while processing your request".to_string(),
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        Envelope::error(self.message(), self.error_code())
    }

    /// Contain an arbitrary handler failure at the dispatcher boundary.
    ///
    /// `ApiError`s pass through with their own status and code; anything
    /// else is logged in full and surfaced as a generic 500 envelope so
    /// internal detail never reaches the client.
    pub fn from_handler_failure(err: anyhow::Error) -> ApiError {
        match err.downcast::<ApiError>() {
            Ok(api) => api,
            Err(other) => {
                tracing::error!("unhandled endpoint failure: {:#}", other);
                ApiError::Internal("An unexpected error occurred".to_string())
            }
        }
    }
}

// Static constructor methods
impl ApiError {
    pub fn configuration(message: impl Into<String>) -> Self {
        ApiError::Configuration(message.into())
    }

    pub fn method_not_allowed(method: impl Into<String>, path: impl Into<String>) -> Self {
        ApiError::MethodNotAllowed {
            method: method.into(),
            path: path.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn validation(message: impl Into<String>, field_errors: FieldErrors) -> Self {
        ApiError::Validation {
            message: message.into(),
            field_errors,
        }
    }

    pub fn schema_defect(schema: impl Into<String>) -> Self {
        ApiError::Schema {
            schema: schema.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn invalid_operation(message: impl Into<String>) -> Self {
        ApiError::InvalidOperation(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Internal(message.into())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        // Log the real error but return a generic message
        tracing::error!("store error: {}", err);
        ApiError::Store(err.to_string())
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status_code(), Json(self.to_envelope())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn validation_message_preserves_field_errors() {
        let mut errors: FieldErrors = BTreeMap::new();
        errors.insert("name".to_string(), vec!["is required".to_string()]);
        let err = ApiError::validation("validation failed", errors);

        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert!(err.message().contains("\"name\""));
        assert!(err.message().contains("is required"));
    }

    #[test]
    fn store_errors_never_leak_detail() {
        let err = ApiError::from(StoreError::Backend("connection refused to 10.0.0.3".into()));
        assert!(!err.message().contains("10.0.0.3"));
        assert_eq!(err.error_code(), "STORE_ERROR");
    }

    #[test]
    fn containment_passes_api_errors_through() {
        let inner = anyhow::Error::new(ApiError::not_found("no such document"));
        let contained = ApiError::from_handler_failure(inner);
        assert_eq!(contained.error_code(), "NOT_FOUND");

        let opaque = anyhow::anyhow!("sqlite file is corrupt at page 12");
        let contained = ApiError::from_handler_failure(opaque);
        assert_eq!(contained.error_code(), "INTERNAL_SERVER_ERROR");
        assert!(!contained.message().contains("sqlite"));
    }
}
