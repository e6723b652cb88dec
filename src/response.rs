use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ApiError;
use crate::request::Fields;
use crate::schema::{load_validated, Schema};

/// The standard response wrapper: `{success, message, data | error_code}`.
///
/// Exactly one of `data` and `error_code` is ever populated; the
/// constructors are the only way to build one, so the invariant holds by
/// construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl Envelope {
    pub fn success(message: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            error_code: None,
        }
    }

    pub fn error(message: impl Into<String>, error_code: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            error_code: Some(error_code.into()),
        }
    }

    /// Success envelope whose payload is serialized through a schema's dump
    /// step, keeping the wire shape and the schema in lockstep.
    pub fn dumped(
        message: impl Into<String>,
        schema: &dyn Schema,
        obj: &Value,
    ) -> Result<Self, ApiError> {
        let data = schema.dump(obj).map_err(|err| {
            tracing::error!("schema dump failed: {}", err);
            ApiError::schema_defect(err.schema)
        })?;
        Ok(Self::success(message, data))
    }

    /// Success envelope that passes a raw value through without a schema.
    ///
    /// Escape hatch for payloads no schema describes; prefer `dumped`.
    pub fn raw(message: impl Into<String>, data: Value) -> Self {
        Self::success(message, data)
    }
}

/// Load a request through a schema and immediately dump it back as a success
/// envelope. Echo endpoints use this to prove a schema end to end.
pub fn echo(schema: &dyn Schema, input: Fields, path: &str) -> Result<Envelope, ApiError> {
    let loaded = load_validated(schema, input)?;
    Envelope::dumped(
        format!("Schematized response for {path} using {}", schema.name()),
        schema,
        &Value::Object(loaded),
    )
}

/// A finished endpoint response: either a JSON envelope or a binary
/// attachment. The explicit variant replaces any status-code sentinel
/// convention; a handler that wants to stream a file says so in the type.
#[derive(Debug)]
pub enum Reply {
    Json {
        status: StatusCode,
        envelope: Envelope,
    },
    Attachment {
        bytes: Bytes,
        content_type: String,
        filename: String,
    },
}

impl Reply {
    /// JSON envelope with status 200.
    pub fn ok(envelope: Envelope) -> Self {
        Reply::Json {
            status: StatusCode::OK,
            envelope,
        }
    }

    pub fn json(status: StatusCode, envelope: Envelope) -> Self {
        Reply::Json { status, envelope }
    }

    pub fn attachment(
        bytes: impl Into<Bytes>,
        content_type: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Reply::Attachment {
            bytes: bytes.into(),
            content_type: content_type.into(),
            filename: filename.into(),
        }
    }

    /// PDF download with the invoice filename used by the original billing
    /// endpoints.
    pub fn pdf_attachment(bytes: impl Into<Bytes>) -> Self {
        Self::attachment(bytes, "application/pdf", "invoice.pdf")
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        match self {
            Reply::Json { status, envelope } => (status, Json(envelope)).into_response(),
            Reply::Attachment {
                bytes,
                content_type,
                filename,
            } => {
                let mut response = (StatusCode::OK, bytes).into_response();
                let headers = response.headers_mut();
                headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_str(&content_type)
                        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
                );
                headers.insert(
                    header::CONTENT_DISPOSITION,
                    HeaderValue::from_str(&format!("attachment; filename={filename}"))
                        .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
                );
                response
            }
        }
    }
}
