use std::collections::HashMap;

use axum::http::Method;
use bytes::Bytes;
use serde_json::{Map, Value};

use crate::error::ApiError;

/// Normalized field mapping shared across the pipeline stages.
pub type Fields = Map<String, Value>;

/// One uploaded file as handed over by the transport adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedFile {
    /// Multipart field name the file arrived under.
    pub field: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// A raw HTTP request as decoded by the host adapter.
///
/// The adapter decodes the transport (query string, JSON or form body,
/// multipart parts); the normalizer only decides which of these mappings the
/// pipeline gets to see.
#[derive(Debug, Clone, Default)]
pub struct RawRequest {
    pub method: Method,
    pub path: String,
    pub query: Fields,
    pub body: Fields,
    pub files: Vec<UploadedFile>,
}

impl RawRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.body.insert(key.into(), value.into());
        self
    }

    pub fn with_file(mut self, file: UploadedFile) -> Self {
        self.files.push(file);
        self
    }
}

/// Normalized request produced fresh for every pipeline invocation.
#[derive(Debug, Clone, Default)]
pub struct RequestEnvelope {
    pub fields: Fields,
    /// Present only when the endpoint looks for files; empty when the client
    /// uploaded none.
    pub files: Option<HashMap<String, Vec<UploadedFile>>>,
}

/// Turn a raw request into a normalized field mapping.
///
/// GET requests are sourced exclusively from the query string; POST and PUT
/// exclusively from the body. The two can never mix. Every other method is
/// rejected outright.
pub fn normalize(raw: &RawRequest, look_for_files: bool) -> Result<RequestEnvelope, ApiError> {
    if raw.method == Method::GET {
        return Ok(RequestEnvelope {
            fields: raw.query.clone(),
            files: None,
        });
    }

    if raw.method == Method::POST || raw.method == Method::PUT {
        let files = if look_for_files {
            let mut grouped: HashMap<String, Vec<UploadedFile>> = HashMap::new();
            for file in &raw.files {
                grouped.entry(file.field.clone()).or_default().push(file.clone());
            }
            // No uploads is not an error; the handler sees an empty map.
            Some(grouped)
        } else {
            None
        };

        return Ok(RequestEnvelope {
            fields: raw.body.clone(),
            files,
        });
    }

    Err(ApiError::method_not_allowed(raw.method.as_str(), &raw.path))
}
