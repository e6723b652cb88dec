// Decoding between axum and the transport-agnostic pipeline types. The host
// owns the server and the routing table; this module is the only place that
// touches axum's extractors.
use std::sync::Arc;

use axum::{
    body::to_bytes,
    extract::{FromRequest, Multipart, Request, State},
    http::{header, Method},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use serde_json::Value;

use crate::config;
use crate::error::ApiError;
use crate::request::{Fields, RawRequest, UploadedFile};

use super::Endpoint;

/// Decode an axum request into the form the pipeline consumes: query
/// mapping, body mapping (JSON, form-encoded or multipart) and uploaded
/// files. Which mappings the pipeline actually reads is the normalizer's
/// decision, not ours.
pub async fn from_axum(req: Request) -> Result<RawRequest, ApiError> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = parse_pairs(req.uri().query().unwrap_or(""));

    let mut raw = RawRequest {
        method: method.clone(),
        path,
        query,
        body: Fields::new(),
        files: Vec::new(),
    };

    // Only the methods that may carry a body get decoded; everything else is
    // judged by the normalizer on method alone.
    if method == Method::POST || method == Method::PUT {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.starts_with("multipart/form-data") {
            decode_multipart(req, &mut raw).await?;
        } else if content_type.starts_with("application/json") {
            let bytes = read_body(req).await?;
            if !bytes.is_empty() {
                match serde_json::from_slice::<Value>(&bytes) {
                    Ok(Value::Object(map)) => raw.body = map,
                    Ok(_) => {
                        return Err(ApiError::bad_request("JSON body must be an object"));
                    }
                    Err(err) => {
                        return Err(ApiError::bad_request(format!("invalid JSON body: {err}")));
                    }
                }
            }
        } else {
            let bytes = read_body(req).await?;
            let text = std::str::from_utf8(&bytes)
                .map_err(|_| ApiError::bad_request("form body is not valid UTF-8"))?;
            raw.body = parse_pairs(text);
        }
    }

    Ok(raw)
}

async fn read_body(req: Request) -> Result<bytes::Bytes, ApiError> {
    let limit = config::config().api.max_request_size_bytes;
    to_bytes(req.into_body(), limit)
        .await
        .map_err(|err| ApiError::bad_request(format!("unreadable request body: {err}")))
}

async fn decode_multipart(req: Request, raw: &mut RawRequest) -> Result<(), ApiError> {
    let mut multipart = Multipart::from_request(req, &())
        .await
        .map_err(|err| ApiError::bad_request(format!("unreadable multipart body: {err}")))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::bad_request(format!("broken multipart field: {err}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if let Some(filename) = field.file_name().map(str::to_string) {
            let content_type = field.content_type().map(str::to_string);
            let bytes = field
                .bytes()
                .await
                .map_err(|err| ApiError::bad_request(format!("broken file upload: {err}")))?;
            raw.files.push(UploadedFile {
                field: name,
                filename,
                content_type,
                bytes,
            });
        } else {
            let text = field
                .text()
                .await
                .map_err(|err| ApiError::bad_request(format!("broken multipart field: {err}")))?;
            raw.body.insert(name, Value::String(text));
        }
    }

    Ok(())
}

fn parse_pairs(input: &str) -> Fields {
    let mut fields = Fields::new();
    for (key, value) in url::form_urlencoded::parse(input.as_bytes()) {
        fields.insert(key.into_owned(), Value::String(value.into_owned()));
    }
    fields
}

/// Mount an endpoint at `{base}/:version/` for every verb. The host merges
/// this into its own router; nothing else about routing is ours.
pub fn router(endpoint: Arc<Endpoint>, base: &str) -> Router {
    let path = format!("{}/:version/", base.trim_end_matches('/'));
    Router::new().route(&path, any(serve)).with_state(endpoint)
}

async fn serve(State(endpoint): State<Arc<Endpoint>>, req: Request) -> Response {
    match from_axum(req).await {
        Ok(raw) => endpoint.dispatch(raw).await.into_response(),
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_pairs_decode_into_string_fields() {
        let fields = parse_pairs("page=2&tag=a%20b");
        assert_eq!(fields.get("page"), Some(&Value::from("2")));
        assert_eq!(fields.get("tag"), Some(&Value::from("a b")));
    }
}
