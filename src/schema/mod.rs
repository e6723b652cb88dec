// Pluggable schema seam: validation collects everything, loading is
// all-or-nothing.
mod json;

pub use json::{JsonSchema, TypedSchema};

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::ApiError;
use crate::request::Fields;

/// Field name (or `_schema` for document-level problems) to the list of
/// messages reported against it.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// A defect in a schema itself, as opposed to bad input. Never shown to
/// clients verbatim.
#[derive(Debug, thiserror::Error)]
#[error("schema {schema}: {detail}")]
pub struct SchemaError {
    pub schema: String,
    pub detail: String,
}

impl SchemaError {
    pub fn new(schema: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            detail: detail.into(),
        }
    }
}

/// A paired validator/serializer for one resource shape.
pub trait Schema: Send + Sync {
    fn name(&self) -> &str;

    /// Collect every field-level problem in one pass; an empty map means the
    /// input is acceptable.
    fn validate(&self, input: &Fields) -> FieldErrors;

    /// Deserialize a validated mapping into its canonical field set.
    fn load(&self, input: Fields) -> Result<Fields, SchemaError>;

    /// Serialize a canonical object back into its wire shape. Must undo
    /// `load`: every declared field of a valid input survives the round trip
    /// unchanged.
    fn dump(&self, obj: &Value) -> Result<Value, SchemaError>;
}

/// Validate and deserialize a field mapping in one step.
///
/// Validation failures carry the complete structured error map; no partial
/// load is ever attempted. A load failure after clean validation means the
/// schema itself is broken, so the caller-visible message stays generic and
/// the detail goes to the log.
pub fn load_validated(schema: &dyn Schema, input: Fields) -> Result<Fields, ApiError> {
    let errors = schema.validate(&input);
    if !errors.is_empty() {
        return Err(ApiError::validation(
            format!("validation failed for {}", schema.name()),
            errors,
        ));
    }

    schema.load(input).map_err(|err| {
        tracing::error!("schema load failed after clean validation: {}", err);
        ApiError::schema_defect(err.schema)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Broken;

    impl Schema for Broken {
        fn name(&self) -> &str {
            "BrokenSchema"
        }

        fn validate(&self, _input: &Fields) -> FieldErrors {
            FieldErrors::new()
        }

        fn load(&self, _input: Fields) -> Result<Fields, SchemaError> {
            Err(SchemaError::new("BrokenSchema", "raw field blew up"))
        }

        fn dump(&self, obj: &Value) -> Result<Value, SchemaError> {
            Ok(obj.clone())
        }
    }

    #[test]
    fn load_defects_surface_generically() {
        let input = match json!({"anything": 1}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };

        let err = load_validated(&Broken, input).unwrap_err();
        assert_eq!(err.error_code(), "SCHEMA_ERROR");
        assert!(err.message().contains("BrokenSchema"));
        assert!(!err.message().contains("raw field blew up"));
    }
}
