use std::collections::BTreeSet;
use std::marker::PhantomData;

use jsonschema::{Draft, Validator};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::{FieldErrors, Schema, SchemaError};
use crate::request::Fields;

/// Schema backed by a compiled JSON Schema document (draft 2020-12).
///
/// `load` and `dump` pass the mapping through untouched; this is the right
/// schema when the endpoint works on loosely shaped documents and only needs
/// the validation step.
pub struct JsonSchema {
    name: String,
    validator: Validator,
    declared: BTreeSet<String>,
}

impl JsonSchema {
    pub fn new(name: impl Into<String>, document: Value) -> Result<Self, SchemaError> {
        let name = name.into();
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&document)
            .map_err(|err| SchemaError::new(&name, format!("invalid schema document: {err}")))?;

        let declared = document
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| props.keys().cloned().collect())
            .unwrap_or_default();

        Ok(Self {
            name,
            validator,
            declared,
        })
    }

    /// Top-level properties named by the schema document.
    pub fn declared_fields(&self) -> impl Iterator<Item = &str> {
        self.declared.iter().map(String::as_str)
    }

    fn collect_errors(&self, input: &Fields) -> FieldErrors {
        let instance = Value::Object(input.clone());
        let mut errors = FieldErrors::new();
        for err in self.validator.iter_errors(&instance) {
            let path = err.instance_path().to_string();
            // Key by the offending top-level field; document-level problems
            // (missing required properties and the like) land under _schema.
            let key = path
                .split('/')
                .nth(1)
                .filter(|segment| !segment.is_empty())
                .unwrap_or("_schema")
                .to_string();
            errors.entry(key).or_default().push(err.to_string());
        }
        errors
    }
}

impl Schema for JsonSchema {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, input: &Fields) -> FieldErrors {
        self.collect_errors(input)
    }

    fn load(&self, input: Fields) -> Result<Fields, SchemaError> {
        Ok(input)
    }

    fn dump(&self, obj: &Value) -> Result<Value, SchemaError> {
        Ok(obj.clone())
    }
}

/// Schema that validates against a JSON Schema document and coerces through
/// a typed struct.
///
/// Validation and coercion are deliberately separate stages: a serde failure
/// on input the document accepted means the document and the Rust type have
/// drifted apart, which is a schema defect rather than a client error.
pub struct TypedSchema<T> {
    json: JsonSchema,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedSchema<T>
where
    T: DeserializeOwned + Serialize,
{
    pub fn new(name: impl Into<String>, document: Value) -> Result<Self, SchemaError> {
        Ok(Self {
            json: JsonSchema::new(name, document)?,
            _marker: PhantomData,
        })
    }
}

impl<T> Schema for TypedSchema<T>
where
    T: DeserializeOwned + Serialize,
{
    fn name(&self) -> &str {
        self.json.name()
    }

    fn validate(&self, input: &Fields) -> FieldErrors {
        self.json.validate(input)
    }

    fn load(&self, input: Fields) -> Result<Fields, SchemaError> {
        let typed: T = serde_json::from_value(Value::Object(input))
            .map_err(|err| SchemaError::new(self.name(), format!("coercion failed: {err}")))?;

        match serde_json::to_value(&typed) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(SchemaError::new(
                self.name(),
                format!("type serialized to a non-object: {other}"),
            )),
            Err(err) => Err(SchemaError::new(
                self.name(),
                format!("serialization failed: {err}"),
            )),
        }
    }

    fn dump(&self, obj: &Value) -> Result<Value, SchemaError> {
        let typed: T = serde_json::from_value(obj.clone())
            .map_err(|err| SchemaError::new(self.name(), format!("dump coercion failed: {err}")))?;
        serde_json::to_value(&typed)
            .map_err(|err| SchemaError::new(self.name(), format!("serialization failed: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::load_validated;
    use serde::Deserialize;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn note_document() -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {"type": "string", "minLength": 1},
                "pinned": {"type": "boolean"}
            },
            "required": ["title"],
            "additionalProperties": false
        })
    }

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    struct Note {
        title: String,
        #[serde(default)]
        pinned: bool,
    }

    #[test]
    fn validate_collects_every_field_error() {
        let schema = JsonSchema::new("NoteSchema", note_document()).unwrap();
        let errors = schema.validate(&fields(json!({
            "title": "",
            "pinned": "yes"
        })));

        assert!(errors.contains_key("title"));
        assert!(errors.contains_key("pinned"));
    }

    #[test]
    fn missing_required_fields_report_at_document_level() {
        let schema = JsonSchema::new("NoteSchema", note_document()).unwrap();
        let errors = schema.validate(&fields(json!({})));
        let doc_errors = errors.get("_schema").expect("document-level entry");
        assert!(doc_errors.iter().any(|m| m.contains("title")));
    }

    #[test]
    fn typed_schema_round_trips_declared_fields() {
        let schema = TypedSchema::<Note>::new("NoteSchema", note_document()).unwrap();
        let input = fields(json!({"title": "groceries", "pinned": true}));

        let loaded = schema.load(input.clone()).unwrap();
        let dumped = schema.dump(&Value::Object(loaded)).unwrap();
        assert_eq!(dumped, Value::Object(input));
    }

    #[test]
    fn coercion_failure_after_clean_validation_is_a_schema_defect() {
        // The document accepts any object, but the type insists on a title.
        let permissive = json!({"type": "object"});
        let schema = TypedSchema::<Note>::new("NoteSchema", permissive).unwrap();

        let err = load_validated(&schema, fields(json!({"pinned": true}))).unwrap_err();
        assert_eq!(err.error_code(), "SCHEMA_ERROR");
        assert!(err.message().contains("NoteSchema"));
    }

    #[test]
    fn declared_fields_come_from_the_document() {
        let schema = JsonSchema::new("NoteSchema", note_document()).unwrap();
        let declared: Vec<&str> = schema.declared_fields().collect();
        assert_eq!(declared, vec!["pinned", "title"]);
    }
}
