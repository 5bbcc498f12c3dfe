// ABOUTME: Structured-output contract — caller fields plus a mandatory free-text `answer` field.
// ABOUTME: Builds the closed JSON schema sent to the provider and validates replies against it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::SchemaViolation;

/// Name of the field every contract carries.
pub const ANSWER_FIELD: &str = "answer";

const ANSWER_DESCRIPTION: &str = "Responses given in accordance with the instructions";

/// Descriptor for one output field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
}

impl FieldSpec {
    pub fn new(field_type: impl Into<String>) -> Self {
        Self {
            field_type: field_type.into(),
            description: None,
            enum_values: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn enum_values<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }
}

/// Caller-supplied field descriptors, keyed by field name.
pub type SchemaFields = BTreeMap<String, FieldSpec>;

/// A closed contract: every listed field is required and nothing else is allowed.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaContract {
    properties: SchemaFields,
}

/// Merge caller fields with the mandatory `answer` field. A caller-supplied
/// `answer` is replaced.
pub fn build_schema(fields: Option<&SchemaFields>) -> SchemaContract {
    let mut properties = fields.cloned().unwrap_or_default();
    properties.insert(
        ANSWER_FIELD.to_string(),
        FieldSpec::new("string").description(ANSWER_DESCRIPTION),
    );
    SchemaContract { properties }
}

impl SchemaContract {
    pub fn properties(&self) -> &SchemaFields {
        &self.properties
    }

    /// The JSON schema document passed as the provider's response format.
    pub fn to_json(&self) -> Value {
        let required: Vec<&String> = self.properties.keys().collect();
        json!({
            "type": "object",
            "properties": self.properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    /// Check a full reply against the contract and return its fields.
    pub fn validate(&self, reply: &str) -> Result<Map<String, Value>, SchemaViolation> {
        let object = match serde_json::from_str::<Value>(reply) {
            Ok(Value::Object(object)) => object,
            _ => return Err(SchemaViolation::NotAnObject),
        };

        if let Some(extra) = object.keys().find(|k| !self.properties.contains_key(*k)) {
            return Err(SchemaViolation::UnexpectedField(extra.clone()));
        }

        for (name, spec) in &self.properties {
            let value = object
                .get(name)
                .ok_or_else(|| SchemaViolation::MissingField(name.clone()))?;

            if !type_matches(&spec.field_type, value) {
                return Err(SchemaViolation::WrongType {
                    field: name.clone(),
                    expected: spec.field_type.clone(),
                });
            }
            if let Some(allowed) = &spec.enum_values {
                if !allowed.contains(value) {
                    return Err(SchemaViolation::NotInEnum {
                        field: name.clone(),
                        value: value.to_string(),
                    });
                }
            }
        }

        Ok(object)
    }
}

/// JSON Schema primitive type check. Unknown type names are not enforced.
fn type_matches(field_type: &str, value: &Value) -> bool {
    match field_type {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}
