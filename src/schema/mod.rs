//! Conversion between validator schemas and plain JSON Schema.
//!
//! Handler authors describe tool inputs with [`Validator`]. Serialized, a
//! validator is a JSON node tagged with `"typeName": "Validator<Kind>"`.
//! Anything without that tag is taken to be JSON Schema already and passed
//! through untouched.
//!
//! The host turns validators into JSON Schema with [`to_json_schema`] before
//! handing descriptors to a bridge. The bridge goes the other way with
//! [`to_validator`] to get something it can check arguments against; that
//! direction keeps only the shape.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::warn;

/// Prefix every validator type tag starts with
pub const TYPE_PREFIX: &str = "Validator";

/// Name of the tag field on a serialized validator node
pub const TYPE_FIELD: &str = "typeName";

/// Typed input schema for a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "typeName")]
pub enum Validator {
    #[serde(rename = "ValidatorObject")]
    Object { shape: BTreeMap<String, Validator> },

    #[serde(rename = "ValidatorString", rename_all = "camelCase")]
    String {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_length: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<u64>,
    },

    #[serde(rename = "ValidatorNumber")]
    Number,

    #[serde(rename = "ValidatorBoolean")]
    Boolean,

    #[serde(rename = "ValidatorArray")]
    Array { items: Box<Validator> },

    #[serde(rename = "ValidatorEnum")]
    Enum { values: Vec<String> },

    #[serde(rename = "ValidatorOptional")]
    Optional { inner: Box<Validator> },

    #[serde(rename = "ValidatorDefault")]
    Default { inner: Box<Validator>, value: Value },

    /// Transform or refinement; only the inner schema is observable.
    #[serde(rename = "ValidatorEffects")]
    Effects { inner: Box<Validator> },

    #[serde(rename = "ValidatorAny")]
    Any,
}

impl Validator {
    pub fn object<K: Into<String>>(fields: impl IntoIterator<Item = (K, Validator)>) -> Self {
        Self::Object {
            shape: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn string() -> Self {
        Self::String {
            min_length: None,
            max_length: None,
        }
    }

    pub fn number() -> Self {
        Self::Number
    }

    pub fn boolean() -> Self {
        Self::Boolean
    }

    pub fn array(items: Validator) -> Self {
        Self::Array {
            items: Box::new(items),
        }
    }

    pub fn enumeration<S: Into<String>>(values: impl IntoIterator<Item = S>) -> Self {
        Self::Enum {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn any() -> Self {
        Self::Any
    }

    pub fn optional(self) -> Self {
        Self::Optional {
            inner: Box::new(self),
        }
    }

    pub fn with_default(self, value: impl Into<Value>) -> Self {
        Self::Default {
            inner: Box::new(self),
            value: value.into(),
        }
    }

    /// Mark the schema as transformed or refined.
    pub fn refined(self) -> Self {
        Self::Effects {
            inner: Box::new(self),
        }
    }

    /// Minimum length of a string schema. No-op on other kinds.
    pub fn min_length(mut self, n: u64) -> Self {
        if let Self::String { min_length, .. } = &mut self {
            *min_length = Some(n);
        }
        self
    }

    /// Maximum length of a string schema. No-op on other kinds.
    pub fn max_length(mut self, n: u64) -> Self {
        if let Self::String { max_length, .. } = &mut self {
            *max_length = Some(n);
        }
        self
    }

    /// Whether an object field with this schema may be left out.
    pub fn is_optional(&self) -> bool {
        match self {
            Self::Optional { .. } | Self::Default { .. } => true,
            Self::Effects { inner } => inner.is_optional(),
            _ => false,
        }
    }

    /// Check that `value` has the shape this schema describes.
    ///
    /// Object fields not named in the shape are allowed.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        self.check_at(value, "arguments")
    }

    fn check_at(&self, value: &Value, path: &str) -> Result<(), String> {
        let mismatch = |expected: &str| Err(format!("{path}: expected {expected}, got {}", kind_of(value)));

        match self {
            Self::Object { shape } => {
                let Some(fields) = value.as_object() else {
                    return mismatch("object");
                };
                for (key, schema) in shape {
                    match fields.get(key) {
                        Some(field) => schema.check_at(field, &format!("{path}.{key}"))?,
                        None if schema.is_optional() => {}
                        None => return Err(format!("{path}.{key}: required field is missing")),
                    }
                }
                Ok(())
            }
            Self::String {
                min_length,
                max_length,
            } => {
                let Some(s) = value.as_str() else {
                    return mismatch("string");
                };
                let len = s.chars().count() as u64;
                if min_length.is_some_and(|min| len < min) || max_length.is_some_and(|max| len > max) {
                    return Err(format!("{path}: string length {len} is out of bounds"));
                }
                Ok(())
            }
            Self::Number if value.is_number() => Ok(()),
            Self::Number => mismatch("number"),
            Self::Boolean if value.is_boolean() => Ok(()),
            Self::Boolean => mismatch("boolean"),
            Self::Array { items } => {
                let Some(elements) = value.as_array() else {
                    return mismatch("array");
                };
                elements
                    .iter()
                    .enumerate()
                    .try_for_each(|(i, element)| items.check_at(element, &format!("{path}[{i}]")))
            }
            Self::Enum { values } => match value.as_str() {
                Some(s) if values.iter().any(|v| v == s) => Ok(()),
                _ => Err(format!("{path}: expected one of {values:?}")),
            },
            Self::Optional { inner } | Self::Default { inner, .. } | Self::Effects { inner } => {
                inner.check_at(value, path)
            }
            Self::Any => Ok(()),
        }
    }

    /// Serialized (tagged) form of this validator.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl From<Validator> for Value {
    fn from(validator: Validator) -> Self {
        validator.to_value()
    }
}

/// Classification of a schema node.
///
/// Produced by [`classify`] from the tagged JSON form, so malformed validator
/// nodes land in [`SchemaNode::Unknown`] instead of failing to deserialize.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode<'a> {
    Object(Option<&'a Map<String, Value>>),
    String {
        min_length: Option<u64>,
        max_length: Option<u64>,
    },
    Number,
    Boolean,
    Array(Option<&'a Value>),
    Enum(Vec<&'a str>),
    Optional(&'a Value),
    Default {
        inner: &'a Value,
        value: Option<&'a Value>,
    },
    Effects(&'a Value),
    Any,
    /// Tagged as a validator but not a kind this module understands.
    Unknown(&'a str),
    /// Not a validator node; already JSON Schema.
    Plain,
}

/// Whether `node` carries the validator type tag.
pub fn is_validator_schema(node: &Value) -> bool {
    type_name(node).is_some()
}

fn type_name(node: &Value) -> Option<&str> {
    node.as_object()?
        .get(TYPE_FIELD)?
        .as_str()
        .filter(|name| name.starts_with(TYPE_PREFIX))
}

pub fn classify(node: &Value) -> SchemaNode<'_> {
    let Some(name) = type_name(node) else {
        return SchemaNode::Plain;
    };
    let field = |key: &str| node.get(key);

    match &name[TYPE_PREFIX.len()..] {
        "Object" => match field("shape") {
            None => SchemaNode::Object(None),
            Some(shape) => match shape.as_object() {
                Some(shape) => SchemaNode::Object(Some(shape)),
                None => SchemaNode::Unknown(name),
            },
        },
        "String" => SchemaNode::String {
            min_length: field("minLength").and_then(Value::as_u64),
            max_length: field("maxLength").and_then(Value::as_u64),
        },
        "Number" => SchemaNode::Number,
        "Boolean" => SchemaNode::Boolean,
        "Array" => SchemaNode::Array(field("items")),
        "Enum" => match field("values").and_then(Value::as_array) {
            Some(values) => match values.iter().map(Value::as_str).collect::<Option<Vec<_>>>() {
                Some(values) => SchemaNode::Enum(values),
                None => SchemaNode::Unknown(name),
            },
            None => SchemaNode::Unknown(name),
        },
        "Optional" => field("inner").map_or(SchemaNode::Unknown(name), SchemaNode::Optional),
        "Default" => match field("inner") {
            Some(inner) => SchemaNode::Default {
                inner,
                value: field("value"),
            },
            None => SchemaNode::Unknown(name),
        },
        "Effects" => field("inner").map_or(SchemaNode::Unknown(name), SchemaNode::Effects),
        "Any" => SchemaNode::Any,
        _ => SchemaNode::Unknown(name),
    }
}

/// Convert a validator node (or plain JSON Schema) to JSON Schema.
///
/// Unknown validator kinds degrade to `{"type": "string"}` with a warning.
pub fn to_json_schema(node: &Value) -> Value {
    match classify(node) {
        SchemaNode::Plain => node.clone(),
        SchemaNode::Object(shape) => {
            let mut properties = Map::new();
            let mut required = Vec::new();
            for (key, child) in shape.into_iter().flatten() {
                if !is_optional_node(child) {
                    required.push(Value::String(key.clone()));
                }
                properties.insert(key.clone(), to_json_schema(child));
            }

            let mut schema = Map::new();
            schema.insert("type".into(), json!("object"));
            schema.insert("properties".into(), Value::Object(properties));
            if !required.is_empty() {
                schema.insert("required".into(), Value::Array(required));
            }
            schema.insert("additionalProperties".into(), Value::Bool(false));
            Value::Object(schema)
        }
        SchemaNode::String {
            min_length,
            max_length,
        } => {
            let mut schema = Map::new();
            schema.insert("type".into(), json!("string"));
            if let Some(min) = min_length {
                schema.insert("minLength".into(), json!(min));
            }
            if let Some(max) = max_length {
                schema.insert("maxLength".into(), json!(max));
            }
            Value::Object(schema)
        }
        SchemaNode::Number => json!({ "type": "number" }),
        SchemaNode::Boolean => json!({ "type": "boolean" }),
        SchemaNode::Array(items) => json!({
            "type": "array",
            "items": items.map_or_else(|| json!({}), to_json_schema),
        }),
        SchemaNode::Enum(values) => json!({ "type": "string", "enum": values }),
        SchemaNode::Optional(inner) | SchemaNode::Effects(inner) => to_json_schema(inner),
        SchemaNode::Default { inner, value } => {
            let mut schema = to_json_schema(inner);
            if let (Some(object), Some(value)) = (schema.as_object_mut(), value) {
                object.insert("default".into(), value.clone());
            }
            schema
        }
        SchemaNode::Any => json!({}),
        SchemaNode::Unknown(name) => {
            warn!(type_name = name, "unsupported validator kind, falling back to string");
            json!({ "type": "string" })
        }
    }
}

fn is_optional_node(node: &Value) -> bool {
    match classify(node) {
        SchemaNode::Optional(_) | SchemaNode::Default { .. } => true,
        SchemaNode::Effects(inner) => is_optional_node(inner),
        _ => false,
    }
}

/// Rebuild a validator from JSON Schema. Shape only: length limits, enums
/// and defaults are not carried over.
pub fn to_validator(schema: &Value) -> Validator {
    match schema.get("type").and_then(Value::as_str) {
        Some("object") => {
            let required: Vec<&str> = schema
                .get("required")
                .and_then(Value::as_array)
                .map(|names| names.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();

            let shape = schema
                .get("properties")
                .and_then(Value::as_object)
                .map(|properties| {
                    properties
                        .iter()
                        .map(|(key, property)| {
                            let validator = to_validator(property);
                            let validator = if required.contains(&key.as_str()) {
                                validator
                            } else {
                                validator.optional()
                            };
                            (key.clone(), validator)
                        })
                        .collect()
                })
                .unwrap_or_default();

            Validator::Object { shape }
        }
        Some("string") => Validator::string(),
        Some("number") | Some("integer") => Validator::Number,
        Some("boolean") => Validator::Boolean,
        Some("array") => Validator::array(schema.get("items").map_or(Validator::Any, to_validator)),
        _ => Validator::Any,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_infers_required_from_optionality() {
        let schema = Validator::object([
            ("name", Validator::string()),
            ("nickname", Validator::string().optional()),
        ]);

        let converted = to_json_schema(&schema.to_value());
        assert_eq!(converted["type"], "object");
        assert_eq!(converted["required"], json!(["name"]));
        assert_eq!(converted["additionalProperties"], json!(false));
        assert_eq!(
            converted["properties"].as_object().unwrap().len(),
            2,
            "no extra properties"
        );
        assert_eq!(converted["properties"]["nickname"], json!({"type": "string"}));
    }

    #[test]
    fn default_is_copied_and_field_is_not_required() {
        let schema = Validator::object([("limit", Validator::number().with_default(10))]);

        let converted = to_json_schema(&schema.to_value());
        assert!(converted.get("required").is_none());
        assert_eq!(converted["properties"]["limit"], json!({"type": "number", "default": 10}));
    }

    #[test]
    fn nested_kinds_convert() {
        let schema = Validator::object([
            ("tags", Validator::array(Validator::string().min_length(1).max_length(8))),
            ("mode", Validator::enumeration(["fast", "slow"])),
            ("flag", Validator::boolean().refined()),
        ]);

        let converted = to_json_schema(&schema.to_value());
        assert_eq!(
            converted["properties"]["tags"],
            json!({"type": "array", "items": {"type": "string", "minLength": 1, "maxLength": 8}})
        );
        assert_eq!(
            converted["properties"]["mode"],
            json!({"type": "string", "enum": ["fast", "slow"]})
        );
        assert_eq!(converted["properties"]["flag"], json!({"type": "boolean"}));
    }

    #[test]
    fn plain_json_schema_passes_through() {
        let plain = json!({"type": "object", "properties": {"x": {"type": "integer"}}});
        assert_eq!(to_json_schema(&plain), plain);

        // a typeName that is not ours is not a validator node
        let foreign = json!({"typeName": "ZodString"});
        assert_eq!(classify(&foreign), SchemaNode::Plain);
        assert_eq!(to_json_schema(&foreign), foreign);
    }

    #[test]
    fn unknown_or_malformed_kinds_degrade_to_string() {
        assert_eq!(
            to_json_schema(&json!({"typeName": "ValidatorDate"})),
            json!({"type": "string"})
        );
        assert_eq!(
            to_json_schema(&json!({"typeName": "ValidatorEnum", "values": [1, 2]})),
            json!({"type": "string"})
        );
        assert_eq!(
            to_json_schema(&json!({"typeName": "ValidatorOptional"})),
            json!({"type": "string"})
        );
    }

    #[test]
    fn to_validator_marks_non_required_fields_optional() {
        let schema = json!({
            "type": "object",
            "properties": {
                "q": {"type": "string", "minLength": 3},
                "n": {"type": "integer"},
                "kind": {"type": "string", "enum": ["a"]},
                "blob": {"oneOf": []}
            },
            "required": ["q"]
        });

        let validator = to_validator(&schema);
        assert_eq!(
            validator,
            Validator::object([
                ("q", Validator::string()),
                ("n", Validator::number().optional()),
                ("kind", Validator::string().optional()),
                ("blob", Validator::any().optional()),
            ])
        );
    }

    #[test]
    fn check_reports_shape_mismatches() {
        let validator = Validator::object([
            ("q", Validator::string()),
            ("n", Validator::number().optional()),
            ("items", Validator::array(Validator::boolean()).optional()),
        ]);

        assert!(validator.check(&json!({"q": "x", "extra": 1})).is_ok());
        assert!(validator.check(&json!({"q": "x", "n": 2, "items": [true]})).is_ok());

        let err = validator.check(&json!({"n": 1})).unwrap_err();
        assert!(err.contains("arguments.q"));

        let err = validator.check(&json!({"q": "x", "items": [true, 1]})).unwrap_err();
        assert!(err.contains("arguments.items[1]"));

        assert!(validator.check(&json!("not an object")).is_err());
    }

    #[test]
    fn validator_round_trips_through_its_tagged_form() {
        let validator = Validator::object([("s", Validator::string().max_length(4).optional())]);
        let tagged = validator.to_value();
        assert!(is_validator_schema(&tagged));
        assert_eq!(tagged["shape"]["s"]["inner"]["maxLength"], json!(4));
        assert_eq!(serde_json::from_value::<Validator>(tagged).unwrap(), validator);
    }
}
