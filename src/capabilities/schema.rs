//! Input schemas: the accepted argument shape of a capability.
//!
//! Schemas are declared in code, validated against every call before any
//! external action runs, and rendered as JSON Schema for discovery.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Argument type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
}

impl ArgType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArgType::String => "string",
            ArgType::Integer => "integer",
            ArgType::Number => "number",
            ArgType::Boolean => "boolean",
            ArgType::Array => "array",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            ArgType::String => value.is_string(),
            ArgType::Integer => value.is_i64() || value.is_u64(),
            ArgType::Number => value.is_number(),
            ArgType::Boolean => value.is_boolean(),
            ArgType::Array => value.is_array(),
        }
    }
}

/// A violated argument constraint.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("arguments must be a JSON object")]
    NotAnObject,

    #[error("missing required argument '{0}'")]
    Missing(String),

    #[error("unknown argument '{0}'")]
    Unknown(String),

    #[error("argument '{name}' must be of type {expected}")]
    WrongType { name: String, expected: String },

    #[error("argument '{name}' must be one of {allowed}")]
    NotAllowed { name: String, allowed: String },

    #[error("argument '{name}' must match {pattern}")]
    Pattern { name: String, pattern: String },

    #[error("argument '{name}' must be {bound}")]
    OutOfRange { name: String, bound: String },

    #[error("argument '{name}' must not be empty")]
    Empty { name: String },

    #[error("bad schema for argument '{name}': {reason}")]
    Definition { name: String, reason: String },
}

/// Schema for one named argument.
#[derive(Debug, Clone)]
pub struct ArgSchema {
    pub name: String,
    pub arg_type: ArgType,
    pub required: bool,
    pub description: String,
    pub default: Option<Value>,
    pub enum_values: Option<Vec<Value>>,
    /// Element type for arrays.
    pub items: Option<ArgType>,
    pub pattern: Option<String>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub non_empty: bool,
}

impl ArgSchema {
    fn new(name: &str, arg_type: ArgType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            arg_type,
            required: false,
            description: description.to_string(),
            default: None,
            enum_values: None,
            items: None,
            pattern: None,
            minimum: None,
            maximum: None,
            non_empty: false,
        }
    }

    pub fn string(name: &str, description: &str) -> Self {
        Self::new(name, ArgType::String, description)
    }

    pub fn integer(name: &str, description: &str) -> Self {
        Self::new(name, ArgType::Integer, description)
    }

    pub fn number(name: &str, description: &str) -> Self {
        Self::new(name, ArgType::Number, description)
    }

    pub fn boolean(name: &str, description: &str) -> Self {
        Self::new(name, ArgType::Boolean, description)
    }

    pub fn array_of(name: &str, items: ArgType, description: &str) -> Self {
        let mut schema = Self::new(name, ArgType::Array, description);
        schema.items = Some(items);
        schema
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn one_of(mut self, values: &[&str]) -> Self {
        self.enum_values = Some(values.iter().map(|v| Value::String(v.to_string())).collect());
        self
    }

    pub fn pattern(mut self, pattern: &str) -> Self {
        self.pattern = Some(pattern.to_string());
        self
    }

    pub fn range(mut self, minimum: Option<f64>, maximum: Option<f64>) -> Self {
        self.minimum = minimum;
        self.maximum = maximum;
        self
    }

    pub fn non_empty(mut self) -> Self {
        self.non_empty = true;
        self
    }

    fn to_json_schema(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("type".into(), json!(self.arg_type.as_str()));
        if !self.description.is_empty() {
            obj.insert("description".into(), json!(self.description));
        }
        if let Some(default) = &self.default {
            obj.insert("default".into(), default.clone());
        }
        if let Some(values) = &self.enum_values {
            obj.insert("enum".into(), Value::Array(values.clone()));
        }
        if let Some(items) = self.items {
            obj.insert("items".into(), json!({ "type": items.as_str() }));
        }
        if let Some(pattern) = &self.pattern {
            obj.insert("pattern".into(), json!(pattern));
        }
        if let Some(min) = self.minimum {
            obj.insert("minimum".into(), json!(min));
        }
        if let Some(max) = self.maximum {
            obj.insert("maximum".into(), json!(max));
        }
        if self.non_empty {
            let key = if self.arg_type == ArgType::Array { "minItems" } else { "minLength" };
            obj.insert(key.into(), json!(1));
        }
        Value::Object(obj)
    }
}

/// Accepted argument shape of a capability: a closed object whose members
/// are described by [`ArgSchema`]s, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct InputSchema {
    args: Vec<ArgSchema>,
    patterns: Vec<Option<Regex>>,
}

impl InputSchema {
    /// Build a schema, compiling patterns and rejecting duplicate names.
    pub fn new(args: Vec<ArgSchema>) -> Result<Self, SchemaError> {
        let mut patterns = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            if args[..i].iter().any(|a| a.name == arg.name) {
                return Err(SchemaError::Definition {
                    name: arg.name.clone(),
                    reason: "declared twice".into(),
                });
            }
            let compiled = match &arg.pattern {
                Some(p) => Some(Regex::new(p).map_err(|e| SchemaError::Definition {
                    name: arg.name.clone(),
                    reason: e.to_string(),
                })?),
                None => None,
            };
            patterns.push(compiled);
        }
        Ok(Self { args, patterns })
    }

    /// A schema that accepts only an empty object.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn args(&self) -> &[ArgSchema] {
        &self.args
    }

    /// Check `arguments` against the schema. `null` counts as `{}`.
    pub fn validate(&self, arguments: &Value) -> Result<(), SchemaError> {
        let empty = Map::new();
        let obj = match arguments {
            Value::Null => &empty,
            Value::Object(map) => map,
            _ => return Err(SchemaError::NotAnObject),
        };

        if let Some(unknown) = obj.keys().find(|k| !self.args.iter().any(|a| &a.name == *k)) {
            return Err(SchemaError::Unknown(unknown.clone()));
        }

        for (arg, pattern) in self.args.iter().zip(&self.patterns) {
            match obj.get(&arg.name) {
                None | Some(Value::Null) if arg.required => {
                    return Err(SchemaError::Missing(arg.name.clone()))
                }
                None | Some(Value::Null) => {}
                Some(value) => check_value(arg, pattern.as_ref(), value)?,
            }
        }
        Ok(())
    }

    /// Render as a JSON Schema object for discovery.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for arg in &self.args {
            properties.insert(arg.name.clone(), arg.to_json_schema());
        }
        let required: Vec<&str> = self
            .args
            .iter()
            .filter(|a| a.required)
            .map(|a| a.name.as_str())
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }
}

fn check_value(arg: &ArgSchema, pattern: Option<&Regex>, value: &Value) -> Result<(), SchemaError> {
    if !arg.arg_type.accepts(value) {
        return Err(SchemaError::WrongType {
            name: arg.name.clone(),
            expected: arg.arg_type.as_str().to_string(),
        });
    }

    if let (Some(items), Some(elements)) = (arg.items, value.as_array()) {
        if elements.iter().any(|e| !items.accepts(e)) {
            return Err(SchemaError::WrongType {
                name: arg.name.clone(),
                expected: format!("array of {}", items.as_str()),
            });
        }
    }

    if let Some(allowed) = &arg.enum_values {
        if !allowed.contains(value) {
            let rendered: Vec<String> = allowed.iter().map(|v| v.to_string()).collect();
            return Err(SchemaError::NotAllowed {
                name: arg.name.clone(),
                allowed: rendered.join(", "),
            });
        }
    }

    if let (Some(re), Some(text)) = (pattern, value.as_str()) {
        if !re.is_match(text) {
            return Err(SchemaError::Pattern {
                name: arg.name.clone(),
                pattern: re.as_str().to_string(),
            });
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = arg.minimum {
            if n < min {
                return Err(SchemaError::OutOfRange {
                    name: arg.name.clone(),
                    bound: format!(">= {}", min),
                });
            }
        }
        if let Some(max) = arg.maximum {
            if n > max {
                return Err(SchemaError::OutOfRange {
                    name: arg.name.clone(),
                    bound: format!("<= {}", max),
                });
            }
        }
    }

    if arg.non_empty {
        let empty = match value {
            Value::String(s) => s.is_empty(),
            Value::Array(a) => a.is_empty(),
            _ => false,
        };
        if empty {
            return Err(SchemaError::Empty { name: arg.name.clone() });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> InputSchema {
        InputSchema::new(vec![
            ArgSchema::string("scheme", "Scheme to build").required().non_empty(),
            ArgSchema::string("configuration", "").one_of(&["Debug", "Release"]),
            ArgSchema::integer("limit", "").range(Some(1.0), Some(100.0)),
            ArgSchema::string("bundle_id", "").pattern(r"^[A-Za-z0-9.\-]+$"),
            ArgSchema::array_of("keys", ArgType::String, ""),
        ])
        .unwrap()
    }

    #[test]
    fn test_valid_arguments() {
        let schema = sample();
        let args = json!({"scheme": "App", "configuration": "Debug", "limit": 5, "keys": ["A"]});
        assert_eq!(schema.validate(&args), Ok(()));
    }

    #[test]
    fn test_null_counts_as_empty_object() {
        let schema = InputSchema::new(vec![ArgSchema::boolean("clean", "")]).unwrap();
        assert_eq!(schema.validate(&Value::Null), Ok(()));
        assert_eq!(InputSchema::empty().validate(&json!({})), Ok(()));
    }

    #[test]
    fn test_violations_name_the_constraint() {
        let schema = sample();
        assert_eq!(schema.validate(&json!({})), Err(SchemaError::Missing("scheme".into())));
        assert_eq!(schema.validate(&json!([1])), Err(SchemaError::NotAnObject));
        assert_eq!(
            schema.validate(&json!({"scheme": "App", "bogus": 1})),
            Err(SchemaError::Unknown("bogus".into()))
        );
        assert!(matches!(
            schema.validate(&json!({"scheme": 3})),
            Err(SchemaError::WrongType { .. })
        ));
        assert!(matches!(
            schema.validate(&json!({"scheme": "App", "configuration": "Profile"})),
            Err(SchemaError::NotAllowed { .. })
        ));
        assert!(matches!(
            schema.validate(&json!({"scheme": "App", "limit": 0})),
            Err(SchemaError::OutOfRange { .. })
        ));
        assert!(matches!(
            schema.validate(&json!({"scheme": "App", "limit": 2.5})),
            Err(SchemaError::WrongType { .. })
        ));
        assert!(matches!(
            schema.validate(&json!({"scheme": "App", "bundle_id": "com.x; rm"})),
            Err(SchemaError::Pattern { .. })
        ));
        assert!(matches!(
            schema.validate(&json!({"scheme": "App", "keys": [1]})),
            Err(SchemaError::WrongType { .. })
        ));
        assert_eq!(
            schema.validate(&json!({"scheme": ""})),
            Err(SchemaError::Empty { name: "scheme".into() })
        );
    }

    #[test]
    fn test_error_message_mentions_argument() {
        let err = sample().validate(&json!({"scheme": "App", "limit": 500})).unwrap_err();
        assert_eq!(err.to_string(), "argument 'limit' must be <= 100");
    }

    #[test]
    fn test_duplicate_and_bad_pattern_rejected() {
        let dup = InputSchema::new(vec![ArgSchema::string("a", ""), ArgSchema::string("a", "")]);
        assert!(matches!(dup, Err(SchemaError::Definition { .. })));

        let bad = InputSchema::new(vec![ArgSchema::string("a", "").pattern("(")]);
        assert!(matches!(bad, Err(SchemaError::Definition { .. })));
    }

    #[test]
    fn test_json_schema_rendering() {
        let rendered = sample().to_json_schema();
        assert_eq!(rendered["type"], "object");
        assert_eq!(rendered["additionalProperties"], false);
        assert_eq!(rendered["required"], json!(["scheme"]));
        assert_eq!(rendered["properties"]["scheme"]["minLength"], 1);
        assert_eq!(rendered["properties"]["configuration"]["enum"], json!(["Debug", "Release"]));
        assert_eq!(rendered["properties"]["keys"]["items"]["type"], "string");
    }
}
