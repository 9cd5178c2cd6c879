//! Explicit parameter schema builder.
//!
//! Tools declare their accepted arguments with [`SchemaBuilder`], which emits
//! the JSON Schema object advertised through `tools/list`:
//!
//! ```
//! use toolrelay::catalog::{ParamType, SchemaBuilder};
//!
//! let schema = SchemaBuilder::new()
//!     .required("a", ParamType::Number, "First operand")
//!     .optional("precision", ParamType::Integer, "Decimal places")
//!     .build();
//!
//! assert_eq!(schema["required"][0], "a");
//! ```

use serde_json::{json, Map, Value};

/// JSON Schema primitive types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    /// `"string"`
    String,
    /// `"integer"`
    Integer,
    /// `"number"`
    Number,
    /// `"boolean"`
    Boolean,
    /// `"object"`
    Object,
    /// `"array"` with the given item type.
    Array(Box<ParamType>),
}

impl ParamType {
    /// Renders the type as a schema fragment.
    #[must_use]
    pub fn to_schema(&self) -> Value {
        match self {
            Self::String => json!({ "type": "string" }),
            Self::Integer => json!({ "type": "integer" }),
            Self::Number => json!({ "type": "number" }),
            Self::Boolean => json!({ "type": "boolean" }),
            Self::Object => json!({ "type": "object" }),
            Self::Array(items) => json!({ "type": "array", "items": items.to_schema() }),
        }
    }
}

/// A single declared parameter.
#[derive(Debug, Clone)]
pub struct Param {
    name: String,
    kind: ParamType,
    description: String,
    required: bool,
    default: Option<Value>,
    choices: Option<Vec<Value>>,
}

impl Param {
    /// Declares a required parameter.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            required: true,
            default: None,
            choices: None,
        }
    }

    /// Marks the parameter optional.
    #[must_use]
    pub const fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Sets a default value. Parameters with a default are never required.
    #[must_use]
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self.required = false;
        self
    }

    /// Restricts the parameter to a fixed set of values.
    #[must_use]
    pub fn with_enum(mut self, choices: impl IntoIterator<Item = Value>) -> Self {
        self.choices = Some(choices.into_iter().collect());
        self
    }

    fn to_schema(&self) -> Value {
        let mut schema = self.kind.to_schema();
        if let Value::Object(map) = &mut schema {
            if !self.description.is_empty() {
                map.insert("description".into(), Value::String(self.description.clone()));
            }
            if let Some(default) = &self.default {
                map.insert("default".into(), default.clone());
            }
            if let Some(choices) = &self.choices {
                map.insert("enum".into(), Value::Array(choices.clone()));
            }
        }
        schema
    }
}

/// Builds an object schema from declared parameters.
#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    params: Vec<Param>,
}

impl SchemaBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub const fn new() -> Self {
        Self { params: Vec::new() }
    }

    /// Adds a fully configured parameter.
    #[must_use]
    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    /// Adds a required parameter.
    #[must_use]
    pub fn required(self, name: &str, kind: ParamType, description: &str) -> Self {
        self.param(Param::new(name, kind, description))
    }

    /// Adds an optional parameter.
    #[must_use]
    pub fn optional(self, name: &str, kind: ParamType, description: &str) -> Self {
        self.param(Param::new(name, kind, description).optional())
    }

    /// Produces the schema object.
    #[must_use]
    pub fn build(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in &self.params {
            properties.insert(param.name.clone(), param.to_schema());
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }
}

/// Schema for a tool that takes no arguments.
#[must_use]
pub fn empty_schema() -> Value {
    SchemaBuilder::new().build()
}
