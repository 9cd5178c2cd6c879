//! Argument masking, audit records and result serialisation.

use serde_json::{json, Value};

use crate::catalog::Arguments;

/// Replacement for sensitive argument values.
pub const MASK: &str = "***MASKED***";

/// User recorded when a call carries no identity.
pub const ANONYMOUS_USER: &str = "anonymous";

/// Masks every top-level argument whose key contains `key` (any case).
#[must_use]
pub fn mask_arguments(arguments: &Arguments) -> Arguments {
    arguments
        .iter()
        .map(|(key, value)| {
            if key.to_lowercase().contains("key") {
                (key.clone(), Value::String(MASK.to_string()))
            } else {
                (key.clone(), value.clone())
            }
        })
        .collect()
}

/// Builds the `{tool, user, args}` audit record with masked arguments.
#[must_use]
pub fn audit_record(tool: &str, arguments: &Arguments, user_id: Option<&str>) -> Value {
    json!({
        "tool": tool,
        "user": user_id.unwrap_or(ANONYMOUS_USER),
        "args": mask_arguments(arguments),
    })
}

/// Renders a tool result as text plus its content type.
///
/// Objects and arrays become JSON text (`application/json`); strings are
/// passed through verbatim and every other scalar becomes its JSON text
/// (`text/plain`).
#[must_use]
pub fn serialise_result(value: &Value) -> (String, &'static str) {
    match value {
        Value::Object(_) | Value::Array(_) => (value.to_string(), "application/json"),
        Value::String(text) => (text.clone(), "text/plain"),
        other => (other.to_string(), "text/plain"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: Value) -> Arguments {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn masks_any_key_containing_key() {
        let masked = mask_arguments(&args(json!({
            "apiKey": "secret",
            "KEYRING": "x",
            "monkey": "banana",
            "a": 1
        })));

        assert_eq!(masked["apiKey"], MASK);
        assert_eq!(masked["KEYRING"], MASK);
        assert_eq!(masked["monkey"], MASK);
        assert_eq!(masked["a"], 1);
    }

    #[test]
    fn audit_defaults_to_anonymous() {
        let record = audit_record("demo", &args(json!({"token_key": "t"})), None);
        assert_eq!(record["tool"], "demo");
        assert_eq!(record["user"], "anonymous");
        assert_eq!(record["args"]["token_key"], MASK);

        let record = audit_record("demo", &Arguments::new(), Some("alice"));
        assert_eq!(record["user"], "alice");
    }

    #[test]
    fn serialises_by_shape() {
        assert_eq!(
            serialise_result(&json!({"a": 1})),
            (r#"{"a":1}"#.to_string(), "application/json")
        );
        assert_eq!(
            serialise_result(&json!([1, 2])),
            ("[1,2]".to_string(), "application/json")
        );
        assert_eq!(
            serialise_result(&json!("hello")),
            ("hello".to_string(), "text/plain")
        );
        assert_eq!(serialise_result(&json!(5)), ("5".to_string(), "text/plain"));
        assert_eq!(
            serialise_result(&Value::Null),
            ("null".to_string(), "text/plain")
        );
    }
}
