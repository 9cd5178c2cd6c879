//! Tool metadata normalisation.
//!
//! Raw metadata arrives as a loose JSON object. [`ToolMetadata::normalise`]
//! pulls out the fields the selection engine understands and keeps the rest
//! untouched in [`ToolMetadata::extra`].

use serde::Serialize;
use serde_json::{Map, Value};

/// Normalised view of a tool's metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolMetadata {
    /// Relative cost of a call. Lower is cheaper.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,

    /// Expected latency in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_hint_ms: Option<u64>,

    /// Whether the tool mutates external state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub side_effect: Option<bool>,

    /// Free-form category used for filtering.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// Tags declared inside the metadata object.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Every key not listed above, preserved as given.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ToolMetadata {
    /// Normalises a raw metadata object.
    ///
    /// `cost` accepts numbers or numeric strings, `latency_hint_ms` accepts
    /// non-negative integers (or strings holding one). Values that cannot be
    /// interpreted are dropped rather than rejected.
    #[must_use]
    pub fn normalise(raw: &Map<String, Value>) -> Self {
        let mut extra = raw.clone();

        let cost = extra.remove("cost").as_ref().and_then(to_f64);
        let latency_hint_ms = extra.remove("latency_hint_ms").as_ref().and_then(to_u64);
        let side_effect = extra.remove("side_effect").and_then(|v| v.as_bool());
        let category = extra.remove("category").and_then(|v| match v {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        });
        let tags = extra.remove("tags").map(normalise_tags).unwrap_or_default();

        Self {
            cost,
            latency_hint_ms,
            side_effect,
            category,
            tags,
            extra,
        }
    }

    /// Returns `true` when no field carries information.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cost.is_none()
            && self.latency_hint_ms.is_none()
            && self.side_effect.is_none()
            && self.category.is_none()
            && self.tags.is_empty()
            && self.extra.is_empty()
    }
}

fn to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn normalise_tags(value: Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::String(s) => vec![s],
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => s,
                other => other.to_string(),
            })
            .collect(),
        other => vec![other.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn known_fields_are_extracted() {
        let meta = ToolMetadata::normalise(&object(json!({
            "cost": 0.5,
            "latency_hint_ms": 120,
            "side_effect": false,
            "category": "finance",
            "tags": ["fx", "rates"],
            "owner": "team-a"
        })));

        assert_eq!(meta.cost, Some(0.5));
        assert_eq!(meta.latency_hint_ms, Some(120));
        assert_eq!(meta.side_effect, Some(false));
        assert_eq!(meta.category.as_deref(), Some("finance"));
        assert_eq!(meta.tags, vec!["fx", "rates"]);
        assert_eq!(meta.extra.get("owner"), Some(&json!("team-a")));
        assert!(!meta.extra.contains_key("cost"));
    }

    #[test]
    fn numeric_strings_are_accepted() {
        let meta = ToolMetadata::normalise(&object(json!({
            "cost": "1.25",
            "latency_hint_ms": "300"
        })));
        assert_eq!(meta.cost, Some(1.25));
        assert_eq!(meta.latency_hint_ms, Some(300));
    }

    #[test]
    fn unparseable_values_are_dropped() {
        let meta = ToolMetadata::normalise(&object(json!({
            "cost": "cheap",
            "latency_hint_ms": -5,
            "side_effect": "yes"
        })));
        assert!(meta.cost.is_none());
        assert!(meta.latency_hint_ms.is_none());
        assert!(meta.side_effect.is_none());
        assert!(meta.is_empty());
    }

    #[test]
    fn single_tag_string_becomes_list() {
        let meta = ToolMetadata::normalise(&object(json!({ "tags": "solo" })));
        assert_eq!(meta.tags, vec!["solo"]);
    }

    #[test]
    fn serialises_without_empty_fields() {
        let meta = ToolMetadata::normalise(&object(json!({ "cost": 2, "x": 1 })));
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value, json!({ "cost": 2.0, "x": 1 }));
    }
}
