//! Built-in tools registered by the server binary.
//!
//! - `__ping__`: liveness check used by the connection doctor
//! - `math.add`: adds two numbers
//! - `tools.search`: ranked catalog search

use std::sync::{Arc, Weak};

use serde_json::{json, Value};

use crate::catalog::{Arguments, ParamType, SchemaBuilder, ToolCatalog, ToolDescriptor, ToolHandler};
use crate::error::{CatalogError, InvokeError, ToolError};
use crate::ledger::FailureLedger;
use crate::selection::{SearchQuery, ToolSearch};

/// Name of the liveness check tool.
pub const PING_TOOL: &str = "__ping__";

/// Registers every built-in tool into `catalog`.
///
/// # Errors
///
/// Returns [`CatalogError::DuplicateName`] if a built-in name is taken.
pub fn register_builtins(
    catalog: &Arc<ToolCatalog>,
    ledger: Option<Arc<FailureLedger>>,
) -> Result<(), CatalogError> {
    catalog.register_tool(
        ToolDescriptor::new(PING_TOOL, "Connectivity check; always answers pong")
            .with_tags(["diagnostics"])
            .with_metadata(&metadata(json!({"cost": 0, "latency_hint_ms": 1, "side_effect": false}))),
        ToolHandler::sync(|_| Ok(json!({ "ok": true, "message": "pong" }))),
    )?;

    catalog.register_tool(
        ToolDescriptor::new("math.add", "Add two numbers")
            .with_schema(
                SchemaBuilder::new()
                    .required("a", ParamType::Number, "First addend")
                    .required("b", ParamType::Number, "Second addend")
                    .build(),
            )
            .with_tags(["math"])
            .with_metadata(&metadata(json!({"cost": 0, "side_effect": false, "category": "math"}))),
        ToolHandler::sync(add),
    )?;

    let weak = Arc::downgrade(catalog);
    catalog.register_tool(
        ToolDescriptor::new(
            "tools.search",
            "Search registered tools by text, tags and cost or latency constraints",
        )
        .with_schema(search_schema())
        .with_tags(["diagnostics"])
        .with_metadata(&metadata(json!({"side_effect": false, "category": "catalog"}))),
        ToolHandler::sync(move |args| search(&weak, ledger.clone(), args)),
    )?;

    tracing::debug!(tools = catalog.len(), "Registered built-in tools");
    Ok(())
}

fn metadata(value: Value) -> Arguments {
    match value {
        Value::Object(map) => map,
        _ => Arguments::new(),
    }
}

fn number(args: &Arguments, name: &str) -> Result<Value, InvokeError> {
    match args.get(name) {
        Some(v @ Value::Number(_)) => Ok(v.clone()),
        Some(_) => Err(ToolError::new("bad_request", format!("'{name}' must be a number")).into()),
        None => Err(ToolError::new("bad_request", format!("'{name}' is required")).into()),
    }
}

fn add(args: &Arguments) -> Result<Value, InvokeError> {
    let (a, b) = (number(args, "a")?, number(args, "b")?);

    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(sum) = x.checked_add(y) {
            return Ok(json!(sum));
        }
    }
    let sum = a.as_f64().unwrap_or_default() + b.as_f64().unwrap_or_default();
    Ok(json!(sum))
}

fn search_schema() -> Value {
    SchemaBuilder::new()
        .optional("query", ParamType::String, "Free-text query")
        .optional("tags", ParamType::Array(Box::new(ParamType::String)), "Required tags")
        .optional("prefix", ParamType::String, "Required name prefix")
        .optional("top_k", ParamType::Integer, "Maximum number of results")
        .optional("sort_by_failure", ParamType::Boolean, "Rank failing tools lower")
        .optional("max_cost", ParamType::Number, "Cost ceiling")
        .optional("latency_budget_ms", ParamType::Integer, "Latency ceiling in milliseconds")
        .optional("allow_side_effects", ParamType::Boolean, "Accept side-effecting tools")
        .optional("categories", ParamType::Array(Box::new(ParamType::String)), "Allowed categories")
        .optional("use_metadata_ranking", ParamType::Boolean, "Rank by cost and latency")
        .build()
}

fn search(
    catalog: &Weak<ToolCatalog>,
    ledger: Option<Arc<FailureLedger>>,
    args: &Arguments,
) -> Result<Value, InvokeError> {
    let query: SearchQuery = serde_json::from_value(Value::Object(args.clone()))
        .map_err(|e| ToolError::new("bad_request", e.to_string()))?;
    let catalog = catalog
        .upgrade()
        .ok_or_else(|| InvokeError::internal("catalog is gone"))?;

    let hits = ToolSearch::new(catalog, ledger).search(query, None);
    Ok(Value::Array(hits.iter().map(ToolSearch::summary).collect()))
}
