//! Tool and pipeline descriptors plus their callable handlers.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Map, Value};

use super::metadata::ToolMetadata;
use super::schema::empty_schema;
use crate::error::InvokeError;
use crate::pipeline::PipelineContext;

/// Arguments passed to a tool: the `arguments` object of a `tools/call`.
pub type Arguments = Map<String, Value>;

/// Result of running a tool callable.
pub type ToolResult = Result<Value, InvokeError>;

/// A synchronous tool callable. Runs on the blocking pool.
pub type SyncToolFn = dyn Fn(&Arguments) -> ToolResult + Send + Sync;

/// An asynchronous tool callable. Runs on the event loop.
pub type AsyncToolFn = dyn Fn(Arguments) -> BoxFuture<'static, ToolResult> + Send + Sync;

/// A pipeline callable. Receives its execution context first.
pub type PipelineFn =
    dyn Fn(PipelineContext, Arguments) -> BoxFuture<'static, ToolResult> + Send + Sync;

/// Protocol adapters a tool is exposed through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AllowedAdapters {
    /// Every adapter.
    #[default]
    All,
    /// Only the named adapters.
    Only(BTreeSet<String>),
}

impl AllowedAdapters {
    /// Builds an adapter set from names. `"all"` anywhere in the list means [`Self::All`].
    #[must_use]
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        if names.contains("all") {
            Self::All
        } else {
            Self::Only(names)
        }
    }

    /// Whether the given adapter may expose the tool.
    #[must_use]
    pub fn allows(&self, adapter: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(names) => names.contains(adapter),
        }
    }
}

/// Immutable description of a registered tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    /// Unique catalog key.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema of accepted arguments.
    pub parameter_schema: Value,
    /// Tags, merged from the descriptor and its metadata.
    pub tags: BTreeSet<String>,
    /// Normalised metadata.
    pub metadata: ToolMetadata,
    /// Adapters allowed to expose this tool.
    pub adapters: AllowedAdapters,
}

impl ToolDescriptor {
    /// Creates a descriptor with an empty schema, no tags and no metadata.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameter_schema: empty_schema(),
            tags: BTreeSet::new(),
            metadata: ToolMetadata::default(),
            adapters: AllowedAdapters::All,
        }
    }

    /// Sets the parameter schema.
    #[must_use]
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.parameter_schema = schema;
        self
    }

    /// Adds tags.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Normalises and attaches metadata. Metadata tags are merged into [`Self::tags`].
    #[must_use]
    pub fn with_metadata(mut self, raw: &Map<String, Value>) -> Self {
        let metadata = ToolMetadata::normalise(raw);
        self.tags.extend(metadata.tags.iter().cloned());
        self.metadata = metadata;
        self
    }

    /// Restricts the adapters allowed to expose this tool.
    #[must_use]
    pub fn with_adapters(mut self, adapters: AllowedAdapters) -> Self {
        self.adapters = adapters;
        self
    }

    /// Text the selection engine matches queries against.
    #[must_use]
    pub fn search_text(&self) -> String {
        let mut text = format!("{} {}", self.name, self.description);
        for tag in &self.tags {
            text.push(' ');
            text.push_str(tag);
        }
        text.to_lowercase()
    }

    /// The `tools/list` entry for this tool.
    #[must_use]
    pub fn to_mcp_schema(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "input_schema": self.parameter_schema,
        })
    }

    /// The OpenAI function-calling entry for this tool.
    #[must_use]
    pub fn to_openai_schema(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameter_schema,
            },
        })
    }
}

/// A pipeline: a tool descriptor plus the stateful flag.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDescriptor {
    /// Shared descriptor fields.
    pub descriptor: ToolDescriptor,
    /// Whether the pipeline's context carries the per-user state store.
    pub stateful: bool,
}

impl PipelineDescriptor {
    /// Wraps a descriptor.
    #[must_use]
    pub const fn new(descriptor: ToolDescriptor, stateful: bool) -> Self {
        Self {
            descriptor,
            stateful,
        }
    }
}

/// Callable behind a tool entry.
#[derive(Clone)]
pub enum ToolHandler {
    /// Blocking callable, dispatched to the worker pool.
    Sync(Arc<SyncToolFn>),
    /// Future-returning callable, awaited on the event loop.
    Async(Arc<AsyncToolFn>),
}

impl ToolHandler {
    /// Wraps a blocking closure.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&Arguments) -> ToolResult + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    /// Wraps an async closure.
    pub fn asynchronous<F, Fut>(f: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult> + Send + 'static,
    {
        Self::Async(Arc::new(move |args| f(args).boxed()))
    }

    /// Whether this handler must run on the worker pool.
    #[must_use]
    pub const fn is_blocking(&self) -> bool {
        matches!(self, Self::Sync(_))
    }
}

impl fmt::Debug for ToolHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("ToolHandler::Sync"),
            Self::Async(_) => f.write_str("ToolHandler::Async"),
        }
    }
}

/// Callable behind a pipeline entry.
#[derive(Clone)]
pub struct PipelineHandler(pub Arc<PipelineFn>);

impl PipelineHandler {
    /// Wraps an async closure taking the pipeline context first.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(PipelineContext, Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult> + Send + 'static,
    {
        Self(Arc::new(move |ctx, args| f(ctx, args).boxed()))
    }

    /// Runs the pipeline.
    pub fn call(&self, ctx: PipelineContext, args: Arguments) -> BoxFuture<'static, ToolResult> {
        (self.0)(ctx, args)
    }
}

impl fmt::Debug for PipelineHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PipelineHandler")
    }
}

/// Whether a catalog entry is a plain tool or a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Plain tool.
    Tool,
    /// Pipeline.
    Pipeline,
}

impl EntryKind {
    /// Wire name used in `initialize` dependencies.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Pipeline => "pipeline",
        }
    }
}

/// A registered tool or pipeline.
#[derive(Debug, Clone)]
pub enum CatalogEntry {
    /// A plain tool.
    Tool {
        /// Descriptor.
        descriptor: Arc<ToolDescriptor>,
        /// Callable.
        handler: ToolHandler,
    },
    /// A pipeline.
    Pipeline {
        /// Descriptor.
        descriptor: Arc<PipelineDescriptor>,
        /// Callable.
        handler: PipelineHandler,
    },
}

impl CatalogEntry {
    /// The shared descriptor fields.
    #[must_use]
    pub fn descriptor(&self) -> &ToolDescriptor {
        match self {
            Self::Tool { descriptor, .. } => descriptor,
            Self::Pipeline { descriptor, .. } => &descriptor.descriptor,
        }
    }

    /// Tool or pipeline.
    #[must_use]
    pub const fn kind(&self) -> EntryKind {
        match self {
            Self::Tool { .. } => EntryKind::Tool,
            Self::Pipeline { .. } => EntryKind::Pipeline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Param, ParamType, SchemaBuilder};

    #[test]
    fn metadata_tags_merge_into_descriptor_tags() {
        let raw = json!({ "tags": ["b"], "cost": 1 });
        let descriptor = ToolDescriptor::new("demo", "Demo tool")
            .with_tags(["a"])
            .with_metadata(raw.as_object().unwrap());

        assert_eq!(
            descriptor.tags.iter().collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert_eq!(descriptor.metadata.cost, Some(1.0));
    }

    #[test]
    fn adapters_all_wins() {
        assert_eq!(AllowedAdapters::from_names(["mcp", "all"]), AllowedAdapters::All);
        let only = AllowedAdapters::from_names(["openai"]);
        assert!(!only.allows("mcp"));
        assert!(only.allows("openai"));
    }

    #[test]
    fn mcp_schema_uses_snake_case_input_schema() {
        let schema = ToolDescriptor::new("demo", "Demo").to_mcp_schema();
        assert_eq!(schema["name"], "demo");
        assert_eq!(schema["input_schema"]["type"], "object");
    }

    #[test]
    fn openai_schema_shares_parameters_with_mcp() {
        let descriptor = ToolDescriptor::new("math.add", "Add").with_schema(
            SchemaBuilder::new()
                .required("a", ParamType::Number, "First")
                .param(Param::new("b", ParamType::Number, "Second").optional().with_default(json!(1)))
                .build(),
        );
        let openai = descriptor.to_openai_schema();
        let mcp = descriptor.to_mcp_schema();

        assert_eq!(openai["type"], "function");
        assert_eq!(openai["function"]["name"], "math.add");
        assert_eq!(openai["function"]["parameters"], mcp["input_schema"]);
        assert_eq!(openai["function"]["parameters"]["properties"]["b"]["default"], 1);
    }

    #[test]
    fn search_text_is_lowercase() {
        let descriptor = ToolDescriptor::new("Weather.Get", "Current WEATHER").with_tags(["Geo"]);
        assert_eq!(descriptor.search_text(), "weather.get current weather geo");
    }
}
