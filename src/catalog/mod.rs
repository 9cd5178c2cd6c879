//! Tool catalog.
//!
//! One [`ToolCatalog`] is constructed at startup and shared by reference with
//! every component that needs it. Names are unique across tools and
//! pipelines, and entries keep their registration order.

mod descriptor;
mod metadata;
mod schema;

pub use descriptor::{
    AllowedAdapters, Arguments, AsyncToolFn, CatalogEntry, EntryKind, PipelineDescriptor,
    PipelineFn, PipelineHandler, SyncToolFn, ToolDescriptor, ToolHandler, ToolResult,
};
pub use metadata::ToolMetadata;
pub use schema::{empty_schema, Param, ParamType, SchemaBuilder};

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};

use crate::error::CatalogError;

/// Adapter name used by the MCP transports.
pub const MCP_ADAPTER: &str = "mcp";

/// Adapter name for OpenAI function-calling exports.
pub const OPENAI_ADAPTER: &str = "openai";

/// Registry of tools and pipelines.
#[derive(Debug, Default)]
pub struct ToolCatalog {
    entries: RwLock<IndexMap<String, CatalogEntry>>,
    /// Cached `tools/list` payload; cleared on every register/remove.
    listing: Mutex<Option<Arc<Vec<Value>>>>,
}

impl ToolCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plain tool.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::DuplicateName`] if a tool or pipeline already
    /// uses the name.
    pub fn register_tool(
        &self,
        descriptor: ToolDescriptor,
        handler: ToolHandler,
    ) -> Result<(), CatalogError> {
        self.insert(CatalogEntry::Tool {
            descriptor: Arc::new(descriptor),
            handler,
        })
    }

    /// Registers a pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::DuplicateName`] if a tool or pipeline already
    /// uses the name.
    pub fn register_pipeline(
        &self,
        descriptor: PipelineDescriptor,
        handler: PipelineHandler,
    ) -> Result<(), CatalogError> {
        self.insert(CatalogEntry::Pipeline {
            descriptor: Arc::new(descriptor),
            handler,
        })
    }

    fn insert(&self, entry: CatalogEntry) -> Result<(), CatalogError> {
        let name = entry.descriptor().name.clone();
        {
            let mut entries = self.entries.write();
            if entries.contains_key(&name) {
                return Err(CatalogError::DuplicateName { name });
            }
            tracing::debug!(tool = %name, kind = entry.kind().as_str(), "Registered catalog entry");
            entries.insert(name, entry);
        }
        self.invalidate();
        Ok(())
    }

    /// Removes an entry, returning it.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::NotFound`] if nothing is registered under `name`.
    pub fn remove(&self, name: &str) -> Result<CatalogEntry, CatalogError> {
        let removed = self.entries.write().shift_remove(name);
        match removed {
            Some(entry) => {
                self.invalidate();
                tracing::debug!(tool = %name, "Removed catalog entry");
                Ok(entry)
            }
            None => Err(CatalogError::NotFound {
                name: name.to_string(),
            }),
        }
    }

    fn invalidate(&self) {
        *self.listing.lock() = None;
    }

    /// Looks up an entry by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<CatalogEntry> {
        self.entries.read().get(name).cloned()
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// Number of registered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Registered names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Descriptors of every tool and pipeline, in registration order.
    #[must_use]
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.entries
            .read()
            .values()
            .map(|entry| entry.descriptor().clone())
            .collect()
    }

    /// The `tools/list` payload: entries exposed through the MCP adapter.
    #[must_use]
    pub fn mcp_tools(&self) -> Arc<Vec<Value>> {
        let mut listing = self.listing.lock();
        if let Some(cached) = listing.as_ref() {
            return Arc::clone(cached);
        }

        let tools: Vec<Value> = self
            .entries
            .read()
            .values()
            .map(CatalogEntry::descriptor)
            .filter(|d| d.adapters.allows(MCP_ADAPTER))
            .map(ToolDescriptor::to_mcp_schema)
            .collect();
        let tools = Arc::new(tools);
        *listing = Some(Arc::clone(&tools));
        tools
    }

    /// Function-calling definitions for entries exposed through the OpenAI adapter.
    ///
    /// Parameters are the same schemas `tools/list` publishes.
    #[must_use]
    pub fn openai_tools(&self) -> Vec<Value> {
        self.entries
            .read()
            .values()
            .map(CatalogEntry::descriptor)
            .filter(|d| d.adapters.allows(OPENAI_ADAPTER))
            .map(ToolDescriptor::to_openai_schema)
            .collect()
    }

    /// `{name, kind}` for every entry, used in the `initialize` payload.
    #[must_use]
    pub fn dependencies(&self) -> Vec<Value> {
        self.entries
            .read()
            .values()
            .map(|entry| {
                json!({
                    "name": entry.descriptor().name,
                    "kind": entry.kind().as_str(),
                })
            })
            .collect()
    }
}
