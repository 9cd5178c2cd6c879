//! Search facade over the catalog and failure ledger.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use super::{RuleBasedStrategy, SelectionOptions, SelectionStrategy};
use crate::catalog::{ToolCatalog, ToolDescriptor};
use crate::ledger::{now_unix, FailureLedger};

/// Search request, as accepted by the `tools.search` tool.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchQuery {
    /// Free-text query.
    pub query: String,
    /// Required tags.
    pub tags: Vec<String>,
    /// Required name prefix.
    pub prefix: Option<String>,
    /// Maximum number of results.
    pub top_k: usize,
    /// Rank recently failing tools lower.
    pub sort_by_failure: bool,
    /// Cost ceiling.
    pub max_cost: Option<f64>,
    /// Latency ceiling in milliseconds.
    pub latency_budget_ms: Option<u64>,
    /// Whether side-effecting tools are acceptable.
    pub allow_side_effects: Option<bool>,
    /// Allowed categories.
    pub categories: Vec<String>,
    /// Force metadata ranking on or off. Unset enables it whenever a
    /// metadata constraint is given.
    pub use_metadata_ranking: Option<bool>,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            query: String::new(),
            tags: Vec::new(),
            prefix: None,
            top_k: 10,
            sort_by_failure: true,
            max_cost: None,
            latency_budget_ms: None,
            allow_side_effects: None,
            categories: Vec::new(),
            use_metadata_ranking: None,
        }
    }
}

impl SearchQuery {
    /// Resolves the request into selection options.
    #[must_use]
    pub fn into_options(self) -> SelectionOptions {
        let auto_ranking = self.max_cost.is_some()
            || self.latency_budget_ms.is_some()
            || self.allow_side_effects.is_some()
            || !self.categories.is_empty();

        SelectionOptions {
            use_metadata_ranking: self.use_metadata_ranking.unwrap_or(auto_ranking),
            query: self.query,
            tags: self.tags,
            prefix: self.prefix,
            top_k: self.top_k,
            sort_by_failure: self.sort_by_failure,
            max_cost: self.max_cost,
            latency_budget_ms: self.latency_budget_ms,
            allow_side_effects: self.allow_side_effects,
            categories: self.categories,
        }
    }
}

/// Searches the catalog, ranking by the configured strategy.
pub struct ToolSearch {
    catalog: Arc<ToolCatalog>,
    ledger: Option<Arc<FailureLedger>>,
    strategy: Box<dyn SelectionStrategy>,
}

impl ToolSearch {
    /// Creates a search over `catalog` with [`RuleBasedStrategy`].
    #[must_use]
    pub fn new(catalog: Arc<ToolCatalog>, ledger: Option<Arc<FailureLedger>>) -> Self {
        Self {
            catalog,
            ledger,
            strategy: Box::new(RuleBasedStrategy),
        }
    }

    /// Replaces the ranking strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: Box<dyn SelectionStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Runs a search at `now` (current time when `None`).
    #[must_use]
    pub fn search(&self, query: SearchQuery, now: Option<f64>) -> Vec<ToolDescriptor> {
        let options = query.into_options();
        let now = now.unwrap_or_else(now_unix);
        let ledger = self.ledger.as_deref();
        let score = move |name: &str, at: f64| ledger.map_or(0.0, |l| l.failure_score(name, at));

        self.strategy
            .select(self.catalog.descriptors(), &options, &score, now)
    }

    /// Compact JSON description of a search hit.
    #[must_use]
    pub fn summary(tool: &ToolDescriptor) -> Value {
        json!({
            "name": tool.name,
            "description": tool.description,
            "tags": tool.tags,
            "cost": tool.metadata.cost,
            "latency_hint_ms": tool.metadata.latency_hint_ms,
            "side_effect": tool.metadata.side_effect,
            "category": tool.metadata.category,
        })
    }
}

impl std::fmt::Debug for ToolSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSearch")
            .field("tools", &self.catalog.len())
            .field("ledger", &self.ledger.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ToolHandler;
    use crate::selection::CheapestFirstStrategy;

    fn catalog() -> Arc<ToolCatalog> {
        let catalog = Arc::new(ToolCatalog::new());
        let entries = [
            ("fx.rate", "Exchange rate", json!({"cost": 3, "category": "finance"})),
            ("fx.rate_cached", "Cached exchange rate", json!({"cost": 1, "category": "finance"})),
            ("geo.lookup", "Find a place", json!({"cost": 2, "category": "geo"})),
        ];
        for (name, description, metadata) in entries {
            catalog
                .register_tool(
                    ToolDescriptor::new(name, description).with_metadata(metadata.as_object().unwrap()),
                    ToolHandler::sync(|_| Ok(Value::Null)),
                )
                .unwrap();
        }
        catalog
    }

    #[test]
    fn metadata_constraint_enables_ranking() {
        let query = SearchQuery {
            max_cost: Some(5.0),
            ..SearchQuery::default()
        };
        assert!(query.into_options().use_metadata_ranking);

        let query = SearchQuery {
            max_cost: Some(5.0),
            use_metadata_ranking: Some(false),
            ..SearchQuery::default()
        };
        assert!(!query.into_options().use_metadata_ranking);
        assert!(!SearchQuery::default().into_options().use_metadata_ranking);
    }

    #[test]
    fn cheaper_tool_first_under_constraints() {
        let search = ToolSearch::new(catalog(), None);
        let hits = search.search(
            SearchQuery {
                query: "exchange rate".to_string(),
                categories: vec!["finance".to_string()],
                ..SearchQuery::default()
            },
            Some(0.0),
        );
        let names: Vec<_> = hits.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["fx.rate_cached", "fx.rate"]);
    }

    #[test]
    fn failures_push_tools_down() {
        let ledger = Arc::new(FailureLedger::in_memory(0.9, 20));
        ledger.record_failure("fx.rate", 10.0).unwrap();
        let search = ToolSearch::new(catalog(), Some(ledger));

        let hits = search.search(
            SearchQuery {
                query: "fx.rate".to_string(),
                ..SearchQuery::default()
            },
            Some(10.0),
        );
        assert_eq!(hits[0].name, "fx.rate_cached");
    }

    #[test]
    fn custom_strategy_is_used() {
        let search =
            ToolSearch::new(catalog(), None).with_strategy(Box::new(CheapestFirstStrategy));
        let hits = search.search(SearchQuery::default(), None);
        assert_eq!(hits[0].name, "fx.rate_cached");
        assert_eq!(hits[1].name, "geo.lookup");
    }

    #[test]
    fn query_rejects_unknown_fields() {
        let parsed: Result<SearchQuery, _> = serde_json::from_value(json!({"bogus": 1}));
        assert!(parsed.is_err());

        let parsed: SearchQuery = serde_json::from_value(json!({"query": "x"})).unwrap();
        assert_eq!(parsed.top_k, 10);
        assert!(parsed.sort_by_failure);
    }

    #[test]
    fn summary_lists_metadata() {
        let tool = ToolDescriptor::new("t", "d").with_tags(["x"]);
        let summary = ToolSearch::summary(&tool);
        assert_eq!(summary["tags"], json!(["x"]));
        assert!(summary["cost"].is_null());
    }
}
