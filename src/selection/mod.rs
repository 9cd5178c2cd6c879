//! Tool selection engine.
//!
//! Filters the catalog by tags, name prefix and metadata constraints, then
//! ranks the survivors by query similarity, recency-weighted failure score
//! and optionally cost and latency. Ranking is pluggable through
//! [`SelectionStrategy`].

mod search;
mod similarity;

pub use search::{SearchQuery, ToolSearch};
pub use similarity::{ratio, similarity};

use std::collections::HashSet;

use crate::catalog::{ToolCatalog, ToolDescriptor};

/// Returns the failure score of a tool at a point in time.
pub type FailureScoreFn<'a> = &'a (dyn Fn(&str, f64) -> f64 + Send + Sync);

/// Filters and ranking switches for one selection.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionOptions {
    /// Free-text query matched against name, description and tags.
    pub query: String,
    /// Tags every candidate must carry.
    pub tags: Vec<String>,
    /// Required name prefix.
    pub prefix: Option<String>,
    /// Maximum number of results.
    pub top_k: usize,
    /// Rank recently failing tools lower.
    pub sort_by_failure: bool,
    /// Drop tools costing more than this.
    pub max_cost: Option<f64>,
    /// Drop tools whose latency hint exceeds this.
    pub latency_budget_ms: Option<u64>,
    /// `Some(false)` drops tools flagged with side effects.
    pub allow_side_effects: Option<bool>,
    /// Allowed categories. Empty means any.
    pub categories: Vec<String>,
    /// Break similarity and failure ties by cost, then latency.
    pub use_metadata_ranking: bool,
}

impl Default for SelectionOptions {
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
            use_metadata_ranking: false,
        }
    }
}

impl SelectionOptions {
    /// Options matching `query` with everything else at its default.
    #[must_use]
    pub fn query(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// Whether any metadata filter narrows the candidate set.
    #[must_use]
    pub fn has_metadata_constraints(&self) -> bool {
        self.max_cost.is_some()
            || self.latency_budget_ms.is_some()
            || self.allow_side_effects == Some(false)
            || !self.categories.is_empty()
    }

    fn without_metadata(&self) -> Self {
        Self {
            max_cost: None,
            latency_budget_ms: None,
            allow_side_effects: None,
            categories: Vec::new(),
            use_metadata_ranking: false,
            ..self.clone()
        }
    }
}

/// A ranking policy over catalog descriptors.
pub trait SelectionStrategy: Send + Sync {
    /// Returns at most `options.top_k` tools, best first.
    fn select(
        &self,
        tools: Vec<ToolDescriptor>,
        options: &SelectionOptions,
        failure_score: FailureScoreFn<'_>,
        now: f64,
    ) -> Vec<ToolDescriptor>;
}

/// Applies the tag, prefix and metadata filters.
#[must_use]
pub fn filter_tools(tools: Vec<ToolDescriptor>, options: &SelectionOptions) -> Vec<ToolDescriptor> {
    let categories: HashSet<&str> = options.categories.iter().map(String::as_str).collect();

    tools
        .into_iter()
        .filter(|tool| options.tags.iter().all(|tag| tool.tags.contains(tag)))
        .filter(|tool| {
            options
                .prefix
                .as_deref()
                .map_or(true, |prefix| tool.name.starts_with(prefix))
        })
        .filter(|tool| {
            let meta = &tool.metadata;
            if let (Some(max), Some(cost)) = (options.max_cost, meta.cost) {
                if cost > max {
                    return false;
                }
            }
            if let (Some(budget), Some(latency)) = (options.latency_budget_ms, meta.latency_hint_ms)
            {
                if latency > budget {
                    return false;
                }
            }
            if options.allow_side_effects == Some(false) && meta.side_effect == Some(true) {
                return false;
            }
            categories.is_empty()
                || meta
                    .category
                    .as_deref()
                    .is_some_and(|category| categories.contains(category))
        })
        .collect()
}

struct Scored {
    tool: ToolDescriptor,
    similarity: f64,
    failure: f64,
    cost: f64,
    latency: f64,
}

impl Scored {
    #[allow(clippy::cast_precision_loss)]
    fn new(
        tool: ToolDescriptor,
        options: &SelectionOptions,
        failure_score: FailureScoreFn<'_>,
        now: f64,
    ) -> Self {
        let similarity = similarity(&options.query, &tool.search_text());
        let failure = if options.sort_by_failure {
            failure_score(&tool.name, now)
        } else {
            0.0
        };
        let cost = tool.metadata.cost.unwrap_or(f64::INFINITY);
        let latency = tool
            .metadata
            .latency_hint_ms
            .map_or(f64::INFINITY, |ms| ms as f64);
        Self {
            tool,
            similarity,
            failure,
            cost,
            latency,
        }
    }
}

/// Default strategy: similarity first, then failure score, then
/// (optionally) cost and latency, then name.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedStrategy;

impl SelectionStrategy for RuleBasedStrategy {
    fn select(
        &self,
        tools: Vec<ToolDescriptor>,
        options: &SelectionOptions,
        failure_score: FailureScoreFn<'_>,
        now: f64,
    ) -> Vec<ToolDescriptor> {
        let mut scored: Vec<Scored> = filter_tools(tools, options)
            .into_iter()
            .map(|tool| Scored::new(tool, options, failure_score, now))
            .collect();

        scored.sort_by(|a, b| {
            let ordering = b
                .similarity
                .total_cmp(&a.similarity)
                .then(a.failure.total_cmp(&b.failure));
            let ordering = if options.use_metadata_ranking {
                ordering
                    .then(a.cost.total_cmp(&b.cost))
                    .then(a.latency.total_cmp(&b.latency))
            } else {
                ordering
            };
            ordering.then_with(|| a.tool.name.cmp(&b.tool.name))
        });

        scored
            .into_iter()
            .take(options.top_k)
            .map(|s| s.tool)
            .collect()
    }
}

/// Runs a base strategy without metadata constraints, then re-ranks the
/// candidates with [`RuleBasedStrategy`] only when metadata constraints or
/// metadata ranking were requested.
pub struct HybridStrategy {
    base: Box<dyn SelectionStrategy>,
}

impl HybridStrategy {
    /// Wraps `base`.
    #[must_use]
    pub fn new(base: Box<dyn SelectionStrategy>) -> Self {
        Self { base }
    }
}

impl Default for HybridStrategy {
    fn default() -> Self {
        Self::new(Box::new(RuleBasedStrategy))
    }
}

impl SelectionStrategy for HybridStrategy {
    fn select(
        &self,
        tools: Vec<ToolDescriptor>,
        options: &SelectionOptions,
        failure_score: FailureScoreFn<'_>,
        now: f64,
    ) -> Vec<ToolDescriptor> {
        let candidates = self
            .base
            .select(tools, &options.without_metadata(), failure_score, now);

        if !options.use_metadata_ranking && !options.has_metadata_constraints() {
            return candidates;
        }
        RuleBasedStrategy.select(candidates, options, failure_score, now)
    }
}

/// Cost-first strategy: cheapest, then fastest, then least failing.
/// Similarity only breaks the remaining ties.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheapestFirstStrategy;

impl SelectionStrategy for CheapestFirstStrategy {
    fn select(
        &self,
        tools: Vec<ToolDescriptor>,
        options: &SelectionOptions,
        failure_score: FailureScoreFn<'_>,
        now: f64,
    ) -> Vec<ToolDescriptor> {
        let mut scored: Vec<Scored> = filter_tools(tools, options)
            .into_iter()
            .map(|tool| Scored::new(tool, options, failure_score, now))
            .collect();

        scored.sort_by(|a, b| {
            a.cost
                .total_cmp(&b.cost)
                .then(a.latency.total_cmp(&b.latency))
                .then(a.failure.total_cmp(&b.failure))
                .then(b.similarity.total_cmp(&a.similarity))
                .then_with(|| a.tool.name.cmp(&b.tool.name))
        });

        scored
            .into_iter()
            .take(options.top_k)
            .map(|s| s.tool)
            .collect()
    }
}

/// Selects from `catalog` with the default strategy.
#[must_use]
pub fn select(
    catalog: &ToolCatalog,
    options: &SelectionOptions,
    failure_score: FailureScoreFn<'_>,
    now: f64,
) -> Vec<ToolDescriptor> {
    RuleBasedStrategy.select(catalog.descriptors(), options, failure_score, now)
}

/// Failure score function for callers without a ledger.
#[must_use]
pub fn no_failures(_: &str, _: f64) -> f64 {
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::FailureLedger;
    use serde_json::{json, Value};

    fn tool(name: &str, description: &str, metadata: Value) -> ToolDescriptor {
        ToolDescriptor::new(name, description).with_metadata(metadata.as_object().unwrap())
    }

    fn names(tools: &[ToolDescriptor]) -> Vec<&str> {
        tools.iter().map(|t| t.name.as_str()).collect()
    }

    fn sample() -> Vec<ToolDescriptor> {
        vec![
            tool(
                "weather.get",
                "Current weather",
                json!({"cost": 2, "latency_hint_ms": 300, "category": "geo", "tags": ["weather"]}),
            ),
            tool(
                "weather.forecast",
                "Weather forecast",
                json!({"cost": 5, "latency_hint_ms": 900, "category": "geo", "tags": ["weather"]}),
            ),
            tool(
                "payments.send",
                "Send money",
                json!({"cost": 1, "side_effect": true, "category": "finance"}),
            ),
            tool("math.add", "Add numbers", json!({})),
        ]
    }

    #[test]
    fn filters_by_tag_and_prefix() {
        let options = SelectionOptions {
            tags: vec!["weather".to_string()],
            prefix: Some("weather.f".to_string()),
            ..SelectionOptions::default()
        };
        let result = RuleBasedStrategy.select(sample(), &options, &no_failures, 0.0);
        assert_eq!(names(&result), vec!["weather.forecast"]);
    }

    #[test]
    fn filters_by_metadata() {
        let options = SelectionOptions {
            max_cost: Some(3.0),
            allow_side_effects: Some(false),
            ..SelectionOptions::default()
        };
        let result = RuleBasedStrategy.select(sample(), &options, &no_failures, 0.0);
        assert_eq!(names(&result), vec!["math.add", "weather.get"]);

        let options = SelectionOptions {
            categories: vec!["geo".to_string()],
            latency_budget_ms: Some(500),
            ..SelectionOptions::default()
        };
        let result = RuleBasedStrategy.select(sample(), &options, &no_failures, 0.0);
        assert_eq!(names(&result), vec!["weather.get"]);
    }

    #[test]
    fn similarity_ranks_first() {
        let options = SelectionOptions::query("send money");
        let result = RuleBasedStrategy.select(sample(), &options, &no_failures, 0.0);
        assert_eq!(result[0].name, "payments.send");
    }

    #[test]
    fn lower_failure_score_wins_ties() {
        let ledger = FailureLedger::in_memory(0.9, 20);
        ledger.record_failure("weather.forecast", 100.0).unwrap();
        let score = |name: &str, now: f64| ledger.failure_score(name, now);

        let options = SelectionOptions {
            query: "weather".to_string(),
            ..SelectionOptions::default()
        };
        let result = RuleBasedStrategy.select(sample(), &options, &score, 100.0);
        assert_eq!(names(&result)[..2], ["weather.get", "weather.forecast"]);

        ledger.reset().unwrap();
        ledger.record_failure("weather.get", 100.0).unwrap();
        let result = RuleBasedStrategy.select(sample(), &options, &score, 100.0);
        assert_eq!(names(&result)[..2], ["weather.forecast", "weather.get"]);

        let ignore_failures = SelectionOptions {
            sort_by_failure: false,
            ..options
        };
        let result = RuleBasedStrategy.select(sample(), &ignore_failures, &score, 100.0);
        assert_eq!(names(&result)[..2], ["weather.forecast", "weather.get"]);
    }

    #[test]
    fn metadata_ranking_breaks_ties_by_cost() {
        let tools = vec![
            tool("b.expensive", "lookup", json!({"cost": 9})),
            tool("z.cheap", "lookup", json!({"cost": 1})),
            tool("c.unknown", "lookup", json!({})),
        ];
        let options = SelectionOptions {
            query: "lookup".to_string(),
            use_metadata_ranking: true,
            ..SelectionOptions::default()
        };
        let result = RuleBasedStrategy.select(tools.clone(), &options, &no_failures, 0.0);
        assert_eq!(names(&result), vec!["z.cheap", "b.expensive", "c.unknown"]);

        let by_name = SelectionOptions {
            use_metadata_ranking: false,
            ..options
        };
        let result = RuleBasedStrategy.select(tools, &by_name, &no_failures, 0.0);
        assert_eq!(names(&result), vec!["b.expensive", "c.unknown", "z.cheap"]);
    }

    #[test]
    fn top_k_truncates() {
        let options = SelectionOptions {
            top_k: 2,
            ..SelectionOptions::default()
        };
        let result = RuleBasedStrategy.select(sample(), &options, &no_failures, 0.0);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn hybrid_without_constraints_matches_base() {
        let options = SelectionOptions::query("weather");
        let hybrid = HybridStrategy::default().select(sample(), &options, &no_failures, 0.0);
        let base = RuleBasedStrategy.select(sample(), &options, &no_failures, 0.0);
        assert_eq!(names(&hybrid), names(&base));
    }

    #[test]
    fn hybrid_applies_constraints_after_base() {
        let options = SelectionOptions {
            query: "weather".to_string(),
            max_cost: Some(3.0),
            ..SelectionOptions::default()
        };
        let result = HybridStrategy::default().select(sample(), &options, &no_failures, 0.0);
        assert!(names(&result).contains(&"weather.get"));
        assert!(!names(&result).contains(&"weather.forecast"));
    }

    #[test]
    fn cheapest_first_orders_by_cost() {
        let result = CheapestFirstStrategy.select(
            sample(),
            &SelectionOptions::default(),
            &no_failures,
            0.0,
        );
        assert_eq!(
            names(&result),
            vec!["payments.send", "weather.get", "weather.forecast", "math.add"]
        );
    }

    #[test]
    fn select_reads_catalog() {
        use crate::catalog::ToolHandler;

        let catalog = ToolCatalog::new();
        for descriptor in sample() {
            catalog
                .register_tool(descriptor, ToolHandler::sync(|_| Ok(Value::Null)))
                .unwrap();
        }
        let result = select(&catalog, &SelectionOptions::query("forecast"), &no_failures, 0.0);
        assert_eq!(result[0].name, "weather.forecast");
    }
}
