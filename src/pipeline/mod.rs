//! Pipeline composition.
//!
//! A pipeline is a catalog entry whose callable receives a
//! [`PipelineContext`] first. Pipelines are usually assembled from steps:
//!
//! - [`ToolStep`] calls one registered tool,
//! - [`ParallelStep`] runs named sub-steps concurrently and returns a
//!   name to result map,
//! - [`Sequence`] feeds each step's output into the next.
//!
//! [`step_handler`] turns any step into a [`PipelineHandler`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::catalog::{Arguments, PipelineHandler};
use crate::error::InvokeError;
use crate::executor::{Executor, ANONYMOUS_USER};
use crate::runtime::{parallel_run, ParallelOptions, RetryPolicy};
use crate::state::KeyValueStore;

/// Execution context handed to pipelines.
#[derive(Clone)]
pub struct PipelineContext {
    user_id: String,
    state: Option<Arc<dyn KeyValueStore>>,
    executor: Executor,
}

impl PipelineContext {
    /// Creates a context. A missing user id becomes `anonymous`.
    #[must_use]
    pub fn new(
        user_id: Option<&str>,
        state: Option<Arc<dyn KeyValueStore>>,
        executor: Executor,
    ) -> Self {
        Self {
            user_id: user_id.unwrap_or(ANONYMOUS_USER).to_string(),
            state,
            executor,
        }
    }

    /// The calling user.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// The executor running this pipeline.
    #[must_use]
    pub const fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Whether a state store is attached.
    #[must_use]
    pub const fn is_stateful(&self) -> bool {
        self.state.is_some()
    }

    /// Reads a state value for the calling user. `None` without a store.
    pub async fn get(&self, key: &str) -> Option<Value> {
        match &self.state {
            Some(state) => state.get(&self.user_id, key).await,
            None => None,
        }
    }

    /// Writes a state value for the calling user. Ignored without a store.
    pub async fn set(&self, key: &str, value: Value) {
        if let Some(state) = &self.state {
            state.set(&self.user_id, key, value).await;
        }
    }

    /// Calls a registered tool as the calling user.
    ///
    /// # Errors
    ///
    /// Returns the executor's error for the call.
    pub async fn invoke(&self, name: &str, arguments: Arguments) -> Result<Value, InvokeError> {
        self.executor
            .call(name, arguments, Some(&self.user_id))
            .await
    }
}

impl fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineContext")
            .field("user_id", &self.user_id)
            .field("stateful", &self.state.is_some())
            .finish_non_exhaustive()
    }
}

/// One unit of pipeline work.
#[async_trait]
pub trait Step: Send + Sync {
    /// Runs the step on `data`.
    async fn run(&self, ctx: &PipelineContext, data: Value) -> Result<Value, InvokeError>;
}

/// Builds tool arguments from a step's input.
pub type ArgsBuilder = dyn Fn(&Value, &PipelineContext) -> Arguments + Send + Sync;

/// Calls a single tool.
///
/// Without a builder an object payload is used as the arguments directly;
/// any other payload is passed as `{"input": payload}`.
#[derive(Clone)]
pub struct ToolStep {
    tool_name: String,
    args_builder: Option<Arc<ArgsBuilder>>,
}

impl ToolStep {
    /// Creates a step calling `tool_name`.
    #[must_use]
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            args_builder: None,
        }
    }

    /// Uses `builder` to derive the tool arguments.
    #[must_use]
    pub fn with_args<F>(mut self, builder: F) -> Self
    where
        F: Fn(&Value, &PipelineContext) -> Arguments + Send + Sync + 'static,
    {
        self.args_builder = Some(Arc::new(builder));
        self
    }

    fn arguments(&self, data: Value, ctx: &PipelineContext) -> Arguments {
        if let Some(builder) = &self.args_builder {
            return builder(&data, ctx);
        }
        match data {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("input".to_string(), other);
                map
            }
        }
    }
}

#[async_trait]
impl Step for ToolStep {
    async fn run(&self, ctx: &PipelineContext, data: Value) -> Result<Value, InvokeError> {
        let arguments = self.arguments(data, ctx);
        ctx.invoke(&self.tool_name, arguments).await
    }
}

impl fmt::Debug for ToolStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolStep")
            .field("tool_name", &self.tool_name)
            .field("args_builder", &self.args_builder.is_some())
            .finish()
    }
}

/// Runs named sub-steps concurrently on the same input.
pub struct ParallelStep {
    steps: IndexMap<String, Arc<dyn Step>>,
    concurrency: usize,
    max_retries: u32,
    rate_limit_per_minute: Option<u32>,
}

impl ParallelStep {
    /// Creates an empty parallel step (concurrency 8, no retries, no pacing).
    #[must_use]
    pub fn new() -> Self {
        Self {
            steps: IndexMap::new(),
            concurrency: 8,
            max_retries: 0,
            rate_limit_per_minute: None,
        }
    }

    /// Adds a named sub-step. Result keys follow insertion order.
    #[must_use]
    pub fn step(mut self, name: impl Into<String>, step: impl Step + 'static) -> Self {
        self.steps.insert(name.into(), Arc::new(step));
        self
    }

    /// Sets the concurrency limit.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sets retries per sub-step.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Paces sub-step starts.
    #[must_use]
    pub const fn with_rate_limit(mut self, per_minute: u32) -> Self {
        self.rate_limit_per_minute = Some(per_minute);
        self
    }

    fn options(&self) -> ParallelOptions {
        ParallelOptions {
            concurrency: self.concurrency.min(self.steps.len().max(1)),
            preserve_order: true,
            retry_policy: RetryPolicy::new(self.max_retries),
            rate_limit_per_minute: self.rate_limit_per_minute,
        }
    }
}

impl Default for ParallelStep {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Step for ParallelStep {
    async fn run(&self, ctx: &PipelineContext, data: Value) -> Result<Value, InvokeError> {
        let options = self.options();
        let factories: Vec<_> = self
            .steps
            .values()
            .map(|step| {
                let data = data.clone();
                move || step.run(ctx, data.clone())
            })
            .collect();

        let results = parallel_run(factories, &options).await?;
        let map: Map<String, Value> = self.steps.keys().cloned().zip(results).collect();
        Ok(Value::Object(map))
    }
}

impl fmt::Debug for ParallelStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelStep")
            .field("steps", &self.steps.keys().collect::<Vec<_>>())
            .field("concurrency", &self.concurrency)
            .field("max_retries", &self.max_retries)
            .field("rate_limit_per_minute", &self.rate_limit_per_minute)
            .finish()
    }
}

/// Runs steps in order, feeding each output into the next step.
#[derive(Default)]
pub struct Sequence {
    steps: Vec<Arc<dyn Step>>,
}

impl Sequence {
    /// Creates an empty sequence. An empty sequence returns its input.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step.
    #[must_use]
    pub fn then(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }
}

#[async_trait]
impl Step for Sequence {
    async fn run(&self, ctx: &PipelineContext, data: Value) -> Result<Value, InvokeError> {
        let mut current = data;
        for step in &self.steps {
            current = step.run(ctx, current).await?;
        }
        Ok(current)
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequence")
            .field("steps", &self.steps.len())
            .finish()
    }
}

/// Wraps a step as a catalog pipeline callable. The call arguments become
/// the step's input object.
pub fn step_handler(step: impl Step + 'static) -> PipelineHandler {
    let step: Arc<dyn Step> = Arc::new(step);
    PipelineHandler::new(move |ctx, args| {
        let step = Arc::clone(&step);
        async move { step.run(&ctx, Value::Object(args)).await }
    })
}
