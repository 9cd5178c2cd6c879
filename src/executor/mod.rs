//! Invocation executor.
//!
//! Resolves a name to a tool or pipeline, runs it (blocking tools on the
//! worker pool, async tools and pipelines on the event loop), retries
//! transient failures and records terminal failures in the ledger.
//! [`Executor::execute`] additionally returns the masked arguments and audit
//! record next to the raw result so callers never log unmasked input.

mod audit;

pub use audit::{audit_record, mask_arguments, serialise_result, ANONYMOUS_USER, MASK};

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::catalog::{Arguments, CatalogEntry, ToolCatalog, ToolHandler};
use crate::error::{InvocationFailure, InvokeError};
use crate::ledger::FailureLedger;
use crate::pipeline::PipelineContext;
use crate::runtime::{retry_async, RetryPolicy};
use crate::state::KeyValueStore;

/// Default retry predicate: everything except unknown names.
#[must_use]
pub fn is_retryable_error(error: &(dyn Error + 'static)) -> bool {
    error
        .downcast_ref::<InvokeError>()
        .map_or(true, InvokeError::is_retryable)
}

/// Executor retry policy: three attempts, 4 s base delay, 10 s cap, no jitter.
#[must_use]
pub fn default_retry_policy() -> RetryPolicy {
    RetryPolicy::new(2)
        .with_base_delay(Duration::from_secs(4))
        .with_max_delay(Duration::from_secs(10))
        .with_jitter(0.0)
        .retry_if(is_retryable_error)
}

/// Successful invocation envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Value returned by the tool.
    pub raw: Value,
    /// Serialised result text.
    pub text: String,
    /// MIME type of [`Self::text`].
    pub content_type: &'static str,
    /// Arguments with sensitive keys masked.
    pub arguments: Value,
    /// Audit record for the call.
    pub audit: Value,
}

impl Invocation {
    fn new(raw: Value, arguments: Value, audit: Value) -> Self {
        let (text, content_type) = serialise_result(&raw);
        Self {
            raw,
            text,
            content_type,
            arguments,
            audit,
        }
    }

    /// The `tools/call` result object.
    #[must_use]
    pub fn to_result(&self) -> Value {
        json!({
            "content": [{ "type": "text", "text": self.text }],
            "meta": { "contentType": self.content_type },
            "arguments": self.arguments,
            "audit": self.audit,
        })
    }

    /// The OpenAI function-call record `{type, name, arguments, result}`.
    ///
    /// Arguments are the masked ones.
    #[must_use]
    pub fn to_function_call(&self, name: &str) -> Value {
        json!({
            "type": "function",
            "name": name,
            "arguments": self.arguments,
            "result": self.raw,
        })
    }
}

/// Runs catalog entries.
///
/// Cheap to clone; clones share the catalog, ledger and state store.
#[derive(Clone)]
pub struct Executor {
    catalog: Arc<ToolCatalog>,
    ledger: Option<Arc<FailureLedger>>,
    state: Option<Arc<dyn KeyValueStore>>,
    retry: RetryPolicy,
}

impl Executor {
    /// Creates an executor with [`default_retry_policy`] and no ledger.
    #[must_use]
    pub fn new(catalog: Arc<ToolCatalog>) -> Self {
        Self {
            catalog,
            ledger: None,
            state: None,
            retry: default_retry_policy(),
        }
    }

    /// Records terminal failures in `ledger`.
    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<FailureLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Hands `store` to stateful pipelines.
    #[must_use]
    pub fn with_state_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.state = Some(store);
        self
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// The catalog this executor resolves against.
    #[must_use]
    pub const fn catalog(&self) -> &Arc<ToolCatalog> {
        &self.catalog
    }

    /// The failure ledger, if any.
    #[must_use]
    pub const fn ledger(&self) -> Option<&Arc<FailureLedger>> {
        self.ledger.as_ref()
    }

    /// Resolves and runs `name`, retrying per the policy.
    ///
    /// A failure that survives every retry is recorded once in the ledger.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::NotFound`] for unknown names, otherwise the
    /// last error raised by the tool.
    pub async fn call(
        &self,
        name: &str,
        arguments: Arguments,
        user_id: Option<&str>,
    ) -> Result<Value, InvokeError> {
        let result = retry_async(&self.retry, || {
            self.attempt(name, arguments.clone(), user_id)
        })
        .await;

        if let Err(error) = &result {
            tracing::warn!(tool = %name, error = %error, "Tool invocation failed");
            if let Some(ledger) = &self.ledger {
                if let Err(e) = ledger.record(name) {
                    tracing::warn!(tool = %name, error = %e, "Failed to persist failure ledger");
                }
            }
        }
        result
    }

    async fn attempt(
        &self,
        name: &str,
        arguments: Arguments,
        user_id: Option<&str>,
    ) -> Result<Value, InvokeError> {
        let entry = self
            .catalog
            .get(name)
            .ok_or_else(|| InvokeError::NotFound(name.to_string()))?;

        match entry {
            CatalogEntry::Pipeline {
                descriptor,
                handler,
            } => {
                let state = if descriptor.stateful {
                    self.state.clone()
                } else {
                    None
                };
                let ctx = PipelineContext::new(user_id, state, self.clone());
                handler.call(ctx, arguments).await
            }
            CatalogEntry::Tool { handler, .. } => match handler {
                ToolHandler::Async(f) => f(arguments).await,
                ToolHandler::Sync(f) => tokio::task::spawn_blocking(move || f(&arguments))
                    .await
                    .map_err(|e| InvokeError::internal(format!("tool task failed: {e}")))?,
            },
        }
    }

    /// Runs `name` and wraps the outcome with masked arguments and an audit record.
    ///
    /// # Errors
    ///
    /// Returns the terminal failure together with the same masked context.
    pub async fn execute(
        &self,
        name: &str,
        arguments: Arguments,
        user_id: Option<&str>,
    ) -> Result<Invocation, InvocationFailure> {
        let masked = Value::Object(mask_arguments(&arguments));
        let audit = audit_record(name, &arguments, user_id);
        tracing::info!(tool = %name, arguments = %masked, "Invoking tool");

        match self.call(name, arguments, user_id).await {
            Ok(raw) => Ok(Invocation::new(raw, masked, audit)),
            Err(error) => Err(InvocationFailure {
                error,
                arguments: masked,
                audit,
            }),
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("tools", &self.catalog.len())
            .field("ledger", &self.ledger.is_some())
            .field("state", &self.state.is_some())
            .field("retry", &self.retry)
            .finish()
    }
}
