//! toolrelay: expose registered tools to AI agents over MCP
//!
//! A process registers tools and pipelines in a [`catalog::ToolCatalog`] and
//! serves them over JSON-RPC 2.0, on stdio or on HTTP with server-push
//! sessions.
//!
//! # Architecture
//!
//! - **Protocol core**: stateless method dispatcher shared by every transport
//! - **Transports**: a strictly serial line loop on stdio, and HTTP with a
//!   session registry behind `/sse` and `/messages/{id}`
//! - **Executor**: resolves a name, bridges sync and async callables, retries
//!   transient failures, masks arguments and records terminal failures
//! - **Concurrency primitives**: bounded parallel runner with retry and
//!   rate limiting, used by pipeline steps
//! - **Selection**: ranks tools against a query under cost, latency and
//!   side-effect constraints, pushing recently failing tools down
//!
//! # Modules
//!
//! - [`builtin`]: Built-in diagnostic and demo tools
//! - [`catalog`]: Tool descriptors, handlers and the catalog
//! - [`config`]: Configuration loading and validation
//! - [`doctor`]: Connection self-test
//! - [`error`]: Error types
//! - [`executor`]: Invocation executor
//! - [`http`]: HTTP transport with push sessions
//! - [`ledger`]: Decaying failure ledger
//! - [`mcp`]: MCP protocol core and stdio transport
//! - [`pipeline`]: Pipeline steps and execution context
//! - [`runtime`]: Retry, rate limiting and bounded parallelism
//! - [`selection`]: Tool ranking and search
//! - [`state`]: Per-user key/value state

pub mod builtin;
pub mod catalog;
pub mod config;
pub mod doctor;
pub mod error;
pub mod executor;
pub mod http;
pub mod ledger;
pub mod mcp;
pub mod pipeline;
pub mod runtime;
pub mod selection;
pub mod state;
