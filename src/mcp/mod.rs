//! Model Context Protocol (MCP) server implementation.
//!
//! This module exposes the tool catalog to AI agents over JSON-RPC 2.0.
//! The protocol core is shared by every transport; this module also holds
//! the line-delimited stdio transport. The HTTP push transport lives in
//! [`crate::http`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Transports                         │
//! │   ┌─────────────┐                      ┌─────────────┐      │
//! │   │   stdio     │                      │ HTTP + SSE  │      │
//! │   │ (line loop) │                      │ (sessions)  │      │
//! │   └─────────────┘                      └─────────────┘      │
//! │          │                                    │             │
//! │          ▼                                    ▼             │
//! │   ┌─────────────────────────────────────────────────┐       │
//! │   │           Protocol core (core::handle)          │       │
//! │   └─────────────────────────────────────────────────┘       │
//! │          │                │                   │             │
//! │          ▼                ▼                   ▼             │
//! │   capabilities       tool lister         tool invoker       │
//! │                      (catalog)           (executor)         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol Version
//!
//! This implementation targets MCP protocol version 2024-11-05.

pub mod core;
pub mod protocol;
pub mod server;
pub mod transport;

pub use self::core::{
    handle, CapabilitiesProvider, Dependencies, RequestContext, ServerCapabilities, ToolInvoker,
    ToolLister, TRANSPORT_USER,
};
pub use protocol::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, OutgoingNotification, RequestId,
    MCP_PROTOCOL_VERSION,
};
pub use server::McpServer;
pub use transport::{LineTransport, StdioTransport};
