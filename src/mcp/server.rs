//! Line transport server loop.
//!
//! Reads one request per line, dispatches it through the protocol core and
//! writes the response, if any, as one line. Requests are strictly
//! serialised. Lines that are not valid request envelopes are dropped.
//!
//! The loop ends at end of input or, via [`McpServer::run`], on SIGINT or
//! SIGTERM (Ctrl+C on Windows).

use tokio::io::{AsyncBufRead, AsyncWrite};

use crate::mcp::core::{handle, Dependencies, RequestContext};
use crate::mcp::protocol::parse_message;
use crate::mcp::transport::{LineTransport, StdioTransport};

/// MCP server bound to a line transport.
#[derive(Debug)]
pub struct McpServer<R, W> {
    transport: LineTransport<R, W>,
    deps: Dependencies,
    context: RequestContext,
}

impl McpServer<tokio::io::BufReader<tokio::io::Stdin>, tokio::io::Stdout> {
    /// Creates a server over stdin and stdout.
    #[must_use]
    pub fn stdio(deps: Dependencies) -> Self {
        Self::new(StdioTransport::stdio(), deps)
    }
}

impl<R, W> McpServer<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Creates a server over `transport`.
    #[must_use]
    pub fn new(transport: LineTransport<R, W>, deps: Dependencies) -> Self {
        Self {
            transport,
            deps,
            context: RequestContext::stdio(),
        }
    }

    /// Runs until end of input or a shutdown signal.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    pub async fn run(&mut self) -> std::io::Result<()> {
        self.run_with_shutdown().await
    }

    /// Runs until end of input, ignoring signals.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    pub async fn serve(&mut self) -> std::io::Result<()> {
        loop {
            let line_result = self.transport.read_line().await;
            if self.handle_transport_result(line_result).await? {
                return Ok(());
            }
        }
    }

    #[cfg(unix)]
    async fn run_with_shutdown(&mut self) -> std::io::Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt()).map_err(std::io::Error::other)?;
        let mut sigterm = signal(SignalKind::terminate()).map_err(std::io::Error::other)?;

        loop {
            tokio::select! {
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT, initiating graceful shutdown");
                    return Ok(());
                }

                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, initiating graceful shutdown");
                    return Ok(());
                }

                line_result = self.transport.read_line() => {
                    if self.handle_transport_result(line_result).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    #[cfg(windows)]
    async fn run_with_shutdown(&mut self) -> std::io::Result<()> {
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = &mut ctrl_c => {
                    tracing::info!("Received Ctrl+C, initiating graceful shutdown");
                    return Ok(());
                }

                line_result = self.transport.read_line() => {
                    if self.handle_transport_result(line_result).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Returns `true` at end of input.
    async fn handle_transport_result(
        &mut self,
        line_result: std::io::Result<Option<String>>,
    ) -> std::io::Result<bool> {
        let Some(line) = line_result? else {
            tracing::info!("Input closed, shutting down");
            return Ok(true);
        };

        if line.trim().is_empty() {
            return Ok(false);
        }

        self.handle_line(&line).await?;
        Ok(false)
    }

    async fn handle_line(&mut self, line: &str) -> std::io::Result<()> {
        let request = match parse_message(line) {
            Ok(request) => request,
            Err(error) => {
                tracing::warn!(code = error.error.code, "Dropping malformed message");
                return Ok(());
            }
        };

        if let Some(response) = handle(&request, &self.context, &self.deps).await {
            self.transport.write_json(&response).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::Value;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    use crate::catalog::{ToolCatalog, ToolDescriptor, ToolHandler};
    use crate::executor::Executor;

    fn deps() -> Dependencies {
        let catalog = Arc::new(ToolCatalog::new());
        catalog
            .register_tool(
                ToolDescriptor::new("echo", "Echo"),
                ToolHandler::sync(|args| Ok(Value::Object(args.clone()))),
            )
            .unwrap();
        Dependencies::from_executor(Executor::new(catalog))
    }

    #[tokio::test]
    async fn malformed_lines_are_dropped() {
        let input = concat!(
            "not json\n",
            "\n",
            "{\"jsonrpc\":\"1.0\",\"id\":1,\"method\":\"initialize\"}\n",
            "{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"tools/list\"}\n",
        );
        let (client, server_io) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server_io);
        let mut server = McpServer::new(
            LineTransport::new(BufReader::new(&input.as_bytes()[..]), server_write),
            deps(),
        );
        drop(server_read);

        server.serve().await.unwrap();
        drop(server);

        let mut lines = BufReader::new(client).lines();
        let first: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(first["id"], 2);
        assert!(lines.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_utf8_line_does_not_stop_the_loop() {
        let input: &[u8] =
            b"\xff\xfe garbage\n{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"tools/list\"}\n";
        let (client, server_io) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server_io);
        let mut server = McpServer::new(LineTransport::new(BufReader::new(input), server_write), deps());
        drop(server_read);

        server.serve().await.unwrap();
        drop(server);

        let mut lines = BufReader::new(client).lines();
        let response: Value =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(response["id"], 2);
        assert!(response["result"]["tools"].is_array());
    }

    #[tokio::test]
    async fn serve_ends_at_end_of_input() {
        let (mut client, server_io) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server_io);
        let mut server = McpServer::new(LineTransport::new(BufReader::new(server_read), server_write), deps());

        client
            .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n")
            .await
            .unwrap();
        client.shutdown().await.unwrap();

        server.serve().await.unwrap();
    }
}
