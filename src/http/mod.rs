//! HTTP transport with server-push sessions.
//!
//! A client opens `GET /sse`, receives a `transport/ready` message naming
//! its message endpoint, and posts requests there. Responses come back as
//! `message` events on the stream. `/invoke` skips the handshake for plain
//! request/response clients.

pub mod routes;
pub mod sessions;

pub use routes::{router, AppState};
pub use sessions::{Session, SessionGuard, SessionRegistry};

use std::future::Future;
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::mcp::core::Dependencies;

/// Binds `config.host:config.port` and serves until SIGINT or SIGTERM.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or serving fails.
pub async fn serve(config: &ServerConfig, deps: Dependencies) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    serve_on(listener, AppState::new(deps, config.keepalive())).await
}

/// Serves on an already-bound listener until SIGINT or SIGTERM.
///
/// # Errors
///
/// Returns an error if serving fails.
pub async fn serve_on(listener: tokio::net::TcpListener, state: AppState) -> std::io::Result<()> {
    serve_with_shutdown(listener, state, shutdown_signal()).await
}

/// Serves on `listener` until `signal` resolves.
///
/// Every push session is closed as soon as `signal` fires so open `/sse`
/// streams end and the graceful shutdown can complete.
///
/// # Errors
///
/// Returns an error if serving fails.
pub async fn serve_with_shutdown<F>(
    listener: tokio::net::TcpListener,
    state: AppState,
    signal: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let sessions = Arc::clone(&state.sessions);
    tracing::info!(addr = %listener.local_addr()?, "HTTP transport listening");

    let shutdown = async move {
        signal.await;
        let open = sessions.len();
        sessions.close_all();
        tracing::info!(sessions = open, "Closed push sessions");
    };

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("HTTP transport stopped");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (Ok(mut sigint), Ok(mut sigterm)) = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) else {
        tracing::warn!("Could not install signal handlers");
        return std::future::pending().await;
    };

    tokio::select! {
        _ = sigint.recv() => tracing::info!("Received SIGINT, initiating graceful shutdown"),
        _ = sigterm.recv() => tracing::info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

#[cfg(windows)]
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("Received Ctrl+C, initiating graceful shutdown");
    } else {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::catalog::ToolCatalog;
    use crate::executor::Executor;

    #[tokio::test]
    async fn shutdown_ends_open_push_sessions() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let deps = Dependencies::from_executor(Executor::new(Arc::new(ToolCatalog::new())));
        let state = AppState::new(deps, Duration::from_secs(60));
        let sessions = Arc::clone(&state.sessions);

        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve_with_shutdown(listener, state, async move {
            let _ = stopped.await;
        }));

        let mut stream = reqwest::get(format!("http://{addr}/sse")).await.unwrap();
        let mut received = Vec::new();
        while !String::from_utf8_lossy(&received).contains("transport/ready") {
            let chunk = stream.chunk().await.unwrap().unwrap();
            received.extend_from_slice(&chunk);
        }
        assert_eq!(sessions.len(), 1);

        stop.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("server kept running with an open push session")
            .unwrap()
            .unwrap();
        assert!(sessions.is_empty());
        assert!(matches!(stream.chunk().await, Ok(None) | Err(_)));
    }
}
