//! toolrelay: expose registered tools to AI agents over MCP
//!
//! Serves the built-in tools over stdio or HTTP, or runs the connection
//! doctor against a server.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use toolrelay::builtin::register_builtins;
use toolrelay::catalog::ToolCatalog;
use toolrelay::config::{self, Config};
use toolrelay::doctor::{self, ConnectionTester};
use toolrelay::executor::Executor;
use toolrelay::ledger::FailureLedger;
use toolrelay::mcp::{Dependencies, McpServer};
use toolrelay::state::MemoryStateStore;

/// Expose registered tools to AI agents over MCP.
///
/// Serves HTTP with server-push sessions by default, or stdio with `--stdio`.
#[derive(Parser, Debug)]
#[command(name = "toolrelay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Serve on stdin/stdout instead of HTTP
    #[arg(long)]
    stdio: bool,

    /// HTTP bind address (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that a server answers initialize, tools/list and tools/call
    Doctor {
        /// Test the stdio transport in-process
        #[arg(long)]
        stdio: bool,

        /// Test the HTTP server at this base URL
        #[arg(long)]
        url: Option<String>,

        /// Per-message timeout in seconds
        #[arg(long, default_value_t = 8)]
        timeout: u64,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Determines the log level from CLI arguments.
#[allow(clippy::match_same_arms)] // Explicit "warn" arm for clarity
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN,
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber for logging.
///
/// Logs go to stderr; stdout carries the stdio transport.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Builds the catalog, ledger and executor described by `cfg`.
fn build_dependencies(cfg: &Config) -> Result<Dependencies, String> {
    let ledger = match &cfg.failure_log.path {
        Some(path) => FailureLedger::open(path, cfg.failure_log.decay_base, cfg.failure_log.max_recent)
            .map_err(|e| format!("Failure ledger error: {e}"))?,
        None => FailureLedger::in_memory(cfg.failure_log.decay_base, cfg.failure_log.max_recent),
    };
    let ledger = Arc::new(ledger);

    let catalog = Arc::new(ToolCatalog::new());
    register_builtins(&catalog, Some(Arc::clone(&ledger)))
        .map_err(|e| format!("Tool registration error: {e}"))?;

    let executor = Executor::new(catalog)
        .with_ledger(ledger)
        .with_state_store(Arc::new(MemoryStateStore::new()))
        .with_retry_policy(cfg.executor.retry_policy());

    Ok(Dependencies::from_executor(executor))
}

fn run_doctor(
    runtime: &tokio::runtime::Runtime,
    deps: Dependencies,
    stdio: bool,
    url: Option<&str>,
    timeout: u64,
    json: bool,
) -> ExitCode {
    let report = match doctor::resolve_target(stdio, url) {
        Ok(target) => {
            let tester = ConnectionTester::new(Duration::from_secs(timeout));
            runtime.block_on(tester.run(&target, deps))
        }
        Err(report) => report,
    };

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("Failed to serialise report: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        println!("{}", doctor::render_report(&report));
    }

    if report.ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Entry point for the toolrelay server.
fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration
    let config_path = args.config.as_deref();
    let mut cfg = match config::load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(host) = args.host {
        cfg.server.host = host;
    }
    if let Some(port) = args.port {
        cfg.server.port = port;
    }

    // Initialise logging
    let log_level = get_log_level(args.verbose, args.quiet, &cfg.logging.level);
    init_tracing(log_level);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .max_blocking_threads(cfg.executor.worker_threads)
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    let deps = match build_dependencies(&cfg) {
        Ok(deps) => deps,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(Command::Doctor {
        stdio,
        url,
        timeout,
        json,
    }) = args.command
    {
        return run_doctor(&runtime, deps, stdio, url.as_deref(), timeout, json);
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Starting toolrelay server");

    let result = if args.stdio {
        info!("Serving on stdio");
        let mut server = McpServer::stdio(deps);
        runtime.block_on(server.run())
    } else {
        runtime.block_on(toolrelay::http::serve(&cfg.server, deps))
    };

    match result {
        Ok(()) => {
            info!("Server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn verbosity_overrides_config() {
        assert_eq!(get_log_level(0, false, "info"), Level::INFO);
        assert_eq!(get_log_level(0, false, "bogus"), Level::WARN);
        assert_eq!(get_log_level(2, false, "error"), Level::DEBUG);
        assert_eq!(get_log_level(3, true, "trace"), Level::ERROR);
    }

    #[test]
    fn doctor_subcommand_parses() {
        let args = Args::parse_from(["toolrelay", "doctor", "--stdio", "--json"]);
        assert!(matches!(
            args.command,
            Some(Command::Doctor { stdio: true, json: true, .. })
        ));
    }

    #[test]
    fn default_config_builds_dependencies() {
        let deps = build_dependencies(&Config::default()).unwrap();
        assert_eq!(deps.lister.list_tools().len(), 3);
    }
}
