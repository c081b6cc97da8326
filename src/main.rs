//! outbound-guard
//!
//! Validates guard configurations and probes services through the resilient
//! invoker.
//!
//! ```text
//!     outbound-guard check            outbound-guard probe --url ... --count N
//!            │                                   │
//!            ▼                                   ▼
//!     load + validate config          ┌──────────────────────────────┐
//!            │                        │ RestClient (N GETs, C at once)│
//!            ▼                        └──────────────┬───────────────┘
//!     print resolved config                          ▼
//!                                     ┌──────────────────────────────┐
//!                                     │ ResilientInvoker             │
//!                                     │ cache → bucket → retry → audit│
//!                                     └──────────────┬───────────────┘
//!                                                    ▼
//!                                     status, cache stats, audit trail
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::task::JoinSet;

use outbound_guard::audit::AuditFilter;
use outbound_guard::clients::RestClient;
use outbound_guard::config::watcher::ConfigWatcher;
use outbound_guard::config::{load_config, GuardConfig, ServiceConfig};
use outbound_guard::lifecycle::{spawn_signal_handler, Shutdown};
use outbound_guard::observability::{init_logging, init_metrics};
use outbound_guard::ResilientInvoker;

#[derive(Parser)]
#[command(name = "outbound-guard")]
#[command(about = "Rate-limited, cached, retried outbound calls", long_about = None)]
struct Cli {
    /// TOML configuration file; built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and print it
    Check,
    /// Send GET requests through the invoker and report what happened
    Probe {
        /// Service base URL
        #[arg(long)]
        url: String,

        /// Path requested on every call
        #[arg(long, default_value = "")]
        path: String,

        /// Total number of requests
        #[arg(long, default_value_t = 1)]
        count: usize,

        /// Requests in flight at once
        #[arg(long, default_value_t = 1)]
        concurrency: usize,

        /// Environment variable holding a bearer API key
        #[arg(long)]
        api_key_env: Option<String>,

        /// Follow edits to the configuration file while probing
        #[arg(long)]
        watch: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GuardConfig::default(),
    };

    init_logging(&config.observability)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?cli.config,
        "outbound-guard starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    match cli.command {
        Commands::Check => {
            println!("{}", toml::to_string_pretty(&config)?);
            tracing::info!(services = config.services.len(), "Configuration is valid");
        }
        Commands::Probe {
            url,
            path,
            count,
            concurrency,
            api_key_env,
            watch,
        } => {
            let shutdown = Shutdown::new();
            spawn_signal_handler(shutdown.clone());

            let invoker = Arc::new(
                ResilientInvoker::new("probe", &config)?.with_shutdown(shutdown.token()),
            );

            // the watcher handle must outlive the probe
            let _watcher = match (&cli.config, watch) {
                (Some(path), true) => {
                    let (watcher, updates) = ConfigWatcher::new(path);
                    let handle = watcher.run()?;
                    tokio::spawn(invoker.clone().follow_config(updates));
                    Some(handle)
                }
                _ => None,
            };

            let service = ServiceConfig {
                name: "probe".to_string(),
                base_url: url,
                api_key_env,
            };
            let client = RestClient::new(&service, &config.timeouts, invoker.clone())?;

            let report = probe(client, path, count, concurrency.max(1)).await;
            let audit: Vec<_> = invoker
                .audit_logs(AuditFilter::all())
                .map(|record| (*record).clone())
                .collect();
            let summary = json!({
                "requests": count,
                "succeeded": report.succeeded,
                "failed": report.failed,
                "rate_limit": invoker.rate_limit_status(),
                "cache": invoker.cache_stats(),
                "audit_stats": invoker.audit_stats(),
                "audit": audit,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);

            shutdown.trigger();
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

#[derive(Debug, Default)]
struct ProbeReport {
    succeeded: usize,
    failed: usize,
}

async fn probe(client: RestClient, path: String, count: usize, concurrency: usize) -> ProbeReport {
    let mut report = ProbeReport::default();
    let mut tasks = JoinSet::new();
    let mut launched = 0;

    while launched < count || !tasks.is_empty() {
        while launched < count && tasks.len() < concurrency {
            let client = client.clone();
            let path = path.clone();
            tasks.spawn(async move { client.get(&path, &[]).await });
            launched += 1;
        }

        match tasks.join_next().await {
            Some(Ok(Ok(_))) => report.succeeded += 1,
            Some(Ok(Err(e))) => {
                tracing::warn!(error = %e, "Probe request failed");
                report.failed += 1;
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, "Probe task panicked");
                report.failed += 1;
            }
            None => break,
        }
    }

    report
}
