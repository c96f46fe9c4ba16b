//! Resilient invoker service host.
//!
//! Loads configuration, starts logging, metrics, the admin API and the
//! config watcher, optionally drives simulated load, and drains in-flight
//! calls on Ctrl+C.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use resilient_invoker::config::{load_config, load_from_env, ConfigWatcher};
use resilient_invoker::lifecycle::{shutdown_and_drain, Shutdown};
use resilient_invoker::observability::{init_metrics, logging, PrometheusSink};
use resilient_invoker::simulate::{run_load, SimulatedUpstream};
use resilient_invoker::ResilientInvoker;

#[derive(Parser)]
#[command(name = "resilient-invoker")]
#[command(about = "Resilient invocation pipeline host", long_about = None)]
struct Args {
    /// TOML configuration file; environment variables override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Drive simulated traffic at this many requests per second.
    #[arg(long, default_value_t = 0)]
    simulate_rps: u32,

    /// Starting target for simulated traffic.
    #[arg(long, default_value = "primary")]
    target: String,

    /// Probability of a transient failure in the simulated upstream.
    #[arg(long, default_value_t = 0.2)]
    failure_rate: f64,

    /// Mean latency of the simulated upstream in milliseconds.
    #[arg(long, default_value_t = 50)]
    latency_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => load_from_env()?,
    };

    logging::init(&config.observability)?;
    tracing::info!("resilient-invoker v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        max_concurrent = config.bottleneck.max_concurrent,
        max_queue = config.bottleneck.max_queue,
        breaker_threshold = config.circuit_breaker.threshold,
        max_retries = config.retry.max_retries,
        tiers = config.fallback.tiers.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let drain_timeout = Duration::from_secs(config.lifecycle.drain_timeout_secs);
    let admin = config.admin.clone();
    let invoker = Arc::new(ResilientInvoker::with_metrics(config, Arc::new(PrometheusSink))?);
    let shutdown = Shutdown::new();

    // Hot reload
    let _watcher = match &args.config {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let handle = watcher.run()?;
            let invoker = invoker.clone();
            let mut stop = shutdown.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = stop.recv() => break,
                        update = updates.recv() => match update {
                            Some(new_config) => {
                                if let Err(e) = invoker.reload(new_config) {
                                    tracing::error!(error = %e, "Rejected config reload");
                                }
                            }
                            None => break,
                        },
                    }
                }
            });
            Some(handle)
        }
        None => None,
    };

    if admin.enabled {
        let addr: SocketAddr = admin.bind_address.parse()?;
        if admin.api_key == "CHANGE_ME_IN_PRODUCTION" {
            tracing::warn!("Admin API is using the placeholder api_key");
        }
        let invoker = invoker.clone();
        let stop = shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = resilient_invoker::admin::serve(invoker, addr, stop).await {
                tracing::error!(error = %e, "Admin API failed");
            }
        });
    }

    if args.simulate_rps > 0 {
        let upstream = Arc::new(SimulatedUpstream::new(
            args.failure_rate,
            0.01,
            Duration::from_millis(args.latency_ms),
        ));
        tokio::spawn(run_load(
            invoker.clone(),
            upstream,
            args.simulate_rps,
            args.target.clone(),
            shutdown.subscribe(),
        ));
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Ctrl+C received");

    if !shutdown_and_drain(&shutdown, &invoker, drain_timeout).await {
        tracing::warn!("Exiting with calls still in flight");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
