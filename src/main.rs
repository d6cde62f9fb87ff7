use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use render_guard::config::{AppConfig, LoggingConfig};
use render_guard::http::{Admission, AdmissionGuard};
use render_guard::ratelimit::{
    spawn_periodic_sweeper, ManualClock, MemoryWindowStore, RateLimiter, TracingSink,
    FORWARDED_FOR_HEADER, REAL_IP_HEADER, SITE_ID_HEADER,
};

#[derive(Parser, Debug)]
#[command(name = "render-guard", version, about = "Sliding-window admission control")]
struct Cli {
    /// Configuration file (YAML); RENDER_GUARD__* variables override it
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the effective policy table as YAML
    Policies,

    /// Replay requests against a policy and print each decision as JSON
    Simulate {
        /// Endpoint class to check against
        #[arg(short, long)]
        endpoint: String,

        /// Site token header value
        #[arg(long)]
        site_id: Option<String>,

        /// X-Forwarded-For header value
        #[arg(long)]
        forwarded_for: Option<String>,

        /// X-Real-IP header value
        #[arg(long)]
        real_ip: Option<String>,

        /// Number of requests to replay
        #[arg(short = 'n', long, default_value_t = 10)]
        requests: u32,

        /// Simulated milliseconds between requests
        #[arg(long, default_value_t = 0)]
        spacing_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    init_tracing(&config.logging);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let policies = config
        .rate_limiting
        .policy_table()
        .context("failed to load rate limit policies")?;
    info!(policies = policies.len(), "Configuration loaded");

    match cli.command {
        Command::Policies => {
            print!("{}", serde_yaml::to_string(&policies.to_file())?);
        }
        Command::Simulate {
            endpoint,
            site_id,
            forwarded_for,
            real_ip,
            requests,
            spacing_ms,
        } => {
            let clock = ManualClock::new(chrono::Utc::now().timestamp_millis());
            let limiter = Arc::new(RateLimiter::with_parts(
                MemoryWindowStore::new(),
                Arc::new(clock.clone()),
                Arc::new(TracingSink),
                config.rate_limiting.limiter_settings(),
            ));

            let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
            let sweeper = config.rate_limiting.sweep_interval().map(|interval| {
                spawn_periodic_sweeper(
                    limiter.clone(),
                    interval,
                    policies.max_window_millis(),
                    async move {
                        tokio::select! {
                            _ = stop_rx => {}
                            _ = shutdown_signal() => {}
                        }
                    },
                )
            });

            let guard = AdmissionGuard::new(limiter, policies);
            let policy = guard.policy(&endpoint)?.clone();

            let mut headers: Vec<(&str, &str)> = Vec::new();
            if let Some(value) = site_id.as_deref() {
                headers.push((SITE_ID_HEADER, value));
            }
            if let Some(value) = forwarded_for.as_deref() {
                headers.push((FORWARDED_FOR_HEADER, value));
            }
            if let Some(value) = real_ip.as_deref() {
                headers.push((REAL_IP_HEADER, value));
            }

            let spacing = i64::try_from(spacing_ms).context("spacing is too large")?;
            for seq in 0..requests {
                let outcome = guard.check(headers.as_slice(), &policy);
                let line = match &outcome {
                    Admission::Allowed { result, headers, .. } => serde_json::json!({
                        "request": seq,
                        "status": 200,
                        "result": result,
                        "headers": headers,
                    }),
                    Admission::Denied { result, response, .. } => serde_json::json!({
                        "request": seq,
                        "status": response.status,
                        "result": result,
                        "headers": response.headers,
                        "body": response.body,
                    }),
                };
                println!("{}", line);
                clock.advance(spacing);
            }

            let _ = stop_tx.send(());
            if let Some(handle) = sweeper {
                handle.await?;
            }
        }
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.with_thread_ids(true).init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping");
        }
    }
}
