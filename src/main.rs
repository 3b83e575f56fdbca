use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gatekeeper::admission::extension::{self, AgentCard};
use gatekeeper::admission::{AdmissionControl, Handler, Message, RequestContext, EXTENSION_HEADER};
use gatekeeper::config::GatekeeperConfig;
use gatekeeper::ratelimit::spawn_sweeper;

/// Drive a configured rate limiter with a burst of requests and print
/// every response as JSON.
#[derive(Debug, Parser)]
#[command(name = "gatekeeper", version, about)]
struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<String>,

    /// Remote address the simulated requests come from
    #[arg(long, default_value = "127.0.0.1")]
    remote_addr: String,

    /// Subscription tier of the simulated client
    #[arg(long)]
    tier: Option<String>,

    /// Number of requests to send
    #[arg(short = 'n', long, default_value_t = 25)]
    requests: usize,

    /// Request usage signals on every response
    #[arg(long)]
    signal: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

/// The protected unit of work for the simulation.
struct HelloWorld;

#[async_trait]
impl Handler for HelloWorld {
    async fn handle(&self, _context: &RequestContext) -> gatekeeper::Result<Message> {
        Ok(Message::text("Hello World"))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .init();
    }

    info!("Starting Gatekeeper");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = GatekeeperConfig::load(args.config.as_deref())?;
    let limiter = Arc::new(config.build_limiter()?);
    let admission = Arc::new(
        AdmissionControl::new(Arc::clone(&limiter)).with_policies(config.policy_table()?),
    );

    let sweeper = config
        .eviction
        .enabled
        .then(|| {
            spawn_sweeper(
                Arc::clone(&limiter),
                config.eviction.sweep_interval(),
                config.eviction.idle_ttl(),
            )
        })
        .transpose()?;

    let handler = admission.wrap(HelloWorld);

    let mut context = RequestContext::new().with_remote_addr(args.remote_addr.clone());
    if let Some(tier) = &args.tier {
        context = context.with_tier(tier.clone());
    }
    if args.signal {
        // Ask for usage signals the way a client would after reading the card
        let card = extension::add_to_card(AgentCard {
            name: "Hello World Agent".to_string(),
            ..Default::default()
        });
        let mut headers = HashMap::new();
        if extension::intercept(Some(&card), &mut headers) {
            if let Some(value) = headers.get(EXTENSION_HEADER) {
                context = context.with_extension_header(value);
            }
        }
    }

    tokio::select! {
        result = simulate(&handler, &context, args.requests) => result?,
        _ = signal::ctrl_c() => {
            warn!("Received Ctrl+C, stopping simulation");
        }
    }

    if let Some(sweeper) = sweeper {
        sweeper.shutdown().await;
    }

    info!(keys = limiter.key_count(), "Gatekeeper stopped");
    Ok(())
}

async fn simulate<H: Handler>(
    handler: &H,
    context: &RequestContext,
    requests: usize,
) -> anyhow::Result<()> {
    for _ in 0..requests {
        let message = handler.handle(context).await?;
        println!("{}", serde_json::to_string(&message)?);
    }
    Ok(())
}
