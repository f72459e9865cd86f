//! # r-token-idle demo
//!
//! Simulates a client that uses a token a few times, then goes idle until
//! the token times out, while the background flush loop persists the
//! extended deadline.
//!
//! ```bash
//! RUST_LOG=debug cargo run -- --client-timeout 6 --minimum-timeout 3 --uses 3 --pause-ms 1500
//! ```

use clap::Parser;
use r_token_idle::{
    ClientPolicy, MemoryClientLister, MemoryTokenStore, RTokenError, SystemClock, TimeoutConfig,
    TimeoutValidator, TokenRecord, TokenStore, UserRecord,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "r-token-idle-demo", about = "Inactivity timeout demo")]
struct Args {
    /// Cluster default inactivity timeout in seconds (0 disables).
    #[arg(long, default_value_t = 30)]
    default_timeout: i64,

    /// Cluster minimum inactivity timeout in seconds; the flush loop ticks at a third of it.
    #[arg(long, default_value_t = 3)]
    minimum_timeout: i64,

    /// Inactivity timeout of the demo client in seconds.
    #[arg(long, default_value_t = 6)]
    client_timeout: i64,

    /// Safety margin added to the next flush time, in seconds.
    #[arg(long, default_value_t = 1)]
    safety_margin: u64,

    /// Number of successful uses before going idle.
    #[arg(long, default_value_t = 3)]
    uses: u32,

    /// Pause between uses, in milliseconds.
    #[arg(long, default_value_t = 1500)]
    pause_ms: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    if let Err(err) = run(args).await {
        error!(error = %err, "demo failed");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), RTokenError> {
    let config = TimeoutConfig::new(args.default_timeout, args.minimum_timeout)
        .with_safety_margin(args.safety_margin);

    let store = MemoryTokenStore::new();
    let lister = MemoryClientLister::new();
    lister.set(ClientPolicy::new("demo-client", Some(args.client_timeout)))?;

    let clock = Arc::new(SystemClock);
    let validator = Arc::new(TimeoutValidator::new(
        &config,
        Arc::new(store.clone()),
        Arc::new(lister),
        clock.clone(),
    )?);

    let shutdown = CancellationToken::new();
    let background = Arc::clone(&validator);
    let loop_shutdown = shutdown.child_token();
    let flush_loop = tokio::spawn(async move { background.run(loop_shutdown).await });

    let user = UserRecord::new("alice", uuid::Uuid::new_v4().to_string());
    let token = store.insert(
        TokenRecord::issue("demo-client", &user, chrono::Utc::now())
            .with_inactivity_timeout(args.client_timeout),
    )?;

    for attempt in 1..=args.uses {
        let current = store.get(&token.name).await?;
        validator.validate(&current, &user).await?;
        info!(
            attempt,
            persisted_timeout = current.inactivity_timeout_seconds,
            "token accepted"
        );
        tokio::time::sleep(Duration::from_millis(args.pause_ms)).await;
    }

    let idle = Duration::from_secs(args.client_timeout.max(0) as u64 + 1);
    info!(?idle, "going idle");
    tokio::time::sleep(idle).await;

    let current = store.get(&token.name).await?;
    match validator.validate(&current, &user).await {
        Err(err) if err.is_timed_out() => info!(
            persisted_timeout = current.inactivity_timeout_seconds,
            "token timed out after inactivity"
        ),
        Err(err) => return Err(err),
        Ok(()) => info!("token is still valid"),
    }

    shutdown.cancel();
    if let Err(err) = flush_loop.await {
        error!(error = %err, "flush loop task failed");
    }
    Ok(())
}
