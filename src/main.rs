//! Rollcall - Entry Point
//!
//! Modes:
//! - Default: webhook server (`POST /callback`)
//! - --repl <identity> / -r: chat as one identity over stdin

use rollcall::server::{self, AppState};
use rollcall::{store, Config, Dispatcher, NullMessenger};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Parse args
    let args: Vec<String> = std::env::args().collect();
    let repl_identity = args
        .iter()
        .position(|a| a == "--repl" || a == "-r")
        .map(|i| args.get(i + 1).cloned().unwrap_or_else(|| "local".to_string()));
    let help_mode = args.iter().any(|a| a == "--help" || a == "-h");

    if help_mode {
        println!("Rollcall v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: rollcall [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --repl, -r <identity>  Chat from stdin as <identity>");
        println!("  --help, -h             Show this help");
        println!();
        println!("Default: Run the webhook server");
        println!();
        println!("Environment variables:");
        println!("  ROLLCALL_STORE           memory | sqlite | redis (default: memory)");
        println!("  ROLLCALL_DB_PATH         SQLite database path");
        println!("  REDIS_URL                Redis connection URL");
        println!("  ROLLCALL_LOCK_LEASE_MS   Aggregate lock lease (default: 5000)");
        println!("  ROLLCALL_LOCK_WAIT_MS    Lock wait budget (default: 3000)");
        println!("  ROLLCALL_LOCK_RETRY_MS   Lock retry interval (default: 50)");
        println!("  ROLLCALL_TALK_TTL_SECS   Forget conversations idle this long");
        println!("  ROLLCALL_PORT            Webhook port (default: 10101)");
        println!("  ROLLCALL_RESET_STORE     Clear the store on startup");
        return Ok(());
    }

    // RUST_LOG directives, e.g. `info,rollcall=debug`
    let log_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if repl_identity.is_some() {
        // REPL owns stdout - log to stderr as JSON
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(log_filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(log_filter)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    info!("Rollcall v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    let store = store::open_store(&config).await?;
    if config.reset_store {
        info!("Clearing {} store", store.name());
        store.clear().await?;
    }

    let registry = rollcall::commands::registry()?;
    info!("{} keywords registered", registry.len());
    let port = config.port;
    let dispatcher = Dispatcher::new(registry, store, Arc::new(NullMessenger), config);

    match repl_identity {
        Some(identity) => repl(&dispatcher, &identity).await,
        None => server::run(Arc::new(AppState::new(dispatcher)), port).await,
    }
}

/// One line in, one response out
async fn repl(dispatcher: &Dispatcher, identity: &str) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let response = dispatcher.handle(identity, line.trim()).await;
        println!("{}", response.text);
        if response.is_choice() {
            let buttons: Vec<String> = response.choices.iter().map(|c| format!("[{}]", c)).collect();
            println!("{}", buttons.join(" "));
        }
    }
    Ok(())
}
