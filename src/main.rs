use std::io;
use std::sync::Arc;

use clap::{CommandFactory, Parser};
use tracing::info;
use tracing_subscriber::EnvFilter;

use roulette_ledger::cli::{self, Args, Command};
use roulette_ledger::ledger::Ledger;
use roulette_ledger::settings::Settings;
use roulette_ledger::store::ChatStore;
use roulette_ledger::web;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Command::Completions { shell } = &args.command {
        clap_complete::generate(*shell, &mut Args::command(), "roulette-ledger", &mut io::stdout());
        return Ok(());
    }

    let settings = Settings::resolve(args.config.as_deref(), args.settings_overrides())?;

    // RUST_LOG wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level)),
        )
        .with_writer(io::stderr)
        .init();

    let store = if args.ephemeral {
        ChatStore::in_memory()
    } else {
        ChatStore::json_file(&settings.data_file)
    }
    .with_defaults(settings.chat_defaults());
    info!(store = %store.describe(), default_window = settings.default_window, "ledger ready");
    let ledger = Arc::new(Ledger::new(store));

    if let Command::Serve { .. } = args.command {
        web::serve(ledger, &settings.bind_addr()).await?;
        return Ok(());
    }

    let output = tokio::task::spawn_blocking(move || cli::run(&args.command, &ledger)).await??;
    print!("{output}");
    Ok(())
}
