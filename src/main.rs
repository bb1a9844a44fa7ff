use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod app;
mod cards;
mod cli;
mod config;
mod eid;
mod lock;
mod semantic;
mod storage;
mod sync;
mod template;
#[cfg(test)]
mod tests;

use app::AppFactory;
use lock::FileLock;

fn init_logging() {
    let filter = EnvFilter::try_from_env("CARDVAULT_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let args = cli::Args::parse();
    tracing::debug!(command = ?args.command, "parsed arguments");

    let paths = AppFactory::get_paths()?;
    let _lock = FileLock::try_acquire(&paths.base_path)
        .with_context(|| format!("failed to lock {}", paths.base_path.display()))?;

    let config = AppFactory::create_config(&paths)?;
    let app_service = AppFactory::create_app_service(&paths, &config)?;

    // First ctrl-c cancels a running transfer; the sync manager decides
    // whether that happened before or after the remote was touched.
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupted, cancelling");
            on_signal.cancel();
        }
    });

    let result = cli::run(args.command, &app_service, cancel).await;
    app_service.shutdown();

    match result {
        Ok(()) => Ok(()),
        Err(cli::errors::CliError::UserCancelled) => {
            eprintln!("cancelled");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
